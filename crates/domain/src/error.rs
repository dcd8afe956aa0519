use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("bad lat/lon")]
    BadCoordinates,
    #[error("not found")]
    NotFound,
    #[error("store operation failed: {0}")]
    Store(String),
}
