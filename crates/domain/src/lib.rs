pub mod error;
pub mod latest;
pub mod location;
pub mod ports;
pub mod tracker;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
