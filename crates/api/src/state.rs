use std::sync::Arc;

use lacak_domain::ports::store::LocationStore;
use lacak_domain::tracker::TrackerService;
use lacak_infra::config::AppConfig;
use lacak_infra::store::CsvLocationStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub tracker: TrackerService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = CsvLocationStore::open(&config.store_path)?;
        Self::with_store(config, Arc::new(store)).await
    }

    pub async fn with_store(
        config: AppConfig,
        store: Arc<dyn LocationStore>,
    ) -> anyhow::Result<Self> {
        let tracker = TrackerService::load(store, config.stream_buffer).await?;
        Ok(Self { config, tracker })
    }
}
