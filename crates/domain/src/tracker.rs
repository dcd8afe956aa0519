use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};

use crate::DomainResult;
use crate::latest::{DevicePosition, latest_positions};
use crate::location::{LocationRecord, PayloadKind, RawRecord, normalize_payload};
use crate::ports::BoxFuture;
use crate::ports::store::LocationStore;
use crate::util;

/// Result of one ingestion call.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    Stored(LocationRecord),
    /// Status/heartbeat payload; acknowledged, nothing persisted.
    Ignored,
}

/// Ingestion and query service over an injected append-only store.
///
/// The latest-per-device index is seeded with one full scan and then
/// maintained incrementally on each append; the full-scan reducer
/// remains the fallback/audit path. Position changes are published to a
/// broadcast channel so live streams never re-scan the store.
#[derive(Clone)]
pub struct TrackerService {
    store: Arc<dyn LocationStore>,
    index: Arc<RwLock<BTreeMap<String, DevicePosition>>>,
    updates: broadcast::Sender<DevicePosition>,
}

impl TrackerService {
    pub async fn load(store: Arc<dyn LocationStore>, stream_buffer: usize) -> DomainResult<Self> {
        let rows = store.read_all().await?;
        let index = latest_positions(&rows);
        let (updates, _) = broadcast::channel(stream_buffer.max(1));
        Ok(Self {
            store,
            index: Arc::new(RwLock::new(index)),
            updates,
        })
    }

    /// Normalizes, stamps the receipt time, appends and publishes.
    ///
    /// The index write lock serializes the whole append path so store
    /// order, index state and published changes never diverge.
    pub async fn ingest(&self, payload: &Value) -> DomainResult<IngestOutcome> {
        let now = OffsetDateTime::now_utc();
        let location = match normalize_payload(payload, now)? {
            PayloadKind::Status => {
                tracing::debug!("ignoring status payload");
                return Ok(IngestOutcome::Ignored);
            }
            PayloadKind::Position(location) => location,
        };
        let record = location.into_record(util::format_rfc3339(now));

        let mut index = self.index.write().await;
        self.store.append(&record).await?;

        let position = DevicePosition::from(&RawRecord::from(&record));
        let changed = match index.get(&record.device_id) {
            Some(previous) => {
                (previous.latitude, previous.longitude) != (position.latitude, position.longitude)
            }
            None => true,
        };
        index.insert(record.device_id.clone(), position.clone());
        if changed {
            // No receivers connected is not an error.
            let _ = self.updates.send(position);
        }

        tracing::debug!(
            device_id = %record.device_id,
            latitude = record.latitude,
            longitude = record.longitude,
            "stored location"
        );
        Ok(IngestOutcome::Stored(record))
    }

    /// Last `limit` rows in arrival order, across all devices.
    pub async fn recent(&self, limit: usize) -> DomainResult<Vec<RawRecord>> {
        let rows = self.store.read_all().await?;
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.into_iter().skip(skip).collect())
    }

    /// Latest position per device, sorted by device id. `limit == 0`
    /// means unlimited.
    pub async fn all_latest(&self, limit: usize) -> Vec<DevicePosition> {
        let index = self.index.read().await;
        if limit > 0 {
            index.values().take(limit).cloned().collect()
        } else {
            index.values().cloned().collect()
        }
    }

    pub async fn latest_for_device(&self, device_id: &str) -> Option<DevicePosition> {
        self.index.read().await.get(device_id).cloned()
    }

    /// Full unreduced history in arrival order; may be large.
    pub async fn all_raw(&self) -> DomainResult<Vec<RawRecord>> {
        self.store.read_all().await
    }

    /// Most recently appended row regardless of device.
    pub async fn latest_overall(&self) -> DomainResult<Option<RawRecord>> {
        let mut rows = self.store.read_all().await?;
        Ok(rows.pop())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevicePosition> {
        self.updates.subscribe()
    }
}

/// In-memory store; backs tests and ephemeral deployments.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLocationStore {
    rows: Arc<RwLock<Vec<RawRecord>>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationStore for InMemoryLocationStore {
    fn append(&self, record: &LocationRecord) -> BoxFuture<'_, DomainResult<()>> {
        let row = RawRecord::from(record);
        let rows = self.rows.clone();
        Box::pin(async move {
            rows.write().await.push(row);
            Ok(())
        })
    }

    fn read_all(&self) -> BoxFuture<'_, DomainResult<Vec<RawRecord>>> {
        let rows = self.rows.clone();
        Box::pin(async move { Ok(rows.read().await.clone()) })
    }
}
