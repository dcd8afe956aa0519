use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use lacak_domain::DomainResult;
use lacak_domain::error::DomainError;
use lacak_domain::location::{LocationRecord, RawRecord};
use lacak_domain::ports::BoxFuture;
use lacak_domain::ports::store::LocationStore;
use tokio::sync::Mutex;

const COLUMNS: [&str; 9] = [
    "device_id",
    "latitude",
    "longitude",
    "accuracy",
    "provider",
    "timestamp_iso",
    "timestamp_raw",
    "received_at",
    "raw_json",
];

/// Append-only CSV store, one row per reported location.
///
/// Appends are serialized behind an explicit lock; reads scan from the
/// start and tolerate a missing or malformed file by reading as empty.
pub struct CsvLocationStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl CsvLocationStore {
    /// Opens the store, writing the fixed column header first if the
    /// file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> DomainResult<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(store_error)?;
                }
            }
            let mut writer = csv::Writer::from_path(&path).map_err(store_error)?;
            writer.write_record(COLUMNS).map_err(store_error)?;
            writer.flush().map_err(store_error)?;
        }
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    fn append_row(&self, row: &RawRecord) -> DomainResult<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(store_error)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(row).map_err(store_error)?;
        writer.flush().map_err(store_error)?;
        Ok(())
    }

    fn read_rows(&self) -> Vec<RawRecord> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(_) => return Vec::new(),
        };
        let mut rows = Vec::new();
        for row in reader.deserialize::<RawRecord>() {
            match row {
                Ok(row) => rows.push(row),
                // A torn or malformed tail must never surface as a
                // partial record; stop at the last good row.
                Err(_) => break,
            }
        }
        rows
    }
}

impl LocationStore for CsvLocationStore {
    fn append(&self, record: &LocationRecord) -> BoxFuture<'_, DomainResult<()>> {
        let row = RawRecord::from(record);
        Box::pin(async move {
            let _guard = self.append_lock.lock().await;
            self.append_row(&row)
        })
    }

    fn read_all(&self) -> BoxFuture<'_, DomainResult<Vec<RawRecord>>> {
        Box::pin(async move { Ok(self.read_rows()) })
    }
}

fn store_error(err: impl std::fmt::Display) -> DomainError {
    DomainError::Store(err.to_string())
}
