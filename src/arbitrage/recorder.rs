//! Opportunity audit records
//!
//! One JSON file per emitted opportunity, named
//! `{detected_at_ms}-{pool_key}-{n}.json`, written once and never updated.
//!
//! Created: 2026-02-04

use crate::types::OpportunityRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Destination for audit records
pub trait OpportunitySink: Send + Sync {
    fn record(&self, record: &OpportunityRecord) -> Result<()>;
}

/// Writes each record to its own file under a directory
pub struct JsonOpportunityRecorder {
    base_dir: PathBuf,
    sequence: AtomicU64,
}

impl JsonOpportunityRecorder {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create opportunity directory: {:?}", base_dir))?;
        Ok(Self {
            base_dir,
            sequence: AtomicU64::new(0),
        })
    }

    fn file_path(&self, record: &OpportunityRecord) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key: String = record
            .pool_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.base_dir.join(format!(
            "{}-{}-{}.json",
            record.detected_at.timestamp_millis(),
            key,
            n
        ))
    }
}

impl OpportunitySink for JsonOpportunityRecorder {
    fn record(&self, record: &OpportunityRecord) -> Result<()> {
        let path = self.file_path(record);
        let json = serde_json::to_string_pretty(record).context("Failed to serialize opportunity record")?;
        fs::write(&path, json).with_context(|| format!("Failed to write opportunity record: {:?}", path))?;
        Ok(())
    }
}

/// Keeps records in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    pub records: std::sync::Mutex<Vec<OpportunityRecord>>,
}

#[cfg(test)]
impl OpportunitySink for MemorySink {
    fn record(&self, record: &OpportunityRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> OpportunityRecord {
        OpportunityRecord {
            detected_at: Utc::now(),
            pool: "0x01".to_string(),
            pool_key: "WETH-USDC-500".to_string(),
            base_token: "0x02".to_string(),
            base_symbol: "WETH".to_string(),
            path: vec!["0x02".into(), "0x03".into(), "0x02".into()],
            path_symbols: vec!["WETH".into(), "USDC".into(), "WETH".into()],
            pools: vec!["0x01".into(), "0x04".into()],
            return_ratio: 1.01,
            profit_usd: 20.0,
        }
    }

    #[test]
    fn test_each_record_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonOpportunityRecorder::new(dir.path().join("opps")).unwrap();
        let rec = record();

        recorder.record(&rec).unwrap();
        recorder.record(&rec).unwrap();

        let mut files: Vec<_> = fs::read_dir(dir.path().join("opps"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with(&rec.detected_at.timestamp_millis().to_string()));
        assert!(files[0].contains("WETH-USDC-500"));

        let text = fs::read_to_string(dir.path().join("opps").join(&files[0])).unwrap();
        let parsed: OpportunityRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.return_ratio, 1.01);
        assert_eq!(parsed.path_symbols.len(), 3);
    }
}
