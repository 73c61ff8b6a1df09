//! Append-only audit trail for deliberation traces and vote receipts.
//!
//! Sinks are fire-and-forget: a failed write is logged and swallowed so the
//! decision path never waits on, or fails because of, the archive.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::deliberation::DeliberationTrace;
use crate::logging::{log, obj, ts_epoch_ms, v_str, Domain, Level};
use crate::voter::VoteReceipt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record")]
pub enum AuditRecord {
    #[serde(rename = "trace")]
    Trace { ts: u64, trace: DeliberationTrace },
    #[serde(rename = "receipt")]
    Receipt { ts: u64, receipt: VoteReceipt },
}

pub trait AuditSink: Send + Sync {
    fn record_trace(&self, trace: &DeliberationTrace);
    fn record_receipt(&self, receipt: &VoteReceipt);
}

/// JSON-lines file, one record per line, flushed after every append.
#[derive(Debug)]
pub struct JsonlAudit {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonlAudit {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file: Mutex::new(file), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &AuditRecord) {
        if let Err(e) = self.try_append(record) {
            log(
                Level::Error,
                Domain::Audit,
                "append_failed",
                obj(&[("path", v_str(&self.path.to_string_lossy())), ("reason", v_str(&e.to_string()))]),
            );
        }
    }

    fn try_append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Read every record back. Lines that do not parse are skipped.
    pub fn replay(path: &Path) -> std::io::Result<Vec<AuditRecord>> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(reader
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect())
    }
}

impl AuditSink for JsonlAudit {
    fn record_trace(&self, trace: &DeliberationTrace) {
        self.append(&AuditRecord::Trace { ts: ts_epoch_ms(), trace: trace.clone() });
    }

    fn record_receipt(&self, receipt: &VoteReceipt) {
        self.append(&AuditRecord::Receipt { ts: ts_epoch_ms(), receipt: receipt.clone() });
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn traces(&self) -> Vec<DeliberationTrace> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                AuditRecord::Trace { trace, .. } => Some(trace),
                _ => None,
            })
            .collect()
    }

    pub fn receipts(&self) -> Vec<VoteReceipt> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                AuditRecord::Receipt { receipt, .. } => Some(receipt),
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: AuditRecord) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

impl AuditSink for MemoryAudit {
    fn record_trace(&self, trace: &DeliberationTrace) {
        self.push(AuditRecord::Trace { ts: ts_epoch_ms(), trace: trace.clone() });
    }

    fn record_receipt(&self, receipt: &VoteReceipt) {
        self.push(AuditRecord::Receipt { ts: ts_epoch_ms(), receipt: receipt.clone() });
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record_trace(&self, _trace: &DeliberationTrace) {}
    fn record_receipt(&self, _receipt: &VoteReceipt) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliberation::{DeliberationEngine, MarketPhases};
    use crate::profile::StrategyProfile;
    use crate::signals::{RiskSignal, SignalSet};
    use crate::voter::{ConsensusVoter, VoterConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_appends_and_replays() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("decisions.jsonl");
        let audit = Arc::new(JsonlAudit::open(&path).unwrap());

        let engine = DeliberationEngine::with_market_phases(MarketPhases::default(), audit.clone());
        let trace = engine.deliberate("h", &json!({}), "ctx-1");

        let voter = ConsensusVoter::new(VoterConfig::default());
        let signals = SignalSet { risk: Some(RiskSignal::block("lev")), ..Default::default() };
        let receipt = voter.cast_vote("ctx-1", &StrategyProfile::factory_default(), &signals, 0.0);
        audit.record_receipt(&receipt);

        let records = JsonlAudit::replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            AuditRecord::Trace { trace: t, .. } => assert_eq!(t.trace_id, trace.trace_id),
            other => panic!("expected trace, got {:?}", other),
        }
        match &records[1] {
            AuditRecord::Receipt { receipt: r, .. } => assert!(r.veto_active),
            other => panic!("expected receipt, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        std::fs::write(&path, "not json\n{\"record\":\"unknown\"}\n").unwrap();
        assert!(JsonlAudit::replay(&path).unwrap().is_empty());
        assert!(JsonlAudit::replay(&dir.path().join("missing.jsonl")).unwrap().is_empty());
    }
}
