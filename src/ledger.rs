use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// The two workflows this tool drives against the recipient set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Operation {
    /// Fund each recipient and freeze its token account
    #[value(name = "transferAndFreeze")]
    TransferAndFreeze,
    /// Thaw token accounts frozen by a previous transferAndFreeze run
    #[value(name = "thaw")]
    Thaw,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::TransferAndFreeze => write!(f, "transferAndFreeze"),
            Operation::Thaw => write!(f, "thaw"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid status code {0} (expected 0, 1 or 2)")]
    InvalidStatus(u8),
    #[error("cannot record thaw for {0}: transfer is not confirmed")]
    ThawBeforeTransfer(String),
    #[error("unknown recipient {0}")]
    UnknownRecipient(String),
}

/// Per-operation outcome. Persisted as 0 / 1 / 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusCode {
    NotExecuted,
    Confirmed,
    Ambiguous,
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        match status {
            StatusCode::NotExecuted => 0,
            StatusCode::Confirmed => 1,
            StatusCode::Ambiguous => 2,
        }
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(StatusCode::NotExecuted),
            1 => Ok(StatusCode::Confirmed),
            2 => Ok(StatusCode::Ambiguous),
            other => Err(LedgerError::InvalidStatus(other)),
        }
    }
}

/// Also reads files that use the `transferAndFreezeTransaction` /
/// `transferAndFreezeStatus` / `thawTransaction` field names, where a null
/// status means not executed. Writes always use the names below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRecord {
    #[serde(default, alias = "transferAndFreezeTransaction")]
    pub transfer_tx_ref: Option<String>,
    #[serde(alias = "transferAndFreezeStatus", deserialize_with = "status_or_not_executed")]
    pub transfer_status: StatusCode,
    #[serde(default, alias = "thawTransaction")]
    pub thaw_tx_ref: Option<String>,
    #[serde(deserialize_with = "status_or_not_executed")]
    pub thaw_status: StatusCode,
}

fn status_or_not_executed<'de, D>(deserializer: D) -> Result<StatusCode, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StatusCode>::deserialize(deserializer)?.unwrap_or(StatusCode::NotExecuted))
}

impl DistributionRecord {
    pub fn new() -> Self {
        Self {
            transfer_tx_ref: None,
            transfer_status: StatusCode::NotExecuted,
            thaw_tx_ref: None,
            thaw_status: StatusCode::NotExecuted,
        }
    }

    pub fn status(&self, operation: Operation) -> StatusCode {
        match operation {
            Operation::TransferAndFreeze => self.transfer_status,
            Operation::Thaw => self.thaw_status,
        }
    }

    pub fn tx_ref(&self, operation: Operation) -> Option<&str> {
        match operation {
            Operation::TransferAndFreeze => self.transfer_tx_ref.as_deref(),
            Operation::Thaw => self.thaw_tx_ref.as_deref(),
        }
    }

    /// Reconciliation entry point: flips the status but keeps the stored reference.
    pub fn set_status(&mut self, operation: Operation, status: StatusCode) {
        match operation {
            Operation::TransferAndFreeze => self.transfer_status = status,
            Operation::Thaw => self.thaw_status = status,
        }
    }

    fn record(&mut self, operation: Operation, status: StatusCode, tx_ref: String) {
        match operation {
            Operation::TransferAndFreeze => {
                self.transfer_status = status;
                self.transfer_tx_ref = Some(tx_ref);
            }
            Operation::Thaw => {
                self.thaw_status = status;
                self.thaw_tx_ref = Some(tx_ref);
            }
        }
    }
}

impl Default for DistributionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Local status store, keyed by recipient address.
///
/// Iteration order is the address order of the underlying `BTreeMap`, which is
/// what the batch planner relies on for a stable recipient order across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    path: PathBuf,
    records: BTreeMap<String, DistributionRecord>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger from {}", path.display()))?;
        let records: BTreeMap<String, DistributionRecord> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse ledger {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Writes the full snapshot. The tmp-file + rename keeps the previous
    /// snapshot intact if the process dies mid-write.
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .with_context(|| format!("Failed to write ledger snapshot {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace ledger {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a fresh record; an address already present is left untouched.
    pub fn insert_new(&mut self, address: String) -> bool {
        if self.records.contains_key(&address) {
            return false;
        }
        self.records.insert(address, DistributionRecord::new());
        true
    }

    #[cfg(test)]
    pub fn get(&self, address: &str) -> Option<&DistributionRecord> {
        self.records.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DistributionRecord)> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut DistributionRecord)> {
        self.records.iter_mut()
    }

    /// Stores a confirmed or ambiguous outcome for one recipient.
    ///
    /// Thaw outcomes are refused for recipients whose transfer is not confirmed.
    pub fn record_outcome(
        &mut self,
        address: &str,
        operation: Operation,
        status: StatusCode,
        tx_ref: &str,
    ) -> Result<(), LedgerError> {
        let record = self
            .records
            .get_mut(address)
            .ok_or_else(|| LedgerError::UnknownRecipient(address.to_string()))?;
        if operation == Operation::Thaw && record.transfer_status != StatusCode::Confirmed {
            return Err(LedgerError::ThawBeforeTransfer(address.to_string()));
        }
        record.record(operation, status, tx_ref.to_string());
        Ok(())
    }

    pub fn count(&self, operation: Operation, status: StatusCode) -> usize {
        self.records
            .values()
            .filter(|r| r.status(operation) == status)
            .count()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| {
                r.transfer_status == StatusCode::Ambiguous || r.thaw_status == StatusCode::Ambiguous
            })
            .count()
    }
}
