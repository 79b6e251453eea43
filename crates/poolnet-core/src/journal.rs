use crate::error::PoolError;
use crate::types::PoolId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Journal event types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalEventKind {
    PoolCreated,
    StatusChanged,
    ApyUpdated,
    RewardsAdded,
    AccountFunded,
    Staked,
    Unstaked,
    Redistributed,
    FallbackPaid,
    DebtRepaid,
    EmergencyWithdrawal,
}

impl JournalEventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PoolCreated => "pool_created",
            Self::StatusChanged => "status_changed",
            Self::ApyUpdated => "apy_updated",
            Self::RewardsAdded => "rewards_added",
            Self::AccountFunded => "account_funded",
            Self::Staked => "staked",
            Self::Unstaked => "unstaked",
            Self::Redistributed => "redistributed",
            Self::FallbackPaid => "fallback_paid",
            Self::DebtRepaid => "debt_repaid",
            Self::EmergencyWithdrawal => "emergency_withdrawal",
        }
    }
}

impl FromStr for JournalEventKind {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        const ALL: [JournalEventKind; 11] = [
            JournalEventKind::PoolCreated,
            JournalEventKind::StatusChanged,
            JournalEventKind::ApyUpdated,
            JournalEventKind::RewardsAdded,
            JournalEventKind::AccountFunded,
            JournalEventKind::Staked,
            JournalEventKind::Unstaked,
            JournalEventKind::Redistributed,
            JournalEventKind::FallbackPaid,
            JournalEventKind::DebtRepaid,
            JournalEventKind::EmergencyWithdrawal,
        ];
        let value = value.trim();
        ALL.into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| PoolError::validation(format!("unknown journal event kind '{}'", value)))
    }
}

/// Event emitted by a command, not yet chained.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEvent {
    pub kind: JournalEventKind,
    pub pool: Option<PoolId>,
    pub payload: Value,
}

impl JournalEvent {
    pub fn new<T: Serialize>(
        kind: JournalEventKind,
        pool: Option<PoolId>,
        payload: &T,
    ) -> Result<Self, PoolError> {
        let payload =
            serde_json::to_value(payload).map_err(|e| PoolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind,
            pool,
            payload,
        })
    }
}

/// Hash-chained journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub entry_id: String,
    pub index: u64,
    /// Shared by every entry produced by the same command.
    pub command_id: String,
    pub kind: JournalEventKind,
    pub pool: Option<PoolId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only journal of committed commands.
///
/// Entries are only ever appended, and only for commands that committed. Each entry hashes its
/// predecessor so a persisted journal can be verified on reload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a journal from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<JournalEntry>) -> Result<Self, PoolError> {
        for (expected_index, entry) in entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(PoolError::Journal(format!(
                    "journal index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }
        let journal = Self { entries };
        if !journal.verify_chain() {
            return Err(PoolError::Journal(
                "persisted journal hash-chain verification failed".to_string(),
            ));
        }
        Ok(journal)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head_hash(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.entry_hash.as_str())
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            if entry.previous_hash != previous_hash {
                return false;
            }
            if entry.entry_hash != compute_entry_hash(entry) {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }

    /// Chain a command's events onto the current head without mutating the journal.
    pub fn prepare(&self, timestamp: DateTime<Utc>, events: Vec<JournalEvent>) -> Vec<JournalEntry> {
        let command_id = Uuid::new_v4().to_string();
        let mut previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let mut index = self.entries.len() as u64;
        let mut prepared = Vec::with_capacity(events.len());

        for event in events {
            let mut entry = JournalEntry {
                entry_id: Uuid::new_v4().to_string(),
                index,
                command_id: command_id.clone(),
                kind: event.kind,
                pool: event.pool,
                timestamp,
                payload: event.payload,
                previous_hash: previous_hash.clone(),
                entry_hash: String::new(),
            };
            entry.entry_hash = compute_entry_hash(&entry);
            previous_hash = Some(entry.entry_hash.clone());
            index += 1;
            prepared.push(entry);
        }
        prepared
    }

    /// Append prepared entries. The whole batch is checked before anything is appended.
    pub fn commit(&mut self, entries: Vec<JournalEntry>) -> Result<(), PoolError> {
        let mut expected_index = self.entries.len() as u64;
        let mut expected_previous = self.entries.last().map(|e| e.entry_hash.clone());
        for entry in &entries {
            if entry.index != expected_index {
                return Err(PoolError::Journal(format!(
                    "commit index mismatch: expected {}, got {}",
                    expected_index, entry.index
                )));
            }
            if entry.previous_hash != expected_previous {
                return Err(PoolError::Journal(
                    "commit previous hash mismatch".to_string(),
                ));
            }
            if entry.entry_hash != compute_entry_hash(entry) {
                return Err(PoolError::Journal(
                    "commit hash mismatch for journal entry".to_string(),
                ));
            }
            expected_index += 1;
            expected_previous = Some(entry.entry_hash.clone());
        }
        self.entries.extend(entries);
        Ok(())
    }
}

fn compute_entry_hash(entry: &JournalEntry) -> String {
    let material = serde_json::json!({
        "index": entry.index,
        "command_id": entry.command_id,
        "kind": entry.kind,
        "pool": entry.pool,
        "timestamp": entry.timestamp,
        "payload": entry.payload,
        "previous_hash": entry.previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: JournalEventKind, amount: u64) -> JournalEvent {
        JournalEvent::new(kind, Some(PoolId(0)), &json!({ "amount": amount })).unwrap()
    }

    #[test]
    fn verifies_hash_chain_across_commands() {
        let mut journal = Journal::new();
        let first = journal.prepare(Utc::now(), vec![event(JournalEventKind::Staked, 10)]);
        journal.commit(first).unwrap();
        let second = journal.prepare(
            Utc::now(),
            vec![
                event(JournalEventKind::Redistributed, 5),
                event(JournalEventKind::FallbackPaid, 15),
            ],
        );
        assert_eq!(second[0].command_id, second[1].command_id);
        journal.commit(second).unwrap();

        assert_eq!(journal.len(), 3);
        assert!(journal.verify_chain());
        assert!(Journal::from_entries(journal.entries().to_vec()).is_ok());
    }

    #[test]
    fn detects_tampered_entries() {
        let mut journal = Journal::new();
        let prepared = journal.prepare(Utc::now(), vec![event(JournalEventKind::Staked, 10)]);
        journal.commit(prepared).unwrap();

        let mut entries = journal.entries().to_vec();
        entries[0].payload = json!({ "amount": 1_000_000 });
        assert!(matches!(
            Journal::from_entries(entries),
            Err(PoolError::Journal(_))
        ));
    }

    #[test]
    fn stale_batch_is_rejected_whole() {
        let mut journal = Journal::new();
        let stale = journal.prepare(Utc::now(), vec![event(JournalEventKind::Staked, 1)]);
        let fresh = journal.prepare(Utc::now(), vec![event(JournalEventKind::Staked, 2)]);
        journal.commit(fresh).unwrap();

        assert!(journal.commit(stale).is_err());
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!(
            "fallback_paid".parse::<JournalEventKind>().unwrap(),
            JournalEventKind::FallbackPaid
        );
        assert!("bogus".parse::<JournalEventKind>().is_err());
    }
}
