use std::{collections::VecDeque, time::SystemTime};

use parking_lot::RwLock;
use pn_types::{
    event::Ledger,
    submission::{PendingSubmission, SubmissionContext, SubmissionKind, SubmissionStatus},
    Address, H256,
};

pub const DEFAULT_LIMIT: usize = 10_000;

/// In-memory record of the transactions handed to a gateway, bounded by
/// `limit`. Past the limit the oldest finished entry goes first, then the
/// oldest entry.
pub struct SubmissionLog {
    entries: RwLock<VecDeque<PendingSubmission>>,
    limit: usize,
}

impl Default for SubmissionLog {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }
}

impl SubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        SubmissionLog {
            entries: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn record(
        &self,
        tx_hash: H256,
        ledger: Ledger,
        kind: SubmissionKind,
        context: SubmissionContext,
    ) {
        let mut entries = self.entries.write();
        while entries.len() >= self.limit {
            let oldest_finished = entries
                .iter()
                .position(|s| s.status != SubmissionStatus::Sent)
                .unwrap_or(0);
            entries.remove(oldest_finished);
        }
        entries.push_back(PendingSubmission {
            tx_hash,
            ledger,
            kind,
            context,
            submitted_at: SystemTime::now(),
            status: SubmissionStatus::Sent,
        });
    }

    /// Returns false if the hash is not in the log.
    pub fn update_status(&self, tx_hash: &H256, status: SubmissionStatus) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().rev().find(|s| &s.tx_hash == tx_hash) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, tx_hash: &H256) -> Option<PendingSubmission> {
        let entries = self.entries.read();
        entries.iter().rev().find(|s| &s.tx_hash == tx_hash).cloned()
    }

    pub fn by_token(&self, token: &Address) -> Vec<PendingSubmission> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|s| &s.context.token() == token)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
