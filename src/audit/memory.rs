use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::OperationContext;

use super::{
    verify_chain, AuditLog, AuditLogBuilder, AuditLogEntry, AuditLogError,
    ChainVerificationResult, GENESIS_HASH,
};

/// Audit trail kept in process memory
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Replace an entry in place; only tests use this to simulate tampering
    #[cfg(test)]
    pub(crate) async fn tamper(&self, idx: usize, f: impl FnOnce(&mut AuditLogEntry)) {
        if let Some(entry) = self.entries.write().await.get_mut(idx) {
            f(entry);
        }
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn log(
        &self,
        builder: AuditLogBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError> {
        let mut entries = self.entries.write().await;
        let (sequence_number, previous_hash) = match entries.last() {
            Some(last) => (last.sequence_number + 1, last.current_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };

        let entry = AuditLogEntry::seal(builder, context, sequence_number, previous_hash);
        let id = entry.id;
        tracing::debug!(audit_id = %id, action = %entry.action, "Audit log entry created");
        entries.push(entry);

        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError> {
        let entries = self.entries.read().await;
        let limit = limit.unwrap_or(1000).max(0) as usize;
        Ok(verify_chain(&entries[..entries.len().min(limit)]))
    }
}
