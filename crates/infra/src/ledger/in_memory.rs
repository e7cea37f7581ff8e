use std::collections::HashMap;
use std::sync::RwLock;

use lotledger_core::{AggregateId, ExpectedVersion, TenantId};

use super::{LedgerError, MovementLedger, PendingMovement, RecordedMovement};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    item_id: AggregateId,
}

/// In-memory append-only movement ledger.
///
/// Tests/dev backend. The write lock spans the version check and the
/// append, which is what makes a batch atomic with respect to concurrent
/// committers.
#[derive(Debug, Default)]
pub struct InMemoryMovementLedger {
    streams: RwLock<HashMap<StreamKey, Vec<RecordedMovement>>>,
}

impl InMemoryMovementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[RecordedMovement]) -> u64 {
        stream.last().map(|m| m.sequence_number).unwrap_or(0)
    }
}

impl MovementLedger for InMemoryMovementLedger {
    fn append(
        &self,
        movements: Vec<PendingMovement>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        if movements.is_empty() {
            return Ok(vec![]);
        }

        // All movements must target the same tenant + item stream.
        let tenant_id = movements[0].tenant_id;
        let item_id = movements[0].item_id;

        for (idx, m) in movements.iter().enumerate() {
            if m.tenant_id != tenant_id {
                return Err(LedgerError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if m.item_id != item_id {
                return Err(LedgerError::InvalidAppend(format!(
                    "batch contains multiple item_ids (index {idx})"
                )));
            }
        }

        let key = StreamKey { tenant_id, item_id };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| LedgerError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(LedgerError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut recorded = Vec::with_capacity(movements.len());
        for m in movements {
            let stored = RecordedMovement {
                entry_id: m.entry_id,
                tenant_id: m.tenant_id,
                item_id: m.item_id,
                sequence_number: next,
                event_type: m.event_type,
                event_version: m.event_version,
                occurred_at: m.occurred_at,
                payload: m.payload,
            };
            next += 1;
            stream.push(stored.clone());
            recorded.push(stored);
        }

        Ok(recorded)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        item_id: AggregateId,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        let key = StreamKey { tenant_id, item_id };

        let streams = self
            .streams
            .read()
            .map_err(|_| LedgerError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn pending(tenant_id: TenantId, item_id: AggregateId) -> PendingMovement {
        PendingMovement {
            entry_id: Uuid::now_v7(),
            tenant_id,
            item_id,
            event_type: "stock.lot.received".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({"quantity": 1}),
        }
    }

    #[test]
    fn append_assigns_gapless_sequence_numbers() {
        let ledger = InMemoryMovementLedger::new();
        let tenant_id = TenantId::new();
        let item_id = AggregateId::new();

        let first = ledger
            .append(vec![pending(tenant_id, item_id)], ExpectedVersion::Exact(0))
            .unwrap();
        let second = ledger
            .append(
                vec![pending(tenant_id, item_id), pending(tenant_id, item_id)],
                ExpectedVersion::Exact(1),
            )
            .unwrap();

        assert_eq!(first[0].sequence_number, 1);
        assert_eq!(second[0].sequence_number, 2);
        assert_eq!(second[1].sequence_number, 3);

        let stream = ledger.load_stream(tenant_id, item_id).unwrap();
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn stale_expected_version_is_rejected_without_writing() {
        let ledger = InMemoryMovementLedger::new();
        let tenant_id = TenantId::new();
        let item_id = AggregateId::new();

        ledger
            .append(vec![pending(tenant_id, item_id)], ExpectedVersion::Exact(0))
            .unwrap();

        let err = ledger
            .append(vec![pending(tenant_id, item_id)], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Concurrency(_)));

        assert_eq!(ledger.load_stream(tenant_id, item_id).unwrap().len(), 1);
    }

    #[test]
    fn mixed_tenant_batch_is_rejected() {
        let ledger = InMemoryMovementLedger::new();
        let item_id = AggregateId::new();

        let err = ledger
            .append(
                vec![
                    pending(TenantId::new(), item_id),
                    pending(TenantId::new(), item_id),
                ],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::TenantIsolation(_)));
    }

    #[test]
    fn streams_are_isolated_per_tenant() {
        let ledger = InMemoryMovementLedger::new();
        let item_id = AggregateId::new();
        let a = TenantId::new();
        let b = TenantId::new();

        ledger
            .append(vec![pending(a, item_id)], ExpectedVersion::Exact(0))
            .unwrap();

        assert!(ledger.load_stream(b, item_id).unwrap().is_empty());
    }
}
