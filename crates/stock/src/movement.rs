use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lotledger_core::{Aggregate, AggregateId, AggregateRoot, TenantId, UserId};
use lotledger_events::Event;

use crate::error::{LotShortfall, StockError};
use crate::lot::{AvailableStock, Lot, LotId};
use crate::plan::DrawPlan;
use crate::replay::{ReplayFault, apply_movement};

/// Item identifier (tenant-scoped via `tenant_id` fields in events/commands).
///
/// Item master data (name, category, unit of measure) lives outside this
/// core; only the identifier crosses the boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub AggregateId);

impl ItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stock movement identifier (one per ledger entry).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One realized draw against a lot, as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub lot_id: LotId,
    pub quantity: u64,
    pub unit_cost: u64,
}

/// Event: stock received (IN). Seeds exactly one lot at full quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub movement_id: MovementId,
    pub lot_id: LotId,
    pub quantity: u64,
    pub unit_cost: u64,
    pub source: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl StockReceived {
    /// quantity × unit_cost for this receipt.
    pub fn total_value(&self) -> u64 {
        self.quantity.saturating_mul(self.unit_cost)
    }
}

/// Event: stock issued (OUT), carrying the realized per-lot draws.
///
/// `draws` is empty only in legacy data; every issue committed through
/// `ItemStock` records explicit draws whose quantities sum to `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssued {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub movement_id: MovementId,
    pub quantity: u64,
    #[serde(default)]
    pub draws: Vec<Draw>,
    /// Σ quantity × unit_cost across the draws.
    pub total_value: u64,
    pub recipient: String,
    pub purpose: String,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    Received(StockReceived),
    Issued(StockIssued),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::Received(_) => "stock.lot.received",
            StockEvent::Issued(_) => "stock.lot.issued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::Received(e) => e.occurred_at,
            StockEvent::Issued(e) => e.occurred_at,
        }
    }
}

/// Command: receive stock into a new lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub movement_id: MovementId,
    pub lot_id: LotId,
    pub quantity: u64,
    pub unit_cost: u64,
    pub source: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: issue stock according to a previously produced plan.
///
/// The plan is advisory; `handle` re-reads every referenced lot's live
/// remaining quantity and rejects the whole command on any deficit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub movement_id: MovementId,
    pub plan: DrawPlan,
    pub recipient: String,
    pub purpose: String,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Receive(ReceiveStock),
    Issue(IssueStock),
}

/// Aggregate root: all lots of one item, rebuilt from its movement stream.
///
/// Replay faults are latched rather than panicking: the first fault marks
/// the aggregate corrupt, every later command fails with `DataIntegrity`,
/// and the remaining quantities are clamped, never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStock {
    id: ItemId,
    tenant_id: Option<TenantId>,
    lots: Vec<Lot>,
    fault: Option<ReplayFault>,
    version: u64,
}

impl ItemStock {
    /// Empty aggregate for rehydration.
    pub fn empty(id: ItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            lots: Vec::new(),
            fault: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// All lots including exhausted ones (the audit view).
    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    /// Open lots oldest-first plus total available.
    ///
    /// Fails with `DataIntegrity` if replay ever produced an impossible
    /// state; a corrupt ledger must not feed planning.
    pub fn available(&self) -> Result<AvailableStock, StockError> {
        self.ensure_intact()?;
        Ok(AvailableStock::from_lots(&self.lots))
    }

    pub fn integrity_fault(&self) -> Option<&ReplayFault> {
        self.fault.as_ref()
    }

    fn ensure_intact(&self) -> Result<(), StockError> {
        match &self.fault {
            Some(fault) => Err(StockError::DataIntegrity(fault.to_string())),
            None => Ok(()),
        }
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), StockError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(StockError::validation("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn ensure_item(&self, item_id: ItemId) -> Result<(), StockError> {
        if self.id != item_id {
            return Err(StockError::validation("item_id mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for ItemStock {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for ItemStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        if self.tenant_id.is_none() {
            self.tenant_id = Some(match event {
                StockEvent::Received(e) => e.tenant_id,
                StockEvent::Issued(e) => e.tenant_id,
            });
        }

        // First fault wins; later movements still apply (clamped) so the
        // audit view covers the whole history.
        if let Err(fault) = apply_movement(&mut self.lots, event) {
            self.fault.get_or_insert(fault);
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_intact()?;
        match command {
            StockCommand::Receive(cmd) => self.handle_receive(cmd),
            StockCommand::Issue(cmd) => self.handle_issue(cmd),
        }
    }
}

impl ItemStock {
    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, StockError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(StockError::validation("received quantity must be positive"));
        }
        if cmd.source.trim().is_empty() {
            return Err(StockError::validation("source cannot be empty"));
        }
        if self.lots.iter().any(|l| l.lot_id == cmd.lot_id) {
            return Err(StockError::validation("lot_id already used for this item"));
        }

        Ok(vec![StockEvent::Received(StockReceived {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            movement_id: cmd.movement_id,
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            source: cmd.source.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueStock) -> Result<Vec<StockEvent>, StockError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item(cmd.item_id)?;

        if cmd.recipient.trim().is_empty() {
            return Err(StockError::validation("recipient cannot be empty"));
        }
        if cmd.purpose.trim().is_empty() {
            return Err(StockError::validation("purpose cannot be empty"));
        }
        if cmd.plan.draws().is_empty() {
            return Err(StockError::validation("plan must contain at least one draw"));
        }

        // Draws that split one lot across entries are merged first, so the
        // per-lot bound is checked against the lot's *total* requested
        // quantity. Planner output never splits a lot, but a plan can also
        // arrive deserialized.
        let mut wanted: Vec<(LotId, u64)> = Vec::with_capacity(cmd.plan.draws().len());
        for planned in cmd.plan.draws() {
            if planned.quantity == 0 {
                return Err(StockError::validation("draw quantity must be positive"));
            }
            match wanted.iter_mut().find(|(id, _)| *id == planned.lot_id) {
                Some((_, quantity)) => *quantity = quantity.saturating_add(planned.quantity),
                None => wanted.push((planned.lot_id, planned.quantity)),
            }
        }

        // Commit-time re-validation against live lots. The plan's snapshot
        // costs are advisory; the lot's fixed receipt cost is recorded.
        let mut draws = Vec::with_capacity(wanted.len());
        let mut shortfalls = Vec::new();

        for (lot_id, quantity) in wanted {
            let Some(lot) = self.lots.iter().find(|l| l.lot_id == lot_id) else {
                return Err(StockError::Validation(format!(
                    "lot {lot_id} does not belong to this item"
                )));
            };
            if lot.remaining_quantity < quantity {
                shortfalls.push(LotShortfall {
                    lot_id: lot.lot_id,
                    requested: quantity,
                    available: lot.remaining_quantity,
                });
                continue;
            }
            draws.push(Draw {
                lot_id: lot.lot_id,
                quantity,
                unit_cost: lot.unit_cost,
            });
        }

        if !shortfalls.is_empty() {
            return Err(StockError::InsufficientStock { shortfalls });
        }

        let quantity = draws.iter().map(|d| d.quantity).sum();
        let total_value = draws
            .iter()
            .map(|d| d.quantity.saturating_mul(d.unit_cost))
            .fold(0u64, u64::saturating_add);

        Ok(vec![StockEvent::Issued(StockIssued {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            movement_id: cmd.movement_id,
            quantity,
            draws,
            total_value,
            recipient: cmd.recipient.clone(),
            purpose: cmd.purpose.clone(),
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{plan_fifo, plan_manual};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_item_id() -> ItemId {
        ItemId::new(AggregateId::new())
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn receive_cmd(
        tenant_id: TenantId,
        item_id: ItemId,
        quantity: u64,
        unit_cost: u64,
        day: u32,
    ) -> ReceiveStock {
        ReceiveStock {
            tenant_id,
            item_id,
            movement_id: MovementId::new(),
            lot_id: LotId::new(),
            quantity,
            unit_cost,
            source: "supplier".to_string(),
            actor: UserId::new(),
            occurred_at: at(day),
        }
    }

    fn issue_cmd(tenant_id: TenantId, item_id: ItemId, plan: DrawPlan, day: u32) -> IssueStock {
        IssueStock {
            tenant_id,
            item_id,
            movement_id: MovementId::new(),
            plan,
            recipient: "ward".to_string(),
            purpose: "consumption".to_string(),
            notes: None,
            actor: UserId::new(),
            occurred_at: at(day),
        }
    }

    fn run(stock: &mut ItemStock, cmd: StockCommand) -> Result<Vec<StockEvent>, StockError> {
        let events = stock.handle(&cmd)?;
        for e in &events {
            stock.apply(e);
        }
        Ok(events)
    }

    /// Two lots: A day 1, 100 @ 10; B day 2, 50 @ 12.
    fn stocked_item() -> (ItemStock, TenantId, ItemId) {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let mut stock = ItemStock::empty(item_id);
        run(
            &mut stock,
            StockCommand::Receive(receive_cmd(tenant_id, item_id, 100, 10, 1)),
        )
        .unwrap();
        run(
            &mut stock,
            StockCommand::Receive(receive_cmd(tenant_id, item_id, 50, 12, 2)),
        )
        .unwrap();
        (stock, tenant_id, item_id)
    }

    #[test]
    fn receive_seeds_a_full_lot() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let mut stock = ItemStock::empty(item_id);

        let events = run(
            &mut stock,
            StockCommand::Receive(receive_cmd(tenant_id, item_id, 100, 10, 1)),
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        let available = stock.available().unwrap();
        assert_eq!(available.total_available, 100);
        assert_eq!(available.lots[0].original_quantity, 100);
        assert_eq!(available.lots[0].remaining_quantity, 100);
        assert_eq!(stock.version(), 1);
    }

    #[test]
    fn receive_rejects_zero_quantity_and_blank_source() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let stock = ItemStock::empty(item_id);

        let mut cmd = receive_cmd(tenant_id, item_id, 0, 10, 1);
        let err = stock.handle(&StockCommand::Receive(cmd.clone())).unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));

        cmd.quantity = 5;
        cmd.source = "  ".to_string();
        let err = stock.handle(&StockCommand::Receive(cmd)).unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));
    }

    #[test]
    fn planned_issue_commits_and_depletes_fifo() {
        let (mut stock, tenant_id, item_id) = stocked_item();

        let plan = plan_fifo(&stock.available().unwrap(), 120).unwrap();
        let events = run(&mut stock, StockCommand::Issue(issue_cmd(tenant_id, item_id, plan, 3)))
            .unwrap();

        let StockEvent::Issued(issued) = &events[0] else {
            panic!("expected an issue event");
        };
        assert_eq!(issued.quantity, 120);
        assert_eq!(issued.total_value, 100 * 10 + 20 * 12);
        assert_eq!(issued.draws.len(), 2);

        let available = stock.available().unwrap();
        assert_eq!(available.total_available, 30);
        assert_eq!(available.lots.len(), 1);
        assert_eq!(available.lots[0].remaining_quantity, 30);
    }

    #[test]
    fn manual_plan_commits_against_named_lots() {
        let (mut stock, tenant_id, item_id) = stocked_item();
        let available = stock.available().unwrap();
        let b = available.lots[1].lot_id;

        let plan = plan_manual(&available, &[(b, 50)]).unwrap();
        run(&mut stock, StockCommand::Issue(issue_cmd(tenant_id, item_id, plan, 3))).unwrap();

        let after = stock.available().unwrap();
        // Lot B exhausted, lot A untouched.
        assert_eq!(after.lots.len(), 1);
        assert_eq!(after.lots[0].remaining_quantity, 100);
        assert_eq!(stock.lots().len(), 2);
    }

    #[test]
    fn stale_plan_is_rejected_naming_the_short_lot() {
        let (mut stock, tenant_id, item_id) = stocked_item();

        // Plan against the old snapshot, then let a competing issue win.
        let snapshot = stock.available().unwrap();
        let stale = plan_fifo(&snapshot, 120).unwrap();
        let winner = plan_fifo(&snapshot, 90).unwrap();
        run(&mut stock, StockCommand::Issue(issue_cmd(tenant_id, item_id, winner, 3))).unwrap();

        let before = stock.clone();
        let err = stock
            .handle(&StockCommand::Issue(issue_cmd(tenant_id, item_id, stale, 4)))
            .unwrap_err();

        let StockError::InsufficientStock { shortfalls } = err else {
            panic!("expected InsufficientStock, got {err:?}");
        };
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].lot_id, snapshot.lots[0].lot_id);
        assert_eq!(shortfalls[0].requested, 100);
        assert_eq!(shortfalls[0].available, 10);
        assert_eq!(shortfalls[0].shortfall(), 90);

        // Rejection left nothing behind.
        assert_eq!(stock, before);
    }

    /// A plan whose draws split lots across entries, built the way a wire
    /// payload would arrive rather than through a planner.
    fn wire_plan(draws: &[(LotId, u64, u64)]) -> DrawPlan {
        let entries: Vec<String> = draws
            .iter()
            .map(|(lot_id, quantity, unit_cost)| {
                format!(
                    r#"{{"lot_id":"{lot_id}","quantity":{quantity},"unit_cost":{unit_cost}}}"#
                )
            })
            .collect();
        let total_quantity: u64 = draws.iter().map(|(_, q, _)| q).sum();
        let total_value: u64 = draws.iter().map(|(_, q, c)| q * c).sum();
        serde_json::from_str(&format!(
            r#"{{"draws":[{}],"total_quantity":{total_quantity},"total_value":{total_value}}}"#,
            entries.join(",")
        ))
        .unwrap()
    }

    #[test]
    fn split_draws_on_one_lot_are_bounded_by_its_total() {
        let (stock, tenant_id, item_id) = stocked_item();
        let a = stock.available().unwrap().lots[0].lot_id;

        // 60 + 60 against a lot holding 100: each entry fits on its own,
        // together they overdraw.
        let plan = wire_plan(&[(a, 60, 10), (a, 60, 10)]);
        let before = stock.clone();
        let err = stock
            .handle(&StockCommand::Issue(issue_cmd(tenant_id, item_id, plan, 3)))
            .unwrap_err();

        let StockError::InsufficientStock { shortfalls } = err else {
            panic!("expected InsufficientStock, got {err:?}");
        };
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].lot_id, a);
        assert_eq!(shortfalls[0].requested, 120);
        assert_eq!(shortfalls[0].available, 100);
        assert_eq!(stock, before);
        assert!(stock.integrity_fault().is_none());
    }

    #[test]
    fn split_draws_within_bounds_commit_as_one_merged_draw() {
        let (mut stock, tenant_id, item_id) = stocked_item();
        let a = stock.available().unwrap().lots[0].lot_id;

        let plan = wire_plan(&[(a, 30, 10), (a, 40, 10)]);
        let events = run(&mut stock, StockCommand::Issue(issue_cmd(tenant_id, item_id, plan, 3)))
            .unwrap();

        let StockEvent::Issued(issued) = &events[0] else {
            panic!("expected an issue event");
        };
        assert_eq!(issued.quantity, 70);
        assert_eq!(issued.draws.len(), 1);
        assert_eq!(issued.draws[0].quantity, 70);
        assert_eq!(stock.available().unwrap().lots[0].remaining_quantity, 30);
        assert!(stock.integrity_fault().is_none());
    }

    #[test]
    fn issue_requires_recipient_and_purpose() {
        let (stock, tenant_id, item_id) = stocked_item();
        let plan = plan_fifo(&stock.available().unwrap(), 10).unwrap();

        let mut cmd = issue_cmd(tenant_id, item_id, plan, 3);
        cmd.recipient = String::new();
        let err = stock.handle(&StockCommand::Issue(cmd.clone())).unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));

        cmd.recipient = "ward".to_string();
        cmd.purpose = " ".to_string();
        let err = stock.handle(&StockCommand::Issue(cmd)).unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let (stock, _tenant_id, item_id) = stocked_item();
        let plan = plan_fifo(&stock.available().unwrap(), 10).unwrap();

        let err = stock
            .handle(&StockCommand::Issue(issue_cmd(test_tenant_id(), item_id, plan, 3)))
            .unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));
    }

    #[test]
    fn corrupt_history_latches_and_blocks_commands() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let mut stock = ItemStock::empty(item_id);

        let lot_id = LotId::new();
        stock.apply(&StockEvent::Received(StockReceived {
            tenant_id,
            item_id,
            movement_id: MovementId::new(),
            lot_id,
            quantity: 10,
            unit_cost: 5,
            source: "supplier".to_string(),
            actor: UserId::new(),
            occurred_at: at(1),
        }));
        // Hand-crafted overdraw, as a corrupted ledger would replay.
        stock.apply(&StockEvent::Issued(StockIssued {
            tenant_id,
            item_id,
            movement_id: MovementId::new(),
            quantity: 25,
            draws: vec![Draw {
                lot_id,
                quantity: 25,
                unit_cost: 5,
            }],
            total_value: 125,
            recipient: "ward".to_string(),
            purpose: "consumption".to_string(),
            notes: None,
            actor: UserId::new(),
            occurred_at: at(2),
        }));

        // Clamped, not negative.
        assert_eq!(stock.lots()[0].remaining_quantity, 0);
        assert!(stock.integrity_fault().is_some());
        assert!(matches!(
            stock.available().unwrap_err(),
            StockError::DataIntegrity(_)
        ));

        let cmd = receive_cmd(tenant_id, item_id, 1, 1, 3);
        assert!(matches!(
            stock.handle(&StockCommand::Receive(cmd)).unwrap_err(),
            StockError::DataIntegrity(_)
        ));
    }

    #[test]
    fn legacy_issue_replays_through_fifo_fallback() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let mut stock = ItemStock::empty(item_id);

        run(
            &mut stock,
            StockCommand::Receive(receive_cmd(tenant_id, item_id, 100, 10, 1)),
        )
        .unwrap();
        run(
            &mut stock,
            StockCommand::Receive(receive_cmd(tenant_id, item_id, 50, 12, 2)),
        )
        .unwrap();

        // Ungrouped legacy record: quantity only, no draw detail.
        stock.apply(&StockEvent::Issued(StockIssued {
            tenant_id,
            item_id,
            movement_id: MovementId::new(),
            quantity: 110,
            draws: vec![],
            total_value: 0,
            recipient: "ward".to_string(),
            purpose: "consumption".to_string(),
            notes: None,
            actor: UserId::new(),
            occurred_at: at(3),
        }));

        let available = stock.available().unwrap();
        assert_eq!(available.total_available, 40);
        assert_eq!(available.lots.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: across any sequence of receipts and feasible FIFO
        /// issues, Σ remaining == Σ original − Σ issued, no lot is ever
        /// negative (guaranteed by u64 + clamping, asserted via the
        /// integrity flag staying clear), and replaying the emitted history
        /// from scratch reproduces the same state.
        #[test]
        fn conservation_and_replay_idempotence(
            steps in prop::collection::vec((1u64..200, 0u64..50, any::<bool>()), 1..24)
        ) {
            let tenant_id = test_tenant_id();
            let item_id = test_item_id();
            let mut stock = ItemStock::empty(item_id);
            let mut history: Vec<StockEvent> = Vec::new();

            let mut received_total: u64 = 0;
            let mut issued_total: u64 = 0;
            let mut day = 1u32;

            for (quantity, cost, issue) in steps {
                day += 1;
                if issue {
                    let available = stock.available().unwrap();
                    if available.total_available == 0 {
                        continue;
                    }
                    let want = 1 + quantity % available.total_available;
                    let plan = plan_fifo(&available, want).unwrap();
                    let events = run(
                        &mut stock,
                        StockCommand::Issue(issue_cmd(tenant_id, item_id, plan, day)),
                    )
                    .unwrap();
                    issued_total += want;
                    history.extend(events);
                } else {
                    let events = run(
                        &mut stock,
                        StockCommand::Receive(receive_cmd(tenant_id, item_id, quantity, cost, day)),
                    )
                    .unwrap();
                    received_total += quantity;
                    history.extend(events);
                }
            }

            prop_assert!(stock.integrity_fault().is_none());

            let remaining: u64 = stock.lots().iter().map(|l| l.remaining_quantity).sum();
            let original: u64 = stock.lots().iter().map(|l| l.original_quantity).sum();
            prop_assert_eq!(original, received_total);
            prop_assert_eq!(remaining, received_total - issued_total);

            // Replay the same immutable history twice; identical state.
            let mut first = ItemStock::empty(item_id);
            let mut second = ItemStock::empty(item_id);
            for e in &history {
                first.apply(e);
            }
            for e in &history {
                second.apply(e);
            }
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&first, &stock);
        }
    }
}
