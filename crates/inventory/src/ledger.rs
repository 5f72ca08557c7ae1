//! The stock movement ledger.
//!
//! Every operation here mutates an [`InventoryState`] in place and either
//! succeeds as a whole or returns an error after which the state must be
//! discarded. Callers (the infra stores) run each call on a scratch copy and
//! keep it only on success, which is what makes a batch all-or-nothing.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fieldstock_core::{
    BatchId, ConnectionId, DomainError, DomainResult, MovementId, RegionId, SerializedItemId,
    UserId, ZoneId,
};

use crate::movable::{MovableKind, MovableRef};
use crate::movement::{MovementRequest, MovementType, Route, StockMovement};
use crate::state::InventoryState;
use crate::stock::StockKeeping;

/// Who is acting and when. Passed explicitly into every ledger operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerContext {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}

impl LedgerContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            at: Utc::now(),
        }
    }

    pub fn at(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self { user_id, at }
    }
}

/// Target of a meter bulk transfer. A connection implies its zone, a zone
/// implies its region.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterDestination {
    pub region_id: Option<RegionId>,
    pub zone_id: Option<ZoneId>,
    pub connection_id: Option<ConnectionId>,
}

/// Target of a keypad bulk transfer. A meter implies its region and zone.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypadDestination {
    pub region_id: Option<RegionId>,
    pub zone_id: Option<ZoneId>,
    pub meter_id: Option<SerializedItemId>,
}

/// Fully resolved location for a serialized unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Placement {
    pub region_id: RegionId,
    pub zone_id: Option<ZoneId>,
    pub connection_id: Option<ConnectionId>,
    pub meter_id: Option<SerializedItemId>,
}

impl Placement {
    pub fn region(region_id: RegionId) -> Self {
        Self {
            region_id,
            zone_id: None,
            connection_id: None,
            meter_id: None,
        }
    }
}

pub struct Ledger<'s> {
    state: &'s mut InventoryState,
    ctx: LedgerContext,
}

impl<'s> Ledger<'s> {
    pub fn new(state: &'s mut InventoryState, ctx: LedgerContext) -> Self {
        Self { state, ctx }
    }

    /// Record a new batch of movements and apply them to stock.
    ///
    /// Lines are applied in order, so two lines drawing on the same stock are
    /// checked against what the first one left behind.
    pub fn record(&mut self, request: &MovementRequest) -> DomainResult<Vec<StockMovement>> {
        self.record_batch(BatchId::new(), request)
    }

    /// Undo every row of `batch_id`, then record `request` under the same batch.
    pub fn update_batch(
        &mut self,
        batch_id: BatchId,
        request: &MovementRequest,
    ) -> DomainResult<Vec<StockMovement>> {
        request.validate()?;

        let existing: Vec<StockMovement> = self
            .state
            .movements
            .batch(batch_id)
            .into_iter()
            .cloned()
            .collect();
        if existing.is_empty() {
            return Err(DomainError::not_found("movement batch", batch_id));
        }

        for movement in existing.iter().rev() {
            self.reverse(movement)?;
            self.state.movements.remove(movement.id);
        }

        self.record_batch(batch_id, request)
    }

    /// Reverse one movement and remove it from the ledger.
    pub fn delete(&mut self, id: MovementId) -> DomainResult<StockMovement> {
        let movement = self.state.movements.get(id)?.clone();
        self.reverse(&movement)?;
        self.state.movements.remove(id);
        Ok(movement)
    }

    /// Reverse and remove several movements, latest first.
    pub fn delete_many(&mut self, ids: &[MovementId]) -> DomainResult<Vec<StockMovement>> {
        let unique: BTreeSet<MovementId> = ids.iter().copied().collect();
        if unique.is_empty() {
            return Err(DomainError::validation("ids", "at least one movement id is required"));
        }

        let mut targets = unique
            .into_iter()
            .map(|id| self.state.movements.get(id).cloned())
            .collect::<DomainResult<Vec<_>>>()?;
        targets.sort_by_key(|m| std::cmp::Reverse(m.chronology()));

        for movement in &targets {
            self.reverse(movement)?;
            self.state.movements.remove(movement.id);
        }
        Ok(targets)
    }

    /// Move meters by reassigning their location links directly.
    pub fn transfer_meters(
        &mut self,
        ids: &[SerializedItemId],
        destination: &MeterDestination,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> DomainResult<Vec<StockMovement>> {
        let placement = self.resolve_meter_destination(destination)?;
        self.place_units(MovableKind::Meter, ids, &placement, date, notes)
    }

    /// Move keypads by reassigning their location links directly.
    pub fn transfer_keypads(
        &mut self,
        ids: &[SerializedItemId],
        destination: &KeypadDestination,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> DomainResult<Vec<StockMovement>> {
        let placement = self.resolve_keypad_destination(destination)?;
        self.place_units(MovableKind::Keypad, ids, &placement, date, notes)
    }

    fn record_batch(
        &mut self,
        batch_id: BatchId,
        request: &MovementRequest,
    ) -> DomainResult<Vec<StockMovement>> {
        let route = request.validate()?;
        self.ensure_regions(route)?;

        let mut recorded = Vec::with_capacity(request.lines.len());
        for (line_no, line) in request.lines.iter().enumerate() {
            let stock_before = self.stock_in(line.movable, route.snapshot_region())?;
            if route.draws_from().is_some() && stock_before < line.quantity {
                return Err(DomainError::insufficient_stock(
                    self.label(line.movable)?,
                    stock_before,
                    line.quantity,
                ));
            }

            self.apply(line.movable, route, line.quantity)?;

            let movement = StockMovement {
                id: MovementId::new(),
                batch_id,
                line_no: line_no as u32,
                movable: line.movable,
                movement_type: route.movement_type(),
                quantity: line.quantity,
                source_region_id: route.source(),
                destination_region_id: route.destination(),
                date: request.date,
                notes: request.notes.clone(),
                user_id: self.ctx.user_id,
                responsible_user_id: request.responsible_user_id,
                intended_for_user_id: request.intended_for_user_id,
                stock_at_movement: stock_before,
                created_at: self.ctx.at,
            };
            self.state.movements.append(movement.clone());
            recorded.push(movement);
        }
        Ok(recorded)
    }

    /// Apply the inverse of `movement` to stock.
    ///
    /// Entries are issued back out of the destination, exits received back
    /// into the source, transfers moved back. Fails with insufficient stock
    /// when what the movement brought in has since been consumed.
    fn reverse(&mut self, movement: &StockMovement) -> DomainResult<()> {
        if movement.movement_type == MovementType::Transfer {
            // Relocation inside one region (zone or connection change) moved no stock.
            if movement.source_region_id.is_some()
                && movement.source_region_id == movement.destination_region_id
            {
                return Ok(());
            }
            // A unit carries its stock along; send it back to where it was,
            // including nowhere for a unit that had no region.
            if let MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) =
                movement.movable
            {
                let from = movement.destination_region_id.ok_or_else(|| {
                    DomainError::invariant(format!("movement {} has no destination", movement.id))
                })?;
                return self
                    .state
                    .serialized
                    .send_back(id, from, movement.source_region_id);
            }
        }

        let inverse = movement.route()?.inverse();
        self.apply(movement.movable, inverse, movement.quantity)
    }

    fn ensure_regions(&self, route: Route) -> DomainResult<()> {
        for region in [route.source(), route.destination()].into_iter().flatten() {
            self.state.directory.region(region)?;
        }
        Ok(())
    }

    fn stock_in(&self, movable: MovableRef, region: RegionId) -> DomainResult<i64> {
        match movable {
            MovableRef::SparePart(id) => self.state.spare_parts.stock_in(id, region),
            MovableRef::Equipment(id) => self.state.equipment.stock_in(id, region),
            MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) => {
                self.state.serialized.get_kind(id, movable.kind())?;
                self.state.serialized.stock_in(id, region)
            }
        }
    }

    fn label(&self, movable: MovableRef) -> DomainResult<String> {
        match movable {
            MovableRef::SparePart(id) => self.state.spare_parts.label(id),
            MovableRef::Equipment(id) => self.state.equipment.label(id),
            MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) => {
                self.state.serialized.label(id)
            }
        }
    }

    fn apply(&mut self, movable: MovableRef, route: Route, quantity: i64) -> DomainResult<()> {
        match movable {
            MovableRef::SparePart(id) => {
                apply_route(&mut self.state.spare_parts, id, route, quantity)
            }
            MovableRef::Equipment(id) => {
                apply_route(&mut self.state.equipment, id, route, quantity)
            }
            MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) => {
                self.state.serialized.get_kind(id, movable.kind())?;
                apply_route(&mut self.state.serialized, id, route, quantity)
            }
        }
    }

    fn resolve_meter_destination(&self, d: &MeterDestination) -> DomainResult<Placement> {
        let directory = &self.state.directory;
        let mut zone = d.zone_id;
        let mut region = d.region_id;

        if let Some(connection_id) = d.connection_id {
            let connection = directory.connection(connection_id)?;
            zone = Some(agree("zone_id", zone, connection.zone_id)?);
        }
        if let Some(zone_id) = zone {
            region = Some(agree("region_id", region, directory.zone(zone_id)?.region_id)?);
        }

        let region_id = region.ok_or_else(|| {
            DomainError::validation("destination", "a region, zone or connection is required")
        })?;
        directory.region(region_id)?;

        Ok(Placement {
            region_id,
            zone_id: zone,
            connection_id: d.connection_id,
            meter_id: None,
        })
    }

    fn resolve_keypad_destination(&self, d: &KeypadDestination) -> DomainResult<Placement> {
        let directory = &self.state.directory;
        let mut zone = d.zone_id;
        let mut region = d.region_id;

        if let Some(meter_id) = d.meter_id {
            let meter = self.state.serialized.get_kind(meter_id, MovableKind::Meter)?;
            let meter_region = meter.region_id.ok_or_else(|| {
                DomainError::validation(
                    "meter_id",
                    format!("{} is not assigned to a region", meter.label()),
                )
            })?;
            region = Some(agree("region_id", region, meter_region)?);
            if let Some(meter_zone) = meter.zone_id {
                zone = Some(agree("zone_id", zone, meter_zone)?);
            }
        }
        if let Some(zone_id) = zone {
            region = Some(agree("region_id", region, directory.zone(zone_id)?.region_id)?);
        }

        let region_id = region.ok_or_else(|| {
            DomainError::validation("destination", "a region, zone or meter is required")
        })?;
        directory.region(region_id)?;

        Ok(Placement {
            region_id,
            zone_id: zone,
            connection_id: None,
            meter_id: d.meter_id,
        })
    }

    fn place_units(
        &mut self,
        kind: MovableKind,
        ids: &[SerializedItemId],
        placement: &Placement,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> DomainResult<Vec<StockMovement>> {
        if ids.is_empty() {
            return Err(DomainError::validation("ids", "at least one id is required"));
        }

        let batch_id = BatchId::new();
        let mut seen = BTreeSet::new();
        let mut recorded = Vec::with_capacity(ids.len());

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let unit = self.state.serialized.get_kind(id, kind)?;
            let movable = unit.movable().ok_or_else(|| {
                DomainError::invariant(format!("{} is not a serialized kind", unit.kind))
            })?;
            let source_region_id = unit.region_id;
            let stock_before = unit.quantity;

            self.state.serialized.place(id, placement)?;

            let movement = StockMovement {
                id: MovementId::new(),
                batch_id,
                line_no: recorded.len() as u32,
                movable,
                movement_type: MovementType::Transfer,
                quantity: 1,
                source_region_id,
                destination_region_id: Some(placement.region_id),
                date,
                notes: notes.map(str::to_string),
                user_id: self.ctx.user_id,
                responsible_user_id: None,
                intended_for_user_id: None,
                stock_at_movement: stock_before,
                created_at: self.ctx.at,
            };
            self.state.movements.append(movement.clone());
            recorded.push(movement);
        }
        Ok(recorded)
    }
}

fn apply_route<B: StockKeeping>(
    book: &mut B,
    id: B::Id,
    route: Route,
    quantity: i64,
) -> DomainResult<()> {
    match route {
        Route::Entry { to } => book.receive(id, to, quantity),
        Route::Exit { from } => book.issue(id, from, quantity),
        Route::Transfer { from, to } => book.transfer(id, from, to, quantity),
    }
}

/// An explicit destination field must agree with what another field implies.
fn agree<T: PartialEq + core::fmt::Display>(
    field: &str,
    explicit: Option<T>,
    implied: T,
) -> DomainResult<T> {
    match explicit {
        Some(value) if value != implied => Err(DomainError::validation(
            field,
            format!("{value} does not match the destination's {field} {implied}"),
        )),
        _ => Ok(implied),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fieldstock_core::{EquipmentId, SparePartId};
    use proptest::prelude::*;

    use crate::movable::{Equipment, SerializedItem, SparePart};

    struct Fixture {
        state: InventoryState,
        a: RegionId,
        b: RegionId,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let mut state = InventoryState::new();
        let a = state.directory.add_region("Region A").unwrap();
        let b = state.directory.add_region("Region B").unwrap();
        Fixture {
            state,
            a,
            b,
            user: UserId::new(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn ctx_at(user: UserId, minute: u32) -> LedgerContext {
        LedgerContext::at(user, Utc.with_ymd_and_hms(2024, 6, 3, 8, minute, 0).unwrap())
    }

    fn spare(f: &mut Fixture, reference: &str, qty: i64) -> SparePartId {
        f.state
            .spare_parts
            .insert(SparePart::new(reference, "part", f.a, qty))
            .unwrap()
    }

    fn qty_in(f: &Fixture, reference: &str, region: RegionId) -> i64 {
        f.state
            .spare_parts
            .find(reference, region)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    #[test]
    fn entry_increments_destination_and_reference_total() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 10);
        let req = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::SparePart(id), 5);

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stock_at_movement, 10);
        assert_eq!(rows[0].user_id, f.user);
        assert_eq!(qty_in(&f, "REF-1", f.a), 15);
        assert_eq!(f.state.spare_parts.total_for_reference("REF-1"), 15);
    }

    #[test]
    fn exit_beyond_stock_is_rejected_without_mutation() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 3);
        let before = f.state.clone();
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(id), 4);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap_err();

        assert_eq!(err, DomainError::insufficient_stock("spare part REF-1", 3, 4));
        assert_eq!(f.state, before);
    }

    #[test]
    fn transfer_and_delete_restores_both_regions() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 10);
        let req = MovementRequest::new(MovementType::Transfer, today())
            .from_region(f.a)
            .to_region(f.b)
            .line(MovableRef::SparePart(id), 4);

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap();
        assert_eq!(qty_in(&f, "REF-1", f.a), 6);
        assert_eq!(qty_in(&f, "REF-1", f.b), 4);
        assert_eq!(f.state.spare_parts.total_for_reference("REF-1"), 10);

        Ledger::new(&mut f.state, ctx_at(f.user, 1)).delete(rows[0].id).unwrap();
        assert_eq!(qty_in(&f, "REF-1", f.a), 10);
        assert_eq!(qty_in(&f, "REF-1", f.b), 0);
        assert!(f.state.movements.is_empty());
    }

    #[test]
    fn equipment_exit_over_stock_names_tag_and_available() {
        let mut f = fixture();
        let id = f
            .state
            .equipment
            .insert(Equipment::new("EQ-1", f.a, 5))
            .unwrap();
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::Equipment(id), 6);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("EQ-1"), "{msg}");
        assert!(msg.contains('5'), "{msg}");
        assert_eq!(f.state.equipment.get(id).unwrap().quantity, 5);
    }

    #[test]
    fn failing_line_rolls_back_the_whole_batch() {
        let mut f = fixture();
        let ok = spare(&mut f, "REF-1", 10);
        let short = spare(&mut f, "REF-2", 1);
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(ok), 2)
            .line(MovableRef::SparePart(short), 2);

        let mut scratch = f.state.clone();
        let result = Ledger::new(&mut scratch, ctx_at(f.user, 0)).record(&req);

        assert!(result.is_err());
        // The caller discards the scratch copy; the first line mutated it.
        assert_eq!(scratch.spare_parts.find("REF-1", f.a).unwrap().quantity, 8);
        assert_eq!(qty_in(&f, "REF-1", f.a), 10);
    }

    #[test]
    fn lines_on_the_same_stock_are_checked_cumulatively() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 5);
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(id), 3)
            .line(MovableRef::SparePart(id), 3);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("spare part REF-1", 2, 3));
    }

    #[test]
    fn unknown_movable_is_not_found() {
        let mut f = fixture();
        let req = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::Equipment(EquipmentId::new()), 1);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "equipment", .. }));
    }

    #[test]
    fn unknown_region_is_not_found() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 1);
        let req = MovementRequest::new(MovementType::Entry, today())
            .to_region(RegionId::new())
            .line(MovableRef::SparePart(id), 1);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "region", .. }));
    }

    #[test]
    fn equipment_entry_creates_region_row_from_source_row() {
        let mut f = fixture();
        let mut eq = Equipment::new("EQ-2", f.a, 1);
        eq.equipment_type = Some("transformer".to_string());
        let id = f.state.equipment.insert(eq).unwrap();
        let req = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.b)
            .line(MovableRef::Equipment(id), 3);

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap();

        assert_eq!(rows[0].stock_at_movement, 0);
        let row = f.state.equipment.pool("EQ-2", f.b).unwrap();
        assert_eq!(row.quantity, 3);
        assert_eq!(row.equipment_type.as_deref(), Some("transformer"));
    }

    #[test]
    fn serialized_transfer_reassigns_region_and_reverses() {
        let mut f = fixture();
        let id = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Engin, "ENG-1", Some(f.a)))
            .unwrap();
        let req = MovementRequest::new(MovementType::Transfer, today())
            .from_region(f.a)
            .to_region(f.b)
            .line(MovableRef::Engin(id), 1);

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap();
        assert_eq!(f.state.serialized.get(id).unwrap().region_id, Some(f.b));

        Ledger::new(&mut f.state, ctx_at(f.user, 1)).delete(rows[0].id).unwrap();
        assert_eq!(f.state.serialized.get(id).unwrap().region_id, Some(f.a));
    }

    #[test]
    fn deleting_a_consumed_entry_fails() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 0);
        let entry = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::SparePart(id), 5);
        let exit = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(id), 4);

        let entry_rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&entry).unwrap();
        Ledger::new(&mut f.state, ctx_at(f.user, 1)).record(&exit).unwrap();

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 2))
            .delete(entry_rows[0].id)
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("spare part REF-1", 1, 5));
    }

    #[test]
    fn delete_many_reverses_latest_first() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 0);
        let entry = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::SparePart(id), 5);
        let exit = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(id), 4);

        let e = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&entry).unwrap();
        let x = Ledger::new(&mut f.state, ctx_at(f.user, 1)).record(&exit).unwrap();

        // Entry listed first (and twice): order and duplicates must not matter.
        let removed = Ledger::new(&mut f.state, ctx_at(f.user, 2))
            .delete_many(&[e[0].id, x[0].id, e[0].id])
            .unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].id, x[0].id);
        assert_eq!(qty_in(&f, "REF-1", f.a), 0);
        assert!(f.state.movements.is_empty());
    }

    #[test]
    fn update_batch_reverses_then_rerecords_under_same_batch() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 10);
        let original = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::SparePart(id), 4);
        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&original).unwrap();
        let batch = rows[0].batch_id;

        let revised = MovementRequest::new(MovementType::Transfer, today())
            .from_region(f.a)
            .to_region(f.b)
            .line(MovableRef::SparePart(id), 7);
        let new_rows = Ledger::new(&mut f.state, ctx_at(f.user, 1))
            .update_batch(batch, &revised)
            .unwrap();

        assert_eq!(new_rows.len(), 1);
        assert_eq!(new_rows[0].batch_id, batch);
        assert_eq!(new_rows[0].stock_at_movement, 10);
        assert_eq!(qty_in(&f, "REF-1", f.a), 3);
        assert_eq!(qty_in(&f, "REF-1", f.b), 7);
        assert_eq!(f.state.movements.len(), 1);
    }

    #[test]
    fn update_batch_moves_engines_back_before_rerecording() {
        let mut f = fixture();
        let engines: Vec<_> = ["ENG-1", "ENG-2"]
            .into_iter()
            .map(|serial| {
                f.state
                    .serialized
                    .insert(SerializedItem::new(MovableKind::Engin, serial, Some(f.a)))
                    .unwrap()
            })
            .collect();
        let original = MovementRequest::new(MovementType::Transfer, today())
            .from_region(f.a)
            .to_region(f.b)
            .line(MovableRef::Engin(engines[0]), 1);
        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&original).unwrap();
        let batch = rows[0].batch_id;

        let revised = MovementRequest::new(MovementType::Transfer, today())
            .from_region(f.a)
            .to_region(f.b)
            .line(MovableRef::Engin(engines[1]), 1);
        let new_rows = Ledger::new(&mut f.state, ctx_at(f.user, 1))
            .update_batch(batch, &revised)
            .unwrap();

        assert_eq!(new_rows[0].batch_id, batch);
        assert_eq!(f.state.serialized.get(engines[0]).unwrap().region_id, Some(f.a));
        assert_eq!(f.state.serialized.get(engines[1]).unwrap().region_id, Some(f.b));
        assert_eq!(f.state.movements.len(), 1);
    }

    #[test]
    fn update_batch_undoes_an_equipment_entry() {
        let mut f = fixture();
        let id = f
            .state
            .equipment
            .insert(Equipment::new("EQ-3", f.a, 2))
            .unwrap();
        let original = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.b)
            .line(MovableRef::Equipment(id), 5);
        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&original).unwrap();
        assert_eq!(f.state.equipment.pool("EQ-3", f.b).unwrap().quantity, 5);

        let revised = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::Equipment(id), 1);
        Ledger::new(&mut f.state, ctx_at(f.user, 1))
            .update_batch(rows[0].batch_id, &revised)
            .unwrap();

        assert_eq!(f.state.equipment.pool("EQ-3", f.b).unwrap().quantity, 0);
        assert_eq!(f.state.equipment.pool("EQ-3", f.a).unwrap().quantity, 3);
        assert_eq!(f.state.equipment_stock("EQ-3").unwrap().total, 3);
    }

    #[test]
    fn update_of_unknown_batch_is_not_found() {
        let mut f = fixture();
        let id = spare(&mut f, "REF-1", 10);
        let req = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.a)
            .line(MovableRef::SparePart(id), 1);

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .update_batch(BatchId::new(), &req)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "movement batch", .. }));
    }

    #[test]
    fn bulk_meter_transfer_moves_each_meter_and_logs_one_row_each() {
        let mut f = fixture();
        let meters: Vec<_> = (0..3)
            .map(|i| {
                f.state
                    .serialized
                    .insert(SerializedItem::new(MovableKind::Meter, format!("M-{i}"), Some(f.a)))
                    .unwrap()
            })
            .collect();
        let destination = MeterDestination {
            region_id: Some(f.b),
            ..MeterDestination::default()
        };

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&meters, &destination, today(), None)
            .unwrap();

        assert_eq!(rows.len(), 3);
        for (row, id) in rows.iter().zip(&meters) {
            assert_eq!(row.movement_type, MovementType::Transfer);
            assert_eq!(row.quantity, 1);
            assert_eq!(row.source_region_id, Some(f.a));
            assert_eq!(row.destination_region_id, Some(f.b));
            assert_eq!(f.state.serialized.get(*id).unwrap().region_id, Some(f.b));
        }
    }

    #[test]
    fn bulk_transfer_of_unassigned_meter_reverts_to_no_region() {
        let mut f = fixture();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", None))
            .unwrap();
        let destination = MeterDestination {
            region_id: Some(f.b),
            ..MeterDestination::default()
        };

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&[meter], &destination, today(), None)
            .unwrap();
        assert_eq!(rows[0].source_region_id, None);

        Ledger::new(&mut f.state, ctx_at(f.user, 1))
            .delete_many(&[rows[0].id])
            .unwrap();
        assert_eq!(f.state.serialized.get(meter).unwrap().region_id, None);
        assert!(f.state.movements.is_empty());
    }

    #[test]
    fn bulk_transfer_of_exited_meter_can_be_deleted() {
        let mut f = fixture();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(f.a)))
            .unwrap();
        let exit = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::Meter(meter), 1);
        let exit_rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&exit).unwrap();

        let destination = MeterDestination {
            region_id: Some(f.b),
            ..MeterDestination::default()
        };
        let moved = Ledger::new(&mut f.state, ctx_at(f.user, 1))
            .transfer_meters(&[meter], &destination, today(), None)
            .unwrap();

        Ledger::new(&mut f.state, ctx_at(f.user, 2)).delete(moved[0].id).unwrap();
        let unit = f.state.serialized.get(meter).unwrap();
        assert_eq!(unit.region_id, Some(f.a));
        assert_eq!(unit.quantity, 0);

        Ledger::new(&mut f.state, ctx_at(f.user, 3)).delete(exit_rows[0].id).unwrap();
        assert_eq!(f.state.serialized.stock_in(meter, f.a).unwrap(), 1);
    }

    #[test]
    fn serialized_entry_elsewhere_is_rejected_and_round_trip_restores() {
        let mut f = fixture();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(f.a)))
            .unwrap();
        let entry_b = MovementRequest::new(MovementType::Entry, today())
            .to_region(f.b)
            .line(MovableRef::Meter(meter), 1);

        let before = f.state.clone();
        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .record(&entry_b)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(f.state, before);

        // Once issued out of A the unit may be received anywhere.
        let exit = MovementRequest::new(MovementType::Exit, today())
            .from_region(f.a)
            .line(MovableRef::Meter(meter), 1);
        Ledger::new(&mut f.state, ctx_at(f.user, 1)).record(&exit).unwrap();
        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 2)).record(&entry_b).unwrap();
        assert_eq!(f.state.serialized.stock_in(meter, f.b).unwrap(), 1);

        Ledger::new(&mut f.state, ctx_at(f.user, 3)).delete(rows[0].id).unwrap();
        assert_eq!(f.state.serialized.stock_in(meter, f.a).unwrap(), 0);
        assert_eq!(f.state.serialized.stock_in(meter, f.b).unwrap(), 0);
    }

    #[test]
    fn meter_connection_implies_zone_and_region() {
        let mut f = fixture();
        let zone = f.state.directory.add_zone(f.b, "Zone B1").unwrap();
        let conn = f.state.directory.add_connection(zone, "Customer 7").unwrap();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(f.a)))
            .unwrap();
        let destination = MeterDestination {
            connection_id: Some(conn),
            ..MeterDestination::default()
        };

        Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&[meter], &destination, today(), Some("install"))
            .unwrap();

        let unit = f.state.serialized.get(meter).unwrap();
        assert_eq!(unit.region_id, Some(f.b));
        assert_eq!(unit.zone_id, Some(zone));
        assert_eq!(unit.connection_id, Some(conn));
    }

    #[test]
    fn meter_destination_with_conflicting_region_is_rejected() {
        let mut f = fixture();
        let zone = f.state.directory.add_zone(f.b, "Zone B1").unwrap();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(f.a)))
            .unwrap();
        let destination = MeterDestination {
            region_id: Some(f.a),
            zone_id: Some(zone),
            connection_id: None,
        };

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&[meter], &destination, today(), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { ref field, .. } if field == "region_id"));
    }

    #[test]
    fn keypad_follows_its_meter() {
        let mut f = fixture();
        let zone = f.state.directory.add_zone(f.b, "Zone B1").unwrap();
        let mut meter = SerializedItem::new(MovableKind::Meter, "M-1", Some(f.b));
        meter.zone_id = Some(zone);
        let meter = f.state.serialized.insert(meter).unwrap();
        let keypad = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Keypad, "K-1", Some(f.a)))
            .unwrap();
        let destination = KeypadDestination {
            meter_id: Some(meter),
            ..KeypadDestination::default()
        };

        let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_keypads(&[keypad], &destination, today(), None)
            .unwrap();

        assert_eq!(rows[0].movable, MovableRef::Keypad(keypad));
        let unit = f.state.serialized.get(keypad).unwrap();
        assert_eq!(unit.region_id, Some(f.b));
        assert_eq!(unit.zone_id, Some(zone));
        assert_eq!(unit.meter_id, Some(meter));
    }

    #[test]
    fn bulk_transfer_without_destination_is_rejected() {
        let mut f = fixture();
        let meter = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(f.a)))
            .unwrap();

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&[meter], &MeterDestination::default(), today(), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { ref field, .. } if field == "destination"));
    }

    #[test]
    fn bulk_transfer_of_keypad_as_meter_is_not_found() {
        let mut f = fixture();
        let keypad = f
            .state
            .serialized
            .insert(SerializedItem::new(MovableKind::Keypad, "K-1", Some(f.a)))
            .unwrap();
        let destination = MeterDestination {
            region_id: Some(f.b),
            ..MeterDestination::default()
        };

        let err = Ledger::new(&mut f.state, ctx_at(f.user, 0))
            .transfer_meters(&[keypad], &destination, today(), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "meter", .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: any sequence of transfers between regions conserves the
        /// reference total, and deleting them all restores the start state.
        #[test]
        fn transfers_conserve_reference_total(
            moves in prop::collection::vec((0usize..3, 0usize..3, 1i64..20), 1..25)
        ) {
            let mut state = InventoryState::new();
            let regions: Vec<RegionId> = (0..3)
                .map(|i| state.directory.add_region(format!("R{i}")).unwrap())
                .collect();
            let id = state
                .spare_parts
                .insert(SparePart::new("REF-P", "part", regions[0], 50))
                .unwrap();
            let start = state.clone();
            let user = UserId::new();

            let mut recorded = Vec::new();
            for (minute, (from, to, qty)) in moves.into_iter().enumerate() {
                if from == to {
                    continue;
                }
                let req = MovementRequest::new(MovementType::Transfer, today())
                    .from_region(regions[from])
                    .to_region(regions[to])
                    .line(MovableRef::SparePart(id), qty);
                let mut scratch = state.clone();
                let ctx = ctx_at(user, (minute % 60) as u32);
                if let Ok(rows) = Ledger::new(&mut scratch, ctx).record(&req) {
                    state = scratch;
                    recorded.extend(rows.into_iter().map(|m| m.id));
                }
                prop_assert_eq!(state.spare_parts.total_for_reference("REF-P"), 50);
                for p in state.spare_parts.by_reference("REF-P") {
                    prop_assert!(p.quantity >= 0);
                }
            }

            if !recorded.is_empty() {
                let ctx = ctx_at(user, 59);
                Ledger::new(&mut state, ctx).delete_many(&recorded).unwrap();
            }
            for region in &regions {
                prop_assert_eq!(
                    state.spare_parts.find("REF-P", *region).map(|p| p.quantity).unwrap_or(0),
                    start.spare_parts.find("REF-P", *region).map(|p| p.quantity).unwrap_or(0)
                );
            }
        }

        /// Property: entry followed by delete is a no-op on quantities.
        #[test]
        fn entry_then_delete_restores_quantity(initial in 0i64..1000, delta in 1i64..1000) {
            let mut f = fixture();
            let id = spare(&mut f, "REF-E", initial);
            let req = MovementRequest::new(MovementType::Entry, today())
                .to_region(f.a)
                .line(MovableRef::SparePart(id), delta);

            let rows = Ledger::new(&mut f.state, ctx_at(f.user, 0)).record(&req).unwrap();
            prop_assert_eq!(qty_in(&f, "REF-E", f.a), initial + delta);

            Ledger::new(&mut f.state, ctx_at(f.user, 1)).delete(rows[0].id).unwrap();
            prop_assert_eq!(qty_in(&f, "REF-E", f.a), initial);
        }
    }
}
