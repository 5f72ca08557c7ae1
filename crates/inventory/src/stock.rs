//! Per-kind stock books.
//!
//! Each movable kind keeps its rows in its own book and implements
//! [`StockKeeping`], the only interface the ledger uses to read and mutate
//! region-scoped quantities.

use std::collections::BTreeMap;

use fieldstock_core::{
    DomainError, DomainResult, Entity, EquipmentId, RegionId, SerializedItemId, SparePartId,
};

use crate::ledger::Placement;
use crate::movable::{Equipment, MovableKind, SerializedItem, SparePart};

/// Region-scoped quantity interface implemented once per movable kind.
///
/// `issue` and `transfer` must refuse to go below zero with
/// [`DomainError::InsufficientStock`]; the ledger relies on that when it
/// reverses movements.
pub trait StockKeeping {
    type Id: Copy;

    /// Human-readable name used in error messages (`"equipment EQ-1"`).
    fn label(&self, id: Self::Id) -> DomainResult<String>;

    /// Quantity the item holds in `region`.
    fn stock_in(&self, id: Self::Id, region: RegionId) -> DomainResult<i64>;

    /// Add `quantity` to the item's stock in `region`.
    fn receive(&mut self, id: Self::Id, region: RegionId, quantity: i64) -> DomainResult<()>;

    /// Remove `quantity` from the item's stock in `region`.
    fn issue(&mut self, id: Self::Id, region: RegionId, quantity: i64) -> DomainResult<()>;

    /// Move `quantity` from `from` to `to`.
    fn transfer(
        &mut self,
        id: Self::Id,
        from: RegionId,
        to: RegionId,
        quantity: i64,
    ) -> DomainResult<()> {
        self.issue(id, from, quantity)?;
        self.receive(id, to, quantity)
    }
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity", "quantity must be positive"));
    }
    Ok(())
}

// -------------------------
// Spare parts
// -------------------------

/// Spare part rows, one per `(reference, region)`.
///
/// There is no stored cross-region total: [`SparePartBook::total_for_reference`]
/// aggregates the regional rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparePartBook {
    rows: BTreeMap<SparePartId, SparePart>,
}

impl SparePartBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row. `(reference, region)` must be unique.
    pub fn insert(&mut self, part: SparePart) -> DomainResult<SparePartId> {
        if part.quantity < 0 {
            return Err(DomainError::validation("quantity", "quantity cannot be negative"));
        }
        if self.find(&part.reference, part.region_id).is_some() {
            return Err(DomainError::conflict(format!(
                "spare part {} already has a row in region {}",
                part.reference, part.region_id
            )));
        }
        let id = part.id();
        self.rows.insert(id, part);
        Ok(id)
    }

    pub fn get(&self, id: SparePartId) -> DomainResult<&SparePart> {
        self.rows
            .get(&id)
            .ok_or_else(|| DomainError::not_found("spare part", id))
    }

    pub fn find(&self, reference: &str, region: RegionId) -> Option<&SparePart> {
        self.rows
            .values()
            .find(|p| p.reference == reference && p.region_id == region)
    }

    fn find_id(&self, reference: &str, region: RegionId) -> Option<SparePartId> {
        self.find(reference, region).map(|p| p.id)
    }

    pub fn by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> impl Iterator<Item = &'a SparePart> + 'a {
        self.rows.values().filter(move |p| p.reference == reference)
    }

    pub fn total_for_reference(&self, reference: &str) -> i64 {
        self.by_reference(reference).map(|p| p.quantity).sum()
    }

    pub fn rows(&self) -> &BTreeMap<SparePartId, SparePart> {
        &self.rows
    }

    /// Replace a row as loaded from storage.
    pub fn load(&mut self, part: SparePart) {
        self.rows.insert(part.id(), part);
    }

    pub fn remove(&mut self, id: SparePartId) -> Option<SparePart> {
        self.rows.remove(&id)
    }
}

impl StockKeeping for SparePartBook {
    type Id = SparePartId;

    fn label(&self, id: SparePartId) -> DomainResult<String> {
        Ok(self.get(id)?.label())
    }

    fn stock_in(&self, id: SparePartId, region: RegionId) -> DomainResult<i64> {
        let reference = &self.get(id)?.reference;
        Ok(self.find(reference, region).map(|p| p.quantity).unwrap_or(0))
    }

    fn receive(&mut self, id: SparePartId, region: RegionId, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let template = self.get(id)?.clone();

        match self.find_id(&template.reference, region) {
            Some(row_id) => {
                if let Some(row) = self.rows.get_mut(&row_id) {
                    row.quantity += quantity;
                }
            }
            None => {
                let row = SparePart {
                    id: SparePartId::new(),
                    region_id: region,
                    quantity,
                    ..template
                };
                self.rows.insert(row.id, row);
            }
        }
        Ok(())
    }

    fn issue(&mut self, id: SparePartId, region: RegionId, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let template = self.get(id)?;
        let label = template.label();

        let row_id = self
            .find_id(&template.reference, region)
            .ok_or_else(|| DomainError::insufficient_stock(label.clone(), 0, quantity))?;
        let row = self
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| DomainError::not_found("spare part", row_id))?;

        if row.quantity < quantity {
            return Err(DomainError::insufficient_stock(label, row.quantity, quantity));
        }
        row.quantity -= quantity;
        Ok(())
    }
}

// -------------------------
// Equipment
// -------------------------

/// Equipment rows, one pool row per `(tag, region)` plus partitioned children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquipmentBook {
    rows: BTreeMap<EquipmentId, Equipment>,
}

impl EquipmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool row. `(tag, region)` must be unique among pool rows.
    pub fn insert(&mut self, equipment: Equipment) -> DomainResult<EquipmentId> {
        if equipment.quantity < 0 {
            return Err(DomainError::validation("quantity", "quantity cannot be negative"));
        }
        if equipment.is_pool() && self.pool(&equipment.tag, equipment.region_id).is_some() {
            return Err(DomainError::conflict(format!(
                "equipment {} already has a row in region {}",
                equipment.tag, equipment.region_id
            )));
        }
        let id = equipment.id();
        self.rows.insert(id, equipment);
        Ok(id)
    }

    pub fn get(&self, id: EquipmentId) -> DomainResult<&Equipment> {
        self.rows
            .get(&id)
            .ok_or_else(|| DomainError::not_found("equipment", id))
    }

    /// The pool row for `tag` in `region`, if any.
    pub fn pool(&self, tag: &str, region: RegionId) -> Option<&Equipment> {
        self.rows
            .values()
            .find(|e| e.is_pool() && e.tag == tag && e.region_id == region)
    }

    fn pool_id(&self, tag: &str, region: RegionId) -> Option<EquipmentId> {
        self.pool(tag, region).map(|e| e.id)
    }

    pub fn by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Equipment> + 'a {
        self.rows.values().filter(move |e| e.tag == tag)
    }

    pub fn children_of(&self, parent: EquipmentId) -> Vec<&Equipment> {
        self.rows
            .values()
            .filter(|e| e.parent_id == Some(parent))
            .collect()
    }

    /// Carve tracked sub-units out of a pool row.
    ///
    /// Each child copies tag, region and descriptive fields from the parent;
    /// the parent is decremented by the sum, so per-tag totals do not change.
    pub fn partition(
        &mut self,
        parent_id: EquipmentId,
        quantities: &[i64],
    ) -> DomainResult<Vec<EquipmentId>> {
        if quantities.is_empty() {
            return Err(DomainError::validation("quantities", "at least one sub-unit is required"));
        }
        for q in quantities {
            if *q <= 0 {
                return Err(DomainError::validation(
                    "quantities",
                    "sub-unit quantities must be positive",
                ));
            }
        }

        let parent = self.get(parent_id)?.clone();
        if !parent.is_pool() {
            return Err(DomainError::invariant(format!(
                "{} is already a sub-unit and cannot be partitioned",
                parent.label()
            )));
        }

        let requested: i64 = quantities.iter().sum();
        if requested > parent.quantity {
            return Err(DomainError::insufficient_stock(parent.label(), parent.quantity, requested));
        }

        let mut children = Vec::with_capacity(quantities.len());
        for q in quantities {
            let child = Equipment {
                id: EquipmentId::new(),
                quantity: *q,
                parent_id: Some(parent_id),
                ..parent.clone()
            };
            children.push(child.id);
            self.rows.insert(child.id, child);
        }

        if let Some(row) = self.rows.get_mut(&parent_id) {
            row.quantity -= requested;
        }
        Ok(children)
    }

    pub fn rows(&self) -> &BTreeMap<EquipmentId, Equipment> {
        &self.rows
    }

    pub fn load(&mut self, equipment: Equipment) {
        self.rows.insert(equipment.id(), equipment);
    }

    pub fn remove(&mut self, id: EquipmentId) -> Option<Equipment> {
        self.rows.remove(&id)
    }
}

impl StockKeeping for EquipmentBook {
    type Id = EquipmentId;

    fn label(&self, id: EquipmentId) -> DomainResult<String> {
        Ok(self.get(id)?.label())
    }

    fn stock_in(&self, id: EquipmentId, region: RegionId) -> DomainResult<i64> {
        let tag = &self.get(id)?.tag;
        Ok(self.pool(tag, region).map(|e| e.quantity).unwrap_or(0))
    }

    fn receive(&mut self, id: EquipmentId, region: RegionId, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let template = self.get(id)?.clone();

        match self.pool_id(&template.tag, region) {
            Some(row_id) => {
                if let Some(row) = self.rows.get_mut(&row_id) {
                    row.quantity += quantity;
                }
            }
            None => {
                let row = Equipment {
                    id: EquipmentId::new(),
                    region_id: region,
                    quantity,
                    parent_id: None,
                    ..template
                };
                self.rows.insert(row.id, row);
            }
        }
        Ok(())
    }

    fn issue(&mut self, id: EquipmentId, region: RegionId, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let template = self.get(id)?;
        let label = template.label();

        let row_id = self
            .pool_id(&template.tag, region)
            .ok_or_else(|| DomainError::insufficient_stock(label.clone(), 0, quantity))?;
        let row = self
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| DomainError::not_found("equipment", row_id))?;

        if row.quantity < quantity {
            return Err(DomainError::insufficient_stock(label, row.quantity, quantity));
        }
        row.quantity -= quantity;
        Ok(())
    }
}

// -------------------------
// Serialized units (meters, keypads, engines)
// -------------------------

/// Serialized units. A unit is never split across regions: it carries one
/// `region_id` that moves with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedBook {
    units: BTreeMap<SerializedItemId, SerializedItem>,
}

impl SerializedBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: SerializedItem) -> DomainResult<SerializedItemId> {
        if !item.kind.is_serialized() {
            return Err(DomainError::validation(
                "kind",
                format!("{} is not a serialized kind", item.kind),
            ));
        }
        if self
            .units
            .values()
            .any(|u| u.kind == item.kind && u.serial == item.serial)
        {
            return Err(DomainError::conflict(format!(
                "{} already registered",
                item.label()
            )));
        }
        let id = item.id();
        self.units.insert(id, item);
        Ok(id)
    }

    pub fn get(&self, id: SerializedItemId) -> DomainResult<&SerializedItem> {
        self.units
            .get(&id)
            .ok_or_else(|| DomainError::not_found("serialized item", id))
    }

    /// Fetch a unit and check it is of the expected kind.
    ///
    /// A keypad id submitted as a meter is reported as a missing meter.
    pub fn get_kind(
        &self,
        id: SerializedItemId,
        kind: MovableKind,
    ) -> DomainResult<&SerializedItem> {
        match self.units.get(&id) {
            Some(unit) if unit.kind == kind => Ok(unit),
            _ => Err(DomainError::not_found(kind.as_str(), id)),
        }
    }

    fn get_mut(&mut self, id: SerializedItemId) -> DomainResult<&mut SerializedItem> {
        self.units
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("serialized item", id))
    }

    /// Reassign a unit's location links directly (bulk transfer path).
    ///
    /// Links that belong to the old region are cleared when the region
    /// changes; the placement's own links are then applied.
    pub fn place(&mut self, id: SerializedItemId, placement: &Placement) -> DomainResult<()> {
        let unit = self.get_mut(id)?;
        if unit.region_id != Some(placement.region_id) {
            relocate(unit, placement.region_id);
        }
        if placement.zone_id.is_some() {
            unit.zone_id = placement.zone_id;
        }
        if placement.connection_id.is_some() {
            unit.connection_id = placement.connection_id;
        }
        if placement.meter_id.is_some() {
            unit.meter_id = placement.meter_id;
        }
        Ok(())
    }

    /// Undo a transfer: move the unit out of `from` and back to `to`, with
    /// whatever it holds. `to` is `None` for a unit that had no region.
    ///
    /// The unit must still be in `from`; a later move has to be undone first.
    pub fn send_back(
        &mut self,
        id: SerializedItemId,
        from: RegionId,
        to: Option<RegionId>,
    ) -> DomainResult<()> {
        let unit = self.get_mut(id)?;
        if unit.region_id != Some(from) {
            return Err(DomainError::invariant(format!(
                "{} has moved since and is no longer in region {from}",
                unit.label()
            )));
        }
        unit.region_id = to;
        unit.zone_id = None;
        unit.connection_id = None;
        unit.meter_id = None;
        Ok(())
    }

    pub fn in_region(&self, region: RegionId) -> impl Iterator<Item = &SerializedItem> + '_ {
        self.units
            .values()
            .filter(move |u| u.region_id == Some(region))
    }

    pub fn units(&self) -> &BTreeMap<SerializedItemId, SerializedItem> {
        &self.units
    }

    pub fn load(&mut self, item: SerializedItem) {
        self.units.insert(item.id(), item);
    }

    pub fn remove(&mut self, id: SerializedItemId) -> Option<SerializedItem> {
        self.units.remove(&id)
    }
}

fn relocate(unit: &mut SerializedItem, region: RegionId) {
    unit.region_id = Some(region);
    unit.zone_id = None;
    unit.connection_id = None;
    unit.meter_id = None;
}

impl StockKeeping for SerializedBook {
    type Id = SerializedItemId;

    fn label(&self, id: SerializedItemId) -> DomainResult<String> {
        Ok(self.get(id)?.label())
    }

    fn stock_in(&self, id: SerializedItemId, region: RegionId) -> DomainResult<i64> {
        let unit = self.get(id)?;
        Ok(if unit.region_id == Some(region) { unit.quantity } else { 0 })
    }

    fn receive(
        &mut self,
        id: SerializedItemId,
        region: RegionId,
        quantity: i64,
    ) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let unit = self.get_mut(id)?;
        if unit.region_id != Some(region) {
            // Stock held elsewhere would move with the unit unrecorded.
            if unit.quantity > 0 {
                return Err(DomainError::invariant(format!(
                    "{} still holds {} outside region {region}; transfer it instead",
                    unit.label(),
                    unit.quantity
                )));
            }
            relocate(unit, region);
        }
        unit.quantity += quantity;
        Ok(())
    }

    fn issue(&mut self, id: SerializedItemId, region: RegionId, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let available = self.stock_in(id, region)?;
        let unit = self.get_mut(id)?;
        if available < quantity {
            return Err(DomainError::insufficient_stock(unit.label(), available, quantity));
        }
        unit.quantity -= quantity;
        Ok(())
    }

    /// A unit moves whole: `quantity` must equal what it holds in `from`.
    fn transfer(
        &mut self,
        id: SerializedItemId,
        from: RegionId,
        to: RegionId,
        quantity: i64,
    ) -> DomainResult<()> {
        ensure_positive(quantity)?;
        let available = self.stock_in(id, from)?;
        let unit = self.get_mut(id)?;
        if available < quantity {
            return Err(DomainError::insufficient_stock(unit.label(), available, quantity));
        }
        if quantity != available {
            return Err(DomainError::invariant(format!(
                "wrong derived quantity: {} holds {available} and must be transferred whole, \
                 got {quantity}",
                unit.label()
            )));
        }
        relocate(unit, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> (RegionId, RegionId) {
        (RegionId::new(), RegionId::new())
    }

    #[test]
    fn spare_part_receive_creates_destination_row_from_template() {
        let (a, b) = regions();
        let mut book = SparePartBook::new();
        let mut part = SparePart::new("REF-1", "Fuse 10A", a, 10);
        part.unit = Some("pcs".to_string());
        let id = book.insert(part).unwrap();

        book.receive(id, b, 3).unwrap();

        let row = book.find("REF-1", b).unwrap();
        assert_eq!(row.quantity, 3);
        assert_eq!(row.name, "Fuse 10A");
        assert_eq!(row.unit.as_deref(), Some("pcs"));
        assert_eq!(book.total_for_reference("REF-1"), 13);
    }

    #[test]
    fn spare_part_issue_refuses_to_go_negative() {
        let (a, b) = regions();
        let mut book = SparePartBook::new();
        let id = book.insert(SparePart::new("REF-1", "Fuse", a, 2)).unwrap();

        let err = book.issue(id, a, 3).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("spare part REF-1", 2, 3));

        // No row at all in the other region.
        let err = book.issue(id, b, 1).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("spare part REF-1", 0, 1));
        assert_eq!(book.find("REF-1", a).unwrap().quantity, 2);
    }

    #[test]
    fn duplicate_spare_part_row_is_a_conflict() {
        let (a, _) = regions();
        let mut book = SparePartBook::new();
        book.insert(SparePart::new("REF-1", "Fuse", a, 1)).unwrap();
        assert!(matches!(
            book.insert(SparePart::new("REF-1", "Fuse", a, 5)),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn equipment_transfer_copies_descriptive_fields() {
        let (a, b) = regions();
        let mut book = EquipmentBook::new();
        let mut eq = Equipment::new("EQ-1", a, 5);
        eq.brand = Some("Schneider".to_string());
        eq.model = Some("X200".to_string());
        let id = book.insert(eq).unwrap();

        book.transfer(id, a, b, 2).unwrap();

        assert_eq!(book.stock_in(id, a).unwrap(), 3);
        assert_eq!(book.stock_in(id, b).unwrap(), 2);
        let dest = book.pool("EQ-1", b).unwrap();
        assert_eq!(dest.brand.as_deref(), Some("Schneider"));
        assert_eq!(dest.model.as_deref(), Some("X200"));
    }

    #[test]
    fn partition_conserves_tag_total() {
        let (a, _) = regions();
        let mut book = EquipmentBook::new();
        let id = book.insert(Equipment::new("EQ-9", a, 10)).unwrap();

        let children = book.partition(id, &[3, 2]).unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(book.get(id).unwrap().quantity, 5);
        assert_eq!(book.children_of(id).len(), 2);
        let total: i64 = book.by_tag("EQ-9").map(|e| e.quantity).sum();
        assert_eq!(total, 10);
        // Children are not part of the movable pool.
        assert_eq!(book.stock_in(id, a).unwrap(), 5);
    }

    #[test]
    fn partition_cannot_exceed_parent() {
        let (a, _) = regions();
        let mut book = EquipmentBook::new();
        let id = book.insert(Equipment::new("EQ-9", a, 4)).unwrap();

        let err = book.partition(id, &[3, 2]).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("equipment EQ-9", 4, 5));
        assert!(book.children_of(id).is_empty());
    }

    #[test]
    fn serialized_unit_moves_whole() {
        let (a, b) = regions();
        let mut book = SerializedBook::new();
        let id = book
            .insert(SerializedItem::new(MovableKind::Meter, "M-001", Some(a)))
            .unwrap();

        book.transfer(id, a, b, 1).unwrap();
        assert_eq!(book.get(id).unwrap().region_id, Some(b));
        assert_eq!(book.stock_in(id, a).unwrap(), 0);
        assert_eq!(book.stock_in(id, b).unwrap(), 1);
    }

    #[test]
    fn serialized_partial_transfer_is_rejected() {
        let (a, b) = regions();
        let mut book = SerializedBook::new();
        let mut unit = SerializedItem::new(MovableKind::Engin, "ENG-7", Some(a));
        unit.quantity = 2;
        let id = book.insert(unit).unwrap();

        let err = book.transfer(id, a, b, 1).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvariantViolation(ref m) if m.contains("wrong derived quantity")
        ));
        assert_eq!(book.get(id).unwrap().region_id, Some(a));
    }

    #[test]
    fn entry_elsewhere_is_refused_while_the_unit_holds_stock() {
        let (a, b) = regions();
        let mut book = SerializedBook::new();
        let id = book
            .insert(SerializedItem::new(MovableKind::Meter, "M-002", Some(a)))
            .unwrap();

        let err = book.receive(id, b, 1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(ref m) if m.contains("meter M-002")));
        assert_eq!(book.get(id).unwrap().region_id, Some(a));
        assert_eq!(book.stock_in(id, a).unwrap(), 1);

        book.issue(id, a, 1).unwrap();
        book.receive(id, b, 1).unwrap();
        assert_eq!(book.get(id).unwrap().region_id, Some(b));
        assert_eq!(book.stock_in(id, b).unwrap(), 1);
    }

    #[test]
    fn send_back_restores_a_missing_region() {
        let (a, b) = regions();
        let mut book = SerializedBook::new();
        let id = book
            .insert(SerializedItem::new(MovableKind::Keypad, "K-9", None))
            .unwrap();
        book.place(id, &Placement::region(a)).unwrap();

        let err = book.send_back(id, b, None).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        book.send_back(id, a, None).unwrap();
        assert_eq!(book.get(id).unwrap().region_id, None);
    }

    #[test]
    fn keypad_id_is_not_a_meter() {
        let (a, _) = regions();
        let mut book = SerializedBook::new();
        let id = book
            .insert(SerializedItem::new(MovableKind::Keypad, "K-1", Some(a)))
            .unwrap();

        assert!(book.get_kind(id, MovableKind::Keypad).is_ok());
        assert!(matches!(
            book.get_kind(id, MovableKind::Meter),
            Err(DomainError::NotFound { entity: "meter", .. })
        ));
    }
}
