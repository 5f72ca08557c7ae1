//! Whole-inventory state and row-level diffs between two states.

use std::collections::BTreeMap;

use fieldstock_core::{
    BatchId, ConnectionId, DomainError, DomainResult, Entity, EquipmentId, MovementId, RegionId,
    SerializedItemId, SparePartId, ZoneId,
};

use crate::directory::{Connection, Directory, Region, Zone};
use crate::movable::{Equipment, SerializedItem, SparePart};
use crate::movement::StockMovement;
use crate::stock::{EquipmentBook, SerializedBook, SparePartBook};

/// The ledger's rows, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementJournal {
    rows: BTreeMap<MovementId, StockMovement>,
}

impl MovementJournal {
    pub fn get(&self, id: MovementId) -> DomainResult<&StockMovement> {
        self.rows
            .get(&id)
            .ok_or_else(|| DomainError::not_found("stock movement", id))
    }

    pub fn append(&mut self, movement: StockMovement) {
        self.rows.insert(movement.id(), movement);
    }

    pub fn remove(&mut self, id: MovementId) -> Option<StockMovement> {
        self.rows.remove(&id)
    }

    /// Rows of one batch in recording order.
    pub fn batch(&self, batch_id: BatchId) -> Vec<&StockMovement> {
        let mut rows: Vec<_> = self.rows.values().filter(|m| m.batch_id == batch_id).collect();
        rows.sort_by_key(|m| m.line_no);
        rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &StockMovement> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &BTreeMap<MovementId, StockMovement> {
        &self.rows
    }
}

/// Everything the ledger reads or writes.
///
/// Stores hand a mutable copy to the ledger inside a transaction and keep it
/// only if the whole operation succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryState {
    pub directory: Directory,
    pub spare_parts: SparePartBook,
    pub equipment: EquipmentBook,
    pub serialized: SerializedBook,
    pub movements: MovementJournal,
}

impl InventoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row-level changes needed to turn `self` into `after`.
    pub fn diff(&self, after: &InventoryState) -> StateDiff {
        StateDiff {
            regions: diff_table(self.directory.regions(), after.directory.regions()),
            zones: diff_table(self.directory.zones(), after.directory.zones()),
            connections: diff_table(self.directory.connections(), after.directory.connections()),
            spare_parts: diff_table(self.spare_parts.rows(), after.spare_parts.rows()),
            equipment: diff_table(self.equipment.rows(), after.equipment.rows()),
            serialized: diff_table(self.serialized.units(), after.serialized.units()),
            movements: diff_table(self.movements.rows(), after.movements.rows()),
        }
    }
}

/// Rows to write and ids to delete for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDiff<K, V> {
    pub upserts: Vec<V>,
    pub deletes: Vec<K>,
}

impl<K, V> TableDiff<K, V> {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    pub regions: TableDiff<RegionId, Region>,
    pub zones: TableDiff<ZoneId, Zone>,
    pub connections: TableDiff<ConnectionId, Connection>,
    pub spare_parts: TableDiff<SparePartId, SparePart>,
    pub equipment: TableDiff<EquipmentId, Equipment>,
    pub serialized: TableDiff<SerializedItemId, SerializedItem>,
    pub movements: TableDiff<MovementId, StockMovement>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
            && self.zones.is_empty()
            && self.connections.is_empty()
            && self.spare_parts.is_empty()
            && self.equipment.is_empty()
            && self.serialized.is_empty()
            && self.movements.is_empty()
    }

    /// Rows written across every table.
    pub fn upsert_count(&self) -> usize {
        self.regions.upserts.len()
            + self.zones.upserts.len()
            + self.connections.upserts.len()
            + self.spare_parts.upserts.len()
            + self.equipment.upserts.len()
            + self.serialized.upserts.len()
            + self.movements.upserts.len()
    }

    /// Rows deleted across every table.
    pub fn delete_count(&self) -> usize {
        self.regions.deletes.len()
            + self.zones.deletes.len()
            + self.connections.deletes.len()
            + self.spare_parts.deletes.len()
            + self.equipment.deletes.len()
            + self.serialized.deletes.len()
            + self.movements.deletes.len()
    }
}

fn diff_table<K, V>(before: &BTreeMap<K, V>, after: &BTreeMap<K, V>) -> TableDiff<K, V>
where
    K: Ord + Copy,
    V: PartialEq + Clone,
{
    let upserts = after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(_, v)| v.clone())
        .collect();
    let deletes = before
        .keys()
        .filter(|k| !after.contains_key(*k))
        .copied()
        .collect();
    TableDiff { upserts, deletes }
}
