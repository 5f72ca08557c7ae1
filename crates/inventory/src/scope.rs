//! The slice of inventory one ledger operation reads and writes.
//!
//! Stores that do not hold the whole inventory in memory load (and lock)
//! only the rows a [`LoadScope`] reaches:
//! 1. movements named by id or batch, which pull in what they moved
//! 2. serialized units by id, which pull in their location links
//! 3. spare part rows sharing a reference with a named row, equipment rows
//!    sharing a tag
//! 4. connections, then zones, then regions
//!
//! [`InventoryState::scoped`] performs the same expansion in memory.

use std::collections::BTreeSet;

use fieldstock_core::{
    BatchId, ConnectionId, EquipmentId, MovementId, RegionId, SerializedItemId, SparePartId,
    ZoneId,
};

use crate::ledger::{KeypadDestination, MeterDestination};
use crate::movable::{MovableRef, SerializedItem};
use crate::movement::{MovementRequest, StockMovement};
use crate::state::{InventoryState, StateDiff};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadScope {
    pub movables: BTreeSet<MovableRef>,
    pub regions: BTreeSet<RegionId>,
    pub zones: BTreeSet<ZoneId>,
    pub connections: BTreeSet<ConnectionId>,
    pub movements: BTreeSet<MovementId>,
    pub batches: BTreeSet<BatchId>,
}

impl LoadScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_request(request: &MovementRequest) -> Self {
        let mut scope = Self::new();
        scope.movables.extend(request.lines.iter().map(|l| l.movable));
        scope.regions.extend(request.source_region_id);
        scope.regions.extend(request.destination_region_id);
        scope
    }

    pub fn for_batch_update(batch_id: BatchId, request: &MovementRequest) -> Self {
        let mut scope = Self::for_request(request);
        scope.batches.insert(batch_id);
        scope
    }

    pub fn for_movements(ids: &[MovementId]) -> Self {
        let mut scope = Self::new();
        scope.movements.extend(ids.iter().copied());
        scope
    }

    pub fn for_meter_transfer(ids: &[SerializedItemId], destination: &MeterDestination) -> Self {
        let mut scope = Self::new();
        scope.movables.extend(ids.iter().map(|id| MovableRef::Meter(*id)));
        scope.regions.extend(destination.region_id);
        scope.zones.extend(destination.zone_id);
        scope.connections.extend(destination.connection_id);
        scope
    }

    pub fn for_keypad_transfer(ids: &[SerializedItemId], destination: &KeypadDestination) -> Self {
        let mut scope = Self::new();
        scope.movables.extend(ids.iter().map(|id| MovableRef::Keypad(*id)));
        scope.movables.extend(destination.meter_id.map(MovableRef::Meter));
        scope.regions.extend(destination.region_id);
        scope.zones.extend(destination.zone_id);
        scope
    }

    pub fn for_equipment(id: EquipmentId) -> Self {
        let mut scope = Self::new();
        scope.movables.insert(MovableRef::Equipment(id));
        scope
    }

    /// Pull in what a loaded movement refers to.
    pub fn include_movement(&mut self, movement: &StockMovement) {
        self.movables.insert(movement.movable);
        self.regions.extend(movement.source_region_id);
        self.regions.extend(movement.destination_region_id);
    }

    /// Pull in a loaded unit's location links.
    pub fn include_unit(&mut self, unit: &SerializedItem) {
        self.regions.extend(unit.region_id);
        self.zones.extend(unit.zone_id);
        self.connections.extend(unit.connection_id);
    }

    pub fn spare_part_ids(&self) -> Vec<SparePartId> {
        self.movables
            .iter()
            .filter_map(|m| match m {
                MovableRef::SparePart(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn equipment_ids(&self) -> Vec<EquipmentId> {
        self.movables
            .iter()
            .filter_map(|m| match m {
                MovableRef::Equipment(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Ids of every serialized unit named, whatever kind it was named as.
    pub fn serialized_ids(&self) -> Vec<SerializedItemId> {
        let ids: BTreeSet<_> = self
            .movables
            .iter()
            .filter_map(|m| match m {
                MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) => Some(*id),
                _ => None,
            })
            .collect();
        ids.into_iter().collect()
    }
}

impl InventoryState {
    /// Copy of the rows `scope` reaches.
    pub fn scoped(&self, scope: &LoadScope) -> InventoryState {
        let mut scope = scope.clone();
        let mut out = InventoryState::new();

        let targeted = self
            .movements
            .iter()
            .filter(|m| scope.movements.contains(&m.id) || scope.batches.contains(&m.batch_id));
        for movement in targeted {
            out.movements.append(movement.clone());
        }
        for movement in out.movements.iter() {
            scope.include_movement(movement);
        }

        for id in scope.serialized_ids() {
            if let Ok(unit) = self.serialized.get(id) {
                scope.include_unit(unit);
                out.serialized.load(unit.clone());
            }
        }

        let references: BTreeSet<&str> = scope
            .spare_part_ids()
            .into_iter()
            .filter_map(|id| self.spare_parts.get(id).ok())
            .map(|p| p.reference.as_str())
            .collect();
        for reference in references {
            for part in self.spare_parts.by_reference(reference) {
                out.spare_parts.load(part.clone());
            }
        }

        let tags: BTreeSet<&str> = scope
            .equipment_ids()
            .into_iter()
            .filter_map(|id| self.equipment.get(id).ok())
            .map(|e| e.tag.as_str())
            .collect();
        for tag in tags {
            for equipment in self.equipment.by_tag(tag) {
                out.equipment.load(equipment.clone());
            }
        }

        for id in &scope.connections {
            if let Ok(connection) = self.directory.connection(*id) {
                scope.zones.insert(connection.zone_id);
                out.directory.insert_connection(connection.clone());
            }
        }
        for id in &scope.zones {
            if let Ok(zone) = self.directory.zone(*id) {
                scope.regions.insert(zone.region_id);
                out.directory.insert_zone(zone.clone());
            }
        }
        for id in &scope.regions {
            if let Ok(region) = self.directory.region(*id) {
                out.directory.insert_region(region.clone());
            }
        }

        out
    }

    /// Write the changes of `diff` into this state.
    pub fn apply_diff(&mut self, diff: StateDiff) {
        for id in diff.movements.deletes {
            self.movements.remove(id);
        }
        for id in diff.serialized.deletes {
            self.serialized.remove(id);
        }
        for id in diff.equipment.deletes {
            self.equipment.remove(id);
        }
        for id in diff.spare_parts.deletes {
            self.spare_parts.remove(id);
        }
        for id in diff.connections.deletes {
            self.directory.remove_connection(id);
        }
        for id in diff.zones.deletes {
            self.directory.remove_zone(id);
        }
        for id in diff.regions.deletes {
            self.directory.remove_region(id);
        }

        for region in diff.regions.upserts {
            self.directory.insert_region(region);
        }
        for zone in diff.zones.upserts {
            self.directory.insert_zone(zone);
        }
        for connection in diff.connections.upserts {
            self.directory.insert_connection(connection);
        }
        for part in diff.spare_parts.upserts {
            self.spare_parts.load(part);
        }
        for equipment in diff.equipment.upserts {
            self.equipment.load(equipment);
        }
        for unit in diff.serialized.upserts {
            self.serialized.load(unit);
        }
        for movement in diff.movements.upserts {
            self.movements.append(movement);
        }
    }
}
