//! Movable items: everything the ledger can move between regions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fieldstock_core::{
    ConnectionId, DomainError, Entity, EquipmentId, RegionId, SerializedItemId, SparePartId, ZoneId,
};

/// Closed set of inventory-bearing kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovableKind {
    SparePart,
    Equipment,
    Meter,
    Keypad,
    Engin,
}

impl MovableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovableKind::SparePart => "spare_part",
            MovableKind::Equipment => "equipment",
            MovableKind::Meter => "meter",
            MovableKind::Keypad => "keypad",
            MovableKind::Engin => "engin",
        }
    }

    /// Serialized kinds are one row per physical unit; they move whole.
    pub fn is_serialized(&self) -> bool {
        matches!(self, MovableKind::Meter | MovableKind::Keypad | MovableKind::Engin)
    }

    fn noun(&self) -> &'static str {
        match self {
            MovableKind::SparePart => "spare part",
            MovableKind::Equipment => "equipment",
            MovableKind::Meter => "meter",
            MovableKind::Keypad => "keypad",
            MovableKind::Engin => "engine",
        }
    }
}

impl core::fmt::Display for MovableKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovableKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spare_part" => Ok(MovableKind::SparePart),
            "equipment" => Ok(MovableKind::Equipment),
            "meter" => Ok(MovableKind::Meter),
            "keypad" => Ok(MovableKind::Keypad),
            "engin" | "engine" => Ok(MovableKind::Engin),
            other => Err(DomainError::validation(
                "movable_type",
                format!("unknown movable type '{other}'"),
            )),
        }
    }
}

/// Typed pointer to a movable row: the kind tag and the id travel together.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "movable_type", content = "movable_id", rename_all = "snake_case")]
pub enum MovableRef {
    SparePart(SparePartId),
    Equipment(EquipmentId),
    Meter(SerializedItemId),
    Keypad(SerializedItemId),
    Engin(SerializedItemId),
}

impl MovableRef {
    pub fn from_parts(kind: MovableKind, id: Uuid) -> Self {
        match kind {
            MovableKind::SparePart => MovableRef::SparePart(SparePartId::from_uuid(id)),
            MovableKind::Equipment => MovableRef::Equipment(EquipmentId::from_uuid(id)),
            MovableKind::Meter => MovableRef::Meter(SerializedItemId::from_uuid(id)),
            MovableKind::Keypad => MovableRef::Keypad(SerializedItemId::from_uuid(id)),
            MovableKind::Engin => MovableRef::Engin(SerializedItemId::from_uuid(id)),
        }
    }

    pub fn serialized(kind: MovableKind, id: SerializedItemId) -> Option<Self> {
        match kind {
            MovableKind::Meter => Some(MovableRef::Meter(id)),
            MovableKind::Keypad => Some(MovableRef::Keypad(id)),
            MovableKind::Engin => Some(MovableRef::Engin(id)),
            MovableKind::SparePart | MovableKind::Equipment => None,
        }
    }

    pub fn kind(&self) -> MovableKind {
        match self {
            MovableRef::SparePart(_) => MovableKind::SparePart,
            MovableRef::Equipment(_) => MovableKind::Equipment,
            MovableRef::Meter(_) => MovableKind::Meter,
            MovableRef::Keypad(_) => MovableKind::Keypad,
            MovableRef::Engin(_) => MovableKind::Engin,
        }
    }

    pub fn raw_id(&self) -> Uuid {
        match self {
            MovableRef::SparePart(id) => *id.as_uuid(),
            MovableRef::Equipment(id) => *id.as_uuid(),
            MovableRef::Meter(id) | MovableRef::Keypad(id) | MovableRef::Engin(id) => *id.as_uuid(),
        }
    }
}

impl core::fmt::Display for MovableRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.raw_id())
    }
}

/// Region-scoped spare part stock, matched across regions by `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparePart {
    pub id: SparePartId,
    pub reference: String,
    pub name: String,
    pub unit: Option<String>,
    pub region_id: RegionId,
    pub quantity: i64,
}

impl SparePart {
    pub fn new(
        reference: impl Into<String>,
        name: impl Into<String>,
        region_id: RegionId,
        quantity: i64,
    ) -> Self {
        Self {
            id: SparePartId::new(),
            reference: reference.into(),
            name: name.into(),
            unit: None,
            region_id,
            quantity,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", MovableKind::SparePart.noun(), self.reference)
    }
}

/// Stackable equipment, matched across regions by `tag`.
///
/// Rows with a `parent_id` are tracked sub-units carved out of a parent row
/// (see [`crate::stock::EquipmentBook::partition`]); movements draw on the
/// region pool row, i.e. the one without a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub tag: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub equipment_type: Option<String>,
    pub region_id: RegionId,
    pub quantity: i64,
    pub parent_id: Option<EquipmentId>,
}

impl Equipment {
    pub fn new(tag: impl Into<String>, region_id: RegionId, quantity: i64) -> Self {
        Self {
            id: EquipmentId::new(),
            tag: tag.into(),
            brand: None,
            model: None,
            equipment_type: None,
            region_id,
            quantity,
            parent_id: None,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", MovableKind::Equipment.noun(), self.tag)
    }

    pub fn is_pool(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One physical meter, keypad or engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedItem {
    pub id: SerializedItemId,
    pub kind: MovableKind,
    pub serial: String,
    pub region_id: Option<RegionId>,
    pub zone_id: Option<ZoneId>,
    /// Meters only: the customer connection the meter is installed on.
    pub connection_id: Option<ConnectionId>,
    /// Keypads only: the meter the keypad is paired with.
    pub meter_id: Option<SerializedItemId>,
    pub quantity: i64,
}

impl SerializedItem {
    /// A freshly registered unit: quantity 1, sitting in `region_id`.
    pub fn new(kind: MovableKind, serial: impl Into<String>, region_id: Option<RegionId>) -> Self {
        debug_assert!(kind.is_serialized());
        Self {
            id: SerializedItemId::new(),
            kind,
            serial: serial.into(),
            region_id,
            zone_id: None,
            connection_id: None,
            meter_id: None,
            quantity: 1,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.kind.noun(), self.serial)
    }

    pub fn movable(&self) -> Option<MovableRef> {
        MovableRef::serialized(self.kind, self.id)
    }
}

impl Entity for SparePart {
    type Id = SparePartId;

    fn id(&self) -> SparePartId {
        self.id
    }
}

impl Entity for Equipment {
    type Id = EquipmentId;

    fn id(&self) -> EquipmentId {
        self.id
    }
}

impl Entity for SerializedItem {
    type Id = SerializedItemId;

    fn id(&self) -> SerializedItemId {
        self.id
    }
}
