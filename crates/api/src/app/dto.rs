use core::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use fieldstock_core::{
    BatchId, ConnectionId, DomainError, DomainResult, MovementId, RegionId, SerializedItemId,
    UserId, ZoneId,
};
use fieldstock_inventory::{
    KeypadDestination, MeterDestination, MovableKind, MovableRef, MovementFilter, MovementLine,
    MovementRequest, MovementType,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct MovementItem {
    pub movable_type: MovableKind,
    pub movable_id: Uuid,
    pub quantity: i64,
}

/// Body of `POST /stock-movements` and `PUT /stock-movements/batches/:batch_id`.
#[derive(Debug, Deserialize)]
pub struct StoreMovementsRequest {
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub items: Vec<MovementItem>,
    pub source_region_id: Option<RegionId>,
    pub destination_region_id: Option<RegionId>,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub responsible_user_id: Option<UserId>,
    pub intended_for_user_id: Option<UserId>,
}

impl StoreMovementsRequest {
    pub fn into_request(self) -> MovementRequest {
        MovementRequest {
            movement_type: self.movement_type,
            lines: self
                .items
                .into_iter()
                .map(|item| MovementLine {
                    movable: MovableRef::from_parts(item.movable_type, item.movable_id),
                    quantity: item.quantity,
                })
                .collect(),
            source_region_id: self.source_region_id,
            destination_region_id: self.destination_region_id,
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            notes: blank_to_none(self.notes),
            responsible_user_id: self.responsible_user_id,
            intended_for_user_id: self.intended_for_user_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<MovementId>,
}

#[derive(Debug, Deserialize)]
pub struct MeterTransferRequest {
    pub meter_ids: Vec<SerializedItemId>,
    pub region_id: Option<RegionId>,
    pub zone_id: Option<ZoneId>,
    pub connection_id: Option<ConnectionId>,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl MeterTransferRequest {
    pub fn destination(&self) -> MeterDestination {
        MeterDestination {
            region_id: self.region_id,
            zone_id: self.zone_id,
            connection_id: self.connection_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct KeypadTransferRequest {
    pub keypad_ids: Vec<SerializedItemId>,
    pub region_id: Option<RegionId>,
    pub zone_id: Option<ZoneId>,
    pub meter_id: Option<SerializedItemId>,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl KeypadTransferRequest {
    pub fn destination(&self) -> KeypadDestination {
        KeypadDestination {
            region_id: self.region_id,
            zone_id: self.zone_id,
            meter_id: self.meter_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PartitionRequest {
    pub quantities: Vec<i64>,
}

/// Query string of `GET /stock-movements`. Values arrive as text and are
/// parsed here so a bad filter is reported against its field.
#[derive(Debug, Default, Deserialize)]
pub struct ListMovementsQuery {
    pub movable_type: Option<String>,
    pub movable_id: Option<String>,
    #[serde(rename = "type")]
    pub movement_type: Option<String>,
    pub region_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub batch_id: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListMovementsQuery {
    pub fn filter(&self) -> DomainResult<MovementFilter> {
        let kind = parse_opt::<MovableKind>(&self.movable_type)?;
        let movable = match (kind, non_blank(&self.movable_id)) {
            (Some(kind), Some(raw)) => {
                let id = Uuid::from_str(raw)
                    .map_err(|e| DomainError::validation("movable_id", e.to_string()))?;
                Some(MovableRef::from_parts(kind, id))
            }
            (None, Some(_)) => {
                return Err(DomainError::validation(
                    "movable_type",
                    "movable_type is required when filtering by movable_id",
                ));
            }
            (_, None) => None,
        };

        let filter = MovementFilter {
            kind,
            movable,
            movement_type: parse_opt(&self.movement_type)?,
            region: parse_opt::<RegionId>(&self.region_id)?,
            date_from: parse_date("date_from", &self.date_from)?,
            date_to: parse_date("date_to", &self.date_to)?,
            batch_id: parse_opt::<BatchId>(&self.batch_id)?,
        };

        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(DomainError::validation(
                    "date_to",
                    "date_to must not precede date_from",
                ));
            }
        }
        Ok(filter)
    }
}

// -------------------------
// Parsing helpers
// -------------------------

/// Parse a path segment into a typed id.
pub fn parse_id<T>(raw: &str) -> DomainResult<T>
where
    T: FromStr<Err = DomainError>,
{
    raw.trim().parse()
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn blank_to_none(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

fn parse_opt<T>(raw: &Option<String>) -> DomainResult<Option<T>>
where
    T: FromStr<Err = DomainError>,
{
    non_blank(raw).map(str::parse).transpose()
}

fn parse_date(field: &'static str, raw: &Option<String>) -> DomainResult<Option<NaiveDate>> {
    non_blank(raw)
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| DomainError::validation(field, "expected a date formatted YYYY-MM-DD"))
        })
        .transpose()
}
