//! Ledger rows and the requests that produce them.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fieldstock_core::{BatchId, DomainError, DomainResult, Entity, MovementId, RegionId, UserId};

use crate::movable::MovableRef;

/// Longest accepted free-text note on a movement.
pub const MAX_NOTES_LEN: usize = 1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Entry,
    Exit,
    Transfer,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "entry",
            MovementType::Exit => "exit",
            MovementType::Transfer => "transfer",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entry" => Ok(MovementType::Entry),
            "exit" => Ok(MovementType::Exit),
            "transfer" => Ok(MovementType::Transfer),
            other => Err(DomainError::validation(
                "type",
                format!("unknown movement type '{other}'"),
            )),
        }
    }
}

/// Where stock goes, with the regions each movement type needs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route {
    Entry { to: RegionId },
    Exit { from: RegionId },
    Transfer { from: RegionId, to: RegionId },
}

impl Route {
    /// Build a route, enforcing the region requirements of `movement_type`.
    pub fn new(
        movement_type: MovementType,
        source: Option<RegionId>,
        destination: Option<RegionId>,
    ) -> DomainResult<Self> {
        match movement_type {
            MovementType::Entry => {
                let to = destination.ok_or_else(|| {
                    DomainError::validation(
                        "destination_region_id",
                        "an entry requires a destination region",
                    )
                })?;
                Ok(Route::Entry { to })
            }
            MovementType::Exit => {
                let from = source.ok_or_else(|| {
                    DomainError::validation("source_region_id", "an exit requires a source region")
                })?;
                Ok(Route::Exit { from })
            }
            MovementType::Transfer => {
                let from = source.ok_or_else(|| {
                    DomainError::validation(
                        "source_region_id",
                        "a transfer requires a source region",
                    )
                })?;
                let to = destination.ok_or_else(|| {
                    DomainError::validation(
                        "destination_region_id",
                        "a transfer requires a destination region",
                    )
                })?;
                if from == to {
                    return Err(DomainError::validation(
                        "destination_region_id",
                        "source and destination regions must differ",
                    ));
                }
                Ok(Route::Transfer { from, to })
            }
        }
    }

    pub fn movement_type(&self) -> MovementType {
        match self {
            Route::Entry { .. } => MovementType::Entry,
            Route::Exit { .. } => MovementType::Exit,
            Route::Transfer { .. } => MovementType::Transfer,
        }
    }

    /// Region whose pre-movement stock is snapshotted: the destination for
    /// entries, the source otherwise.
    pub fn snapshot_region(&self) -> RegionId {
        match *self {
            Route::Entry { to } => to,
            Route::Exit { from } | Route::Transfer { from, .. } => from,
        }
    }

    /// Region stock is drawn from, if the route draws at all.
    pub fn draws_from(&self) -> Option<RegionId> {
        match *self {
            Route::Entry { .. } => None,
            Route::Exit { from } | Route::Transfer { from, .. } => Some(from),
        }
    }

    pub fn source(&self) -> Option<RegionId> {
        self.draws_from()
    }

    pub fn destination(&self) -> Option<RegionId> {
        match *self {
            Route::Entry { to } | Route::Transfer { to, .. } => Some(to),
            Route::Exit { .. } => None,
        }
    }

    /// The route that undoes this one.
    pub fn inverse(&self) -> Route {
        match *self {
            Route::Entry { to } => Route::Exit { from: to },
            Route::Exit { from } => Route::Entry { to: from },
            Route::Transfer { from, to } => Route::Transfer { from: to, to: from },
        }
    }
}

/// One item to move within a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub movable: MovableRef,
    pub quantity: i64,
}

/// A batch of movements sharing a type, regions, date and people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub lines: Vec<MovementLine>,
    pub source_region_id: Option<RegionId>,
    pub destination_region_id: Option<RegionId>,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub responsible_user_id: Option<UserId>,
    pub intended_for_user_id: Option<UserId>,
}

impl MovementRequest {
    pub fn new(movement_type: MovementType, date: NaiveDate) -> Self {
        Self {
            movement_type,
            lines: Vec::new(),
            source_region_id: None,
            destination_region_id: None,
            date,
            notes: None,
            responsible_user_id: None,
            intended_for_user_id: None,
        }
    }

    pub fn from_region(mut self, region: RegionId) -> Self {
        self.source_region_id = Some(region);
        self
    }

    pub fn to_region(mut self, region: RegionId) -> Self {
        self.destination_region_id = Some(region);
        self
    }

    pub fn line(mut self, movable: MovableRef, quantity: i64) -> Self {
        self.lines.push(MovementLine { movable, quantity });
        self
    }

    /// Shape checks that need no state. Returns the route on success.
    pub fn validate(&self) -> DomainResult<Route> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("items", "at least one item is required"));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::validation(
                    format!("items.{idx}.quantity"),
                    "quantity must be a positive integer",
                ));
            }
        }
        if let Some(notes) = &self.notes {
            if notes.chars().count() > MAX_NOTES_LEN {
                return Err(DomainError::validation(
                    "notes",
                    format!("notes cannot exceed {MAX_NOTES_LEN} characters"),
                ));
            }
        }
        Route::new(self.movement_type, self.source_region_id, self.destination_region_id)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub batch_id: BatchId,
    /// Position of the row within its batch.
    pub line_no: u32,
    pub movable: MovableRef,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub source_region_id: Option<RegionId>,
    pub destination_region_id: Option<RegionId>,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub user_id: UserId,
    pub responsible_user_id: Option<UserId>,
    pub intended_for_user_id: Option<UserId>,
    /// Stock held before the movement (destination for entries, source otherwise).
    pub stock_at_movement: i64,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Rebuild the route this row was recorded with.
    pub fn route(&self) -> DomainResult<Route> {
        Route::new(
            self.movement_type,
            self.source_region_id,
            self.destination_region_id,
        )
        .map_err(|_| {
            DomainError::invariant(format!(
                "movement {} lacks the regions needed to reverse a {}",
                self.id, self.movement_type
            ))
        })
    }

    /// Ordering key: later rows sort after earlier ones.
    pub fn chronology(&self) -> (DateTime<Utc>, BatchId, u32) {
        (self.created_at, self.batch_id, self.line_no)
    }

    pub fn touches_region(&self, region: RegionId) -> bool {
        self.source_region_id == Some(region) || self.destination_region_id == Some(region)
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> MovementId {
        self.id
    }
}
