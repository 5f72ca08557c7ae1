//! Read-side views over an [`InventoryState`].

use std::cmp::Reverse;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use fieldstock_core::{BatchId, DomainError, DomainResult, RegionId};

use crate::movable::{MovableKind, MovableRef};
use crate::movement::{MovementType, StockMovement};
use crate::state::InventoryState;

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 100;

/// Movement listing filter. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub kind: Option<MovableKind>,
    pub movable: Option<MovableRef>,
    pub movement_type: Option<MovementType>,
    /// Matches either side of the movement.
    pub region: Option<RegionId>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub batch_id: Option<BatchId>,
}

impl MovementFilter {
    pub fn matches(&self, m: &StockMovement) -> bool {
        self.kind.is_none_or(|k| m.movable.kind() == k)
            && self.movable.is_none_or(|r| m.movable == r)
            && self.movement_type.is_none_or(|t| m.movement_type == t)
            && self.region.is_none_or(|r| m.touches_region(r))
            && self.date_from.is_none_or(|d| m.date >= d)
            && self.date_to.is_none_or(|d| m.date <= d)
            && self.batch_id.is_none_or(|b| m.batch_id == b)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self::with_limits(page, per_page, DEFAULT_PER_PAGE, MAX_PER_PAGE)
    }

    /// Pages are 1-based; `per_page` falls back to `default` and is capped at `max`.
    pub fn with_limits(page: Option<u32>, per_page: Option<u32>, default: u32, max: u32) -> Self {
        let max = max.max(1);
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default).clamp(1, max),
        }
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub last_page: u32,
}

impl<T> Page<T> {
    /// One page of a listing `total` rows long.
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let last_page = total.div_ceil(u64::from(request.per_page)).max(1);
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionQuantity {
    pub region_id: RegionId,
    pub region_name: String,
    pub quantity: i64,
}

/// Cross-region view of one spare part reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparePartStock {
    pub reference: String,
    pub name: String,
    pub regions: Vec<RegionQuantity>,
    pub total: i64,
}

/// Cross-region view of one equipment tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentStock {
    pub tag: String,
    /// Pool quantities, i.e. what movements can draw on.
    pub regions: Vec<RegionQuantity>,
    /// Held in partitioned sub-units.
    pub partitioned: i64,
    pub total: i64,
}

/// One line of a region's stock sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHolding {
    pub movable: MovableRef,
    pub label: String,
    pub quantity: i64,
}

impl InventoryState {
    /// Movements matching `filter`, newest first.
    pub fn list_movements(
        &self,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Page<StockMovement> {
        let mut matching: Vec<&StockMovement> =
            self.movements.iter().filter(|m| filter.matches(m)).collect();
        matching.sort_by_key(|m| Reverse((m.date, m.chronology())));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect();
        Page::new(items, total, page)
    }

    pub fn spare_part_stock(&self, reference: &str) -> DomainResult<SparePartStock> {
        let rows: Vec<_> = self.spare_parts.by_reference(reference).collect();
        let first = rows
            .first()
            .ok_or_else(|| DomainError::not_found("spare part", reference))?;

        let regions = self.region_quantities(rows.iter().map(|p| (p.region_id, p.quantity)));
        Ok(SparePartStock {
            reference: reference.to_string(),
            name: first.name.clone(),
            total: regions.iter().map(|r| r.quantity).sum(),
            regions,
        })
    }

    pub fn equipment_stock(&self, tag: &str) -> DomainResult<EquipmentStock> {
        let rows: Vec<_> = self.equipment.by_tag(tag).collect();
        if rows.is_empty() {
            return Err(DomainError::not_found("equipment", tag));
        }

        let regions = self.region_quantities(
            rows.iter()
                .filter(|e| e.is_pool())
                .map(|e| (e.region_id, e.quantity)),
        );
        let partitioned: i64 = rows.iter().filter(|e| !e.is_pool()).map(|e| e.quantity).sum();
        let pooled: i64 = regions.iter().map(|r| r.quantity).sum();

        Ok(EquipmentStock {
            tag: tag.to_string(),
            regions,
            partitioned,
            total: pooled + partitioned,
        })
    }

    /// Every row with positive stock in `region`, sorted by label.
    pub fn region_stock(&self, region: RegionId) -> DomainResult<Vec<RegionHolding>> {
        self.directory.region(region)?;

        let spare = self
            .spare_parts
            .rows()
            .values()
            .filter(|p| p.region_id == region)
            .map(|p| RegionHolding {
                movable: MovableRef::SparePart(p.id),
                label: p.label(),
                quantity: p.quantity,
            });
        let equipment = self
            .equipment
            .rows()
            .values()
            .filter(|e| e.is_pool() && e.region_id == region)
            .map(|e| RegionHolding {
                movable: MovableRef::Equipment(e.id),
                label: e.label(),
                quantity: e.quantity,
            });
        let units = self.serialized.in_region(region).filter_map(|u| {
            u.movable().map(|movable| RegionHolding {
                movable,
                label: u.label(),
                quantity: u.quantity,
            })
        });

        let mut holdings: Vec<_> = spare
            .chain(equipment)
            .chain(units)
            .filter(|h| h.quantity > 0)
            .collect();
        holdings.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(holdings)
    }

    fn region_quantities(
        &self,
        rows: impl Iterator<Item = (RegionId, i64)>,
    ) -> Vec<RegionQuantity> {
        let mut out: Vec<RegionQuantity> = rows
            .map(|(region_id, quantity)| RegionQuantity {
                region_id,
                region_name: self
                    .directory
                    .region(region_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
                quantity,
            })
            .collect();
        out.sort_by(|a, b| a.region_name.cmp(&b.region_name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldstock_core::UserId;

    use crate::ledger::{Ledger, LedgerContext};
    use crate::movable::{Equipment, SerializedItem, SparePart};
    use crate::movement::MovementRequest;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn seeded() -> (InventoryState, RegionId, RegionId) {
        let mut state = InventoryState::new();
        let a = state.directory.add_region("North").unwrap();
        let b = state.directory.add_region("South").unwrap();
        state
            .spare_parts
            .insert(SparePart::new("REF-1", "Fuse", a, 10))
            .unwrap();
        (state, a, b)
    }

    #[test]
    fn page_request_clamps_inputs() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, per_page: 25 });
        assert_eq!(PageRequest::new(Some(0), Some(500)), PageRequest { page: 1, per_page: 100 });
        assert_eq!(PageRequest::new(Some(3), Some(0)).per_page, 1);
    }

    #[test]
    fn listing_is_newest_first_and_paginated() {
        let (mut state, a, _) = seeded();
        let id = state.spare_parts.find("REF-1", a).unwrap().id;
        let user = UserId::new();
        for d in 1..=5 {
            let req = MovementRequest::new(MovementType::Entry, day(d))
                .to_region(a)
                .line(MovableRef::SparePart(id), 1);
            Ledger::new(&mut state, LedgerContext::new(user)).record(&req).unwrap();
        }

        let all = MovementFilter::default();
        let page = state.list_movements(&all, PageRequest::new(Some(1), Some(2)));
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.items.iter().map(|m| m.date).collect::<Vec<_>>(), vec![day(5), day(4)]);

        let last = state.list_movements(&all, PageRequest::new(Some(3), Some(2)));
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].date, day(1));
    }

    #[test]
    fn filter_by_region_and_type() {
        let (mut state, a, b) = seeded();
        let id = state.spare_parts.find("REF-1", a).unwrap().id;
        let ctx = LedgerContext::at(UserId::new(), Utc::now());
        let transfer = MovementRequest::new(MovementType::Transfer, day(2))
            .from_region(a)
            .to_region(b)
            .line(MovableRef::SparePart(id), 2);
        let exit = MovementRequest::new(MovementType::Exit, day(3))
            .from_region(a)
            .line(MovableRef::SparePart(id), 1);
        Ledger::new(&mut state, ctx).record(&transfer).unwrap();
        Ledger::new(&mut state, ctx).record(&exit).unwrap();

        let south = MovementFilter {
            region: Some(b),
            ..MovementFilter::default()
        };
        assert_eq!(state.list_movements(&south, PageRequest::default()).total, 1);

        let exits = MovementFilter {
            movement_type: Some(MovementType::Exit),
            kind: Some(MovableKind::SparePart),
            ..MovementFilter::default()
        };
        assert_eq!(state.list_movements(&exits, PageRequest::default()).total, 1);

        let early = MovementFilter {
            date_to: Some(day(2)),
            ..MovementFilter::default()
        };
        assert_eq!(state.list_movements(&early, PageRequest::default()).total, 1);
    }

    #[test]
    fn spare_part_stock_aggregates_regions() {
        let (mut state, _, b) = seeded();
        state
            .spare_parts
            .insert(SparePart::new("REF-1", "Fuse", b, 4))
            .unwrap();

        let stock = state.spare_part_stock("REF-1").unwrap();
        assert_eq!(stock.total, 14);
        assert_eq!(stock.regions.len(), 2);
        assert_eq!(stock.regions[0].region_name, "North");

        assert!(matches!(
            state.spare_part_stock("NOPE"),
            Err(DomainError::NotFound { entity: "spare part", .. })
        ));
    }

    #[test]
    fn equipment_stock_separates_partitioned_units() {
        let (mut state, a, _) = seeded();
        let id = state.equipment.insert(Equipment::new("EQ-1", a, 8)).unwrap();
        state.equipment.partition(id, &[3]).unwrap();

        let stock = state.equipment_stock("EQ-1").unwrap();
        assert_eq!(stock.regions[0].quantity, 5);
        assert_eq!(stock.partitioned, 3);
        assert_eq!(stock.total, 8);
    }

    #[test]
    fn region_stock_lists_every_kind() {
        let (mut state, a, b) = seeded();
        state.equipment.insert(Equipment::new("EQ-1", a, 2)).unwrap();
        state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-1", Some(a)))
            .unwrap();
        state
            .serialized
            .insert(SerializedItem::new(MovableKind::Meter, "M-2", Some(b)))
            .unwrap();

        let holdings = state.region_stock(a).unwrap();
        let labels: Vec<_> = holdings.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, vec!["equipment EQ-1", "meter M-1", "spare part REF-1"]);

        assert!(state.region_stock(RegionId::new()).is_err());
    }
}
