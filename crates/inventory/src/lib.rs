//! Inventory domain module: the stock movement ledger.
//!
//! This crate contains business rules for region-scoped stock and the ledger
//! that moves it, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage). Callers hand in an [`InventoryState`] and decide how to
//! make the mutation transactional.

pub mod directory;
pub mod ledger;
pub mod movable;
pub mod movement;
pub mod query;
pub mod scope;
pub mod state;
pub mod stock;

pub use directory::{Connection, Directory, Region, Zone};
pub use ledger::{KeypadDestination, Ledger, LedgerContext, MeterDestination, Placement};
pub use movable::{Equipment, MovableKind, MovableRef, SerializedItem, SparePart};
pub use movement::{MovementLine, MovementRequest, MovementType, Route, StockMovement};
pub use query::{
    EquipmentStock, MovementFilter, Page, PageRequest, RegionHolding, RegionQuantity,
    SparePartStock,
};
pub use scope::LoadScope;
pub use state::{InventoryState, MovementJournal, StateDiff, TableDiff};
pub use stock::{EquipmentBook, SerializedBook, SparePartBook, StockKeeping};
