//! Region/zone/connection directory.
//!
//! Passive reference data: the ledger only reads it to validate and scope
//! movements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fieldstock_core::{ConnectionId, DomainError, DomainResult, Entity, RegionId, ZoneId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub region_id: RegionId,
    pub name: String,
}

/// A customer connection point (where meters get installed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub zone_id: ZoneId,
    pub customer: String,
}

impl Entity for Region {
    type Id = RegionId;

    fn id(&self) -> RegionId {
        self.id
    }
}

impl Entity for Zone {
    type Id = ZoneId;

    fn id(&self) -> ZoneId {
        self.id
    }
}

impl Entity for Connection {
    type Id = ConnectionId;

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    regions: BTreeMap<RegionId, Region>,
    zones: BTreeMap<ZoneId, Zone>,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, name: impl Into<String>) -> DomainResult<RegionId> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name", "region name cannot be empty"));
        }
        let region = Region {
            id: RegionId::new(),
            name,
        };
        let id = region.id();
        self.insert_region(region);
        Ok(id)
    }

    pub fn add_zone(
        &mut self,
        region_id: RegionId,
        name: impl Into<String>,
    ) -> DomainResult<ZoneId> {
        self.region(region_id)?;
        let zone = Zone {
            id: ZoneId::new(),
            region_id,
            name: name.into(),
        };
        let id = zone.id();
        self.insert_zone(zone);
        Ok(id)
    }

    pub fn add_connection(
        &mut self,
        zone_id: ZoneId,
        customer: impl Into<String>,
    ) -> DomainResult<ConnectionId> {
        self.zone(zone_id)?;
        let connection = Connection {
            id: ConnectionId::new(),
            zone_id,
            customer: customer.into(),
        };
        let id = connection.id();
        self.insert_connection(connection);
        Ok(id)
    }

    /// Insert (or replace) a region row as loaded from storage.
    pub fn insert_region(&mut self, region: Region) {
        self.regions.insert(region.id, region);
    }

    pub fn insert_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.id, zone);
    }

    pub fn insert_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    pub fn remove_region(&mut self, id: RegionId) -> Option<Region> {
        self.regions.remove(&id)
    }

    pub fn remove_zone(&mut self, id: ZoneId) -> Option<Zone> {
        self.zones.remove(&id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn region(&self, id: RegionId) -> DomainResult<&Region> {
        self.regions
            .get(&id)
            .ok_or_else(|| DomainError::not_found("region", id))
    }

    pub fn zone(&self, id: ZoneId) -> DomainResult<&Zone> {
        self.zones
            .get(&id)
            .ok_or_else(|| DomainError::not_found("zone", id))
    }

    pub fn connection(&self, id: ConnectionId) -> DomainResult<&Connection> {
        self.connections
            .get(&id)
            .ok_or_else(|| DomainError::not_found("connection", id))
    }

    pub fn regions(&self) -> &BTreeMap<RegionId, Region> {
        &self.regions
    }

    pub fn zones(&self) -> &BTreeMap<ZoneId, Zone> {
        &self.zones
    }

    pub fn connections(&self) -> &BTreeMap<ConnectionId, Connection> {
        &self.connections
    }
}
