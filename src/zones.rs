//! In-memory index of declared geofence zones.
//!
//! The index is an explicitly owned value held by the application state.
//! It is seeded from the record store at startup and kept in sync through
//! the mutation methods here, after the corresponding store write commits.
//! It holds only active zones: deactivating a zone removes it from the
//! index, so no query ever has to re-check the flag.
//!
//! Readers take a read lock and work on the snapshot; writers replace
//! entries under the write lock. A concurrent reader therefore observes the
//! zone set either before or after a mutation, never a partially applied
//! one.

use std::sync::RwLock;

use crate::error::CoreError;
use crate::geo::distance_meters;
use crate::model::{Coordinates, Zone, ZoneKind};

pub struct ZoneIndex {
    zones: RwLock<Vec<Zone>>,
}

impl ZoneIndex {
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(Vec::new()),
        }
    }

    /// Build an index from a freshly loaded zone set. Inactive zones are
    /// dropped here so the store can hand over its full table.
    pub fn from_zones(zones: Vec<Zone>) -> Self {
        Self {
            zones: RwLock::new(zones.into_iter().filter(|z| z.active).collect()),
        }
    }

    /// Insert or replace a zone. An inactive zone is removed instead, since
    /// the index only ever serves active zones.
    ///
    /// Validates coordinates and radius; authorization is the caller's
    /// responsibility.
    pub fn upsert(&self, zone: Zone) -> Result<(), CoreError> {
        zone.validate()?;
        let mut zones = self.zones.write().expect("zone index lock poisoned");
        zones.retain(|z| z.id != zone.id);
        if zone.active {
            zones.push(zone);
        }
        Ok(())
    }

    pub fn remove(&self, id: &str) {
        let mut zones = self.zones.write().expect("zone index lock poisoned");
        zones.retain(|z| z.id != id);
    }

    /// Zones whose region contains the point. Containment is
    /// boundary-inclusive: a point exactly at the radius is inside.
    pub fn containing_zones(&self, point: &Coordinates) -> Vec<Zone> {
        let zones = self.zones.read().expect("zone index lock poisoned");
        zones
            .iter()
            .filter(|z| distance_meters(point, &z.center) <= z.radius_m)
            .cloned()
            .collect()
    }

    /// Zones whose *center* lies within `radius_m` of the point, nearest
    /// first. This is a pure proximity search; the zones' own radii play
    /// no part. Recomputed on every call.
    pub fn nearby_zones(&self, point: &Coordinates, radius_m: f64) -> Vec<(Zone, f64)> {
        let zones = self.zones.read().expect("zone index lock poisoned");
        let mut hits: Vec<(Zone, f64)> = zones
            .iter()
            .map(|z| (z, distance_meters(point, &z.center)))
            .filter(|(_, d)| *d <= radius_m)
            .map(|(z, d)| (z.clone(), d))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// True iff any containing zone is a risk zone.
    pub fn is_in_risk_zone(&self, point: &Coordinates) -> bool {
        let zones = self.zones.read().expect("zone index lock poisoned");
        zones
            .iter()
            .any(|z| z.kind == ZoneKind::Risk && distance_meters(point, &z.center) <= z.radius_m)
    }

    /// Snapshot of the current risk zones, for the score engine.
    pub fn risk_zones(&self) -> Vec<Zone> {
        let zones = self.zones.read().expect("zone index lock poisoned");
        zones
            .iter()
            .filter(|z| z.kind == ZoneKind::Risk)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.zones.read().expect("zone index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ZoneIndex {
    fn default() -> Self {
        Self::new()
    }
}
