//! Synchronized world-entity table.
//!
//! Handles are process-unique and monotonically allocated; a live handle is
//! never reused. Character handles for connections come from the same
//! allocator so gameplay code never sees a collision between the two kinds.
//!
//! Entities mutate only by applying validated client updates; an update for
//! an unknown handle is a silent no-op.

use std::collections::BTreeMap;

use freeroam_shared::math::Vec3;
use freeroam_shared::protocol::{PropSnapshot, VehicleData, VehicleSnapshot, WorldSnapshot};

/// Process-unique handle for a world entity or a connection's character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub i32);

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleProps {
    pub model: i32,
    pub primary_color: i32,
    pub secondary_color: i32,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PedProps {
    pub model: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropProps {
    pub model: i32,
}

/// Type tag plus type-specific properties.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Vehicle(VehicleProps),
    Ped(PedProps),
    Prop(PropProps),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    pub position: Vec3,
    pub rotation: Vec3,
    pub kind: EntityKind,
}

/// Handle-keyed table of synchronized entities.
///
/// A `BTreeMap` keeps iteration order stable across ticks.
pub struct EntityTable {
    next_handle: i32,
    entities: BTreeMap<EntityHandle, EntityData>,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTable {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            entities: BTreeMap::new(),
        }
    }

    /// Allocates a fresh handle without creating an entity (character
    /// handles).
    pub fn allocate_handle(&mut self) -> EntityHandle {
        let h = EntityHandle(self.next_handle);
        self.next_handle += 1;
        h
    }

    /// Creates a new entity and returns its handle.
    pub fn create(&mut self, kind: EntityKind, position: Vec3, rotation: Vec3) -> EntityHandle {
        let handle = self.allocate_handle();
        self.entities.insert(
            handle,
            EntityData {
                position,
                rotation,
                kind,
            },
        );
        handle
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&EntityData> {
        self.entities.get(&handle)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut EntityData> {
        self.entities.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: EntityHandle) -> Option<EntityData> {
        self.entities.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &EntityData)> {
        self.entities.iter().map(|(h, e)| (*h, e))
    }

    /// Applies a client vehicle report to the matching entity.
    ///
    /// Returns false when the handle is unknown or not a vehicle; the caller
    /// still rebroadcasts, only the table mutation is skipped.
    pub fn apply_vehicle_update(&mut self, data: &VehicleData) -> bool {
        let Some(entity) = self.entities.get_mut(&EntityHandle(data.vehicle_handle)) else {
            return false;
        };
        let EntityKind::Vehicle(ref mut props) = entity.kind else {
            return false;
        };
        entity.position = data.position;
        entity.rotation = data.rotation;
        props.primary_color = data.primary_color;
        props.secondary_color = data.secondary_color;
        true
    }

    /// Serializable view of vehicles and props for a connecting client.
    ///
    /// Peds are live players, not map state, and stay out of the snapshot.
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut snap = WorldSnapshot::default();
        for (handle, entity) in &self.entities {
            match &entity.kind {
                EntityKind::Vehicle(v) => snap.vehicles.push(VehicleSnapshot {
                    handle: handle.0,
                    model: v.model,
                    position: entity.position,
                    rotation: entity.rotation,
                    primary_color: v.primary_color,
                    secondary_color: v.secondary_color,
                    health: v.health,
                }),
                EntityKind::Prop(p) => snap.props.push(PropSnapshot {
                    handle: handle.0,
                    model: p.model,
                    position: entity.position,
                    rotation: entity.rotation,
                }),
                EntityKind::Ped(_) => {}
            }
        }
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle() -> EntityKind {
        EntityKind::Vehicle(VehicleProps {
            model: 1337,
            primary_color: 0,
            secondary_color: 0,
            health: 1000,
        })
    }

    #[test]
    fn default_table_starts_handles_at_one() {
        let mut table = EntityTable::default();
        assert_eq!(table.allocate_handle(), EntityHandle(1));
    }

    #[test]
    fn handles_are_unique_and_monotonic() {
        let mut table = EntityTable::new();
        let a = table.allocate_handle();
        let b = table.create(vehicle(), Vec3::ZERO, Vec3::ZERO);
        let c = table.allocate_handle();
        assert!(a < b && b < c);
        table.remove(b);
        let d = table.allocate_handle();
        assert!(d > c, "removing must not recycle handles");
    }

    #[test]
    fn vehicle_update_applies_transform_and_colors() {
        let mut table = EntityTable::new();
        let h = table.create(vehicle(), Vec3::ZERO, Vec3::ZERO);
        let data = VehicleData {
            id: 0,
            name: String::new(),
            latency: 0.0,
            net_handle: 0,
            vehicle_handle: h.0,
            position: Vec3::new(10.0, 20.0, 30.0),
            rotation: Vec3::new(0.0, 0.0, 90.0),
            player_health: 100,
            vehicle_health: 900,
            primary_color: 3,
            secondary_color: 4,
        };
        assert!(table.apply_vehicle_update(&data));
        let e = table.get(h).unwrap();
        assert_eq!(e.position, Vec3::new(10.0, 20.0, 30.0));
        match &e.kind {
            EntityKind::Vehicle(v) => {
                assert_eq!(v.primary_color, 3);
                assert_eq!(v.secondary_color, 4);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn unknown_handle_is_silently_skipped() {
        let mut table = EntityTable::new();
        let data = VehicleData {
            id: 0,
            name: String::new(),
            latency: 0.0,
            net_handle: 0,
            vehicle_handle: 424242,
            position: Vec3::new(1.0, 1.0, 1.0),
            rotation: Vec3::ZERO,
            player_health: 100,
            vehicle_health: 900,
            primary_color: 1,
            secondary_color: 1,
        };
        assert!(!table.apply_vehicle_update(&data));
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_contains_vehicles_and_props_only() {
        let mut table = EntityTable::new();
        table.create(vehicle(), Vec3::ZERO, Vec3::ZERO);
        table.create(EntityKind::Ped(PedProps { model: 7 }), Vec3::ZERO, Vec3::ZERO);
        table.create(
            EntityKind::Prop(PropProps { model: 99 }),
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::ZERO,
        );
        let snap = table.snapshot();
        assert_eq!(snap.vehicles.len(), 1);
        assert_eq!(snap.props.len(), 1);
    }
}
