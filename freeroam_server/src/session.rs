//! Session registry.
//!
//! One `Player` per registered connection, held in an ordered list. A
//! connection's channel is derived from its position in that list, bounded
//! to the transport's channel cap, so channels stay unique modulo the cap
//! among active connections.

use chrono::{DateTime, Duration, Utc};

use freeroam_shared::math::Vec3;
use freeroam_shared::protocol::ProtocolVersion;

use crate::entity::EntityHandle;
use crate::transport::{ConnectionId, CHANNEL_CAP};

/// A registered connection and its last reported state snapshot.
#[derive(Debug, Clone)]
pub struct Player {
    pub connection: ConnectionId,
    /// Platform account identity, never client-chosen.
    pub platform_name: String,
    /// Name shown to other players.
    pub display_name: String,
    pub protocol_version: ProtocolVersion,
    pub game_version: i32,

    pub position: Vec3,
    pub rotation: Vec3,
    pub health: i32,
    pub vehicle_health: i32,
    pub in_vehicle: bool,
    pub current_vehicle: i32,

    pub latency: f32,
    pub last_update: Option<DateTime<Utc>>,
    pub character_handle: EntityHandle,
}

impl Player {
    pub fn new(connection: ConnectionId, character_handle: EntityHandle) -> Self {
        Self {
            connection,
            platform_name: String::new(),
            display_name: String::new(),
            protocol_version: ProtocolVersion::Unknown,
            game_version: 0,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            health: 0,
            vehicle_health: 0,
            in_vehicle: false,
            current_vehicle: 0,
            latency: 0.0,
            last_update: None,
            character_handle,
        }
    }
}

/// Ordered registry of active connections.
#[derive(Default)]
pub struct SessionRegistry {
    players: Vec<Player>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.players.iter().any(|p| p.connection == connection)
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.connection == connection)
    }

    pub fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.connection == connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    /// Registers a player. The caller has already passed the approval checks.
    pub fn insert(&mut self, player: Player) {
        debug_assert!(!self.contains(player.connection), "connection ids are unique");
        self.players.push(player);
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.connection == connection)?;
        Some(self.players.remove(idx))
    }

    /// Channel assigned to a connection: list position bounded to the cap,
    /// offset past channel 0 (reserved for the transport itself).
    pub fn channel_for(&self, connection: ConnectionId) -> Option<u8> {
        let idx = self
            .players
            .iter()
            .position(|p| p.connection == connection)?;
        Some((idx % CHANNEL_CAP as usize) as u8 + 1)
    }

    /// Resolves a display-name collision by appending `" (N)"` until unique.
    pub fn unique_display_name(&self, wanted: &str) -> String {
        let mut candidate = wanted.to_string();
        let mut duplicate = 0;
        while self.players.iter().any(|p| p.display_name == candidate) {
            duplicate += 1;
            candidate = format!("{wanted} ({duplicate})");
        }
        candidate
    }

    /// Connections with an update inside the liveness window.
    pub fn live_count(&self, window: Duration) -> usize {
        let now = Utc::now();
        self.players
            .iter()
            .filter(|p| p.last_update.is_some_and(|t| now - t < window))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: i64) -> Player {
        let mut p = Player::new(ConnectionId(id), EntityHandle(id as i32));
        p.display_name = format!("p{id}");
        p
    }

    #[test]
    fn channels_unique_modulo_cap() {
        let mut reg = SessionRegistry::new();
        for i in 0..CHANNEL_CAP as i64 {
            reg.insert(player(i));
        }
        let mut seen = std::collections::HashSet::new();
        for p in reg.iter() {
            let ch = reg.channel_for(p.connection).unwrap();
            assert!((1..=CHANNEL_CAP).contains(&ch));
            assert!(seen.insert(ch), "channel {ch} assigned twice");
        }
    }

    #[test]
    fn channel_reassigned_after_removal() {
        let mut reg = SessionRegistry::new();
        reg.insert(player(1));
        reg.insert(player(2));
        assert_eq!(reg.channel_for(ConnectionId(2)), Some(2));
        reg.remove(ConnectionId(1));
        assert_eq!(reg.channel_for(ConnectionId(2)), Some(1));
    }

    #[test]
    fn display_name_suffixing() {
        let mut reg = SessionRegistry::new();
        let mut a = player(1);
        a.display_name = "Steve".into();
        reg.insert(a);

        assert_eq!(reg.unique_display_name("Steve"), "Steve (1)");

        let mut b = player(2);
        b.display_name = "Steve (1)".into();
        reg.insert(b);
        assert_eq!(reg.unique_display_name("Steve"), "Steve (2)");
    }

    #[test]
    fn live_count_honors_window() {
        let mut reg = SessionRegistry::new();
        let mut fresh = player(1);
        fresh.last_update = Some(Utc::now());
        reg.insert(fresh);

        let mut stale = player(2);
        stale.last_update = Some(Utc::now() - Duration::seconds(120));
        reg.insert(stale);

        reg.insert(player(3)); // never updated

        assert_eq!(reg.live_count(Duration::seconds(60)), 1);
    }
}
