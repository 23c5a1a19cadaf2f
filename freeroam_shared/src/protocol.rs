//! Application payload types.
//!
//! These mirror the packets a game client speaks. Every payload decodes
//! independently of its frame; fields the server stamps before rebroadcast
//! (sender id, name, latency, net handle) are plain fields the client-sent
//! values of which are overwritten server-side.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;
use crate::natives::NativeArgument;

/// Protocol generations the server understands.
///
/// `Unknown` is the sentinel a client reports when it cannot identify its own
/// build; it is always denied at approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    Unknown,
    V0_9,
}

/// Connection approval descriptor sent by a connecting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub display_name: String,
    /// Platform account identity (not client-chosen).
    pub platform_name: String,
    pub password: String,
    pub protocol_version: ProtocolVersion,
    pub game_version: i32,
}

/// Approval reply: `[i32 length][payload]` hail data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub character_handle: i32,
    pub assigned_channel: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    /// Transport identity of the sender, stamped by the server.
    pub id: i64,
    /// Server-known sender name, stamped by the server.
    pub sender: String,
    pub message: String,
}

/// Position/state report from a client driving a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleData {
    pub id: i64,
    pub name: String,
    pub latency: f32,
    pub net_handle: i32,
    pub vehicle_handle: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub player_health: i32,
    pub vehicle_health: i32,
    pub primary_color: i32,
    pub secondary_color: i32,
}

/// Position/state report from a client on foot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PedData {
    pub id: i64,
    pub name: String,
    pub latency: f32,
    pub net_handle: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub player_health: i32,
}

/// Generic world-state event relayed verbatim to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub arguments: Vec<NativeArgument>,
}

/// Client-triggered scripted event, fanned out to resource engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEventTrigger {
    pub resource: String,
    pub event_name: String,
    pub arguments: Vec<NativeArgument>,
}

/// Remote procedure call into client game logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCall {
    /// Numeric identifier of the game function to invoke.
    pub hash: u64,
    pub arguments: Vec<NativeArgument>,
    /// Correlation token when a response is expected, or the recall name for
    /// on-disconnect calls. Empty otherwise.
    pub correlation_id: String,
    /// Hint telling the client how to encode the return value.
    pub return_hint: Option<NativeArgument>,
}

/// A native call the client re-issues every local frame until recalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTickCall {
    pub identifier: String,
    pub native: Option<NativeCall>,
}

/// Reply carrying the return value of a correlated native call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeResponse {
    pub id: String,
    pub response: Option<NativeArgument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerDisconnect {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerDeath {
    pub reason: i32,
    pub weapon: i32,
}

/// LAN discovery reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub server_name: String,
    pub max_players: i16,
    /// Connections with an update inside the liveness window.
    pub player_count: i16,
    pub password_protected: bool,
    pub gamemode: String,
    pub port: u16,
}

/// Stream start notice for one queued payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransferRequest {
    pub id: i32,
    pub file_type: u8,
    pub resource: String,
    pub name: String,
    pub length: u64,
}

/// One chunk of an in-flight stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransferChunk {
    pub id: i32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileTransferComplete {
    pub id: i32,
}

/// One client-side script staged for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientsideScript {
    pub resource: String,
    pub source: String,
}

/// All client-side scripts of all running resources, streamed on connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientScriptBundle {
    pub scripts: Vec<ClientsideScript>,
}

/// Shared vehicle state as seen in the world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub handle: i32,
    pub model: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub primary_color: i32,
    pub secondary_color: i32,
    pub health: i32,
}

/// Shared prop state as seen in the world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropSnapshot {
    pub handle: i32,
    pub model: i32,
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Full world state streamed to a freshly confirmed connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub vehicles: Vec<VehicleSnapshot>,
    pub props: Vec<PropSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopResourceNotice {
    pub resource: String,
}
