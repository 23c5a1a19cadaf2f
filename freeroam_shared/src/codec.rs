//! Binary protocol codec.
//!
//! Application packets are framed as `[i32 packetType][i32 payloadLength]`
//! followed by the bincode-encoded payload. Little-endian throughout.
//!
//! Corrupt or truncated input decodes to `None`. The caller drops the packet
//! and moves on; a bad frame must never take down the tick.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

/// Frame header size plus transport envelope, reserved out of every chunk.
pub const FRAME_OVERHEAD: usize = 20;

/// Closed set of application packet categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    ChatData = 0,
    VehiclePositionData = 1,
    PedPositionData = 2,
    NpcVehPositionData = 3,
    NpcPedPositionData = 4,
    SyncEvent = 5,
    ScriptEventTrigger = 6,
    NativeCall = 7,
    NativeResponse = 8,
    NativeTick = 9,
    NativeTickRecall = 10,
    NativeOnDisconnect = 11,
    NativeOnDisconnectRecall = 12,
    StopResource = 13,
    FileTransferRequest = 14,
    FileTransferTick = 15,
    FileTransferComplete = 16,
    DiscoveryResponse = 17,
    ConnectionConfirmed = 18,
    PlayerDisconnect = 19,
    PlayerKilled = 20,
    PlayerRespawned = 21,
}

impl PacketType {
    pub fn from_i32(v: i32) -> Option<Self> {
        use PacketType::*;
        Some(match v {
            0 => ChatData,
            1 => VehiclePositionData,
            2 => PedPositionData,
            3 => NpcVehPositionData,
            4 => NpcPedPositionData,
            5 => SyncEvent,
            6 => ScriptEventTrigger,
            7 => NativeCall,
            8 => NativeResponse,
            9 => NativeTick,
            10 => NativeTickRecall,
            11 => NativeOnDisconnect,
            12 => NativeOnDisconnectRecall,
            13 => StopResource,
            14 => FileTransferRequest,
            15 => FileTransferTick,
            16 => FileTransferComplete,
            17 => DiscoveryResponse,
            18 => ConnectionConfirmed,
            19 => PlayerDisconnect,
            20 => PlayerKilled,
            21 => PlayerRespawned,
            _ => return None,
        })
    }
}

/// Encodes a payload with bincode.
pub fn serialize_payload<T: Serialize>(value: &T) -> Vec<u8> {
    // The payload types are plain serde structs; encoding them cannot fail
    // short of an allocation error.
    bincode::serialize(value).unwrap_or_default()
}

/// Decodes a payload. Corruption yields `None`, never an error.
pub fn deserialize_payload<T: DeserializeOwned>(data: &[u8]) -> Option<T> {
    match bincode::deserialize(data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, len = data.len(), "payload deserialization failed, dropping");
            None
        }
    }
}

/// Builds a complete frame for a typed payload.
pub fn encode_frame<T: Serialize>(packet_type: PacketType, payload: &T) -> Bytes {
    let body = serialize_payload(payload);
    encode_raw_frame(packet_type, &body)
}

/// Builds a frame around pre-encoded payload bytes.
pub fn encode_raw_frame(packet_type: PacketType, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + body.len());
    buf.put_i32_le(packet_type as i32);
    buf.put_i32_le(body.len() as i32);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// Splits a frame into its packet type and payload slice.
///
/// Returns `None` on a short header, unknown packet type, or a length field
/// that disagrees with the buffer.
pub fn decode_frame(frame: &[u8]) -> Option<(PacketType, &[u8])> {
    let mut header = frame;
    if header.remaining() < 8 {
        return None;
    }
    let raw_type = header.get_i32_le();
    let len = header.get_i32_le();
    let packet_type = PacketType::from_i32(raw_type)?;
    if len < 0 || header.remaining() < len as usize {
        warn!(packet_type = ?packet_type, declared = len, actual = header.remaining(), "frame length mismatch");
        return None;
    }
    Some((packet_type, &frame[8..8 + len as usize]))
}
