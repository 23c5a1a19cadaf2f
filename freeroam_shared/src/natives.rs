//! Typed wire arguments for native calls.
//!
//! One closed tagged union covers every argument kind a native call can
//! carry. Value kinds decode into [`NativeValue`]; game-reference kinds are
//! call-site-only markers the client resolves locally and are skipped when
//! decoding an inbound argument list.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Wire representation of one native-call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeArgument {
    Int(i32),
    UInt(u32),
    Float(f32),
    String(String),
    Bool(bool),
    Vec3(Vec3),
    /// The receiving client's own character.
    LocalPlayer,
    /// The receiving client's game-player slot.
    LocalGamePlayer,
    /// A synchronized entity by handle.
    Entity(i32),
    /// An entity handle the client dereferences to a live pointer.
    EntityPointer(i32),
    /// Another connection's ped, by transport identity.
    OpponentPedHandle(i64),
}

/// Decoded call-site value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Int(i32),
    UInt(u32),
    Float(f32),
    String(String),
    Bool(bool),
    Vec3(Vec3),
}

impl From<NativeValue> for NativeArgument {
    fn from(v: NativeValue) -> Self {
        match v {
            NativeValue::Int(i) => NativeArgument::Int(i),
            NativeValue::UInt(u) => NativeArgument::UInt(u),
            NativeValue::Float(f) => NativeArgument::Float(f),
            NativeValue::String(s) => NativeArgument::String(s),
            NativeValue::Bool(b) => NativeArgument::Bool(b),
            NativeValue::Vec3(v) => NativeArgument::Vec3(v),
        }
    }
}

/// Decodes one wire argument to a call-site value.
///
/// Game-reference kinds yield `None`: they carry no value the server can
/// hand to gameplay code.
pub fn decode_argument(arg: &NativeArgument) -> Option<NativeValue> {
    match arg {
        NativeArgument::Int(i) => Some(NativeValue::Int(*i)),
        NativeArgument::UInt(u) => Some(NativeValue::UInt(*u)),
        NativeArgument::Float(f) => Some(NativeValue::Float(*f)),
        NativeArgument::String(s) => Some(NativeValue::String(s.clone())),
        NativeArgument::Bool(b) => Some(NativeValue::Bool(*b)),
        NativeArgument::Vec3(v) => Some(NativeValue::Vec3(*v)),
        NativeArgument::LocalPlayer
        | NativeArgument::LocalGamePlayer
        | NativeArgument::Entity(_)
        | NativeArgument::EntityPointer(_)
        | NativeArgument::OpponentPedHandle(_) => None,
    }
}

/// Decodes an inbound argument list, skipping reference kinds.
pub fn decode_arguments(args: &[NativeArgument]) -> Vec<NativeValue> {
    args.iter().filter_map(decode_argument).collect()
}
