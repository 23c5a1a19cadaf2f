//! Native-call bridge.
//!
//! Issues remote calls instructing clients to invoke game functions by
//! numeric identifier. Shapes: one-shot (one client / all), recurring
//! tick-bound calls recalled by name, on-disconnect calls recalled by name,
//! and correlated request/response calls whose callback fires at most once.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use freeroam_shared::codec::{encode_frame, PacketType};
use freeroam_shared::natives::{decode_argument, NativeArgument, NativeValue};
use freeroam_shared::protocol::{NativeCall, NativeResponse, NativeTickCall};

use crate::session::SessionRegistry;
use crate::transport::{ConnectionId, Delivery, Transport};

/// Invoked with the decoded return value, or `None` when the client reported
/// no usable value.
pub type NativeCallback = Box<dyn FnOnce(Option<NativeValue>) + Send>;

struct PendingCall {
    callback: NativeCallback,
    registered_at: DateTime<Utc>,
}

/// Correlation state for request/response native calls.
pub struct NativeBridge {
    pending: HashMap<String, PendingCall>,
    epoch: Instant,
}

impl Default for NativeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridge {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn send_to<T: Transport>(
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        packet_type: PacketType,
        frame: bytes::Bytes,
    ) {
        let channel = sessions.channel_for(target).unwrap_or(1);
        trace!(target = target.0, packet_type = ?packet_type, "native send");
        transport.send(target, frame, Delivery::ReliableOrdered, channel);
    }

    fn send_to_all<T: Transport>(
        transport: &mut T,
        sessions: &SessionRegistry,
        packet_type: PacketType,
        frame: bytes::Bytes,
    ) {
        for player in sessions.iter() {
            Self::send_to(transport, sessions, player.connection, packet_type, frame.clone());
        }
    }

    /// One-shot call to one client, no response expected.
    pub fn call_for<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let call = NativeCall {
            hash,
            arguments,
            correlation_id: String::new(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeCall, &call);
        Self::send_to(transport, sessions, target, PacketType::NativeCall, frame);
    }

    /// One-shot call to every connected client.
    pub fn call_for_all<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let call = NativeCall {
            hash,
            arguments,
            correlation_id: String::new(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeCall, &call);
        Self::send_to_all(transport, sessions, PacketType::NativeCall, frame);
    }

    /// Starts a named call the client re-issues every local frame.
    pub fn start_tick_call_for<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let wrapped = NativeTickCall {
            identifier: identifier.to_string(),
            native: Some(NativeCall {
                hash,
                arguments,
                correlation_id: String::new(),
                return_hint: None,
            }),
        };
        let frame = encode_frame(PacketType::NativeTick, &wrapped);
        Self::send_to(transport, sessions, target, PacketType::NativeTick, frame);
    }

    pub fn start_tick_call_for_all<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let wrapped = NativeTickCall {
            identifier: identifier.to_string(),
            native: Some(NativeCall {
                hash,
                arguments,
                correlation_id: String::new(),
                return_hint: None,
            }),
        };
        let frame = encode_frame(PacketType::NativeTick, &wrapped);
        Self::send_to_all(transport, sessions, PacketType::NativeTick, frame);
    }

    /// Recalls a tick-bound call by name.
    pub fn stop_tick_call_for<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        identifier: &str,
    ) {
        let wrapped = NativeTickCall {
            identifier: identifier.to_string(),
            native: None,
        };
        let frame = encode_frame(PacketType::NativeTickRecall, &wrapped);
        Self::send_to(transport, sessions, target, PacketType::NativeTickRecall, frame);
    }

    pub fn stop_tick_call_for_all<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        identifier: &str,
    ) {
        let wrapped = NativeTickCall {
            identifier: identifier.to_string(),
            native: None,
        };
        let frame = encode_frame(PacketType::NativeTickRecall, &wrapped);
        Self::send_to_all(transport, sessions, PacketType::NativeTickRecall, frame);
    }

    /// Arms a named call the client fires once when it disconnects.
    pub fn set_disconnect_call_for<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let call = NativeCall {
            hash,
            arguments,
            correlation_id: identifier.to_string(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeOnDisconnect, &call);
        Self::send_to(transport, sessions, target, PacketType::NativeOnDisconnect, frame);
    }

    pub fn set_disconnect_call_for_all<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        let call = NativeCall {
            hash,
            arguments,
            correlation_id: identifier.to_string(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeOnDisconnect, &call);
        Self::send_to_all(transport, sessions, PacketType::NativeOnDisconnect, frame);
    }

    /// Disarms an on-disconnect call by name.
    pub fn clear_disconnect_call_for<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        identifier: &str,
    ) {
        let call = NativeCall {
            hash: 0,
            arguments: Vec::new(),
            correlation_id: identifier.to_string(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeOnDisconnectRecall, &call);
        Self::send_to(
            transport,
            sessions,
            target,
            PacketType::NativeOnDisconnectRecall,
            frame,
        );
    }

    pub fn clear_disconnect_call_for_all<T: Transport>(
        &self,
        transport: &mut T,
        sessions: &SessionRegistry,
        identifier: &str,
    ) {
        let call = NativeCall {
            hash: 0,
            arguments: Vec::new(),
            correlation_id: identifier.to_string(),
            return_hint: None,
        };
        let frame = encode_frame(PacketType::NativeOnDisconnectRecall, &call);
        Self::send_to_all(transport, sessions, PacketType::NativeOnDisconnectRecall, frame);
    }

    /// Builds a correlation token unique at insertion: clock sample, caller
    /// salt, connection identity, wall-clock millis.
    fn correlation_token(&self, salt: &str, target: ConnectionId) -> String {
        format!(
            "{}{}{}{}",
            self.epoch.elapsed().as_millis(),
            salt,
            target.0,
            Utc::now().timestamp_millis()
        )
    }

    /// Correlated call: the callback fires at most once with the decoded
    /// return value when the matching response arrives.
    pub fn request_from<T: Transport>(
        &mut self,
        transport: &mut T,
        sessions: &SessionRegistry,
        target: ConnectionId,
        salt: &str,
        hash: u64,
        return_hint: NativeArgument,
        arguments: Vec<NativeArgument>,
        callback: NativeCallback,
    ) {
        let mut token = self.correlation_token(salt, target);
        // The composite is unique in practice; the loop keeps the invariant
        // even under a frozen clock.
        while self.pending.contains_key(&token) {
            token.push('+');
        }

        let call = NativeCall {
            hash,
            arguments,
            correlation_id: token.clone(),
            return_hint: Some(return_hint),
        };
        let frame = encode_frame(PacketType::NativeCall, &call);

        self.pending.insert(
            token,
            PendingCall {
                callback,
                registered_at: Utc::now(),
            },
        );
        Self::send_to(transport, sessions, target, PacketType::NativeCall, frame);
    }

    /// Consumes a response. An unknown token is a late or spurious reply and
    /// is silently discarded.
    pub fn handle_response(&mut self, response: NativeResponse) {
        let Some(pending) = self.pending.remove(&response.id) else {
            trace!(token = %response.id, "response with no pending call, discarding");
            return;
        };
        let value = response.response.as_ref().and_then(decode_argument);
        (pending.callback)(value);
    }

    /// Drops pending calls older than `max_age`. Returns how many were
    /// removed.
    pub fn expire_older_than(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.pending.len();
        self.pending.retain(|_, p| p.registered_at >= cutoff);
        let removed = before - self.pending.len();
        if removed > 0 {
            debug!(removed, "expired unanswered native calls");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityHandle;
    use crate::session::Player;
    use crate::transport::LoopbackTransport;
    use freeroam_shared::codec::{decode_frame, deserialize_payload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (LoopbackTransport, SessionRegistry, ConnectionId) {
        let conn = ConnectionId(1);
        let mut sessions = SessionRegistry::new();
        sessions.insert(Player::new(conn, EntityHandle(1)));
        (LoopbackTransport::new(), sessions, conn)
    }

    #[test]
    fn callback_fires_at_most_once() {
        let (mut transport, sessions, conn) = setup();
        let mut bridge = NativeBridge::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        bridge.request_from(
            &mut transport,
            &sessions,
            conn,
            "salt",
            0xCAFE,
            NativeArgument::Int(0),
            vec![NativeArgument::Bool(true)],
            Box::new(move |v| {
                assert_eq!(v, Some(NativeValue::Int(42)));
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(bridge.pending_count(), 1);

        // Extract the token from the sent frame.
        let (ty, payload) = decode_frame(&transport.sent[0].frame).unwrap();
        assert_eq!(ty, PacketType::NativeCall);
        let call: NativeCall = deserialize_payload(payload).unwrap();
        assert!(!call.correlation_id.is_empty());

        let response = NativeResponse {
            id: call.correlation_id.clone(),
            response: Some(NativeArgument::Int(42)),
        };
        bridge.handle_response(response.clone());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.pending_count(), 0);

        // Duplicate token is a no-op.
        bridge.handle_response(response);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spurious_response_is_discarded() {
        let mut bridge = NativeBridge::new();
        bridge.handle_response(NativeResponse {
            id: "never-issued".into(),
            response: Some(NativeArgument::Bool(true)),
        });
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn expiry_drops_old_calls_only() {
        let (mut transport, sessions, conn) = setup();
        let mut bridge = NativeBridge::new();
        bridge.request_from(
            &mut transport,
            &sessions,
            conn,
            "s",
            1,
            NativeArgument::Int(0),
            vec![],
            Box::new(|_| {}),
        );
        assert_eq!(bridge.expire_older_than(Duration::minutes(10)), 0);
        assert_eq!(bridge.expire_older_than(Duration::zero() - Duration::seconds(1)), 1);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn call_for_all_reaches_every_player() {
        let (mut transport, mut sessions, _conn) = setup();
        sessions.insert(Player::new(ConnectionId(2), EntityHandle(2)));
        let bridge = NativeBridge::new();
        bridge.call_for_all(&mut transport, &sessions, 0xBEEF, vec![]);
        assert_eq!(transport.sent.len(), 2);
    }
}
