//! Server tick loop and protocol dispatch.
//!
//! The host process drives [`GameServer::tick`] cooperatively. One tick:
//! advance streaming, maybe announce, drain the transport to empty and
//! dispatch in arrival order, then run every engine's per-tick hook. All
//! application state is mutated on this single cooperative turn; the
//! transport's background threads only touch the boundary queues.
//!
//! Nothing in here is allowed to take the server down: malformed packets are
//! dropped, failing hooks are logged, a rejected connection never enters the
//! registry.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use freeroam_shared::codec::{
    decode_frame, deserialize_payload, encode_frame, serialize_payload, PacketType,
};
use freeroam_shared::config::ServerConfig;
use freeroam_shared::natives::{decode_arguments, NativeArgument};
use freeroam_shared::protocol::{
    ChatData, ConnectionRequest, ConnectionResponse, DiscoveryResponse, NativeResponse, PedData,
    PlayerDeath, PlayerDisconnect, ProtocolVersion, StopResourceNotice, SyncEvent,
    ScriptEventTrigger, VehicleData,
};

use crate::announce::{MasterAnnouncer, ANNOUNCE_INTERVAL_MINUTES};
use crate::entity::EntityTable;
use crate::natives::{NativeBridge, NativeCallback};
use crate::resource::{ResourceManager, ScriptHost};
use crate::session::{Player, SessionRegistry};
use crate::streaming::{StreamJob, StreamKind, StreamingQueue};
use crate::transport::{
    ConnectionId, ConnectionStatus, Delivery, InboundEvent, Transport,
};

/// Liveness window for the discovery player count.
const LIVE_WINDOW_SECS: i64 = 60;

/// Unanswered correlated calls older than this are dropped.
const PENDING_CALL_MAX_AGE_MINUTES: i64 = 10;

/// The authoritative session server.
pub struct GameServer<T: Transport> {
    pub cfg: ServerConfig,
    transport: T,
    sessions: SessionRegistry,
    entities: EntityTable,
    resources: ResourceManager,
    streaming: StreamingQueue,
    natives: NativeBridge,
    host: Box<dyn ScriptHost>,
    announcer: Box<dyn MasterAnnouncer>,
    last_announce: Option<DateTime<Utc>>,
    tick: u64,
}

impl<T: Transport> GameServer<T> {
    pub fn new(
        cfg: ServerConfig,
        transport: T,
        host: Box<dyn ScriptHost>,
        announcer: Box<dyn MasterAnnouncer>,
    ) -> Self {
        let resources = ResourceManager::new(cfg.resources_dir.clone());
        Self {
            cfg,
            transport,
            sessions: SessionRegistry::new(),
            entities: EntityTable::new(),
            resources,
            streaming: StreamingQueue::new(),
            natives: NativeBridge::new(),
            host,
            announcer,
            last_announce: None,
            tick: 0,
        }
    }

    /// Announces once if enabled, then starts the configured resources.
    /// A resource failing to load never stops the rest.
    pub fn start(&mut self) {
        if self.cfg.announce_self {
            self.announce_now();
        }

        info!("loading resources");
        let names = self.cfg.resources.clone();
        for name in names {
            if name.trim().is_empty() {
                continue;
            }
            if let Err(e) = self.start_resource(&name) {
                warn!(resource = %name, error = %e, "failed to load resource");
            }
        }
    }

    pub fn start_resource(&mut self, name: &str) -> anyhow::Result<()> {
        self.resources.start(name, self.host.as_ref())
    }

    /// Stops a resource and tells every client. No-op when not running.
    pub fn stop_resource(&mut self, name: &str) -> bool {
        if !self.resources.stop(name) {
            return false;
        }
        let notice = StopResourceNotice {
            resource: name.to_string(),
        };
        self.broadcast(
            encode_frame(PacketType::StopResource, &notice),
            Delivery::ReliableOrdered,
            None,
        );
        true
    }

    /// One cooperative turn of the server.
    pub fn tick(&mut self) {
        self.streaming.advance(&mut self.transport, &self.sessions);

        if self.cfg.announce_self {
            let due = self
                .last_announce
                .map_or(true, |t| Utc::now() - t >= Duration::minutes(ANNOUNCE_INTERVAL_MINUTES));
            if due {
                self.announce_now();
            }
        }

        for event in self.transport.drain() {
            self.dispatch(event);
        }

        self.resources.for_each_engine("on_tick", |e| e.on_tick());

        self.natives
            .expire_older_than(Duration::minutes(PENDING_CALL_MAX_AGE_MINUTES));

        self.tick += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    fn announce_now(&mut self) {
        // The timestamp advances even on failure; retry waits for the next
        // interval.
        self.last_announce = Some(Utc::now());
        if let Err(e) = self
            .announcer
            .announce(&self.cfg.master_server, self.cfg.port)
        {
            warn!(error = %e, "failed to announce to master server");
        }
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Unconnected { endpoint, text } => {
                self.handle_unconnected(endpoint, &text)
            }
            InboundEvent::Discovery { endpoint } => self.handle_discovery(endpoint),
            InboundEvent::ApprovalRequest { connection, frame } => {
                self.handle_approval(connection, &frame)
            }
            InboundEvent::StatusChanged {
                connection,
                status,
                reason,
            } => self.handle_status(connection, status, &reason),
            InboundEvent::LatencyUpdated {
                connection,
                seconds,
            } => {
                if let Some(player) = self.sessions.get_mut(connection) {
                    player.latency = seconds;
                }
            }
            InboundEvent::Data { connection, frame } => self.handle_data(connection, &frame),
        }
    }

    fn handle_unconnected(&mut self, endpoint: std::net::SocketAddr, text: &str) {
        match text {
            "ping" => {
                info!(%endpoint, "ping received");
                self.transport.send_unconnected(endpoint, "pong");
            }
            "query" => {
                info!(%endpoint, "query received");
                let reply = format!(
                    "{}%{}%{}%{}%{}",
                    self.cfg.name,
                    self.cfg.password_protected(),
                    self.sessions.len(),
                    self.cfg.max_players,
                    self.cfg.gamemode
                );
                self.transport.send_unconnected(endpoint, &reply);
            }
            other => debug!(%endpoint, text = %other, "unhandled out-of-band text"),
        }
    }

    fn handle_discovery(&mut self, endpoint: std::net::SocketAddr) {
        let response = DiscoveryResponse {
            server_name: self.cfg.name.clone(),
            max_players: self.cfg.max_players as i16,
            player_count: self.sessions.live_count(Duration::seconds(LIVE_WINDOW_SECS)) as i16,
            password_protected: self.cfg.password_protected(),
            gamemode: self.cfg.gamemode.clone(),
            port: self.cfg.port,
        };
        let frame = encode_frame(PacketType::DiscoveryResponse, &response);
        self.transport.send_discovery_response(endpoint, frame);
    }

    /// Connection approval state machine. Every deny carries its reason and
    /// leaves the registry untouched.
    fn handle_approval(&mut self, connection: ConnectionId, frame: &[u8]) {
        if self.sessions.contains(connection) {
            debug!(connection = connection.0, "duplicate approval request ignored");
            return;
        }
        let request: Option<ConnectionRequest> =
            decode_frame(frame).and_then(|(_, payload)| deserialize_payload(payload));
        let Some(mut request) = request else {
            self.transport.deny(connection, "Connection Object is null");
            return;
        };

        if request.protocol_version == ProtocolVersion::Unknown {
            self.transport
                .deny(connection, "Unknown version. Please update your client.");
            return;
        }

        if self.sessions.len() >= self.cfg.max_players {
            self.transport.deny(connection, "No available player slots.");
            info!("player connection refused: server full");
            return;
        }

        if self.cfg.password_protected()
            && self.cfg.password.as_deref() != Some(request.password.as_str())
        {
            self.transport.deny(connection, "Wrong password.");
            info!("player connection refused: wrong password");
            return;
        }

        if self.cfg.allow_display_names {
            request.display_name = self.sessions.unique_display_name(&request.display_name);
        }

        let mut player = Player::new(connection, self.entities.allocate_handle());
        player.platform_name = request.platform_name.clone();
        player.display_name = if self.cfg.allow_display_names {
            request.display_name.clone()
        } else {
            request.platform_name.clone()
        };
        player.protocol_version = request.protocol_version;
        player.game_version = request.game_version;

        let character_handle = player.character_handle;
        self.sessions.insert(player);
        let channel = self.sessions.channel_for(connection).unwrap_or(1);

        let response = ConnectionResponse {
            character_handle: character_handle.0,
            assigned_channel: channel,
        };
        let payload = serialize_payload(&response);
        let mut hail = BytesMut::with_capacity(4 + payload.len());
        hail.put_i32_le(payload.len() as i32);
        hail.extend_from_slice(&payload);
        self.transport.approve(connection, hail.freeze());

        if let Some(player) = self.sessions.get(connection) {
            self.resources
                .for_each_engine("on_player_begin_connect", |e| {
                    e.on_player_begin_connect(player)
                });
            info!(platform = %player.platform_name, name = %player.display_name, "new incoming connection");
        }
    }

    fn handle_status(&mut self, connection: ConnectionId, status: ConnectionStatus, reason: &str) {
        match status {
            // Reserved: registration happens at approval, activation at
            // connection-confirmed.
            ConnectionStatus::Connected => {}
            ConnectionStatus::Disconnected => {
                if !self.sessions.contains(connection) {
                    return;
                }
                if let Some(player) = self.sessions.get(connection) {
                    self.resources
                        .for_each_engine("on_player_disconnected", |e| {
                            e.on_player_disconnected(player, reason)
                        });
                }
                if let Some(player) = self.sessions.remove(connection) {
                    info!(platform = %player.platform_name, name = %player.display_name, reason, "player disconnected");
                }
                let notice = PlayerDisconnect { id: connection.0 };
                self.broadcast(
                    encode_frame(PacketType::PlayerDisconnect, &notice),
                    Delivery::ReliableOrdered,
                    None,
                );
            }
        }
    }

    /// Tagged application data. A payload that fails to decode drops that
    /// packet only.
    fn handle_data(&mut self, connection: ConnectionId, frame: &[u8]) {
        let Some((packet_type, payload)) = decode_frame(frame) else {
            return;
        };

        match packet_type {
            PacketType::ChatData => {
                if let Some(data) = deserialize_payload::<ChatData>(payload) {
                    self.handle_chat(connection, data);
                }
            }
            PacketType::VehiclePositionData => {
                if let Some(data) = deserialize_payload::<VehicleData>(payload) {
                    self.handle_vehicle_position(connection, data);
                }
            }
            PacketType::PedPositionData => {
                if let Some(data) = deserialize_payload::<PedData>(payload) {
                    self.handle_ped_position(connection, data);
                }
            }
            PacketType::NpcVehPositionData => {
                if let Some(mut data) = deserialize_payload::<VehicleData>(payload) {
                    data.id = connection.0;
                    self.broadcast(
                        encode_frame(PacketType::NpcVehPositionData, &data),
                        Delivery::UnreliableSequenced,
                        Some(connection),
                    );
                }
            }
            PacketType::NpcPedPositionData => {
                if let Some(mut data) = deserialize_payload::<PedData>(payload) {
                    data.id = connection.0;
                    self.broadcast(
                        encode_frame(PacketType::NpcPedPositionData, &data),
                        Delivery::UnreliableSequenced,
                        Some(connection),
                    );
                }
            }
            PacketType::SyncEvent => {
                if let Some(data) = deserialize_payload::<SyncEvent>(payload) {
                    self.broadcast(
                        encode_frame(PacketType::SyncEvent, &data),
                        Delivery::ReliableOrdered,
                        Some(connection),
                    );
                }
            }
            PacketType::ScriptEventTrigger => {
                if let Some(data) = deserialize_payload::<ScriptEventTrigger>(payload) {
                    let args = decode_arguments(&data.arguments);
                    if let Some(player) = self.sessions.get(connection) {
                        self.resources.for_each_engine("on_client_event", |e| {
                            e.on_client_event(player, &data.event_name, &args)
                        });
                    }
                }
            }
            PacketType::NativeResponse => {
                if let Some(data) = deserialize_payload::<NativeResponse>(payload) {
                    self.natives.handle_response(data);
                }
            }
            PacketType::ConnectionConfirmed => self.handle_connection_confirmed(connection),
            PacketType::PlayerKilled => {
                if let Some(death) = deserialize_payload::<PlayerDeath>(payload) {
                    if let Some(player) = self.sessions.get(connection) {
                        self.resources.for_each_engine("on_player_death", |e| {
                            e.on_player_death(player, death.reason, death.weapon)
                        });
                    }
                }
            }
            PacketType::PlayerRespawned => {
                if let Some(player) = self.sessions.get(connection) {
                    self.resources
                        .for_each_engine("on_player_respawn", |e| e.on_player_respawn(player));
                }
            }
            // Server-to-client packet categories; a client sending them is
            // out of contract and ignored.
            PacketType::NativeCall
            | PacketType::NativeTick
            | PacketType::NativeTickRecall
            | PacketType::NativeOnDisconnect
            | PacketType::NativeOnDisconnectRecall
            | PacketType::StopResource
            | PacketType::FileTransferRequest
            | PacketType::FileTransferTick
            | PacketType::FileTransferComplete
            | PacketType::DiscoveryResponse
            | PacketType::PlayerDisconnect => {
                debug!(packet_type = ?packet_type, "ignoring client-sent server packet");
            }
        }
    }

    fn handle_chat(&mut self, connection: ConnectionId, mut data: ChatData) {
        if !self.sessions.contains(connection) {
            return;
        }

        if data.message.starts_with('/') {
            if let Some(player) = self.sessions.get(connection) {
                self.resources.for_each_engine("on_chat_command", |e| {
                    e.on_chat_command(player, &data.message)
                });
            }
            return; // commands never broadcast
        }

        let pass = match self.sessions.get(connection) {
            Some(player) => self.resources.chat_allowed(player, &data.message),
            None => return,
        };
        if !pass {
            return;
        }

        let Some(player) = self.sessions.get(connection) else {
            return;
        };
        data.id = connection.0;
        data.sender = player.display_name.clone();
        info!(sender = %data.sender, message = %data.message, "chat");
        self.broadcast(
            encode_frame(PacketType::ChatData, &data),
            Delivery::ReliableOrdered,
            None,
        );
    }

    fn handle_vehicle_position(&mut self, connection: ConnectionId, mut data: VehicleData) {
        let Some(player) = self.sessions.get_mut(connection) else {
            return;
        };
        player.health = data.player_health;
        player.position = data.position;
        player.rotation = data.rotation;
        player.vehicle_health = data.vehicle_health;
        player.in_vehicle = true;
        player.current_vehicle = data.vehicle_handle;
        player.last_update = Some(Utc::now());

        data.id = connection.0;
        data.name = player.display_name.clone();
        data.latency = player.latency;
        data.net_handle = player.character_handle.0;

        // A miss is skipped silently; the rebroadcast still happens.
        self.entities.apply_vehicle_update(&data);

        self.broadcast(
            encode_frame(PacketType::VehiclePositionData, &data),
            Delivery::UnreliableSequenced,
            Some(connection),
        );
    }

    fn handle_ped_position(&mut self, connection: ConnectionId, mut data: PedData) {
        let Some(player) = self.sessions.get_mut(connection) else {
            return;
        };
        player.health = data.player_health;
        player.position = data.position;
        player.rotation = data.rotation;
        player.in_vehicle = false;
        player.last_update = Some(Utc::now());

        data.id = connection.0;
        data.name = player.display_name.clone();
        data.latency = player.latency;
        data.net_handle = player.character_handle.0;

        self.broadcast(
            encode_frame(PacketType::PedPositionData, &data),
            Delivery::UnreliableSequenced,
            Some(connection),
        );
    }

    /// The client finished its handshake: stream it the world snapshot,
    /// every resource's declared files, and the client script bundle, then
    /// activate it for gameplay fan-out.
    fn handle_connection_confirmed(&mut self, connection: ConnectionId) {
        if !self.sessions.contains(connection) {
            debug!(connection = connection.0, "connection-confirmed from unregistered connection");
            return;
        }

        let mut jobs = Vec::new();
        jobs.push(StreamJob::new(
            StreamKind::WorldSnapshot,
            "",
            "world",
            serialize_payload(&self.entities.snapshot()),
        ));

        for (resource, name, path) in self.resources.declared_files() {
            match std::fs::read(&path) {
                Ok(data) => jobs.push(StreamJob::new(StreamKind::Asset, &resource, &name, data)),
                Err(e) => {
                    warn!(resource = %resource, file = %name, error = %e, "declared file unreadable, skipping")
                }
            }
        }

        jobs.push(StreamJob::new(
            StreamKind::ScriptBundle,
            "",
            "scripts",
            serialize_payload(&self.resources.client_bundle()),
        ));

        self.streaming
            .enqueue(connection, self.transport.mtu(), jobs);

        if let Some(player) = self.sessions.get(connection) {
            self.resources
                .for_each_engine("on_player_connected", |e| e.on_player_connected(player));
            info!(platform = %player.platform_name, name = %player.display_name, "new player connected");
        }
    }

    /// Sends one frame to every registered connection on its own channel.
    fn broadcast(&mut self, frame: Bytes, delivery: Delivery, exclude: Option<ConnectionId>) {
        for player in self.sessions.iter() {
            if Some(player.connection) == exclude {
                continue;
            }
            let channel = self
                .sessions
                .channel_for(player.connection)
                .unwrap_or(1);
            self.transport
                .send(player.connection, frame.clone(), delivery, channel);
        }
    }

    // ── Native-call surface ──

    pub fn call_native_for(
        &mut self,
        target: ConnectionId,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        self.natives
            .call_for(&mut self.transport, &self.sessions, target, hash, arguments);
    }

    pub fn call_native_for_all(&mut self, hash: u64, arguments: Vec<NativeArgument>) {
        self.natives
            .call_for_all(&mut self.transport, &self.sessions, hash, arguments);
    }

    pub fn start_tick_native_for(
        &mut self,
        target: ConnectionId,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        self.natives.start_tick_call_for(
            &mut self.transport,
            &self.sessions,
            target,
            identifier,
            hash,
            arguments,
        );
    }

    pub fn start_tick_native_for_all(
        &mut self,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        self.natives.start_tick_call_for_all(
            &mut self.transport,
            &self.sessions,
            identifier,
            hash,
            arguments,
        );
    }

    pub fn stop_tick_native_for(&mut self, target: ConnectionId, identifier: &str) {
        self.natives
            .stop_tick_call_for(&mut self.transport, &self.sessions, target, identifier);
    }

    pub fn stop_tick_native_for_all(&mut self, identifier: &str) {
        self.natives
            .stop_tick_call_for_all(&mut self.transport, &self.sessions, identifier);
    }

    pub fn set_disconnect_native_for(
        &mut self,
        target: ConnectionId,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        self.natives.set_disconnect_call_for(
            &mut self.transport,
            &self.sessions,
            target,
            identifier,
            hash,
            arguments,
        );
    }

    pub fn set_disconnect_native_for_all(
        &mut self,
        identifier: &str,
        hash: u64,
        arguments: Vec<NativeArgument>,
    ) {
        self.natives.set_disconnect_call_for_all(
            &mut self.transport,
            &self.sessions,
            identifier,
            hash,
            arguments,
        );
    }

    pub fn clear_disconnect_native_for(&mut self, target: ConnectionId, identifier: &str) {
        self.natives.clear_disconnect_call_for(
            &mut self.transport,
            &self.sessions,
            target,
            identifier,
        );
    }

    pub fn clear_disconnect_native_for_all(&mut self, identifier: &str) {
        self.natives
            .clear_disconnect_call_for_all(&mut self.transport, &self.sessions, identifier);
    }

    /// Correlated call: `callback` fires at most once with the decoded
    /// return value.
    #[allow(clippy::too_many_arguments)]
    pub fn request_native_from(
        &mut self,
        target: ConnectionId,
        salt: &str,
        hash: u64,
        return_hint: NativeArgument,
        arguments: Vec<NativeArgument>,
        callback: NativeCallback,
    ) {
        self.natives.request_from(
            &mut self.transport,
            &self.sessions,
            target,
            salt,
            hash,
            return_hint,
            arguments,
            callback,
        );
    }

    // ── Accessors ──

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityTable {
        &mut self.entities
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn streaming(&self) -> &StreamingQueue {
        &self.streaming
    }

    pub fn pending_native_calls(&self) -> usize {
        self.natives.pending_count()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Test/tooling helper: a server over the in-memory loopback transport.
pub fn loopback_server(cfg: ServerConfig) -> GameServer<crate::transport::LoopbackTransport> {
    GameServer::new(
        cfg,
        crate::transport::LoopbackTransport::new(),
        Box::new(crate::resource::NoopScriptHost),
        Box::new(crate::announce::LogAnnouncer),
    )
}
