//! Shared support for the scenario tests: tracing setup, a scripted
//! loopback connection helper, and a recording script engine that logs
//! every hook invocation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use freeroam_server::resource::{ScriptEngine, ScriptHost};
use freeroam_server::server::GameServer;
use freeroam_server::session::Player;
use freeroam_server::transport::{ConnectionId, InboundEvent, LoopbackTransport};
use freeroam_shared::codec::{encode_frame, PacketType};
use freeroam_shared::manifest::ScriptKind;
use freeroam_shared::natives::NativeValue;
use freeroam_shared::protocol::{ConnectionRequest, ProtocolVersion};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Chronological hook log shared between a test and its engines.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Engine that records every hook call and optionally vetoes chat.
pub struct RecordingEngine {
    pub log: EventLog,
    pub veto_chat: bool,
}

impl ScriptEngine for RecordingEngine {
    fn on_resource_start(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("resource_start".into());
        Ok(())
    }

    fn on_resource_stop(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("resource_stop".into());
        Ok(())
    }

    fn on_player_begin_connect(&mut self, player: &Player) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("begin_connect:{}", player.display_name));
        Ok(())
    }

    fn on_player_connected(&mut self, player: &Player) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connected:{}", player.display_name));
        Ok(())
    }

    fn on_player_disconnected(&mut self, player: &Player, reason: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("disconnected:{}:{}", player.display_name, reason));
        Ok(())
    }

    fn on_chat_message(&mut self, player: &Player, message: &str) -> anyhow::Result<bool> {
        self.log
            .lock()
            .unwrap()
            .push(format!("chat:{}:{}", player.display_name, message));
        Ok(!self.veto_chat)
    }

    fn on_chat_command(&mut self, player: &Player, command: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("command:{}:{}", player.display_name, command));
        Ok(())
    }

    fn on_client_event(
        &mut self,
        player: &Player,
        event: &str,
        args: &[NativeValue],
    ) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!(
            "client_event:{}:{}:{}",
            player.display_name,
            event,
            args.len()
        ));
        Ok(())
    }

    fn on_player_death(&mut self, player: &Player, reason: i32, weapon: i32) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!(
            "death:{}:{}:{}",
            player.display_name, reason, weapon
        ));
        Ok(())
    }

    fn on_player_respawn(&mut self, player: &Player) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("respawn:{}", player.display_name));
        Ok(())
    }
}

/// Host that instantiates one [`RecordingEngine`] per server script.
pub struct RecordingHost {
    pub log: EventLog,
    pub veto_chat: bool,
}

impl ScriptHost for RecordingHost {
    fn instantiate(
        &self,
        _kind: ScriptKind,
        _script_path: &Path,
        _references: &[String],
    ) -> anyhow::Result<Vec<Box<dyn ScriptEngine>>> {
        Ok(vec![Box::new(RecordingEngine {
            log: self.log.clone(),
            veto_chat: self.veto_chat,
        })])
    }
}

/// Lays out a resource directory: manifest plus script/asset files.
pub fn write_resource(root: &Path, name: &str, manifest: &str, files: &[(&str, &[u8])]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifest.json"), manifest).unwrap();
    for (file, contents) in files {
        std::fs::write(dir.join(file), contents).unwrap();
    }
}

pub fn approval_frame(name: &str, password: &str) -> bytes::Bytes {
    let request = ConnectionRequest {
        display_name: name.to_string(),
        platform_name: format!("{name}_platform"),
        password: password.to_string(),
        protocol_version: ProtocolVersion::V0_9,
        game_version: 350,
    };
    encode_frame(PacketType::ConnectionConfirmed, &request)
}

/// Runs a connection through approval on the loopback transport.
pub fn connect(server: &mut GameServer<LoopbackTransport>, id: i64, name: &str) -> ConnectionId {
    let connection = ConnectionId(id);
    server.transport_mut().inject(InboundEvent::ApprovalRequest {
        connection,
        frame: approval_frame(name, ""),
    });
    server.tick();
    connection
}

/// Approval followed by the client's connection-confirmed handshake.
pub fn connect_and_confirm(
    server: &mut GameServer<LoopbackTransport>,
    id: i64,
    name: &str,
) -> ConnectionId {
    let connection = connect(server, id, name);
    server.transport_mut().inject(InboundEvent::Data {
        connection,
        frame: encode_frame(PacketType::ConnectionConfirmed, &()),
    });
    server.tick();
    connection
}
