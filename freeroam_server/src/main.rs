//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p freeroam_server -- [--config server.json] [--addr 0.0.0.0] [--port 4499]
//!
//! The server binds a UDP socket, runs the session tick loop at the
//! configured rate, and streams resources to clients as they confirm.
//!
//! Console commands:
//!   start <resource>  - Start a resource by directory name
//!   stop <resource>   - Stop a running resource
//!   status            - Show server status
//!   quit              - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::net::SocketAddr;

use anyhow::Context;
use freeroam_server::announce::LogAnnouncer;
use freeroam_server::resource::NoopScriptHost;
use freeroam_server::server::GameServer;
use freeroam_server::transport::UdpTransport;
use freeroam_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Args {
    config_path: String,
    addr: Option<String>,
    port: Option<u16>,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        config_path: "server.json".to_string(),
        addr: None,
        port: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                parsed.config_path = args[i + 1].clone();
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                parsed.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                parsed.port = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    parsed
}

fn load_config(args: &Args) -> ServerConfig {
    let mut cfg = match std::fs::read_to_string(&args.config_path) {
        Ok(text) => match ServerConfig::from_json_str(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %args.config_path, error = %e, "config unreadable, using defaults");
                ServerConfig::default()
            }
        },
        Err(_) => {
            info!(path = %args.config_path, "no config file, using defaults");
            ServerConfig::default()
        }
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(&args);
    info!(name = %cfg.name, port = cfg.port, max_players = cfg.max_players, tick_hz = cfg.tick_hz, "Starting server");

    let bind_addr: SocketAddr = format!(
        "{}:{}",
        args.addr.as_deref().unwrap_or("0.0.0.0"),
        cfg.port
    )
    .parse()
    .context("parse bind address")?;
    let transport = UdpTransport::bind(bind_addr).await.context("bind udp")?;
    info!(local = %transport.local_addr(), "Server listening");

    let tick_hz = cfg.tick_hz.max(1);
    let mut server = GameServer::new(
        cfg,
        transport,
        Box::new(NoopScriptHost),
        Box::new(LogAnnouncer),
    );
    server.start();

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'start <resource>' to start a resource, 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            if !handle_console(&mut server, &line) {
                info!("shutting down");
                return Ok(());
            }
        }

        server.tick();

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}

/// Returns false when the server should shut down.
fn handle_console(server: &mut GameServer<UdpTransport>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("start"), Some(name)) => {
            if let Err(e) = server.start_resource(name) {
                warn!(resource = %name, error = %e, "failed to start resource");
            }
        }
        (Some("stop"), Some(name)) => {
            if !server.stop_resource(name) {
                warn!(resource = %name, "resource is not running");
            }
        }
        (Some("status"), _) => {
            println!(
                "{}: {}/{} players, {} resources, tick {}",
                server.cfg.name,
                server.sessions().len(),
                server.cfg.max_players,
                server.resources().running().count(),
                server.tick_count()
            );
        }
        (Some("quit"), _) => return false,
        (Some(cmd), _) => println!("unknown command: {cmd}"),
        (None, _) => {}
    }
    true
}
