//! Server configuration.
//!
//! Loads from JSON strings/files (file IO left to the binary).

use serde::{Deserialize, Serialize};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public server name shown in queries and discovery.
    pub name: String,
    /// UDP listen port.
    pub port: u16,
    pub max_players: usize,
    /// When set, approval requires a matching password.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_gamemode")]
    pub gamemode: String,
    /// Master server endpoint for self-announcement.
    #[serde(default)]
    pub master_server: String,
    #[serde(default)]
    pub announce_self: bool,
    /// Whether client-chosen display names (rather than platform identities)
    /// are shown to other players.
    #[serde(default)]
    pub allow_display_names: bool,
    /// Fixed tick rate the host loop drives the server at.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    #[serde(default = "default_resources_dir")]
    pub resources_dir: String,
    /// Resources started at boot, in order.
    #[serde(default)]
    pub resources: Vec<String>,
}

fn default_gamemode() -> String {
    "freeroam".to_string()
}

fn default_tick_hz() -> u32 {
    64
}

fn default_resources_dir() -> String {
    "resources".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Freeroam Server".to_string(),
            port: 4499,
            max_players: 32,
            password: None,
            gamemode: default_gamemode(),
            master_server: String::new(),
            announce_self: false,
            allow_display_names: false,
            tick_hz: default_tick_hz(),
            resources_dir: default_resources_dir(),
            resources: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn password_protected(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}
