//! Resource manifest model.
//!
//! Each resource directory carries a `manifest.json` declaring its scripts,
//! bundled files, and referenced libraries. The server only interprets the
//! model; executing the scripts is the script host's concern.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Dialect/packaging of a declared script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// Interpreted source handed to the embeddable script host.
    Js,
    /// Precompiled module; the host instantiates its exported engine types.
    Compiled,
    /// Source in the primary compiled dialect, built at load time.
    SourceCs,
    /// Source in the secondary compiled dialect, built at load time.
    SourceVb,
}

/// Where a script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSide {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub path: String,
    pub kind: ScriptKind,
    pub side: ScriptSide,
}

/// A bundled asset delivered to clients on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
}

/// Library reference made available to compiled scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,
}

impl ResourceManifest {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses `manifest.json` from a resource directory.
    pub fn load(resource_dir: &Path) -> anyhow::Result<Self> {
        let path = resource_dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("{} has not been found: {e}", path.display()))?;
        Ok(Self::from_json_str(&text)?)
    }
}
