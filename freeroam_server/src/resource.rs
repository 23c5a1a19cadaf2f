//! Resource lifecycle.
//!
//! A resource is a loadable bundle of gameplay scripts and assets. Starting
//! one parses its manifest, stages client-side scripts for delivery, and
//! hands server-side scripts to a [`ScriptHost`] that produces
//! [`ScriptEngine`] instances. The server core never executes script code
//! itself; it only drives the engine lifecycle hooks.
//!
//! Every hook failure is caught here, logged with resource context, and
//! never aborts the surrounding tick.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{info, warn};

use freeroam_shared::manifest::{ResourceManifest, ScriptKind, ScriptSide};
use freeroam_shared::natives::NativeValue;
use freeroam_shared::protocol::{ClientScriptBundle, ClientsideScript};

use crate::session::Player;

/// The capability surface one unit of gameplay logic implements.
///
/// Hooks run synchronously, in resource registration order. Default bodies
/// are no-ops so engines implement only what they care about.
pub trait ScriptEngine: Send {
    fn on_resource_start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_resource_stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_tick(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_begin_connect(&mut self, _player: &Player) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_connected(&mut self, _player: &Player) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_disconnected(&mut self, _player: &Player, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Returns false to veto the broadcast of this chat line.
    fn on_chat_message(&mut self, _player: &Player, _message: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn on_chat_command(&mut self, _player: &Player, _command: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_client_event(
        &mut self,
        _player: &Player,
        _event: &str,
        _args: &[NativeValue],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_death(&mut self, _player: &Player, _reason: i32, _weapon: i32) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_respawn(&mut self, _player: &Player) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The embeddable script runtime the core delegates to.
///
/// Given a server-side script declaration, produce the engine instances it
/// exports. Compile or execution failures come back as errors; the caller
/// logs them per-resource and keeps loading.
pub trait ScriptHost {
    fn instantiate(
        &self,
        kind: ScriptKind,
        script_path: &Path,
        references: &[String],
    ) -> anyhow::Result<Vec<Box<dyn ScriptEngine>>>;
}

/// Host that loads nothing. Stands in until a script runtime is wired up.
pub struct NoopScriptHost;

impl ScriptHost for NoopScriptHost {
    fn instantiate(
        &self,
        kind: ScriptKind,
        script_path: &Path,
        _references: &[String],
    ) -> anyhow::Result<Vec<Box<dyn ScriptEngine>>> {
        info!(kind = ?kind, path = %script_path.display(), "no script runtime configured, skipping");
        Ok(Vec::new())
    }
}

/// A running resource.
pub struct Resource {
    pub directory_name: String,
    pub manifest: ResourceManifest,
    pub engines: Vec<Box<dyn ScriptEngine>>,
}

/// Owns every running resource and the staged client-script bundle.
#[derive(Default)]
pub struct ResourceManager {
    root: PathBuf,
    running: Vec<Resource>,
    client_scripts: Vec<ClientsideScript>,
}

impl ResourceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            running: Vec::new(),
            client_scripts: Vec::new(),
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.iter().any(|r| r.directory_name == name)
    }

    pub fn running(&self) -> impl Iterator<Item = &Resource> {
        self.running.iter()
    }

    /// Client-side scripts of all running resources, staged for streaming.
    pub fn client_bundle(&self) -> ClientScriptBundle {
        ClientScriptBundle {
            scripts: self.client_scripts.clone(),
        }
    }

    /// Declared asset files: (resource name, relative path, absolute path).
    pub fn declared_files(&self) -> Vec<(String, String, PathBuf)> {
        self.running
            .iter()
            .flat_map(|r| {
                r.manifest.files.iter().map(|f| {
                    (
                        r.directory_name.clone(),
                        f.path.clone(),
                        self.root.join(&r.directory_name).join(&f.path),
                    )
                })
            })
            .collect()
    }

    /// Starts a resource by directory name.
    ///
    /// A single script failing to load never fails the resource; the
    /// resource activates with whatever engines did come up.
    pub fn start(&mut self, name: &str, host: &dyn ScriptHost) -> anyhow::Result<()> {
        if self.is_running(name) {
            bail!("resource {name} is already running");
        }

        let dir = self.root.join(name);
        if !dir.is_dir() {
            bail!("resource {name} does not exist");
        }

        info!(resource = %name, "starting resource");
        let manifest = ResourceManifest::load(&dir)
            .with_context(|| format!("load manifest for {name}"))?;

        let mut engines: Vec<Box<dyn ScriptEngine>> = Vec::new();
        let mut staged: Vec<ClientsideScript> = Vec::new();
        let references: Vec<String> =
            manifest.references.iter().map(|r| r.name.clone()).collect();

        for script in &manifest.scripts {
            let script_path = dir.join(&script.path);
            match script.side {
                ScriptSide::Client => {
                    // Staged for delivery on connection-confirmed, never
                    // executed locally.
                    let source = std::fs::read_to_string(&script_path)
                        .with_context(|| format!("read client script {}", script.path))?;
                    staged.push(ClientsideScript {
                        resource: name.to_string(),
                        source,
                    });
                }
                ScriptSide::Server => {
                    match host.instantiate(script.kind, &script_path, &references) {
                        Ok(mut instances) => engines.append(&mut instances),
                        Err(e) => {
                            warn!(resource = %name, script = %script.path, error = %e, "script failed to load");
                        }
                    }
                }
            }
        }

        let mut resource = Resource {
            directory_name: name.to_string(),
            manifest,
            engines,
        };

        for engine in &mut resource.engines {
            if let Err(e) = engine.on_resource_start() {
                warn!(resource = %name, error = %e, "on_resource_start failed");
            }
        }

        // Visible to dispatch fan-out and streaming only from here on; a
        // failed start leaves no staged scripts behind.
        self.client_scripts.append(&mut staged);
        self.running.push(resource);
        Ok(())
    }

    /// Stops a running resource. Returns false when it was not running.
    pub fn stop(&mut self, name: &str) -> bool {
        let Some(idx) = self
            .running
            .iter()
            .position(|r| r.directory_name == name)
        else {
            return false;
        };

        info!(resource = %name, "stopping resource");
        let mut resource = self.running.remove(idx);
        for engine in &mut resource.engines {
            if let Err(e) = engine.on_resource_stop() {
                warn!(resource = %name, error = %e, "on_resource_stop failed");
            }
        }
        self.client_scripts.retain(|s| s.resource != name);
        true
    }

    /// Runs a hook on every engine of every running resource, in
    /// registration order. Failures are logged and skipped.
    pub fn for_each_engine(
        &mut self,
        hook: &str,
        mut f: impl FnMut(&mut dyn ScriptEngine) -> anyhow::Result<()>,
    ) {
        for resource in &mut self.running {
            for engine in &mut resource.engines {
                if let Err(e) = f(engine.as_mut()) {
                    warn!(resource = %resource.directory_name, hook, error = %e, "engine hook failed");
                }
            }
        }
    }

    /// Chat veto fold: any engine returning false suppresses the broadcast.
    /// A failing engine does not count as a veto.
    pub fn chat_allowed(&mut self, player: &Player, message: &str) -> bool {
        let mut pass = true;
        for resource in &mut self.running {
            for engine in &mut resource.engines {
                match engine.on_chat_message(player, message) {
                    Ok(allowed) => pass = pass && allowed,
                    Err(e) => {
                        warn!(resource = %resource.directory_name, error = %e, "on_chat_message failed");
                    }
                }
            }
        }
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityHandle;
    use crate::transport::ConnectionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEngine {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        veto: bool,
    }

    impl ScriptEngine for CountingEngine {
        fn on_resource_start(&mut self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_resource_stop(&mut self) -> anyhow::Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_chat_message(&mut self, _p: &Player, _m: &str) -> anyhow::Result<bool> {
            Ok(!self.veto)
        }
    }

    struct CountingHost {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl ScriptHost for CountingHost {
        fn instantiate(
            &self,
            _kind: ScriptKind,
            _path: &Path,
            _refs: &[String],
        ) -> anyhow::Result<Vec<Box<dyn ScriptEngine>>> {
            Ok(vec![Box::new(CountingEngine {
                started: self.started.clone(),
                stopped: self.stopped.clone(),
                veto: false,
            })])
        }
    }

    fn write_resource(root: &Path, name: &str, manifest: &str, scripts: &[(&str, &str)]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest).unwrap();
        for (file, contents) in scripts {
            std::fs::write(dir.join(file), contents).unwrap();
        }
    }

    #[test]
    fn start_runs_engines_and_stages_client_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        write_resource(
            tmp.path(),
            "race1",
            r#"{
                "scripts": [
                    { "path": "server.js", "kind": "js", "side": "server" },
                    { "path": "client.js", "kind": "js", "side": "client" }
                ]
            }"#,
            &[("server.js", "// server"), ("client.js", "// client")],
        );

        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let host = CountingHost {
            started: started.clone(),
            stopped: stopped.clone(),
        };

        let mut mgr = ResourceManager::new(tmp.path());
        mgr.start("race1", &host).unwrap();

        assert!(mgr.is_running("race1"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.client_bundle().scripts.len(), 1);
        assert_eq!(mgr.client_bundle().scripts[0].resource, "race1");

        assert!(mgr.stop("race1"));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!mgr.is_running("race1"));
        assert!(mgr.client_bundle().scripts.is_empty());
    }

    #[test]
    fn failed_start_stages_no_client_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        // Second client script is declared but missing on disk.
        write_resource(
            tmp.path(),
            "broken",
            r#"{
                "scripts": [
                    { "path": "ok.js", "kind": "js", "side": "client" },
                    { "path": "missing.js", "kind": "js", "side": "client" }
                ]
            }"#,
            &[("ok.js", "// staged")],
        );

        let mut mgr = ResourceManager::new(tmp.path());
        assert!(mgr.start("broken", &NoopScriptHost).is_err());
        assert!(!mgr.is_running("broken"));
        assert!(mgr.client_bundle().scripts.is_empty());
    }

    #[test]
    fn missing_resource_and_manifest_are_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = ResourceManager::new(tmp.path());
        assert!(mgr.start("nope", &NoopScriptHost).is_err());

        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();
        assert!(mgr.start("empty", &NoopScriptHost).is_err());
    }

    #[test]
    fn stop_unknown_resource_is_noop() {
        let mut mgr = ResourceManager::new("resources");
        assert!(!mgr.stop("ghost"));
    }

    #[test]
    fn chat_veto_is_an_and_fold() {
        let mut mgr = ResourceManager::new("resources");
        mgr.running.push(Resource {
            directory_name: "a".into(),
            manifest: ResourceManifest::from_json_str("{}").unwrap(),
            engines: vec![Box::new(CountingEngine {
                started: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicUsize::new(0)),
                veto: false,
            })],
        });
        mgr.running.push(Resource {
            directory_name: "b".into(),
            manifest: ResourceManifest::from_json_str("{}").unwrap(),
            engines: vec![Box::new(CountingEngine {
                started: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicUsize::new(0)),
                veto: true,
            })],
        });

        let player = Player::new(ConnectionId(1), EntityHandle(1));
        assert!(!mgr.chat_allowed(&player, "hello"));
    }
}
