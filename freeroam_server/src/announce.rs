//! Master-server announcement seam.
//!
//! The actual outbound HTTP call lives behind [`MasterAnnouncer`]; the tick
//! loop only decides when to fire it. A failed announce is logged and
//! retried on the next scheduled interval, never fatal.

use tracing::info;

/// Minutes between self-announcements.
pub const ANNOUNCE_INTERVAL_MINUTES: i64 = 5;

pub trait MasterAnnouncer {
    fn announce(&mut self, master_server: &str, port: u16) -> anyhow::Result<()>;
}

/// Announcer that only logs. Stands in until an HTTP client is wired up.
pub struct LogAnnouncer;

impl MasterAnnouncer for LogAnnouncer {
    fn announce(&mut self, master_server: &str, port: u16) -> anyhow::Result<()> {
        info!(master = %master_server, port, "announcing to master server");
        Ok(())
    }
}
