//! Chunked reliable streaming to connecting clients.
//!
//! Each connection gets an ordered job queue; exactly one job is in flight
//! per queue. Every tick a queue advances by at most one chunk, and only
//! when the connection's channel reports write-readiness — a congested
//! channel is simply retried next tick.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use rand::Rng;
use tracing::debug;

use freeroam_shared::codec::{encode_frame, PacketType, FRAME_OVERHEAD};
use freeroam_shared::protocol::{FileTransferChunk, FileTransferComplete, FileTransferRequest};

use crate::session::SessionRegistry;
use crate::transport::{ConnectionId, Delivery, Transport};

/// What a streaming job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    WorldSnapshot,
    ScriptBundle,
    Asset,
}

impl StreamKind {
    pub fn as_u8(self) -> u8 {
        match self {
            StreamKind::WorldSnapshot => 0,
            StreamKind::ScriptBundle => 1,
            StreamKind::Asset => 2,
        }
    }
}

/// One queued payload for one connection.
#[derive(Debug)]
pub struct StreamJob {
    pub id: i32,
    pub kind: StreamKind,
    /// Resource the payload belongs to; empty for server-owned payloads.
    pub resource: String,
    pub name: String,
    pub data: Vec<u8>,
    cursor: usize,
    started: bool,
}

impl StreamJob {
    pub fn new(kind: StreamKind, resource: &str, name: &str, data: Vec<u8>) -> Self {
        Self {
            id: rand::thread_rng().gen_range(0..i32::MAX),
            kind,
            resource: resource.to_string(),
            name: name.to_string(),
            data,
            cursor: 0,
            started: false,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

struct StreamTarget {
    chunk_size: usize,
    jobs: VecDeque<StreamJob>,
}

/// Active streams, keyed by connection.
#[derive(Default)]
pub struct StreamingQueue {
    targets: BTreeMap<ConnectionId, StreamTarget>,
}

impl StreamingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends jobs to a connection's queue, creating it if needed.
    ///
    /// `mtu` is the transport's MTU; the usable chunk size reserves the
    /// frame overhead out of it.
    pub fn enqueue(&mut self, connection: ConnectionId, mtu: usize, jobs: Vec<StreamJob>) {
        let target = self.targets.entry(connection).or_insert_with(|| StreamTarget {
            chunk_size: mtu.saturating_sub(FRAME_OVERHEAD).max(1),
            jobs: VecDeque::new(),
        });
        target.jobs.extend(jobs);
    }

    pub fn has_pending(&self, connection: ConnectionId) -> bool {
        self.targets
            .get(&connection)
            .is_some_and(|t| !t.jobs.is_empty())
    }

    pub fn pending_jobs(&self, connection: ConnectionId) -> usize {
        self.targets.get(&connection).map_or(0, |t| t.jobs.len())
    }

    /// Advances every active stream by at most one chunk.
    ///
    /// Queues whose connection has left the registry are discarded; drained
    /// queues are dropped from the active set.
    pub fn advance<T: Transport>(&mut self, transport: &mut T, sessions: &SessionRegistry) {
        let connections: Vec<ConnectionId> = self.targets.keys().copied().collect();
        for connection in connections {
            let Some(channel) = sessions.channel_for(connection) else {
                debug!(connection = connection.0, "stream target disconnected, dropping queue");
                self.targets.remove(&connection);
                continue;
            };

            let Some(target) = self.targets.get_mut(&connection) else {
                continue;
            };

            if target.jobs.is_empty() {
                self.targets.remove(&connection);
                continue;
            }

            if !transport.can_send_now(connection, channel) {
                continue; // retried next tick
            }

            let Some(job) = target.jobs.front_mut() else {
                continue;
            };

            if !job.started {
                let start = FileTransferRequest {
                    id: job.id,
                    file_type: job.kind.as_u8(),
                    resource: job.resource.clone(),
                    name: job.name.clone(),
                    length: job.data.len() as u64,
                };
                transport.send(
                    connection,
                    encode_frame(PacketType::FileTransferRequest, &start),
                    Delivery::ReliableOrdered,
                    channel,
                );
                job.started = true;
            }

            let remaining = job.data.len() - job.cursor;
            let take = remaining.min(target.chunk_size);
            let chunk = FileTransferChunk {
                id: job.id,
                data: job.data[job.cursor..job.cursor + take].to_vec(),
            };
            job.cursor += take;
            transport.send(
                connection,
                encode_frame(PacketType::FileTransferTick, &chunk),
                Delivery::ReliableOrdered,
                channel,
            );

            if job.cursor >= job.data.len() {
                let done = FileTransferComplete { id: job.id };
                transport.send(
                    connection,
                    encode_frame(PacketType::FileTransferComplete, &done),
                    Delivery::ReliableOrdered,
                    channel,
                );
                target.jobs.pop_front();
            }
        }
    }
}
