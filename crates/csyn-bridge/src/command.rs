//! Timed transactions: the scoped batch of buffer/synth commands that
//! reaches the DSP server as a single atomic submission.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use csyn_core::{BufferHandle, Kwargs, NodeId};

#[derive(Debug, Clone)]
pub enum BridgeCommand {
    AddBuffer {
        handle: BufferHandle,
        channel_count: u32,
        file_path: PathBuf,
        starting_frame: u64,
        frame_count: u64,
    },
    FreeBuffer(BufferHandle),
    AddSynth {
        node_id: NodeId,
        blueprint_id: String,
        kwargs: Kwargs,
    },
}

/// A transaction's commands, stamped with the audio-clock time they were
/// opened at. What the transport actually serialises and flushes.
#[derive(Debug, Clone)]
pub struct TimedBatch {
    pub time: f64,
    pub commands: Vec<BridgeCommand>,
}

/// Scoped acquisition of a timed-submission batch. Buffer and node handles
/// are allocated client-side the moment they're requested (mirroring how a
/// SuperCollider client allocates ids before the server acknowledges them);
/// the batch itself is only sent to the transport on commit or drop.
pub struct Transaction {
    time: f64,
    commands: Vec<BridgeCommand>,
    buffer_counter: Arc<AtomicI64>,
    node_counter: Arc<AtomicI64>,
    outbound: UnboundedSender<TimedBatch>,
    flushed: bool,
}

impl Transaction {
    pub(crate) fn new(
        time: f64,
        buffer_counter: Arc<AtomicI64>,
        node_counter: Arc<AtomicI64>,
        outbound: UnboundedSender<TimedBatch>,
    ) -> Self {
        Self {
            time,
            commands: Vec::new(),
            buffer_counter,
            node_counter,
            outbound,
            flushed: false,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn add_buffer(
        &mut self,
        channel_count: u32,
        file_path: PathBuf,
        starting_frame: u64,
        frame_count: u64,
    ) -> BufferHandle {
        let handle = BufferHandle(self.buffer_counter.fetch_add(1, Ordering::Relaxed));
        self.commands.push(BridgeCommand::AddBuffer {
            handle,
            channel_count,
            file_path,
            starting_frame,
            frame_count,
        });
        handle
    }

    pub fn free_buffer(&mut self, handle: BufferHandle) {
        self.commands.push(BridgeCommand::FreeBuffer(handle));
    }

    pub fn add_synth(&mut self, blueprint_id: impl Into<String>, kwargs: Kwargs) -> NodeId {
        let node_id = NodeId(self.node_counter.fetch_add(1, Ordering::Relaxed));
        self.commands.push(BridgeCommand::AddSynth {
            node_id,
            blueprint_id: blueprint_id.into(),
            kwargs,
        });
        node_id
    }

    /// Flush now rather than waiting for drop. Idempotent.
    pub fn commit(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;
        let batch = TimedBatch {
            time: self.time,
            commands: std::mem::take(&mut self.commands),
        };
        if batch.commands.is_empty() {
            return;
        }
        if self.outbound.send(batch).is_err() {
            log::warn!("dsp transport closed; transaction at t={} dropped", self.time);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.flush();
    }
}
