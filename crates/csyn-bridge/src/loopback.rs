//! In-memory bridge for exercising the engine without a live DSP server.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use csyn_core::CsynResult;

use crate::command::{BridgeCommand, TimedBatch, Transaction};
use crate::dsp_bridge::DspBridge;
use crate::events::{AnalysisEvent, NodeEndEvent};

/// Records every committed batch for test assertions and lets tests inject
/// synthetic `/analysis` and `/n_end` events as if a server had sent them.
pub struct LoopbackBridge {
    outbound_tx: mpsc::UnboundedSender<TimedBatch>,
    applied: Arc<StdMutex<Vec<TimedBatch>>>,
    analysis_tx: broadcast::Sender<AnalysisEvent>,
    node_end_tx: broadcast::Sender<NodeEndEvent>,
    buffer_counter: Arc<AtomicI64>,
    node_counter: Arc<AtomicI64>,
    running: AtomicBool,
    clock_origin: StdMutex<Option<Instant>>,
}

impl LoopbackBridge {
    pub fn new() -> Self {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let applied = Arc::new(StdMutex::new(Vec::new()));
        let sink = applied.clone();
        tokio::spawn(async move {
            while let Some(batch) = outbound_rx.recv().await {
                sink.lock().unwrap().push(batch);
            }
        });

        let (analysis_tx, _) = broadcast::channel(256);
        let (node_end_tx, _) = broadcast::channel(256);

        Self {
            outbound_tx,
            applied,
            analysis_tx,
            node_end_tx,
            buffer_counter: Arc::new(AtomicI64::new(0)),
            node_counter: Arc::new(AtomicI64::new(0)),
            running: AtomicBool::new(false),
            clock_origin: StdMutex::new(None),
        }
    }

    /// All commands committed so far, across every transaction, in commit
    /// order. For test assertions only.
    pub fn applied_commands(&self) -> Vec<BridgeCommand> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.commands.clone())
            .collect()
    }

    pub fn inject_analysis(&self, event: AnalysisEvent) {
        let _ = self.analysis_tx.send(event);
    }

    pub fn inject_node_end(&self, node_id: i64) {
        let _ = self.node_end_tx.send(NodeEndEvent { node_id });
    }
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DspBridge for LoopbackBridge {
    async fn boot(&self, _input_channels: u32, _output_channels: u32) -> CsynResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn quit(&self) -> CsynResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn at(&self, time: f64) -> Transaction {
        Transaction::new(
            time,
            self.buffer_counter.clone(),
            self.node_counter.clone(),
            self.outbound_tx.clone(),
        )
    }

    fn subscribe_analysis(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.analysis_tx.subscribe()
    }

    fn subscribe_node_end(&self) -> broadcast::Receiver<NodeEndEvent> {
        self.node_end_tx.subscribe()
    }

    fn clock_start(&self) {
        *self.clock_origin.lock().unwrap() = Some(Instant::now());
    }

    fn clock_stop(&self) {
        *self.clock_origin.lock().unwrap() = None;
    }

    fn now(&self) -> f64 {
        match *self.clock_origin.lock().unwrap() {
            Some(origin) => origin.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csyn_core::BufferHandle;
    use std::path::PathBuf;

    #[tokio::test]
    async fn committed_transactions_are_recorded_in_order() {
        let bridge = LoopbackBridge::new();
        bridge.boot(8, 8).await.unwrap();

        {
            let mut txn = bridge.at(0.0);
            let handle = txn.add_buffer(1, PathBuf::from("a.wav"), 0, 1000);
            assert_eq!(handle, BufferHandle(0));
            txn.commit();
        }
        // allow the background sink task to drain the channel
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;

        let commands = bridge.applied_commands();
        assert_eq!(commands.len(), 1);
    }

    #[tokio::test]
    async fn injected_events_reach_subscribers() {
        let bridge = LoopbackBridge::new();
        let mut rx = bridge.subscribe_node_end();
        bridge.inject_node_end(7);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_id, 7);
    }
}
