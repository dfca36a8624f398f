//! The narrow capability interface the rest of the engine uses to talk to
//! the DSP server.

use async_trait::async_trait;
use tokio::sync::broadcast;

use csyn_core::CsynResult;

use crate::command::Transaction;
use crate::events::{AnalysisEvent, NodeEndEvent};

#[async_trait]
pub trait DspBridge: Send + Sync {
    async fn boot(&self, input_channels: u32, output_channels: u32) -> CsynResult<()>;
    async fn quit(&self) -> CsynResult<()>;
    fn is_running(&self) -> bool;

    /// Open a timed transaction at `time`. Commands queued against the
    /// returned guard flush as one atomic batch on commit or drop.
    fn at(&self, time: f64) -> Transaction;

    fn subscribe_analysis(&self) -> broadcast::Receiver<AnalysisEvent>;
    fn subscribe_node_end(&self) -> broadcast::Receiver<NodeEndEvent>;

    fn clock_start(&self);
    fn clock_stop(&self);
    /// Current audio-clock time in seconds; 0.0 before `clock_start`.
    fn now(&self) -> f64;
}
