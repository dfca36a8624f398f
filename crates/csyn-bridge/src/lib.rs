//! DSP bridge (C5): the narrow capability interface the core uses to
//! address the audio server, plus an OSC/UDP transport and an in-memory
//! loopback implementation for tests.

mod command;
mod dsp_bridge;
mod events;
mod loopback;
mod osc;

pub use command::{BridgeCommand, Transaction};
pub use dsp_bridge::DspBridge;
pub use events::{AnalysisEvent, NodeEndEvent};
pub use loopback::LoopbackBridge;
pub use osc::OscBridge;
