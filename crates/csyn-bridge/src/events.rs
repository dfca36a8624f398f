//! Decoded server-pushed messages the engine subscribes to.

/// One `/analysis` frame from the live-analysis synth.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisEvent {
    pub node_id: i64,
    pub peak: f64,
    pub rms: f64,
    pub f0_midi: f64,
    pub is_voiced: bool,
    pub is_onset: bool,
    pub centroid: f64,
    pub flatness: f64,
    pub rolloff: f64,
    pub mfcc: Vec<f64>,
}

/// A `/n_end` notification: the named node has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEndEvent {
    pub node_id: i64,
}
