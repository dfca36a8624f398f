//! csyn-core: shared descriptor types, configuration, and error kinds for
//! the concatenative synthesis engine.
//!
//! Every other `csyn-*` crate depends on this one and nothing else in the
//! workspace, so the descriptor layout (Partition, AnalysisTarget,
//! FeatureVector) stays identical between the corpus index and the live
//! analysis window.

mod config;
mod error;
mod feature;
mod holder;
mod wire;

pub use config::EngineConfig;
pub use error::{CsynError, CsynResult};
pub use feature::{
    build_feature_vector, AnalysisTarget, Descriptors, FeatureFrame, FeatureSubset, Partition,
    PatternFlavor, Range, RangeSet,
};
pub use holder::{BufferHandle, Holder, NodeId};
pub use wire::{KwargValue, Kwargs};
