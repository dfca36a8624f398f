//! Engine and harness (C6/C7): the cooperative single-threaded event loop
//! that drives analysis ingestion, corpus queries, buffer bookkeeping, and
//! pattern playback.

mod engine;
mod harness;
mod voice;

pub use engine::Engine;
pub use harness::{Command, Harness};
