//! Buffer handles and the unified holder identity the buffer cache
//! refcounts against.

use std::fmt;

use uuid::Uuid;

/// Opaque DSP-server identifier for a loaded audio segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub i64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A DSP server node id, as reported in `/n_end` messages and assigned to
/// synths the pattern scheduler spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i64);

/// An entity that keeps a buffer alive by reference: either a voice or a
/// DSP node. Flat union, no back-references beyond the cache's two maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Holder {
    Voice(Uuid),
    Node(NodeId),
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::Voice(uuid) => write!(f, "voice:{uuid}"),
            Holder::Node(node) => write!(f, "node:{}", node.0),
        }
    }
}
