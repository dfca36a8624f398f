//! Buffer cache (C3): reference-counted dedup of corpus partitions to live
//! DSP buffers, shared across voice and node holders.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use csyn_bridge::Transaction;
use csyn_core::{BufferHandle, CsynError, CsynResult, Holder, Partition};

/// What `increment` was asked to resolve into a buffer: either a fresh
/// corpus entry (load on first reference) or an already-live handle
/// (always reused).
pub enum BufferSource {
    Partition(Partition),
    Handle(BufferHandle),
}

impl From<Partition> for BufferSource {
    fn from(p: Partition) -> Self {
        BufferSource::Partition(p)
    }
}

impl From<BufferHandle> for BufferSource {
    fn from(h: BufferHandle) -> Self {
        BufferSource::Handle(h)
    }
}

/// The four associations described in the buffer-cache design: which
/// holders keep a buffer alive, which partition it was loaded for, the
/// reverse index for bulk release, and the dedup map keyed by partition
/// digest.
#[derive(Default)]
pub struct BufferCache {
    root_path: PathBuf,
    buffers_to_holders: HashMap<BufferHandle, HashSet<Holder>>,
    buffers_to_partitions: HashMap<BufferHandle, Partition>,
    holders_to_buffers: HashMap<Holder, HashSet<BufferHandle>>,
    partitions_to_buffers: HashMap<String, BufferHandle>,
}

impl BufferCache {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            ..Default::default()
        }
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers_to_holders.len()
    }

    pub fn holder_count(&self) -> usize {
        self.holders_to_buffers.len()
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.buffers_to_holders.contains_key(&handle)
    }

    /// Resolve `source` to a buffer and record `holder` as a reference to
    /// it. Requests a load from the DSP server (inside `txn`) only the
    /// first time a given partition digest is seen.
    pub fn increment(
        &mut self,
        source: impl Into<BufferSource>,
        holder: Holder,
        txn: &mut Transaction,
    ) -> BufferHandle {
        let handle = match source.into() {
            BufferSource::Handle(handle) => {
                log::debug!("{holder}: reusing buffer {handle}");
                handle
            }
            BufferSource::Partition(partition) => {
                if let Some(&handle) = self.partitions_to_buffers.get(&partition.digest) {
                    log::debug!("{holder}: reusing buffer {handle} for {}", partition.digest);
                    handle
                } else {
                    let handle = txn.add_buffer(
                        1,
                        self.root_path.join(&partition.path),
                        partition.starting_frame,
                        partition.frame_count,
                    );
                    log::debug!("{holder}: allocated buffer {handle} for {}", partition.digest);
                    self.partitions_to_buffers
                        .insert(partition.digest.clone(), handle);
                    self.buffers_to_partitions.insert(handle, partition);
                    handle
                }
            }
        };

        self.buffers_to_holders
            .entry(handle)
            .or_default()
            .insert(holder);
        self.holders_to_buffers
            .entry(holder)
            .or_default()
            .insert(handle);
        handle
    }

    /// `increment` for every entry, attributed to the same holder.
    pub fn increment_multiple(
        &mut self,
        entries: Vec<Partition>,
        holder: Holder,
        txn: &mut Transaction,
    ) -> Vec<BufferHandle> {
        entries
            .into_iter()
            .map(|entry| self.increment(entry, holder, txn))
            .collect()
    }

    /// Release every buffer `holder` references. Unknown holders are
    /// reported as [`CsynError::NotFound`] so callers can tolerate late or
    /// duplicate node-end notifications without treating them as fatal.
    pub fn decrement(
        &mut self,
        holder: Holder,
        free: bool,
        txn: &mut Transaction,
    ) -> CsynResult<()> {
        let buffers = self
            .holders_to_buffers
            .remove(&holder)
            .ok_or_else(|| CsynError::NotFound(holder.to_string()))?;

        for handle in buffers {
            let Some(holders) = self.buffers_to_holders.get_mut(&handle) else {
                continue;
            };
            holders.remove(&holder);
            if holders.is_empty() && free {
                self.buffers_to_holders.remove(&handle);
                if let Some(partition) = self.buffers_to_partitions.remove(&handle) {
                    self.partitions_to_buffers.remove(&partition.digest);
                }
                log::debug!("freeing buffer {handle}");
                txn.free_buffer(handle);
            }
        }
        Ok(())
    }
}
