//! Frame to cluster mapping.
//!
//! Each display surface shows at most one cluster. Registering a frame again
//! replaces its mapping in one step, so a lookup never observes a frame
//! mapped to two clusters.

use link_types::{ClusterId, FrameId};
use std::collections::HashMap;

/// Result of removing a frame mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Cluster the frame was showing.
    pub cluster_id: ClusterId,
    /// No frame shows that cluster any more. A hint only; the cluster stays
    /// connected.
    pub cluster_idle: bool,
}

/// Single-valued frameId → clusterId table.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    frames: HashMap<FrameId, ClusterId>,
}

impl FrameTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `frame_id` to `cluster_id`, returning the replaced mapping.
    pub fn register(&mut self, frame_id: FrameId, cluster_id: ClusterId) -> Option<ClusterId> {
        self.frames.insert(frame_id, cluster_id)
    }

    /// Cluster currently shown by `frame_id`.
    pub fn resolve(&self, frame_id: FrameId) -> Option<&ClusterId> {
        self.frames.get(&frame_id)
    }

    /// Remove the mapping of `frame_id`.
    pub fn unregister(&mut self, frame_id: FrameId) -> Option<Unregistered> {
        let cluster_id = self.frames.remove(&frame_id)?;
        let cluster_idle = self.is_idle(&cluster_id);
        Some(Unregistered {
            cluster_id,
            cluster_idle,
        })
    }

    /// Frames showing `cluster_id`, in ascending order.
    pub fn frames_for(&self, cluster_id: &ClusterId) -> Vec<FrameId> {
        let mut frames: Vec<FrameId> = self
            .frames
            .iter()
            .filter(|(_, c)| *c == cluster_id)
            .map(|(f, _)| *f)
            .collect();
        frames.sort();
        frames
    }

    /// Remove every frame showing `cluster_id`.
    pub fn remove_cluster(&mut self, cluster_id: &ClusterId) -> Vec<FrameId> {
        let frames = self.frames_for(cluster_id);
        for frame in &frames {
            self.frames.remove(frame);
        }
        frames
    }

    /// Whether no frame shows `cluster_id`.
    pub fn is_idle(&self, cluster_id: &ClusterId) -> bool {
        !self.frames.values().any(|c| c == cluster_id)
    }

    /// Number of mapped frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frame is mapped.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
