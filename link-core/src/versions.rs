//! Resource version tracking for one watch stream.
//!
//! Upstream versions are monotonically increasing per (cluster, kind). A
//! restarted stream may replay changes that were already delivered; the
//! tracker tells the caller which events are behind the last one delivered.

use link_types::ResourceVersion;

/// Whether an observed version advances the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Newer than anything delivered.
    Fresh,
    /// Not newer than `last`; already delivered or superseded.
    Stale {
        /// Highest version delivered so far.
        last: ResourceVersion,
    },
}

/// Highest delivered version of one stream.
#[derive(Debug, Clone, Default)]
pub struct VersionTracker {
    last: Option<ResourceVersion>,
}

impl VersionTracker {
    /// Create a tracker with nothing delivered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `version` and record it when fresh.
    pub fn observe(&mut self, version: ResourceVersion) -> Freshness {
        match self.last {
            Some(last) if version <= last => Freshness::Stale { last },
            _ => {
                self.last = Some(version);
                Freshness::Fresh
            }
        }
    }

    /// Highest version delivered so far.
    pub fn last(&self) -> Option<ResourceVersion> {
        self.last
    }
}
