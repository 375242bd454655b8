//! Subscription reference counting for the watch multiplexer.
//!
//! One entry per (cluster, kind). The entry's reference count is the number
//! of subscribers it holds, and the table reports the 0→1 and 1→0
//! transitions so the caller knows exactly when to open and close the
//! upstream watch.
//!
//! Each subscription is identified by a [`SubscriptionToken`] that is never
//! reused. Clearing a cluster drops its tokens, so a disposer that outlives
//! the clear becomes a no-op instead of removing a newer subscription.

use link_types::{ClusterId, ResourceKind, SubscriberId};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Key of a subscription entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Cluster the events come from.
    pub cluster_id: ClusterId,
    /// Resource kind.
    pub kind: ResourceKind,
}

impl SubscriptionKey {
    /// Create a key.
    pub fn new(cluster_id: ClusterId, kind: ResourceKind) -> Self {
        Self { cluster_id, kind }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.kind)
    }
}

/// Handle for one subscription, held by its disposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Refcount change caused by a subscribe or unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 0→1: the upstream watch must be opened.
    Opened,
    /// Another subscriber joined an open entry.
    Joined {
        /// Count after the change.
        count: usize,
    },
    /// A subscriber left; others remain.
    Left {
        /// Count after the change.
        count: usize,
    },
    /// 1→0: the upstream watch must be closed.
    Closed,
}

/// Error type for table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The subscriber already holds a subscription for this key.
    #[error("subscriber {subscriber} already subscribed to {key}")]
    Duplicate {
        /// Entry key.
        key: SubscriptionKey,
        /// Offending subscriber.
        subscriber: SubscriberId,
    },
}

#[derive(Debug)]
struct Member<S> {
    token: SubscriptionToken,
    subscriber: SubscriberId,
    value: S,
}

/// Subscription entries keyed by (cluster, kind).
///
/// Members of an entry keep their subscription order; dispatch visits them
/// in that order.
#[derive(Debug)]
pub struct SubscriptionTable<S> {
    entries: HashMap<SubscriptionKey, Vec<Member<S>>>,
    tokens: HashMap<SubscriptionToken, SubscriptionKey>,
    next_token: u64,
}

impl<S> SubscriptionTable<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 0,
        }
    }

    /// Add a subscriber to the entry for `key`, creating it if needed.
    pub fn subscribe(
        &mut self,
        key: SubscriptionKey,
        subscriber: SubscriberId,
        value: S,
    ) -> Result<(SubscriptionToken, Transition), TableError> {
        let members = self.entries.entry(key.clone()).or_default();
        if members.iter().any(|m| m.subscriber == subscriber) {
            return Err(TableError::Duplicate { key, subscriber });
        }

        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        members.push(Member {
            token,
            subscriber,
            value,
        });

        let transition = match members.len() {
            1 => Transition::Opened,
            count => Transition::Joined { count },
        };
        self.tokens.insert(token, key);
        Ok((token, transition))
    }

    /// Remove the subscription behind `token`.
    ///
    /// Returns `None` when the token is unknown (already released or
    /// invalidated by [`clear_cluster`](Self::clear_cluster)).
    pub fn unsubscribe(
        &mut self,
        token: SubscriptionToken,
    ) -> Option<(SubscriptionKey, Transition)> {
        let key = self.tokens.remove(&token)?;
        let members = self.entries.get_mut(&key)?;
        members.retain(|m| m.token != token);

        let transition = if members.is_empty() {
            self.entries.remove(&key);
            Transition::Closed
        } else {
            Transition::Left {
                count: members.len(),
            }
        };
        Some((key, transition))
    }

    /// Subscribers of `key`, in subscription order.
    pub fn subscribers<'a>(&'a self, key: &SubscriptionKey) -> impl Iterator<Item = &'a S> + 'a {
        self.entries
            .get(key)
            .into_iter()
            .flat_map(|members| members.iter().map(|m| &m.value))
    }

    /// Reference count of `key`.
    pub fn count(&self, key: &SubscriptionKey) -> usize {
        self.entries.get(key).map_or(0, Vec::len)
    }

    /// Whether the token still names a live subscription.
    pub fn is_live(&self, token: SubscriptionToken) -> bool {
        self.tokens.contains_key(&token)
    }

    /// Drop every entry of `cluster_id`, invalidating their tokens.
    ///
    /// Returns the removed entries with their members in subscription order.
    pub fn clear_cluster(&mut self, cluster_id: &ClusterId) -> Vec<(SubscriptionKey, Vec<S>)> {
        let keys: Vec<SubscriptionKey> = self
            .entries
            .keys()
            .filter(|k| &k.cluster_id == cluster_id)
            .cloned()
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(members) = self.entries.remove(&key) {
                let values = members
                    .into_iter()
                    .map(|m| {
                        self.tokens.remove(&m.token);
                        m.value
                    })
                    .collect();
                removed.push((key, values));
            }
        }
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        removed
    }

    /// Keys with at least one subscriber.
    pub fn keys(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.entries.keys()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for SubscriptionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
