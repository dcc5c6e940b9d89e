//! Tracks which users have already been sent in an index event.
use std::{collections::HashSet, time::Duration};

use crate::User;

/// Strategy deciding whether a user needs an index event.
///
/// The dispatcher owns its deduplicator exclusively and calls it from a single task, so
/// implementations need no internal synchronization.
pub trait UserDeduplicator {
    /// Record a sighting of `user`. Returns `true` if the user has not been seen since the last
    /// [`flush`](UserDeduplicator::flush).
    fn process_user(&mut self, user: &User) -> bool;

    /// Forget every user seen so far.
    fn flush(&mut self);

    /// How often the dispatcher should call [`flush`](UserDeduplicator::flush). `None` disables
    /// the periodic reset.
    fn flush_interval(&self) -> Option<Duration>;
}

/// Remembers user keys in a set that is cleared wholesale on a fixed interval.
#[derive(Debug, Clone)]
pub struct DefaultUserDeduplicator {
    user_keys: HashSet<String>,
    flush_interval: Duration,
}

impl DefaultUserDeduplicator {
    pub fn new(flush_interval: Duration) -> DefaultUserDeduplicator {
        DefaultUserDeduplicator {
            user_keys: HashSet::new(),
            flush_interval,
        }
    }

    /// Number of distinct user keys seen since the last flush.
    pub fn len(&self) -> usize {
        self.user_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_keys.is_empty()
    }
}

impl UserDeduplicator for DefaultUserDeduplicator {
    fn process_user(&mut self, user: &User) -> bool {
        if self.user_keys.contains(user.key()) {
            return false;
        }
        self.user_keys.insert(user.key().to_owned())
    }

    fn flush(&mut self) {
        self.user_keys.clear();
    }

    fn flush_interval(&self) -> Option<Duration> {
        Some(self.flush_interval)
    }
}
