//! Expire-on-access policy shared by the nonce cache and the session store.
//!
//! An entry is live while `now - stamp <= window`. Lookups drop dead entries
//! as they meet them and [`ExpireOnAccess::sweep`] clears the rest.

use chrono::{DateTime, Duration, Utc};
use std::{borrow::Borrow, collections::HashMap, hash::Hash};

/// Anything carrying the timestamp its expiry is measured from.
pub trait Stamped {
    fn stamp(&self) -> DateTime<Utc>;
}

impl Stamped for DateTime<Utc> {
    fn stamp(&self) -> DateTime<Utc> {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpireOnAccess {
    window: Duration,
}

impl ExpireOnAccess {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(secs.min(u64::from(u32::MAX)) as i64))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_expired(&self, stamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stamp > self.window
    }

    /// Returns the live entry for `key`, removing it first if it has expired.
    pub fn live_entry<'a, K, Q, V>(
        &self,
        map: &'a mut HashMap<K, V>,
        key: &Q,
        now: DateTime<Utc>,
    ) -> Option<&'a mut V>
    where
        K: Borrow<Q> + Eq + Hash,
        Q: Eq + Hash + ?Sized,
        V: Stamped,
    {
        let expired = self.is_expired(map.get(key)?.stamp(), now);
        if expired {
            map.remove(key);
            return None;
        }
        map.get_mut(key)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep<K, V>(&self, map: &mut HashMap<K, V>, now: DateTime<Utc>) -> usize
    where
        K: Eq + Hash,
        V: Stamped,
    {
        let before = map.len();
        map.retain(|_, v| !self.is_expired(v.stamp(), now));
        before - map.len()
    }
}
