// Copyright (c) 2025 - Cowboy AI, Inc.
//! Per-key Mutual Exclusion
//!
//! Writes for one promoter or one link are serialized; writes for unrelated
//! keys run in parallel. [`KeyedLocks::lock_all`] takes its keys in sorted
//! order so two tasks locking overlapping key sets cannot deadlock.
//!
//! Circle switches additionally go through a [`SwitchGuard`], which never
//! waits: a second switch for a promoter while one is in flight is refused.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{LinkId, ProgramId, PromoterId};

/// Serialization scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Promoter(ProgramId, PromoterId),
    Link(LinkId),
}

/// Lazily created async mutex per key
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every key, in canonical order
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = LockKey>) -> KeyedGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            // clone out of the map so no shard lock is held across the await
            let mutex = self.locks.entry(*key).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }

        KeyedGuard {
            locks: Arc::clone(&self.locks),
            keys,
            guards,
        }
    }

    /// Number of keys with a live mutex
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held locks; released (and unused entries dropped) on drop
pub struct KeyedGuard {
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
    keys: Vec<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.locks
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Non-blocking single-writer guard for circle switches
#[derive(Debug, Clone, Default)]
pub struct SwitchGuard {
    in_flight: Arc<DashSet<(ProgramId, PromoterId)>>,
}

impl SwitchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit to switch the promoter's circle, or `None` if a switch is in flight
    pub fn try_acquire(&self, program_id: ProgramId, promoter_id: PromoterId) -> Option<SwitchPermit> {
        if self.in_flight.insert((program_id, promoter_id)) {
            Some(SwitchPermit {
                in_flight: Arc::clone(&self.in_flight),
                program_id,
                promoter_id,
            })
        } else {
            None
        }
    }

    pub fn is_switching(&self, program_id: ProgramId, promoter_id: PromoterId) -> bool {
        self.in_flight.contains(&(program_id, promoter_id))
    }
}

/// Exclusive right to switch one promoter's circle
#[derive(Debug)]
pub struct SwitchPermit {
    in_flight: Arc<DashSet<(ProgramId, PromoterId)>>,
    program_id: ProgramId,
    promoter_id: PromoterId,
}

impl SwitchPermit {
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    pub fn promoter_id(&self) -> PromoterId {
        self.promoter_id
    }
}

impl Drop for SwitchPermit {
    fn drop(&mut self) {
        self.in_flight.remove(&(self.program_id, self.promoter_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_release_removes_idle_entries() {
        let locks = KeyedLocks::new();
        let key = LockKey::Link(LinkId::new());
        {
            let guard = locks.lock_all([key, key]).await;
            assert_eq!(guard.keys(), &[key]);
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let key = LockKey::Promoter(ProgramId::new(), PromoterId::new());
        let guard = locks.lock_all([key]).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_all([key]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock_all([LockKey::Link(LinkId::new())]).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock_all([LockKey::Link(LinkId::new())]),
        )
        .await;
        assert!(b.is_ok());
    }

    #[test]
    fn test_second_switch_permit_is_refused_until_release() {
        let guard = SwitchGuard::new();
        let program = ProgramId::new();
        let promoter = PromoterId::new();

        let permit = guard.try_acquire(program, promoter).unwrap();
        assert!(guard.try_acquire(program, promoter).is_none());
        assert!(guard.is_switching(program, promoter));

        drop(permit);
        assert!(guard.try_acquire(program, promoter).is_some());
    }
}
