//! Per-logical-name leases serialising launch against launch and sweep.
//!
//! The dedup-check-then-create sequence is only idempotent while no other
//! task can run it for the same name. Holders of a [`NameLease`] have that
//! guarantee within one process. Orchestrators running in separate processes
//! additionally rely on the sweep grace period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = HashMap<String, Arc<AsyncMutex<()>>>;

/// Shared registry of name leases. Cloning shares the registry.
#[derive(Clone, Debug, Default)]
pub struct NameLeases {
    slots: Arc<Mutex<Slots>>,
}

/// Exclusive hold on one logical name, released on drop.
///
/// Dropping the lease removes the name's slot from the registry unless
/// another task holds or awaits it.
#[derive(Debug)]
pub struct NameLease {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<Slots>>,
}

impl Drop for NameLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Slots are only cloned under the registry lock, so a count of one
        // means no holder or waiter is left for this name.
        let mut slots = lock_slots(&self.slots);
        if slots
            .get(&self.name)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.name);
        }
    }
}

impl NameLease {
    /// Name this lease covers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NameLeases {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `name` is free and takes it.
    pub async fn acquire(&self, name: &str) -> NameLease {
        let guard = self.slot(name).lock_owned().await;
        self.lease(name, guard)
    }

    /// Takes `name` only if nobody holds it right now.
    #[must_use]
    pub fn try_acquire(&self, name: &str) -> Option<NameLease> {
        let guard = self.slot(name).try_lock_owned().ok()?;
        Some(self.lease(name, guard))
    }

    fn lease(&self, name: &str, guard: OwnedMutexGuard<()>) -> NameLease {
        NameLease {
            name: name.to_owned(),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    fn slot(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = lock_slots(&self.slots);
        Arc::clone(slots.entry(name.to_owned()).or_default())
    }
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tracked(leases: &NameLeases) -> usize {
        lock_slots(&leases.slots).len()
    }

    #[tokio::test]
    async fn released_names_leave_the_registry() {
        let leases = NameLeases::new();
        for number in 0..50 {
            let lease = leases.acquire(&format!("pr-{number}")).await;
            assert_eq!(tracked(&leases), 1);
            drop(lease);
        }
        assert_eq!(tracked(&leases), 0);

        let held = leases.try_acquire("pr-1");
        assert!(held.is_some());
        assert!(leases.try_acquire("pr-1").is_none());
        drop(held);
        assert_eq!(tracked(&leases), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_survives_while_a_waiter_is_queued() {
        let leases = NameLeases::new();
        let first = leases.acquire("pr-1").await;

        let contender = leases.clone();
        let waiter = tokio::spawn(async move { contender.acquire("pr-1").await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(first);
        let second = waiter.await.expect("waiter should complete");
        assert_eq!(tracked(&leases), 1);
        assert!(leases.try_acquire("pr-1").is_none(), "waiter now holds the name");

        drop(second);
        assert_eq!(tracked(&leases), 0);
    }

    #[tokio::test]
    async fn held_name_cannot_be_taken_until_released() {
        let leases = NameLeases::new();
        let lease = leases.acquire("pr-1").await;
        assert_eq!(lease.name(), "pr-1");

        assert!(leases.try_acquire("pr-1").is_none());
        assert!(leases.try_acquire("pr-2").is_some(), "names are independent");

        drop(lease);
        assert!(leases.try_acquire("pr-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_the_current_holder() {
        let leases = NameLeases::new();
        let first = leases.acquire("pr-1").await;

        let contender = leases.clone();
        let waiter = tokio::spawn(async move {
            let _lease = contender.acquire("pr-1").await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished(), "second acquire must block");

        drop(first);
        waiter.await.expect("waiter should complete");
    }
}
