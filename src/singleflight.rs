//! Ensures at most one in-flight upstream fetch per identifier: the first
//! caller for an identifier becomes the winner and performs the work;
//! subsequent callers join the same rendezvous and observe the winner's
//! published result.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;

/// How long a completed rendezvous is kept around after publishing, so that
/// near-simultaneous late arrivals still observe the result instead of
/// starting a fresh fetch.
pub const PUBLISH_LINGER: Duration = Duration::from_millis(300);

pub(crate) struct Rendezvous {
    notify: Notify,
    published: parking_lot::Mutex<bool>,
}

impl Rendezvous {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            published: parking_lot::Mutex::new(false),
        }
    }

    fn publish(&self) {
        *self.published.lock() = true;
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) {
        if *self.published.lock() {
            return;
        }
        self.notify.notified().await;
    }
}

/// The outcome of joining a single-flight slot.
pub enum Joined {
    /// This caller is the winner and must perform the fetch, then call
    /// [`SingleFlight::publish`] with the same identifier when done.
    Winner,
    /// This caller is a follower; `wait` resolves once the winner has
    /// published.
    Follower(Arc<Rendezvous>),
}

impl Joined {
    /// Blocks until the winner has published, a no-op for the winner itself.
    pub async fn wait(&self) {
        if let Joined::Follower(rendezvous) = self {
            rendezvous.wait().await;
        }
    }
}

/// Per-identifier request coalescing registry.
///
/// The map lives behind an `Arc` internally so that the delayed-removal task
/// spawned from `publish` shares the same storage rather than a snapshot.
#[derive(Clone)]
pub struct SingleFlight {
    inflight: Arc<DashMap<i64, Arc<Rendezvous>>>,
}

impl SingleFlight {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Joins the slot for `id`. The first caller becomes the winner; later
    /// callers before publication become followers sharing the same
    /// rendezvous.
    pub fn join(&self, id: i64) -> Joined {
        match self.inflight.entry(id) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Rendezvous::new()));
                Joined::Winner
            }
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                Joined::Follower(Arc::clone(slot.get()))
            }
        }
    }

    /// Called by the winner once the result is ready. Wakes all followers
    /// immediately and returns; the registry entry itself is removed in the
    /// background after [`PUBLISH_LINGER`] so very-late joiners still see a
    /// live rendezvous rather than starting a new fetch.
    pub async fn publish(&self, id: i64) {
        if let Some(rendezvous) = self.inflight.get(&id).map(|r| Arc::clone(&r)) {
            rendezvous.publish();
        }
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            tokio::time::sleep(PUBLISH_LINGER).await;
            inflight.remove(&id);
        });
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn only_one_winner_per_identifier() {
        let sf = SingleFlight::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let sf = sf.clone();
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                match sf.join(7) {
                    Joined::Winner => {
                        winners.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        sf.publish(7).await;
                    }
                    Joined::Follower(r) => r.wait().await,
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn followers_unblock_after_publish() {
        let sf = SingleFlight::new();
        let joined = sf.join(1);
        assert!(matches!(joined, Joined::Winner));

        let sf2 = sf.clone();
        let follower_task = tokio::spawn(async move {
            let joined = sf2.join(1);
            assert!(matches!(joined, Joined::Follower(_)));
            joined.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        sf.publish(1).await;
        tokio::time::timeout(Duration::from_secs(1), follower_task)
            .await
            .expect("follower should unblock promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn late_joiner_sees_published_result_within_linger() {
        let sf = SingleFlight::new();
        let _ = sf.join(5);
        sf.publish(5).await;
        // Still within PUBLISH_LINGER: a "late joiner" sees a follower slot
        // whose rendezvous is already published, so wait() returns at once.
        match sf.join(5) {
            Joined::Follower(r) => {
                tokio::time::timeout(Duration::from_millis(50), r.wait())
                    .await
                    .expect("already-published rendezvous resolves immediately")
            }
            Joined::Winner => panic!("expected a lingering follower slot"),
        }
    }
}
