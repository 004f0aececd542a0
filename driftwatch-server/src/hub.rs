// Copyright 2025 Driftwatch Contributors (https://github.com/driftwatch/driftwatch)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fan-out hub: the registry of subscriber outbound queues.
//!
//! Subscribers are keyed by a freshly allocated monotonic id, never by
//! connection identity. Each queue is bounded and broadcast uses a
//! non-blocking offer, so a subscriber that stops draining loses stats
//! instead of stalling publishers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use driftwatch_core::Stat;

/// Bound on each subscriber's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Stable identity of one registered subscriber.
pub type SubscriberId = u64;

/// Registry of active subscriber queues.
#[derive(Debug)]
pub struct Hub {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Stat>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            queue_capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber queue.
    ///
    /// The returned subscription is the receiving end; dropping it removes
    /// the registry entry, so cleanup happens on every session exit path.
    pub fn register(self: Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.subscribers.write().insert(id, sender);
        Subscription {
            id,
            receiver,
            hub: self,
        }
    }

    fn unregister(&self, id: SubscriberId) {
        self.subscribers.write().remove(&id);
    }

    /// Enqueue an anomalous stat onto every live subscriber queue.
    ///
    /// Never blocks: a full queue drops the stat for that subscriber only.
    pub fn broadcast(&self, stat: &Stat) {
        let subscribers = self.subscribers.read();
        for (id, queue) in subscribers.iter() {
            match queue.try_send(stat.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("subscriber {id} queue full, dropping {}", stat.name);
                }
                // subscription mid-teardown, the entry goes away with it
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total stats dropped because a subscriber queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's end of its queue; unregisters from the hub on drop.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Stat>,
    hub: Arc<Hub>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next broadcast stat.
    pub async fn recv(&mut self) -> Option<Stat> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomalous(name: &str, value: f64) -> Stat {
        let mut stat = Stat::new(name, 1000, value);
        stat.anoma = 2.0;
        stat
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let hub = Arc::new(Hub::new());
        let mut first = Arc::clone(&hub).register();
        let mut second = Arc::clone(&hub).register();
        assert_ne!(first.id(), second.id());

        hub.broadcast(&anomalous("app.cpu", 50.0));

        assert_eq!(first.recv().await.unwrap().name, "app.cpu");
        assert_eq!(second.recv().await.unwrap().name, "app.cpu");
    }

    #[tokio::test]
    async fn test_per_subscriber_order_is_insertion_order() {
        let hub = Arc::new(Hub::new());
        let mut sub = Arc::clone(&hub).register();

        for value in [1.0, 2.0, 3.0] {
            hub.broadcast(&anomalous("m", value));
        }
        for expected in [1.0, 2.0, 3.0] {
            assert_eq!(sub.recv().await.unwrap().value, expected);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let hub = Arc::new(Hub::with_queue_capacity(2));
        let mut sub = Arc::clone(&hub).register();

        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            hub.broadcast(&anomalous("m", value));
        }
        assert_eq!(hub.dropped_count(), 3);

        // the two that fit are delivered in order
        assert_eq!(sub.recv().await.unwrap().value, 1.0);
        assert_eq!(sub.recv().await.unwrap().value, 2.0);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = Arc::new(Hub::new());
        let sub = Arc::clone(&hub).register();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);

        // broadcasting into an empty registry is a no-op
        hub.broadcast(&anomalous("m", 1.0));
        assert_eq!(hub.dropped_count(), 0);
    }
}
