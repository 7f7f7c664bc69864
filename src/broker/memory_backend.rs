//! In-process broker transport.
//!
//! Queues live in memory, so delivery only spans the current process. Used
//! for single-replica deployments and tests; outages can be simulated with
//! [`MemoryBroker::set_available`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::notification::ChannelName;

use super::transport::{BrokerError, BrokerSubscription, BrokerTransport, PoppedMessage};

struct Shared {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    available: AtomicBool,
    /// Bumped whenever the broker goes down so open subscriptions notice
    generation: AtomicU64,
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::Unreachable("memory broker is unavailable".to_string()))
        }
    }
}

/// In-memory broker
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the broker going down (or coming back).
    ///
    /// Going down drops every open subscription; queued messages are kept.
    pub fn set_available(&self, available: bool) {
        let was = self.shared.available.swap(available, Ordering::AcqRel);
        if was && !available {
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            self.shared.notify.notify_waiters();
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Number of messages waiting on a channel
    pub fn len(&self, channel: &ChannelName) -> usize {
        self.shared
            .queues()
            .get(channel.as_str())
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: &ChannelName) -> bool {
        self.len(channel) == 0
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, channel: &ChannelName, payload: &str) -> Result<(), BrokerError> {
        self.shared.ensure_available()?;
        // RPUSH + BLPOP: FIFO per channel
        self.shared
            .queues()
            .entry(channel.as_str().to_string())
            .or_default()
            .push_back(payload.to_string());
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        self.shared.ensure_available()?;
        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            generation: self.shared.generation.load(Ordering::Acquire),
        }))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    generation: u64,
}

impl MemorySubscription {
    fn check_connected(&self) -> Result<(), BrokerError> {
        self.shared.ensure_available()?;
        if self.shared.generation.load(Ordering::Acquire) != self.generation {
            return Err(BrokerError::Unreachable("connection to memory broker lost".to_string()));
        }
        Ok(())
    }

    fn try_pop(&self, channel: &ChannelName) -> Option<PoppedMessage> {
        let mut queues = self.shared.queues();
        let queue = queues.get_mut(channel.as_str())?;
        let payload = queue.pop_front()?;
        if queue.is_empty() {
            queues.remove(channel.as_str());
        }
        Some(PoppedMessage::new(channel.as_str(), payload))
    }
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn pop(
        &mut self,
        channel: &ChannelName,
        timeout: Duration,
    ) -> Result<Option<PoppedMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the queue so a concurrent push is not missed
            notified.as_mut().enable();

            self.check_connected()?;
            if let Some(message) = self.try_pop(channel) {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
