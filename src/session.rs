//! Consumer Session
//!
//! One session per logical consumer loop. A session moves through
//! `Idle → Polling → Holding` as it receives, and back to `Idle` once every
//! lease it holds has been acknowledged, released or has lapsed.
//!
//! `receive` with a positive wait is the only call that suspends. The wait
//! ends on the first of: a message became claimable, the wait timeout
//! elapsed, or the caller's cancellation future resolved. Dropping the
//! returned future is cancellation too. Messages are only claimed in the
//! same poll that returns them, so an abandoned wait never strands a lease.

use crate::broker::Broker;
use crate::queue::{Lease, LeaseId, Message, MessageId, MessageStore, QueueError, QueueResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

/// How often a long poll re-checks for leases that lapsed without anyone
/// touching them
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on peek/claim rounds per check when other consumers keep winning
const CLAIM_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Polling,
    Holding,
}

/// A message handed to this session together with its lease
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub lease: Lease,
}

impl Delivery {
    pub fn lease_id(&self) -> LeaseId {
        self.lease.lease_id
    }
}

/// Lease currently held by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLease {
    pub queue: String,
    pub message_id: MessageId,
    pub lease_id: LeaseId,
    pub expires_at: Instant,
}

/// Resets the polling flag however the receive future ends
struct PollingGuard<'a>(&'a AtomicBool);

impl<'a> PollingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Client-facing receive/acknowledge/extend/release protocol
pub struct ConsumerSession {
    session_id: String,
    broker: Weak<Broker>,
    poll_interval: Duration,
    polling: AtomicBool,
    held: HashMap<LeaseId, HeldLease>,
}

impl ConsumerSession {
    pub fn new(session_id: impl Into<String>, broker: Weak<Broker>) -> Self {
        Self {
            session_id: session_id.into(),
            broker,
            poll_interval: DEFAULT_POLL_INTERVAL,
            polling: AtomicBool::new(false),
            held: HashMap::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        if self.polling.load(Ordering::Acquire) {
            SessionState::Polling
        } else if self.held().is_empty() {
            SessionState::Idle
        } else {
            SessionState::Holding
        }
    }

    /// Leases this session holds that have not lapsed
    pub fn held(&self) -> Vec<HeldLease> {
        let Some(broker) = self.broker.upgrade() else {
            return Vec::new();
        };
        let now = broker.clock().now();
        let mut held: Vec<_> = self
            .held
            .values()
            .filter(|lease| now < lease.expires_at)
            .cloned()
            .collect();
        held.sort_by_key(|lease| lease.expires_at);
        held
    }

    /// Receive up to `max_messages`, waiting up to `wait_timeout` for the
    /// first one
    ///
    /// An empty result after the wait is a normal outcome, not an error.
    pub async fn receive(
        &mut self,
        queue: &str,
        max_messages: usize,
        wait_timeout: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        self.receive_until(queue, max_messages, wait_timeout, std::future::pending())
            .await
    }

    /// Like [`receive`](Self::receive), but the wait also ends with an empty
    /// result as soon as `cancel` resolves
    pub async fn receive_until<C>(
        &mut self,
        queue: &str,
        max_messages: usize,
        wait_timeout: Duration,
        cancel: C,
    ) -> QueueResult<Vec<Delivery>>
    where
        C: Future<Output = ()>,
    {
        let store = self.store(queue)?;
        self.prune_lapsed();
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deliveries = {
            let _polling = PollingGuard::enter(&self.polling);
            let waiting = wait_for_deliveries(&store, max_messages, self.poll_interval, cancel);
            match tokio::time::timeout(wait_timeout, waiting).await {
                Ok(result) => result?,
                Err(_elapsed) => Vec::new(),
            }
        };

        for delivery in &deliveries {
            self.held.insert(
                delivery.lease.lease_id,
                HeldLease {
                    queue: queue.to_string(),
                    message_id: delivery.message.id,
                    lease_id: delivery.lease.lease_id,
                    expires_at: delivery.lease.expires_at,
                },
            );
        }

        log::debug!(
            "Session '{}': received {} messages from '{}'",
            self.session_id,
            deliveries.len(),
            queue
        );
        Ok(deliveries)
    }

    /// Delete a received message
    ///
    /// `LeaseExpired` means the message was already handled or redelivered;
    /// the caller must not process it again and must not retry.
    pub fn acknowledge(
        &mut self,
        queue: &str,
        message_id: MessageId,
        lease_id: LeaseId,
    ) -> QueueResult<()> {
        let result = self.store(queue)?.acknowledge(message_id, lease_id);
        self.forget_unless_live(lease_id, &result, true);
        result
    }

    /// Push the expiry of a held lease to `now + new_timeout`
    pub fn extend_visibility(
        &mut self,
        queue: &str,
        message_id: MessageId,
        lease_id: LeaseId,
        new_timeout: Duration,
    ) -> QueueResult<Lease> {
        let result = self
            .store(queue)?
            .extend_visibility(message_id, lease_id, new_timeout);

        match &result {
            Ok(lease) => {
                if let Some(held) = self.held.get_mut(&lease_id) {
                    held.expires_at = lease.expires_at;
                }
            }
            Err(_) => self.forget_unless_live(lease_id, &result, false),
        }
        result
    }

    /// Give a message back for immediate redelivery
    pub fn release(
        &mut self,
        queue: &str,
        message_id: MessageId,
        lease_id: LeaseId,
    ) -> QueueResult<()> {
        let result = self.store(queue)?.release(message_id, lease_id);
        self.forget_unless_live(lease_id, &result, true);
        result
    }

    fn store(&self, queue: &str) -> QueueResult<std::sync::Arc<MessageStore>> {
        self.broker
            .upgrade()
            .ok_or_else(|| QueueError::internal("broker no longer exists".to_string()))?
            .queue(queue)
    }

    /// Forget leases whose expiry has passed; the store redelivers those
    /// messages regardless of what this session does
    fn prune_lapsed(&mut self) {
        let Some(broker) = self.broker.upgrade() else {
            return;
        };
        let now = broker.clock().now();
        let before = self.held.len();
        self.held.retain(|_, lease| now < lease.expires_at);
        if self.held.len() < before {
            log::trace!(
                "Session '{}': dropped {} lapsed leases",
                self.session_id,
                before - self.held.len()
            );
        }
    }

    /// Drop a lease from the held set once the store no longer honors it
    fn forget_unless_live<T>(&mut self, lease_id: LeaseId, result: &QueueResult<T>, done: bool) {
        let forget = match result {
            Ok(_) => done,
            Err(QueueError::LeaseExpired { .. } | QueueError::NotFound { .. }) => true,
            Err(_) => false,
        };
        if forget {
            self.held.remove(&lease_id);
        }
    }
}

/// Claim up to `max_messages`, suspending until there is at least one
async fn wait_for_deliveries<C>(
    store: &MessageStore,
    max_messages: usize,
    poll_interval: Duration,
    cancel: C,
) -> QueueResult<Vec<Delivery>>
where
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    loop {
        // Register for wakeups before looking so an enqueue between the
        // check and the wait is not missed
        let notified = store.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let deliveries = claim_available(store, max_messages)?;
        if !deliveries.is_empty() {
            return Ok(deliveries);
        }

        tokio::select! {
            _ = &mut cancel => {
                log::debug!("Receive on '{}' cancelled", store.name());
                return Ok(Vec::new());
            }
            _ = &mut notified => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Peek then claim, skipping messages another consumer won first
fn claim_available(store: &MessageStore, max_messages: usize) -> QueueResult<Vec<Delivery>> {
    let mut deliveries = Vec::new();

    for _ in 0..CLAIM_ROUNDS {
        let wanted = max_messages - deliveries.len();
        let candidates = store.peek_available(wanted)?;
        if candidates.is_empty() {
            break;
        }

        for candidate in candidates {
            match store.claim(candidate.id) {
                Ok((message, lease)) => deliveries.push(Delivery { message, lease }),
                Err(
                    QueueError::AlreadyInFlight { .. }
                    | QueueError::NotFound { .. }
                    | QueueError::RedrivePending { .. },
                ) => {
                    log::trace!(
                        "Queue '{}': lost claim race for message {}",
                        store.name(),
                        candidate.id
                    );
                }
                Err(e) => {
                    release_claimed(store, &deliveries);
                    return Err(e);
                }
            }
        }

        if deliveries.len() >= max_messages {
            break;
        }
    }

    Ok(deliveries)
}

/// Hand back leases from a batch that is being abandoned
fn release_claimed(store: &MessageStore, deliveries: &[Delivery]) {
    for delivery in deliveries {
        if let Err(e) = store.release(delivery.message.id, delivery.lease.lease_id) {
            log::warn!(
                "Queue '{}': could not release message {} from abandoned batch: {}",
                store.name(),
                delivery.message.id,
                e
            );
        }
    }
}
