//! Message Store
//!
//! Each queue keeps its messages in an arena of slots indexed by id, with a
//! sequence-ordered index for insertion-order delivery. Every slot carries its
//! own mutex so state transitions on one message never contend with unrelated
//! messages; the arena lock is only held long enough to insert, remove or
//! snapshot slot handles.
//!
//! Lock order is slot, then arena or settings. Code holding the arena lock
//! never takes a slot lock.

use crate::core::sync::{handle_mutex_poison, handle_rwlock_read, handle_rwlock_write, recover_read};
use crate::core::time::SharedClock;
use crate::notifications::{BrokerEvent, NotificationManager};
use crate::queue::config::{validate_visibility_timeout, QueueConfig};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::{Message, MessageId};
use crate::queue::visibility::{DeliveryState, Lease, LeaseId, Settlement, VisibilityTracker};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug)]
struct Slot {
    message: Message,
    state: DeliveryState,
}

type SlotRef = Arc<Mutex<Slot>>;

#[derive(Debug, Default)]
struct Arena {
    by_id: HashMap<MessageId, (u64, SlotRef)>,
    order: BTreeMap<u64, SlotRef>,
}

impl Arena {
    fn remove(&mut self, message_id: &MessageId) -> Option<SlotRef> {
        let (sequence, slot) = self.by_id.remove(message_id)?;
        self.order.remove(&sequence);
        Some(slot)
    }
}

#[derive(Debug, Clone)]
struct Settings {
    config: QueueConfig,
    tracker: VisibilityTracker,
    dead_letter: Option<Weak<MessageStore>>,
}

/// Point-in-time message counts for a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Deliverable now; excludes messages waiting on a redrive
    pub available: usize,
    pub in_flight: usize,
    pub total: usize,
}

/// Durable holding area for one queue's messages
pub struct MessageStore {
    name: String,
    settings: RwLock<Settings>,
    arena: RwLock<Arena>,
    next_sequence: AtomicU64,
    clock: SharedClock,
    available: Notify,
    events: Option<Arc<NotificationManager>>,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("name", &self.name)
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> QueueResult<MutexGuard<'_, Slot>> {
    handle_mutex_poison(slot.lock(), QueueError::internal)
}

/// Available and still within its delivery budget
fn is_deliverable(slot: &Slot, settings: &Settings) -> bool {
    slot.state.is_available() && !settings.tracker.is_exhausted(&slot.message)
}

impl MessageStore {
    /// Create an empty store after validating `config`
    pub fn new(name: impl Into<String>, config: QueueConfig, clock: SharedClock) -> QueueResult<Self> {
        config.validate()?;
        let tracker = VisibilityTracker::new(config.max_receive_count);

        Ok(Self {
            name: name.into(),
            settings: RwLock::new(Settings {
                config,
                tracker,
                dead_letter: None,
            }),
            arena: RwLock::new(Arena::default()),
            next_sequence: AtomicU64::new(1),
            clock,
            available: Notify::new(),
            events: None,
        })
    }

    /// Publish lease expiry and redrive events to `events`
    pub fn with_events(mut self, events: Arc<NotificationManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> QueueResult<QueueConfig> {
        Ok(self.settings()?.config)
    }

    /// Replace the queue configuration and its dead-letter wiring
    ///
    /// In-flight leases keep the expiry they were granted with.
    pub fn reconfigure(
        &self,
        config: QueueConfig,
        dead_letter: Option<&Arc<MessageStore>>,
    ) -> QueueResult<()> {
        config.validate()?;
        let mut settings = handle_rwlock_write(self.settings.write(), QueueError::internal)?;
        settings.tracker = VisibilityTracker::new(config.max_receive_count);
        settings.config = config;
        settings.dead_letter = dead_letter.map(Arc::downgrade);
        Ok(())
    }

    /// Wire the dead-letter queue named by the current configuration
    pub fn set_dead_letter(&self, dead_letter: Option<&Arc<MessageStore>>) -> QueueResult<()> {
        let mut settings = handle_rwlock_write(self.settings.write(), QueueError::internal)?;
        settings.dead_letter = dead_letter.map(Arc::downgrade);
        Ok(())
    }

    /// Store a new message with `body`
    pub fn enqueue(&self, body: Vec<u8>) -> QueueResult<Message> {
        self.insert(Message::at(body, None, self.clock.system_time()))
    }

    /// Store a fanout copy of a message published through `topic`
    pub fn enqueue_from_topic(&self, body: Vec<u8>, topic: &str) -> QueueResult<Message> {
        self.insert(Message::at(
            body,
            Some(topic.to_string()),
            self.clock.system_time(),
        ))
    }

    fn insert(&self, message: Message) -> QueueResult<Message> {
        let max_depth = self.settings()?.config.max_depth;
        let slot = Arc::new(Mutex::new(Slot {
            message: message.clone(),
            state: DeliveryState::Available,
        }));

        {
            let mut arena = handle_rwlock_write(self.arena.write(), QueueError::internal)?;
            if let Some(max_depth) = max_depth {
                if arena.by_id.len() >= max_depth {
                    return Err(QueueError::CapacityExceeded {
                        queue: self.name.clone(),
                        max_depth,
                    });
                }
            }
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            arena.by_id.insert(message.id, (sequence, Arc::clone(&slot)));
            arena.order.insert(sequence, slot);
        }

        log::trace!("Queue '{}': enqueued message {}", self.name, message.id);
        self.available.notify_waiters();
        Ok(message)
    }

    /// Up to `limit` currently available messages, oldest first
    ///
    /// Expired leases encountered along the way are settled first, so a
    /// lapsed message is returned here as available again. Messages past
    /// their delivery budget are never returned, even while their redrive
    /// cannot complete.
    pub fn peek_available(&self, limit: usize) -> QueueResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let settings = self.settings()?;
        let mut available = Vec::new();

        for slot in self.snapshot()? {
            let mut slot = lock_slot(&slot)?;
            self.settle_locked(&mut slot, now, &settings)?;
            if is_deliverable(&slot, &settings) {
                available.push(slot.message.clone());
                if available.len() >= limit {
                    break;
                }
            }
        }

        Ok(available)
    }

    /// Transition an available message to in-flight under a lease of `timeout`
    pub fn mark_in_flight(&self, message_id: MessageId, timeout: Duration) -> QueueResult<Lease> {
        validate_visibility_timeout(timeout)?;
        self.grant(message_id, Some(timeout)).map(|(_, lease)| lease)
    }

    /// Lease a message for the queue's visibility timeout, returning the
    /// message as delivered
    pub fn claim(&self, message_id: MessageId) -> QueueResult<(Message, Lease)> {
        self.grant(message_id, None)
    }

    fn grant(
        &self,
        message_id: MessageId,
        timeout: Option<Duration>,
    ) -> QueueResult<(Message, Lease)> {
        let slot = self.slot(&message_id)?;
        let mut slot = lock_slot(&slot)?;
        let now = self.clock.now();
        let settings = self.settings()?;

        self.settle_locked(&mut slot, now, &settings)?;
        if slot.state.is_available() && !is_deliverable(&slot, &settings) {
            return Err(QueueError::RedrivePending {
                message_id: message_id.to_string(),
            });
        }
        let timeout = timeout.unwrap_or(settings.config.visibility_timeout);
        let lease = settings
            .tracker
            .grant(&mut slot.state, message_id, now, timeout)?;

        log::trace!(
            "Queue '{}': message {} leased as {} for {:?}",
            self.name,
            message_id,
            lease.lease_id,
            timeout
        );
        Ok((slot.message.clone(), lease))
    }

    /// Delete a message held under `lease_id`
    pub fn acknowledge(&self, message_id: MessageId, lease_id: LeaseId) -> QueueResult<()> {
        let slot = self.slot(&message_id)?;
        let mut slot = lock_slot(&slot)?;
        let now = self.clock.now();
        let settings = self.settings()?;

        self.settle_locked(&mut slot, now, &settings)?;
        settings
            .tracker
            .authorize(&mut slot.state, message_id, lease_id, now)?;

        slot.state = DeliveryState::Deleted;
        self.remove(&message_id)?;
        log::trace!("Queue '{}': acknowledged message {}", self.name, message_id);
        Ok(())
    }

    /// Return a leased message to available immediately
    ///
    /// The attempt counts toward `max_receive_count` just like an expiry.
    pub fn release(&self, message_id: MessageId, lease_id: LeaseId) -> QueueResult<()> {
        let slot = self.slot(&message_id)?;
        let mut slot = lock_slot(&slot)?;
        let now = self.clock.now();
        let settings = self.settings()?;

        self.settle_locked(&mut slot, now, &settings)?;
        settings
            .tracker
            .authorize(&mut slot.state, message_id, lease_id, now)?;

        let slot = &mut *slot;
        settings
            .tracker
            .return_to_available(&mut slot.state, &mut slot.message);
        log::debug!(
            "Queue '{}': message {} released (receive count {})",
            self.name,
            message_id,
            slot.message.receive_count
        );
        self.redrive_if_exhausted(slot, &settings)?;
        self.available.notify_waiters();
        Ok(())
    }

    /// Move the expiry of an active lease to `now + new_timeout`
    pub fn extend_visibility(
        &self,
        message_id: MessageId,
        lease_id: LeaseId,
        new_timeout: Duration,
    ) -> QueueResult<Lease> {
        validate_visibility_timeout(new_timeout)?;
        let slot = self.slot(&message_id)?;
        let mut slot = lock_slot(&slot)?;
        let now = self.clock.now();
        let settings = self.settings()?;

        self.settle_locked(&mut slot, now, &settings)?;
        let lease = settings
            .tracker
            .authorize(&mut slot.state, message_id, lease_id, now)?;
        lease.expires_at = now + new_timeout;

        log::trace!(
            "Queue '{}': lease {} extended by {:?}",
            self.name,
            lease_id,
            new_timeout
        );
        Ok(lease.clone())
    }

    /// Counts by delivery state, settling expired leases first
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let now = self.clock.now();
        let settings = self.settings()?;
        let mut stats = QueueStats::default();

        for slot in self.snapshot()? {
            let mut slot = lock_slot(&slot)?;
            self.settle_locked(&mut slot, now, &settings)?;
            match slot.state {
                DeliveryState::Available if is_deliverable(&slot, &settings) => {
                    stats.available += 1
                }
                DeliveryState::Available => {}
                DeliveryState::InFlight(_) => stats.in_flight += 1,
                DeliveryState::Deleted => continue,
            }
            stats.total += 1;
        }

        Ok(stats)
    }

    /// Number of stored messages in any state
    pub fn len(&self) -> usize {
        recover_read(self.arena.read()).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every message regardless of state; outstanding leases go stale
    pub fn purge(&self) -> QueueResult<usize> {
        let drained = {
            let mut arena = handle_rwlock_write(self.arena.write(), QueueError::internal)?;
            arena.by_id.clear();
            std::mem::take(&mut arena.order)
        };

        let removed = drained.len();
        for slot in drained.into_values() {
            lock_slot(&slot)?.state = DeliveryState::Deleted;
        }

        log::info!("Queue '{}': purged {} messages", self.name, removed);
        Ok(removed)
    }

    /// Future resolving on the next enqueue, release or observed expiry
    ///
    /// Only futures that are already enabled (or being polled) when the
    /// event happens are woken, so long-poll callers should enable it before
    /// checking for messages.
    pub fn notified(&self) -> Notified<'_> {
        self.available.notified()
    }

    fn settings(&self) -> QueueResult<Settings> {
        Ok(handle_rwlock_read(self.settings.read(), QueueError::internal)?.clone())
    }

    fn slot(&self, message_id: &MessageId) -> QueueResult<SlotRef> {
        let arena = handle_rwlock_read(self.arena.read(), QueueError::internal)?;
        arena
            .by_id
            .get(message_id)
            .map(|(_, slot)| Arc::clone(slot))
            .ok_or_else(|| QueueError::NotFound {
                message_id: message_id.to_string(),
            })
    }

    fn snapshot(&self) -> QueueResult<Vec<SlotRef>> {
        let arena = handle_rwlock_read(self.arena.read(), QueueError::internal)?;
        Ok(arena.order.values().cloned().collect())
    }

    fn remove(&self, message_id: &MessageId) -> QueueResult<()> {
        let mut arena = handle_rwlock_write(self.arena.write(), QueueError::internal)?;
        arena.remove(message_id);
        Ok(())
    }

    fn emit(&self, event: BrokerEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Apply lazy lease expiry to a locked slot, then any redrive it made due
    fn settle_locked(&self, slot: &mut Slot, now: Instant, settings: &Settings) -> QueueResult<()> {
        let settlement = settings
            .tracker
            .settle(&mut slot.state, &mut slot.message, now);

        if settlement != Settlement::Current {
            log::debug!(
                "Queue '{}': lease on message {} expired (receive count {})",
                self.name,
                slot.message.id,
                slot.message.receive_count
            );
            self.emit(BrokerEvent::LeaseExpired {
                queue: self.name.clone(),
                message_id: slot.message.id.to_string(),
                receive_count: slot.message.receive_count,
            });
            self.available.notify_waiters();
        }

        self.redrive_if_exhausted(slot, settings)?;
        Ok(())
    }

    /// Move an available message past its delivery budget to the
    /// dead-letter queue
    ///
    /// When the target is gone or refuses the copy the message stays here,
    /// withheld from delivery, and redrive is attempted again on the next
    /// access.
    fn redrive_if_exhausted(&self, slot: &mut Slot, settings: &Settings) -> QueueResult<bool> {
        if !slot.state.is_available() || !settings.tracker.is_exhausted(&slot.message) {
            return Ok(false);
        }

        let target_name = settings.config.redrive_target.as_deref().unwrap_or("");
        let Some(target) = settings.dead_letter.as_ref().and_then(Weak::upgrade) else {
            log::warn!(
                "Queue '{}': dead-letter queue '{}' is unavailable, message {} is withheld",
                self.name,
                target_name,
                slot.message.id
            );
            return Ok(false);
        };

        let copy = slot.message.redriven(self.clock.system_time());
        let redriven_id = copy.id;
        if let Err(e) = target.insert(copy) {
            log::warn!(
                "Queue '{}': redrive of message {} to '{}' failed: {}",
                self.name,
                slot.message.id,
                target.name(),
                e
            );
            return Ok(false);
        }

        slot.state = DeliveryState::Deleted;
        self.remove(&slot.message.id)?;

        log::info!(
            "Queue '{}': message {} moved to dead-letter queue '{}' as {} after {} receives",
            self.name,
            slot.message.id,
            target.name(),
            redriven_id,
            slot.message.receive_count
        );
        self.emit(BrokerEvent::DeadLettered {
            from: self.name.clone(),
            to: target.name().to_string(),
            message_id: slot.message.id.to_string(),
            redriven_id: redriven_id.to_string(),
        });
        Ok(true)
    }
}
