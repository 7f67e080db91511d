#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-bus** – Post-commit subscriber fan-out for the BOS kernel (C8).
//!
//! After a batch of events is durably committed, the kernel hands them to
//! [`SubscriberBus::dispatch`]. Handlers are registered by `event_type`;
//! dispatch runs in a deterministic type-sorted order and isolates each
//! handler's failure from its peers and from the committed log — a
//! subscriber erroring never undoes a commit. Also exposes a live
//! broadcast stream (`subscribe_stream`) for out-of-process observers.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bos_types::Event;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure surfaced by a single subscriber handling a single event. Never
/// aborts the batch; callers collect these into a [`DispatchReport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subscriber '{subscriber}' failed on event {event_id}: {message}")]
pub struct SubscriberError {
    /// Name of the failing subscriber.
    pub subscriber: String,
    /// The event it failed on.
    pub event_id: uuid::Uuid,
    /// Failure description.
    pub message: String,
}

/// A post-commit event handler registered against one or more event types.
pub trait Subscriber: Send + Sync {
    /// Stable name used for deterministic ordering and error attribution.
    fn name(&self) -> &str;

    /// Handle one committed event.
    fn handle(&self, event: &Event) -> Result<(), String>;

    /// Event types this subscriber itself causes to be produced (by
    /// issuing further commands). Used to detect self-subscription.
    fn emits(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Whether this subscriber is explicitly whitelisted to receive
    /// notifications for event types it also emits.
    fn reentrant(&self) -> bool {
        false
    }
}

/// Registration-time failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// A subscriber tried to register for an event type it itself emits,
    /// without being explicitly whitelisted as reentrant.
    #[error("subscriber '{subscriber}' may not self-subscribe to '{event_type}' without being whitelisted")]
    SelfSubscriptionForbidden {
        /// Subscriber name.
        subscriber: String,
        /// Event type it tried to subscribe to.
        event_type: String,
    },
}

/// Per-event, per-subscriber outcome recorded for a single `dispatch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Event the subscriber was invoked for.
    pub event_id: uuid::Uuid,
    /// Subscriber invoked.
    pub subscriber: String,
    /// `Err` if the subscriber failed or panicked; never aborts the batch.
    pub result: Result<(), SubscriberError>,
}

/// The full set of outcomes from one `dispatch` call, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// One entry per (event, subscriber) pair actually invoked.
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    /// Subscriber failures only, in dispatch order.
    pub fn failures(&self) -> impl Iterator<Item = &SubscriberError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }
}

/// Deterministic, post-commit, type-sorted subscriber fan-out.
pub struct SubscriberBus {
    handlers: DashMap<String, Vec<Arc<dyn Subscriber>>>,
    broadcast_tx: broadcast::Sender<Event>,
}

impl Default for SubscriberBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SubscriberBus {
    /// Construct an empty bus with the given live-stream buffer capacity.
    pub fn new(stream_capacity: usize) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(stream_capacity);
        Self {
            handlers: DashMap::new(),
            broadcast_tx,
        }
    }

    /// Register `subscriber` against `event_type`.
    pub fn register(&self, event_type: impl Into<String>, subscriber: Arc<dyn Subscriber>) -> Result<(), BusError> {
        let event_type = event_type.into();
        if subscriber.emits().contains(&event_type) && !subscriber.reentrant() {
            return Err(BusError::SelfSubscriptionForbidden {
                subscriber: subscriber.name().to_string(),
                event_type,
            });
        }
        let mut entry = self.handlers.entry(event_type).or_default();
        entry.push(subscriber);
        entry.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(())
    }

    /// Dispatch a just-committed batch of events to every registered
    /// subscriber. Events are processed in `event_type`-sorted order
    /// (falling back to `event_id` to break ties); within one event,
    /// subscribers run in name-sorted order. Live-stream subscribers are
    /// notified for every event regardless of handler registration.
    ///
    /// Callers must not invoke this for events produced during replay
    /// (§4.10) — it is the kernel's responsibility to skip dispatch then.
    pub fn dispatch(&self, events: &[Event]) -> DispatchReport {
        let mut ordered: Vec<&Event> = events.iter().collect();
        ordered.sort_by(|a, b| (a.event_type.as_str(), a.event_id).cmp(&(b.event_type.as_str(), b.event_id)));

        let mut report = DispatchReport::default();
        for event in ordered {
            let _ = self.broadcast_tx.send(event.clone());
            let Some(subscribers) = self.handlers.get(&event.event_type) else {
                continue;
            };
            for subscriber in subscribers.iter() {
                let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handle(event)));
                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(message)) => Err(SubscriberError {
                        subscriber: subscriber.name().to_string(),
                        event_id: event.event_id,
                        message,
                    }),
                    Err(_) => Err(SubscriberError {
                        subscriber: subscriber.name().to_string(),
                        event_id: event.event_id,
                        message: "subscriber panicked".to_string(),
                    }),
                };
                if let Err(err) = &result {
                    tracing::warn!(subscriber = %err.subscriber, event_id = %err.event_id, message = %err.message, "subscriber failed");
                }
                report.outcomes.push(DispatchOutcome {
                    event_id: event.event_id,
                    subscriber: subscriber.name().to_string(),
                    result,
                });
            }
        }
        report
    }

    /// Subscribe to the live stream of every committed event, independent
    /// of type-based handler registration.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_types::{ActorType, BusinessId, EventStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn event(event_type: &str) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            event_version: 1,
            business_id: BusinessId::new(),
            branch_id: None,
            source_engine: "ledger".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({}),
            reference: None,
            created_at: chrono::Utc::now(),
            received_at: chrono::Utc::now(),
            status: EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored".into(),
        }
    }

    struct CountingSubscriber {
        name: String,
        count: Arc<AtomicUsize>,
    }

    impl Subscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }
        fn handle(&self, _event: &Event) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSubscriber;
    impl Subscriber for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }
        fn handle(&self, _event: &Event) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn dispatch_invokes_registered_handler() {
        let bus = SubscriberBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        bus.register(
            "ledger.entry.posted.v1",
            Arc::new(CountingSubscriber { name: "projector".into(), count: count.clone() }),
        )
        .unwrap();

        let report = bus.dispatch(&[event("ledger.entry.posted.v1")]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(report.failures().next().is_none());
    }

    #[test]
    fn one_failing_subscriber_does_not_block_others() {
        let bus = SubscriberBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        bus.register("ledger.entry.posted.v1", Arc::new(FailingSubscriber)).unwrap();
        bus.register(
            "ledger.entry.posted.v1",
            Arc::new(CountingSubscriber { name: "projector".into(), count: count.clone() }),
        )
        .unwrap();

        let report = bus.dispatch(&[event("ledger.entry.posted.v1")]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn self_subscription_is_rejected_unless_reentrant() {
        struct SelfEmitting;
        impl Subscriber for SelfEmitting {
            fn name(&self) -> &str {
                "self-emitting"
            }
            fn handle(&self, _event: &Event) -> Result<(), String> {
                Ok(())
            }
            fn emits(&self) -> HashSet<String> {
                ["ledger.entry.posted.v1".to_string()].into_iter().collect()
            }
        }

        let bus = SubscriberBus::new(16);
        let err = bus.register("ledger.entry.posted.v1", Arc::new(SelfEmitting)).unwrap_err();
        assert_eq!(
            err,
            BusError::SelfSubscriptionForbidden {
                subscriber: "self-emitting".into(),
                event_type: "ledger.entry.posted.v1".into(),
            }
        );
    }

    #[test]
    fn dispatch_order_is_sorted_by_event_type() {
        let bus = SubscriberBus::new(16);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct RecordingSubscriber {
            order: Arc<std::sync::Mutex<Vec<String>>>,
        }
        impl Subscriber for RecordingSubscriber {
            fn name(&self) -> &str {
                "recorder"
            }
            fn handle(&self, event: &Event) -> Result<(), String> {
                self.order.lock().unwrap().push(event.event_type.clone());
                Ok(())
            }
        }

        bus.register("b.type", Arc::new(RecordingSubscriber { order: order.clone() })).unwrap();
        bus.register("a.type", Arc::new(RecordingSubscriber { order: order.clone() })).unwrap();

        bus.dispatch(&[event("b.type"), event("a.type")]);
        assert_eq!(*order.lock().unwrap(), vec!["a.type".to_string(), "b.type".to_string()]);
    }
}
