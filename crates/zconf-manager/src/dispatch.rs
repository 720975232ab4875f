//! Normalized event model and routing.
//!
//! Raw backend callbacks are translated into [`DiscoveryEvent`]s and routed
//! to the subscriber whose key matches the event's derived service type.
//! The subscription map is the sole source of truth for liveness: a late
//! callback for a key that is gone simply finds no destination and is
//! dropped here.

use async_channel::Sender;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use zconf_core::record::ServiceRecord;

use crate::backend::BrowseHandle;

/// What happened to a watched service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    /// The service exists on the network; the record may be unresolved
    Added,

    /// The service disappeared
    Removed,

    /// The service is resolved and ready to use
    Resolved,
}

/// Event delivered to a watch subscriber
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEvent {
    /// What happened
    pub action: EventAction,

    /// The service the event is about
    pub service: ServiceRecord,

    /// When the event was dispatched
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryEvent {
    pub fn new(action: EventAction, service: ServiceRecord) -> Self {
        Self {
            action,
            service,
            timestamp: Utc::now(),
        }
    }
}

/// One active watch: the subscriber's channel and the backend browse
/// session it drains.
pub(crate) struct Subscription {
    pub sender: Sender<DiscoveryEvent>,
    pub browse: BrowseHandle,
}

/// Routes normalized events to subscribers by derived service-type key
#[derive(Clone)]
pub(crate) struct EventDispatcher {
    subscriptions: Arc<DashMap<String, Subscription>>,
}

impl EventDispatcher {
    pub fn new(subscriptions: Arc<DashMap<String, Subscription>>) -> Self {
        Self { subscriptions }
    }

    /// Delivers one event. A missing subscription is a defensive no-op: the
    /// browse session for an unwatched type should not exist, so anything
    /// arriving here without a match is late or misrouted and gets dropped.
    pub async fn dispatch(&self, action: EventAction, service: ServiceRecord) {
        let key = service.derived_subscription_key();
        let sender = match self.subscriptions.get(&key) {
            Some(subscription) => subscription.sender.clone(),
            None => {
                debug!(key, ?action, "no subscription for event, dropping");
                return;
            }
        };

        if sender.send(DiscoveryEvent::new(action, service)).await.is_err() {
            debug!(key, ?action, "subscriber channel closed, dropping event");
        }
    }
}
