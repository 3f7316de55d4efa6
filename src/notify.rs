// Copyright (c) 2025 - Cowboy AI, Inc.
//! Notification Forwarding
//!
//! Commission and circle-switch facts are forwarded to an external notifier
//! after their unit of work has committed. Delivery runs on its own task and
//! never feeds back into the commit: a failed delivery is logged and dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{CircleTransition, Commission, EventId, ProgramId};
use crate::errors::ReferralResult;
use crate::nats::NatsClient;
use crate::subjects::Topic;

/// Message handed to a [`Notifier`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CommissionGenerated {
        commission: Commission,
        /// The `COMMISSION_GENERATED` event
        event_id: EventId,
        correlation_id: Uuid,
    },
    CircleSwitched {
        transition: CircleTransition,
    },
}

impl Notification {
    pub fn program_id(&self) -> ProgramId {
        match self {
            Notification::CommissionGenerated { commission, .. } => commission.program_id,
            Notification::CircleSwitched { transition } => transition.program_id,
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Notification::CommissionGenerated { .. } => Topic::CommissionGenerated,
            Notification::CircleSwitched { .. } => Topic::CircleSwitched,
        }
    }
}

/// External delivery channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> ReferralResult<()>;
}

/// Drop every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _notification: &Notification) -> ReferralResult<()> {
        Ok(())
    }
}

/// Keep notifications in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> ReferralResult<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Publish notifications as JSON on `{prefix}.{program}.{topic}`
#[derive(Clone)]
pub struct NatsNotifier {
    client: NatsClient,
}

impl NatsNotifier {
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, notification: &Notification) -> ReferralResult<()> {
        let subject = self
            .client
            .subjects()
            .subject(notification.program_id(), notification.topic());
        self.client.publish(&subject, notification).await
    }
}

/// Deliver on a background task; failures are logged only
pub fn spawn_delivery(notifier: Arc<dyn Notifier>, notifications: Vec<Notification>) {
    if notifications.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for notification in &notifications {
            match notifier.notify(notification).await {
                Ok(()) => debug!(topic = %notification.topic(), "notification delivered"),
                Err(err) => warn!(topic = %notification.topic(), error = %err, "notification delivery failed"),
            }
        }
    });
}
