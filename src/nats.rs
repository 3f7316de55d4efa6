// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS client abstraction for referral messaging

use async_nats::{Client, ConnectOptions, Subscriber};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{ReferralError, ReferralResult};
use crate::subjects::{ReferralSubjects, REFERRAL_ROOT};

/// Configuration for NATS connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Root of every referral subject
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "cim-referral".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            subject_prefix: REFERRAL_ROOT.to_string(),
        }
    }
}

impl NatsConfig {
    /// `NATS_URL` (comma separated), `NATS_CLIENT_NAME` and
    /// `REFERRAL_SUBJECT_PREFIX`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            servers: std::env::var("NATS_URL")
                .map(|urls| urls.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.servers),
            name: std::env::var("NATS_CLIENT_NAME").unwrap_or(defaults.name),
            subject_prefix: std::env::var("REFERRAL_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
            ..defaults
        }
    }

    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn subjects(&self) -> ReferralSubjects {
        ReferralSubjects::new(self.subject_prefix.clone())
    }
}

/// NATS client wrapper providing referral-specific operations
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    subjects: ReferralSubjects,
}

impl NatsClient {
    /// Connect with the given configuration
    pub async fn new(config: NatsConfig) -> ReferralResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| ReferralError::Notification(format!("connect: {}", e)))?;

        info!("Connected to NATS at {:?}", config.servers);

        Ok(Self {
            client,
            subjects: config.subjects(),
        })
    }

    pub fn subjects(&self) -> &ReferralSubjects {
        &self.subjects
    }

    /// Publish a JSON message to a subject
    pub async fn publish<T>(&self, subject: &str, message: &T) -> ReferralResult<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| ReferralError::Notification(format!("publish to {}: {}", subject, e)))?;

        debug!("Published message to subject: {}", subject);
        Ok(())
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> ReferralResult<Subscriber> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| ReferralError::Notification(format!("subscribe to {}: {}", subject, e)))?;

        info!("Subscribed to subject: {}", subject);
        Ok(subscriber)
    }

    /// Flush buffered publishes
    pub async fn flush(&self) -> ReferralResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| ReferralError::Notification(format!("flush: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_points_at_localhost() {
        let config = NatsConfig::default();
        assert_eq!(config.servers, vec!["nats://localhost:4222".to_string()]);
        assert_eq!(config.subjects().ingest_all(), "referral.*.events.ingest");
    }

    #[test]
    fn test_prefix_builder() {
        let config = NatsConfig::default().with_subject_prefix("acme.referral");
        assert_eq!(config.subjects().prefix(), "acme.referral");
    }
}
