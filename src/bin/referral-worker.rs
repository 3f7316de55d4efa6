// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Worker
//!
//! Consumes referral events from NATS and runs them through the rule engine
//! and aggregate pipeline.
//!
//! ```text
//! referral.{program}.events.ingest ──→ ReferralService::publish
//!                                        ├─→ referral.{program}.commission.generated
//!                                        └─→ referral.{program}.circle.switched
//! ```
//!
//! # Environment
//!
//! - `NATS_URL`, `NATS_CLIENT_NAME`, `REFERRAL_SUBJECT_PREFIX`
//! - `REFERRAL_*` engine settings (see `EngineConfig::from_env`)
//! - `REFERRAL_SEED_PATH`: optional JSON file with `circles` and `rules`
//! - `REFERRAL_VERIFY_INTERVAL_SECS`: optional period for drift verification
//! - `RUST_LOG`: log filter, defaults to `info`

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cim_referral::{
    AggregateScope, Circle, EngineConfig, InMemoryReferralStore, NatsClient, NatsConfig,
    NatsNotifier, PublishOutcome, ReferralEvent, ReferralService, Rule,
};

/// Circles and rules loaded at startup
#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    circles: Vec<Circle>,
    #[serde(default)]
    rules: Vec<Rule>,
}

async fn load_seed(store: &InMemoryReferralStore, path: &str) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path))?;
    let seed: Seed = serde_json::from_str(&raw).context("Failed to parse seed file")?;

    for circle in seed.circles.iter().filter(|c| c.is_default) {
        store.put_circle(circle.clone()).await?;
    }
    for circle in seed.circles.iter().filter(|c| !c.is_default) {
        store.put_circle(circle.clone()).await?;
    }
    for rule in seed.rules {
        store.put_rule(rule).await?;
    }
    info!(circles = seed.circles.len(), "seed loaded");
    Ok(())
}

async fn handle_message(service: Arc<ReferralService>, program_hint: Option<cim_referral::ProgramId>, payload: &[u8]) {
    let event: ReferralEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "dropping undecodable referral event");
            return;
        }
    };
    if program_hint.is_some_and(|program| program != event.program_id) {
        warn!(event_id = %event.event_id, "event program does not match its subject, dropping");
        return;
    }

    let event_id = event.event_id;
    match service.publish(event).await {
        Ok(PublishOutcome::Committed(report)) => info!(
            %event_id,
            commissions = report.commissions.len(),
            switches = report.transitions.len(),
            failures = report.failures.len(),
            "event processed"
        ),
        Ok(PublishOutcome::Duplicate(_)) => info!(%event_id, "duplicate event ignored"),
        Err(e) => error!(%event_id, error = %e, kind = e.kind(), "event rejected"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting referral worker");

    let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let nats_config = NatsConfig::from_env();
    info!(
        servers = ?nats_config.servers,
        prefix = %nats_config.subject_prefix,
        max_cascade_depth = engine_config.max_cascade_depth,
        "configuration loaded"
    );

    let store = Arc::new(InMemoryReferralStore::new());
    if let Ok(path) = std::env::var("REFERRAL_SEED_PATH") {
        load_seed(&store, &path).await?;
    }

    let client = NatsClient::new(nats_config)
        .await
        .context("Failed to connect to NATS")?;
    let service = Arc::new(
        ReferralService::new(store, engine_config)
            .with_notifier(Arc::new(NatsNotifier::new(client.clone()))),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    if let Some(secs) = std::env::var("REFERRAL_VERIFY_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
    {
        let service = Arc::clone(&service);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match service.verify(AggregateScope::All).await {
                        Ok(report) if report.is_clean() => {}
                        Ok(report) => warn!(drifted = report.drifted.len(), "drift repaired"),
                        Err(e) => error!(error = %e, "verification failed"),
                    },
                }
            }
        });
    }

    let subjects = client.subjects().clone();
    let subject = subjects.ingest_all();
    let mut subscriber = client.subscribe(&subject).await?;
    info!(%subject, "listening for referral events");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscriber.next() => {
                let Some(message) = message else {
                    warn!("subscription closed");
                    break;
                };
                let service = Arc::clone(&service);
                let program_hint = subjects.program_of(message.subject.as_str());
                tokio::spawn(async move {
                    handle_message(service, program_hint, &message.payload).await;
                });
            }
        }
    }

    client.flush().await?;
    info!("referral worker stopped");
    Ok(())
}
