// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral rule engine and aggregate pipeline
//!
//! Reacts to referral events (signups, purchases) by evaluating
//! promoter-defined rules and applying their effects (commissions, circle
//! switches), while keeping per-promoter, per-link and per-day rollups
//! consistent with the append-only event log.
//!
//! ```text
//! publish(event) → EventDispatcher ─┬→ AggregateMaintainer  (rollup delta)
//!                                   └→ RuleEngine → matcher → effects
//!                                                      ↓
//!                                      COMMISSION_GENERATED (re-dispatched)
//!                → ReferralStore::commit                (one atomic step)
//!                → Notifier                             (after commit)
//! ```

pub mod aggregate;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod effects;
pub mod engine;
pub mod errors;
pub mod events;
pub mod locks;
pub mod matcher;
pub mod nats;
pub mod notify;
pub mod service;
pub mod store;
pub mod subjects;

// Re-export commonly used types
pub use aggregate::{
    AggregateBook, AggregateMaintainer, AggregateRows, AggregateScope, DriftReport, LinkTotals,
    PromoterTotals, RebuildHandle, RebuildReport, AGGREGATES_HANDLER,
};
pub use config::EngineConfig;
pub use dispatcher::{DispatchReport, EventDispatcher, EventHandler};
pub use domain::{
    Circle, CircleId, CommissionSpec, Commission, Condition, ContactId, Effect, EventId,
    FailedEffect, FailureId, FailureOrigin, LinkId, Money, Operator, Parameter, Percentage, ProgramId, PromoterId,
    Rule, RuleId,
};
pub use engine::{RuleEngine, RULES_HANDLER};
pub use errors::{ReferralError, ReferralResult};
pub use events::{EventType, ReferralEvent};
pub use nats::{NatsClient, NatsConfig};
pub use notify::{NatsNotifier, Notification, Notifier, NullNotifier, RecordingNotifier};
pub use service::{PublishOutcome, PublishReport, ReferralService, RetryOutcome, SwitchOutcome};
pub use store::{InMemoryReferralStore, ReferralStore, UnitOfWork};
