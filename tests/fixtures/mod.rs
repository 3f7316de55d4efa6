// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-referral
//!
//! Deterministic ids, timestamps, events and rules shared by the integration
//! tests. Event ids are derived from a sequence number so a test can refer to
//! "event 3" without keeping handles around.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use cim_referral::{
    Circle, CommissionSpec, Condition, ContactId, Effect, EngineConfig, EventId, EventType,
    InMemoryReferralStore, LinkId, Money, Operator, Parameter, Percentage, ProgramId, PromoterId,
    ReferralEvent, ReferralService, Rule,
};

pub const PROGRAM_ID: &str = "01934f4a-3000-7000-8000-000000003000";
pub const PROMOTER_ID: &str = "01934f4a-4000-7000-8000-000000004000";
pub const OTHER_PROMOTER_ID: &str = "01934f4a-4001-7000-8000-000000004001";
pub const LINK_ID: &str = "01934f4a-5000-7000-8000-000000005000";
pub const OTHER_LINK_ID: &str = "01934f4a-5001-7000-8000-000000005001";
pub const CONTACT_ID: &str = "01934f4a-6000-7000-8000-000000006000";

// Fixed test timestamp (2026-01-19T12:00:00Z)
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

/// Parse a fixed UUID from a constant string
pub fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("Invalid UUID in test fixture")
}

/// Parse the fixed timestamp
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

/// Fixed timestamp shifted by whole days
pub fn day(offset: i64) -> DateTime<Utc> {
    fixed_timestamp() + Duration::days(offset)
}

pub fn program() -> ProgramId {
    ProgramId::from_uuid(parse_uuid(PROGRAM_ID))
}

pub fn promoter() -> PromoterId {
    PromoterId::from_uuid(parse_uuid(PROMOTER_ID))
}

pub fn other_promoter() -> PromoterId {
    PromoterId::from_uuid(parse_uuid(OTHER_PROMOTER_ID))
}

pub fn link() -> LinkId {
    LinkId::from_uuid(parse_uuid(LINK_ID))
}

pub fn other_link() -> LinkId {
    LinkId::from_uuid(parse_uuid(OTHER_LINK_ID))
}

pub fn contact() -> ContactId {
    ContactId::from_uuid(parse_uuid(CONTACT_ID))
}

/// Deterministic event id number `n`
pub fn event_id(n: u64) -> EventId {
    EventId::from_uuid(Uuid::from_u128(
        0x01934f4a_0000_7000_8000_000000000000_u128 | u128::from(n),
    ))
}

/// Signup number `n` for the fixture promoter and link
pub fn signup(n: u64) -> ReferralEvent {
    ReferralEvent::signup(program(), promoter(), contact(), link(), fixed_timestamp())
        .with_event_id(event_id(n))
}

/// Purchase number `n` with a decimal revenue
pub fn purchase(n: u64, revenue: &str) -> ReferralEvent {
    ReferralEvent::purchase(
        program(),
        promoter(),
        contact(),
        link(),
        Some(revenue.parse().expect("Invalid revenue in test fixture")),
        fixed_timestamp(),
    )
    .with_event_id(event_id(n))
}

pub fn fixed(amount: i64) -> Effect {
    Effect::GenerateCommission {
        commission: CommissionSpec::Fixed {
            value: Money::from_whole(amount),
        },
    }
}

pub fn percentage(percent: i64) -> Effect {
    Effect::GenerateCommission {
        commission: CommissionSpec::Percentage {
            value: Percentage::from_percent(Money::from_whole(percent)),
        },
    }
}

pub fn switch_to(circle: &Circle) -> Effect {
    Effect::SwitchCircle {
        target_circle_id: circle.circle_id,
    }
}

/// `{NUM_OF_SIGNUPS >= threshold → FIXED amount}`
pub fn signup_threshold_rule(threshold: u64, amount: i64) -> Rule {
    Rule::new(
        program(),
        format!("{} signups", threshold),
        EventType::Signup,
        vec![Condition::new(
            Parameter::NumOfSignups,
            Operator::GreaterThanOrEqualTo,
            threshold.to_string(),
        )],
        fixed(amount),
    )
    .expect("Invalid rule in test fixture")
}

/// `{REVENUE >= threshold → PERCENTAGE percent}`
pub fn revenue_rule(threshold: i64, percent: i64) -> Rule {
    Rule::new(
        program(),
        format!("revenue over {}", threshold),
        EventType::Purchase,
        vec![Condition::new(
            Parameter::Revenue,
            Operator::GreaterThanOrEqualTo,
            threshold.to_string(),
        )],
        percentage(percent),
    )
    .expect("Invalid rule in test fixture")
}

/// Default "base" and plain "gold" circle for the fixture program
pub fn circles() -> (Circle, Circle) {
    (
        Circle::default_for(program(), "base"),
        Circle::new(program(), "gold"),
    )
}

/// Store seeded with circles and rules plus a service over it
pub async fn service_with(
    config: EngineConfig,
    circles: &[Circle],
    rules: Vec<Rule>,
) -> (Arc<InMemoryReferralStore>, ReferralService) {
    let store = Arc::new(InMemoryReferralStore::new());
    for circle in circles {
        store
            .put_circle(circle.clone())
            .await
            .expect("Invalid circle in test fixture");
    }
    for rule in rules {
        store.put_rule(rule).await.expect("Invalid rule in test fixture");
    }
    let service = ReferralService::new(store.clone(), config);
    (store, service)
}
