// Copyright (c) 2025 - Cowboy AI, Inc.
//! Effect Applier
//!
//! Pure: [`apply`] returns the state change and follow-up event as data; the
//! caller stages them into its unit of work.
//!
//! ```text
//! GenerateCommission ──→ CommissionCreated + COMMISSION_GENERATED
//! SwitchCircle       ──→ CircleSwitched | NoOp       (terminal)
//! ```

use thiserror::Error;

use crate::domain::{
    Circle, CircleId, CircleTransition, Commission, CommissionId, CommissionSpec, Effect, EventId,
    Money, ProgramId, PromoterId, RuleId,
};
use crate::errors::ReferralError;
use crate::events::ReferralEvent;
use chrono::{DateTime, Utc};

/// Reasons an effect cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    /// Revenue missing, or the commission on it leaves the amount range
    #[error("event {0} carries no usable revenue for a percentage commission")]
    InvalidRevenue(EventId),

    #[error("circle {0} does not exist in the program")]
    CircleNotFound(CircleId),

    #[error("another circle switch is in flight for promoter {0}")]
    ConcurrentSwitchRejected(PromoterId),

    #[error("cascade depth {depth} exceeds limit {limit}")]
    CascadeDepthExceeded { depth: u8, limit: u8 },
}

impl From<EffectError> for ReferralError {
    fn from(err: EffectError) -> Self {
        match err {
            EffectError::InvalidRevenue(id) => ReferralError::InvalidRevenue(id),
            EffectError::CircleNotFound(id) => ReferralError::CircleNotFound(id),
            EffectError::ConcurrentSwitchRejected(id) => ReferralError::ConcurrentSwitchRejected(id),
            EffectError::CascadeDepthExceeded { depth, limit } => {
                ReferralError::CascadeDepthExceeded { depth, limit }
            }
        }
    }
}

/// State an effect is applied against
#[derive(Debug, Clone, Copy)]
pub struct EffectContext<'a> {
    pub event: &'a ReferralEvent,
    pub rule_id: RuleId,
    pub current_circle: Option<CircleId>,
    pub circles: &'a [Circle],
    /// Decimal places commissions are rounded to
    pub precision: u32,
}

/// State change produced by an effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDelta {
    CommissionCreated(Commission),
    CircleSwitched(CircleTransition),
    /// Promoter already sits in the target circle
    NoOp { circle_id: CircleId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectOutcome {
    pub delta: StateDelta,
    pub emitted: Option<ReferralEvent>,
}

/// Commission amount for an event, rounded to `precision` places
pub fn commission_amount(
    spec: &CommissionSpec,
    event: &ReferralEvent,
    precision: u32,
) -> Result<Money, EffectError> {
    match spec {
        CommissionSpec::Percentage { value } => {
            let revenue = event
                .revenue
                .ok_or(EffectError::InvalidRevenue(event.event_id))?;
            revenue
                .percent(*value)
                .checked_round_to(precision)
                .ok_or(EffectError::InvalidRevenue(event.event_id))
        }
        CommissionSpec::Fixed { value } => Ok(*value),
    }
}

/// Move a promoter to `target`
pub fn switch_circle(
    program_id: ProgramId,
    promoter_id: PromoterId,
    current: Option<CircleId>,
    target: CircleId,
    circles: &[Circle],
    at: DateTime<Utc>,
) -> Result<StateDelta, EffectError> {
    if !circles
        .iter()
        .any(|c| c.circle_id == target && c.program_id == program_id)
    {
        return Err(EffectError::CircleNotFound(target));
    }
    if current == Some(target) {
        return Ok(StateDelta::NoOp { circle_id: target });
    }
    Ok(StateDelta::CircleSwitched(CircleTransition {
        program_id,
        promoter_id,
        from: current,
        to: target,
        at,
    }))
}

/// Apply an effect against the context
pub fn apply(effect: &Effect, ctx: &EffectContext<'_>) -> Result<EffectOutcome, EffectError> {
    let event = ctx.event;
    match effect {
        Effect::GenerateCommission { commission } => {
            let commission = Commission {
                commission_id: CommissionId::new(),
                program_id: event.program_id,
                promoter_id: event.promoter_id,
                contact_id: event.contact_id,
                link_id: event.link_id,
                rule_id: ctx.rule_id,
                source_event_id: event.event_id,
                amount: commission_amount(commission, event, ctx.precision)?,
                kind: commission.kind(),
                created_at: event.occurred_at,
            };
            let emitted = ReferralEvent::commission_generated(event, &commission);
            Ok(EffectOutcome {
                delta: StateDelta::CommissionCreated(commission),
                emitted: Some(emitted),
            })
        }
        Effect::SwitchCircle { target_circle_id } => Ok(EffectOutcome {
            delta: switch_circle(
                event.program_id,
                event.promoter_id,
                ctx.current_circle,
                *target_circle_id,
                ctx.circles,
                event.occurred_at,
            )?,
            emitted: None,
        }),
    }
}
