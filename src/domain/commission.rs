// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commission and Failed-Effect Records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CommissionId, ContactId, EventId, FailureId, LinkId, ProgramId, PromoterId, RuleId};
use super::money::Money;
use super::rule::{CommissionKind, Effect};
use crate::errors::ReferralError;

/// Commission produced by a `GenerateCommission` effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub commission_id: CommissionId,
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    pub contact_id: ContactId,
    pub link_id: LinkId,
    pub rule_id: RuleId,
    /// Event whose rule evaluation produced the commission
    pub source_event_id: EventId,
    pub amount: Money,
    pub kind: CommissionKind,
    pub created_at: DateTime<Utc>,
}

/// Where a failure was raised, which decides how it is retried
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum FailureOrigin {
    /// A rule's effect failed while being applied
    #[default]
    Effect,
    /// An event handler failed as a whole
    Handler { name: String },
    /// A cascaded event was refused before dispatch
    CascadeLimit,
    /// A manual circle switch lost its commit
    ManualSwitch,
}

impl FailureOrigin {
    pub fn handler(name: impl Into<String>) -> Self {
        FailureOrigin::Handler { name: name.into() }
    }
}

/// Effect that could not be applied, kept for retry or inspection
///
/// The triggering event stays recorded regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEffect {
    pub failure_id: FailureId,
    /// Event being processed; absent for manual operations
    pub event_id: Option<EventId>,
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    /// Absent for failures not tied to a rule (e.g. aggregate maintenance)
    pub rule_id: Option<RuleId>,
    pub effect: Option<Effect>,
    #[serde(default)]
    pub origin: FailureOrigin,
    /// Short error name, see [`ReferralError::kind`]
    pub kind: String,
    pub message: String,
    /// Cascade depth the effect was evaluated at
    pub depth: u8,
    pub recorded_at: DateTime<Utc>,
    pub attempts: u32,
    pub resolved: bool,
}

impl FailedEffect {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Option<EventId>,
        program_id: ProgramId,
        promoter_id: PromoterId,
        rule_id: Option<RuleId>,
        effect: Option<Effect>,
        error: &ReferralError,
        depth: u8,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            failure_id: FailureId::new(),
            event_id,
            program_id,
            promoter_id,
            rule_id,
            effect,
            origin: FailureOrigin::Effect,
            kind: error.kind().to_string(),
            message: error.to_string(),
            depth,
            recorded_at,
            attempts: 1,
            resolved: false,
        }
    }

    pub fn with_origin(mut self, origin: FailureOrigin) -> Self {
        self.origin = origin;
        self
    }
}
