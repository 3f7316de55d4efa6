// Copyright (c) 2025 - Cowboy AI, Inc.
//! Rules, Conditions and Effects
//!
//! A [`Rule`] is an AND-combined list of [`Condition`]s plus exactly one
//! [`Effect`]. Rules belong to a program, listen to one event type and may be
//! restricted to a single circle.
//!
//! Conditions are replaced, never edited: [`Rule::with_conditions`] returns a
//! new rule value.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CircleId, ProgramId, RuleId};
use super::money::{Money, Percentage};
use crate::errors::{ReferralError, ReferralResult};
use crate::events::EventType;

/// Event-derived parameter a condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Parameter {
    /// Cumulative signups for the promoter in the program
    NumOfSignups,
    /// Cumulative purchases for the promoter in the program
    NumOfPurchases,
    /// Cumulative revenue for the promoter in the program
    Revenue,
    /// External id carried by the triggering event
    ExternalId,
    /// Item id carried by the triggering event
    ItemId,
}

impl Parameter {
    /// Whether the snapshot value for this parameter is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Parameter::NumOfSignups | Parameter::NumOfPurchases | Parameter::Revenue
        )
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    Contains,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
}

impl Operator {
    /// Whether the operator needs numeric operands
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::LessThan
                | Operator::LessThanOrEqualTo
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqualTo
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Equals => "==",
            Operator::Contains => "contains",
            Operator::LessThan => "<",
            Operator::LessThanOrEqualTo => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqualTo => ">=",
        };
        f.write_str(symbol)
    }
}

/// Single predicate over an event-derived parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub parameter: Parameter,
    pub operator: Operator,
    /// Raw comparison value; parsed as a decimal for numeric operators
    pub value: String,
}

impl Condition {
    pub fn new(parameter: Parameter, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            parameter,
            operator,
            value: value.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} {}", self.parameter, self.operator, self.value)
    }
}

/// How a commission amount is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionSpec {
    /// Share of the triggering event's revenue
    Percentage { value: Percentage },
    /// Flat amount independent of revenue
    Fixed { value: Money },
}

impl CommissionSpec {
    pub fn kind(&self) -> CommissionKind {
        match self {
            CommissionSpec::Percentage { .. } => CommissionKind::Percentage,
            CommissionSpec::Fixed { .. } => CommissionKind::Fixed,
        }
    }
}

/// Commission kind recorded on generated commissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionKind {
    Percentage,
    Fixed,
}

/// Action executed when a rule matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Create a commission and emit `COMMISSION_GENERATED`
    GenerateCommission { commission: CommissionSpec },
    /// Move the promoter to another circle (terminal)
    SwitchCircle { target_circle_id: CircleId },
}

impl Effect {
    /// Whether applying the effect emits a follow-up event
    pub fn emits_event(&self) -> bool {
        matches!(self, Effect::GenerateCommission { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Effect::GenerateCommission { .. } => "generate_commission",
            Effect::SwitchCircle { .. } => "switch_circle",
        }
    }
}

/// Conditions plus one effect, scoped to a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: RuleId,
    pub program_id: ProgramId,
    pub name: String,
    /// Event type the rule listens to
    pub trigger: EventType,
    /// Restricts the rule to promoters of one circle
    pub circle_id: Option<CircleId>,
    /// AND-combined; empty matches unconditionally
    pub conditions: Vec<Condition>,
    pub effect: Effect,
    pub active: bool,
}

impl Rule {
    /// Create an active rule
    ///
    /// # Errors
    ///
    /// `Validation` when a commission-generating effect listens to
    /// `COMMISSION_GENERATED`, which would let commissions feed themselves.
    pub fn new(
        program_id: ProgramId,
        name: impl Into<String>,
        trigger: EventType,
        conditions: Vec<Condition>,
        effect: Effect,
    ) -> ReferralResult<Self> {
        let rule = Self {
            rule_id: RuleId::new(),
            program_id,
            name: name.into(),
            trigger,
            circle_id: None,
            conditions,
            effect,
            active: true,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check rule-eligibility constraints
    pub fn validate(&self) -> ReferralResult<()> {
        if self.trigger == EventType::CommissionGenerated && self.effect.emits_event() {
            return Err(ReferralError::Validation(format!(
                "rule {} cannot generate commissions from COMMISSION_GENERATED events",
                self.rule_id
            )));
        }
        Ok(())
    }

    pub fn in_circle(mut self, circle_id: CircleId) -> Self {
        self.circle_id = Some(circle_id);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Replace the condition list
    pub fn with_conditions(self, conditions: Vec<Condition>) -> Self {
        Self { conditions, ..self }
    }

    /// Whether this rule is eligible for an event of `event_type` raised by a
    /// promoter currently in `circle`
    pub fn applies_to(&self, event_type: EventType, circle: Option<CircleId>) -> bool {
        self.active
            && self.trigger == event_type
            && match self.circle_id {
                None => true,
                Some(required) => circle == Some(required),
            }
    }
}
