// Copyright (c) 2025 - Cowboy AI, Inc.
//! Condition Matcher
//!
//! Pure predicate evaluation of a [`Condition`] against an [`EventSnapshot`].
//!
//! | Operator | Semantics |
//! |----------|-----------|
//! | `EQUALS` | numeric equality for numeric snapshot values, exact (case-sensitive) string equality otherwise |
//! | `CONTAINS` | substring match, snapshot value coerced to string |
//! | `LESS_THAN` .. `GREATER_THAN_OR_EQUAL_TO` | numeric comparison, `TypeMismatch` on non-numeric snapshot values |
//!
//! A rule matches iff all of its conditions match. Evaluation stops at the
//! first non-matching condition.

use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::aggregate::PromoterTotals;
use crate::domain::{Condition, Money, Operator, Parameter, Rule};
use crate::errors::ReferralError;
use crate::events::ReferralEvent;

/// Errors raised while evaluating a condition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Snapshot value cannot be compared numerically
    #[error("{parameter:?} value '{value}' is not numeric")]
    TypeMismatch { parameter: Parameter, value: String },

    /// Condition value cannot be parsed as a number
    #[error("condition value '{value}' is not numeric")]
    InvalidConditionValue { value: String },
}

impl From<MatchError> for ReferralError {
    fn from(err: MatchError) -> Self {
        ReferralError::TypeMismatch(err.to_string())
    }
}

/// Current value of one parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValue {
    Count(u64),
    Amount(Money),
    Text(String),
}

impl SnapshotValue {
    fn as_text(&self) -> String {
        match self {
            SnapshotValue::Count(n) => n.to_string(),
            SnapshotValue::Amount(m) => m.to_string(),
            SnapshotValue::Text(s) => s.clone(),
        }
    }

    fn as_number(&self, parameter: Parameter) -> Result<Money, MatchError> {
        match self {
            SnapshotValue::Count(n) => i64::try_from(*n)
                .ok()
                .and_then(Money::checked_from_whole)
                .ok_or_else(|| MatchError::TypeMismatch {
                    parameter,
                    value: n.to_string(),
                }),
            SnapshotValue::Amount(m) => Ok(*m),
            SnapshotValue::Text(s) if !parameter.is_numeric() => {
                s.parse().map_err(|_| MatchError::TypeMismatch {
                    parameter,
                    value: s.clone(),
                })
            }
            SnapshotValue::Text(s) => Err(MatchError::TypeMismatch {
                parameter,
                value: s.clone(),
            }),
        }
    }
}

/// Parameter values observed for one event
///
/// Counts and revenue include the event being evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSnapshot {
    values: HashMap<Parameter, SnapshotValue>,
}

impl EventSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot from promoter totals (already including `event`) and the
    /// event's own identifiers
    pub fn for_event(totals: &PromoterTotals, event: &ReferralEvent) -> Self {
        let mut snapshot = Self::new()
            .with(Parameter::NumOfSignups, SnapshotValue::Count(totals.total_signups))
            .with(Parameter::NumOfPurchases, SnapshotValue::Count(totals.total_purchases))
            .with(Parameter::Revenue, SnapshotValue::Amount(totals.total_revenue));
        if let Some(external_id) = &event.external_id {
            snapshot = snapshot.with(Parameter::ExternalId, SnapshotValue::Text(external_id.clone()));
        }
        if let Some(item_id) = &event.item_id {
            snapshot = snapshot.with(Parameter::ItemId, SnapshotValue::Text(item_id.clone()));
        }
        snapshot
    }

    pub fn with(mut self, parameter: Parameter, value: SnapshotValue) -> Self {
        self.values.insert(parameter, value);
        self
    }

    pub fn get(&self, parameter: Parameter) -> Option<&SnapshotValue> {
        self.values.get(&parameter)
    }
}

fn parse_condition_value(condition: &Condition) -> Result<Money, MatchError> {
    condition
        .value
        .parse()
        .map_err(|_| MatchError::InvalidConditionValue {
            value: condition.value.clone(),
        })
}

/// Evaluate one condition
///
/// A parameter absent from the snapshot (e.g. `ITEM_ID` on a signup) never
/// matches and is not an error.
pub fn matches(condition: &Condition, snapshot: &EventSnapshot) -> Result<bool, MatchError> {
    let Some(value) = snapshot.get(condition.parameter) else {
        return Ok(false);
    };

    match condition.operator {
        Operator::Equals => match value {
            SnapshotValue::Text(s) => Ok(*s == condition.value),
            numeric => {
                let left = numeric.as_number(condition.parameter)?;
                Ok(left == parse_condition_value(condition)?)
            }
        },
        Operator::Contains => Ok(value.as_text().contains(condition.value.as_str())),
        Operator::LessThan => Ok(compare(condition, value)? == Ordering::Less),
        Operator::LessThanOrEqualTo => Ok(compare(condition, value)? != Ordering::Greater),
        Operator::GreaterThan => Ok(compare(condition, value)? == Ordering::Greater),
        Operator::GreaterThanOrEqualTo => Ok(compare(condition, value)? != Ordering::Less),
    }
}

fn compare(condition: &Condition, value: &SnapshotValue) -> Result<Ordering, MatchError> {
    let left = value.as_number(condition.parameter)?;
    let right = parse_condition_value(condition)?;
    Ok(left.cmp(&right))
}

/// AND-combine conditions, stopping at the first non-match or error
pub fn all_match(conditions: &[Condition], snapshot: &EventSnapshot) -> Result<bool, MatchError> {
    for condition in conditions {
        if !matches(condition, snapshot)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether `rule` matches; evaluation errors are logged and count as no match
pub fn rule_matches(rule: &Rule, snapshot: &EventSnapshot) -> bool {
    match all_match(&rule.conditions, snapshot) {
        Ok(matched) => matched,
        Err(err) => {
            warn!(rule_id = %rule.rule_id, error = %err, "condition evaluation failed, rule treated as non-matching");
            false
        }
    }
}
