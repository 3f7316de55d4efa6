// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Domain Models
//!
//! Value objects and records the rule engine works with.
//!
//! - [`ids`] - UUID-backed identifiers
//! - [`money`] - fixed-point [`Money`] and clamped [`Percentage`]
//! - [`rule`] - [`Rule`], [`Condition`], [`Effect`]
//! - [`circle`] - [`Circle`] membership and single-writer transitions
//! - [`commission`] - generated [`Commission`]s and [`FailedEffect`] records

pub mod circle;
pub mod commission;
pub mod ids;
pub mod money;
pub mod rule;

pub use circle::{Circle, CircleMembership, CircleTransition};
pub use commission::{Commission, FailedEffect, FailureOrigin};
pub use ids::{
    CircleId, CommissionId, ContactId, EventId, FailureId, LinkId, ProgramId, PromoterId, RuleId,
};
pub use money::{Money, MoneyError, Percentage, MONEY_DECIMALS};
pub use rule::{CommissionKind, CommissionSpec, Condition, Effect, Operator, Parameter, Rule};
