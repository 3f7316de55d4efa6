// Copyright (c) 2025 - Cowboy AI, Inc.
//! Circles and Circle Membership
//!
//! A promoter belongs to exactly one circle per program. Membership moves are
//! expressed as [`CircleTransition`] values carrying the circle the switch was
//! decided against, so the store can refuse a transition whose starting point
//! is stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CircleId, ProgramId, PromoterId};

/// Reward tier within a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub circle_id: CircleId,
    pub program_id: ProgramId,
    pub name: String,
    /// Promoters without an explicit membership belong here
    pub is_default: bool,
}

impl Circle {
    pub fn new(program_id: ProgramId, name: impl Into<String>) -> Self {
        Self {
            circle_id: CircleId::new(),
            program_id,
            name: name.into(),
            is_default: false,
        }
    }

    pub fn default_for(program_id: ProgramId, name: impl Into<String>) -> Self {
        Self {
            is_default: true,
            ..Self::new(program_id, name)
        }
    }
}

/// Current circle of a promoter in a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleMembership {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    pub circle_id: CircleId,
    pub since: DateTime<Utc>,
}

/// Single-writer move between circles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleTransition {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    /// Circle observed when the switch was decided (`None` if unassigned)
    pub from: Option<CircleId>,
    pub to: CircleId,
    pub at: DateTime<Utc>,
}

impl CircleTransition {
    /// Membership after the transition
    pub fn membership(&self) -> CircleMembership {
        CircleMembership {
            program_id: self.program_id,
            promoter_id: self.promoter_id,
            circle_id: self.to,
            since: self.at,
        }
    }
}
