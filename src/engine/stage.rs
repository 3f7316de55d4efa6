// Copyright (c) 2025 - Cowboy AI, Inc.
//! Evaluation Stages
//!
//! Lifecycle of one event inside the rule engine:
//!
//! ```text
//! Received ──RulesLoaded──→ Matching ──RulesMatched──→ Dispatching ──EffectsDispatched──→ Settled
//! ```
//!
//! Transitions are pure functions over the current stage, in the same
//! `transition(&self, input) -> Result<(next, output), TransitionError>`
//! shape as any other state machine in the crate.

use chrono::{DateTime, Utc};
use std::fmt;

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition from current state to target state is not allowed
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Finite state machine with typed inputs and outputs
pub trait StateMachine: Sized + Clone {
    type Input;
    type Output;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }
}

/// Where an event is in rule evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationStage {
    Received,
    Matching,
    Dispatching,
    Settled,
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationStage::Received => write!(f, "received"),
            EvaluationStage::Matching => write!(f, "matching"),
            EvaluationStage::Dispatching => write!(f, "dispatching"),
            EvaluationStage::Settled => write!(f, "settled"),
        }
    }
}

/// Progress reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    /// Eligible rules loaded for the event
    RulesLoaded { eligible: usize },
    /// Conditions evaluated
    RulesMatched { matched: usize },
    /// Every matched effect applied or recorded as failed
    EffectsDispatched { applied: usize, failed: usize },
}

impl StageInput {
    fn target(&self) -> EvaluationStage {
        match self {
            StageInput::RulesLoaded { .. } => EvaluationStage::Matching,
            StageInput::RulesMatched { .. } => EvaluationStage::Dispatching,
            StageInput::EffectsDispatched { .. } => EvaluationStage::Settled,
        }
    }
}

impl StateMachine for EvaluationStage {
    type Input = StageInput;
    type Output = ();

    fn transition(&self, input: &StageInput) -> TransitionResult<(Self, ())> {
        match (self, input) {
            (EvaluationStage::Received, StageInput::RulesLoaded { .. }) => {
                Ok((EvaluationStage::Matching, ()))
            }
            (EvaluationStage::Matching, StageInput::RulesMatched { .. }) => {
                Ok((EvaluationStage::Dispatching, ()))
            }
            (EvaluationStage::Dispatching, StageInput::EffectsDispatched { .. }) => {
                Ok((EvaluationStage::Settled, ()))
            }
            (from, input) => Err(TransitionError::InvalidTransition {
                from: from.to_string(),
                to: input.target().to_string(),
            }),
        }
    }
}

/// Recorded stage change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTransition {
    pub from: EvaluationStage,
    pub to: EvaluationStage,
    pub input: StageInput,
    pub timestamp: DateTime<Utc>,
}

/// Stage of one evaluation plus its history
#[derive(Debug, Clone)]
pub struct EvaluationTrace {
    current: EvaluationStage,
    history: Vec<StageTransition>,
}

impl Default for EvaluationTrace {
    fn default() -> Self {
        Self {
            current: EvaluationStage::Received,
            history: Vec::new(),
        }
    }
}

impl EvaluationTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, input: StageInput) -> TransitionResult<()> {
        let (to, ()) = self.current.transition(&input)?;
        self.history.push(StageTransition {
            from: self.current,
            to,
            input,
            timestamp: Utc::now(),
        });
        self.current = to;
        Ok(())
    }

    pub fn current(&self) -> EvaluationStage {
        self.current
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    pub fn is_settled(&self) -> bool {
        self.current == EvaluationStage::Settled
    }
}
