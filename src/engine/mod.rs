// Copyright (c) 2025 - Cowboy AI, Inc.
//! Rule Engine
//!
//! Matches a promoter's active rules against each dispatched event and applies
//! the effects of every matching rule, in declaration order.
//!
//! # Guarantees
//!
//! - **At most once**: an event is evaluated once per unit of work; the service
//!   rejects event ids already in the log before a dispatch starts
//! - **All matches fire**: a promoter can earn a commission and cross a circle
//!   threshold on the same event
//! - **Bounded cascade**: an effect whose follow-up event would land beyond
//!   `max_cascade_depth` is refused before it touches any state
//! - **Best effort effects**: a failing effect becomes a [`FailedEffect`]
//!   record; the triggering event is recorded regardless

pub mod stage;

pub use stage::{EvaluationStage, EvaluationTrace, StageInput, StateMachine, TransitionError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatcher::EventHandler;
use crate::domain::{Effect, FailedEffect, Rule, RuleId};
use crate::effects::{self, EffectContext, EffectError, StateDelta};
use crate::errors::{ReferralError, ReferralResult};
use crate::events::ReferralEvent;
use crate::locks::SwitchGuard;
use crate::matcher::{rule_matches, EventSnapshot};
use crate::store::{StagedTransition, UnitOfWork};

/// Rule evaluation handler
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: EngineConfig,
    switches: SwitchGuard,
}

impl RuleEngine {
    pub fn new(config: EngineConfig, switches: SwitchGuard) -> Self {
        Self { config, switches }
    }

    /// Rules eligible for `event` given the promoter's current circle
    pub fn eligible_rules(event: &ReferralEvent, uow: &UnitOfWork) -> Vec<Rule> {
        let circle = uow.context.current_circle();
        uow.context
            .rules
            .iter()
            .filter(|rule| rule.program_id == event.program_id && rule.applies_to(event.event_type, circle))
            .cloned()
            .collect()
    }

    /// Apply one effect and stage its state change
    ///
    /// Returns the follow-up event, if the effect emits one.
    pub fn fire(
        &self,
        event: &ReferralEvent,
        rule_id: RuleId,
        effect: &Effect,
        depth: u8,
        uow: &mut UnitOfWork,
    ) -> Result<Option<ReferralEvent>, EffectError> {
        let next_depth = depth.saturating_add(1);
        if effect.emits_event() && next_depth > self.config.max_cascade_depth {
            return Err(EffectError::CascadeDepthExceeded {
                depth: next_depth,
                limit: self.config.max_cascade_depth,
            });
        }

        if matches!(effect, Effect::SwitchCircle { .. })
            && !uow.holds_permit_for(event.program_id, event.promoter_id)
        {
            let permit = self
                .switches
                .try_acquire(event.program_id, event.promoter_id)
                .ok_or(EffectError::ConcurrentSwitchRejected(event.promoter_id))?;
            uow.hold_permit(permit);
        }

        let outcome = effects::apply(
            effect,
            &EffectContext {
                event,
                rule_id,
                current_circle: uow.context.current_circle(),
                circles: &uow.context.circles,
                precision: self.config.commission_precision,
            },
        )?;

        match outcome.delta {
            StateDelta::CommissionCreated(commission) => {
                debug!(
                    commission_id = %commission.commission_id,
                    rule_id = %rule_id,
                    amount = %commission.amount,
                    "commission staged"
                );
                uow.stage_commission(commission);
            }
            StateDelta::CircleSwitched(transition) => {
                debug!(promoter_id = %transition.promoter_id, to = %transition.to, "circle switch staged");
                uow.stage_transition(StagedTransition {
                    transition,
                    rule_id: Some(rule_id),
                    event_id: Some(event.event_id),
                    depth,
                });
            }
            StateDelta::NoOp { circle_id } => {
                info!(
                    promoter_id = %event.promoter_id,
                    circle_id = %circle_id,
                    rule_id = %rule_id,
                    "promoter already in target circle, switch is a no-op"
                );
            }
        }
        Ok(outcome.emitted)
    }

    /// Run the Received → Settled lifecycle for one event
    pub fn evaluate(
        &self,
        event: &ReferralEvent,
        depth: u8,
        uow: &mut UnitOfWork,
    ) -> ReferralResult<(Vec<ReferralEvent>, EvaluationTrace)> {
        let mut trace = EvaluationTrace::new();
        let stage_err = |e: TransitionError| ReferralError::Validation(e.to_string());

        let rules = Self::eligible_rules(event, uow);
        trace
            .advance(StageInput::RulesLoaded { eligible: rules.len() })
            .map_err(stage_err)?;

        let snapshot = EventSnapshot::for_event(&uow.current_totals()?, event);
        let matched: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| rule_matches(rule, &snapshot))
            .collect();
        trace
            .advance(StageInput::RulesMatched { matched: matched.len() })
            .map_err(stage_err)?;

        let mut emitted = Vec::new();
        let mut failed = 0;
        for rule in &matched {
            match self.fire(event, rule.rule_id, &rule.effect, depth, uow) {
                Ok(child) => emitted.extend(child),
                Err(err) => {
                    failed += 1;
                    let err = ReferralError::from(err);
                    warn!(
                        event_id = %event.event_id,
                        rule_id = %rule.rule_id,
                        effect = rule.effect.name(),
                        error = %err,
                        "effect failed, recorded for retry"
                    );
                    uow.record_failure(FailedEffect::new(
                        Some(event.event_id),
                        event.program_id,
                        event.promoter_id,
                        Some(rule.rule_id),
                        Some(rule.effect.clone()),
                        &err,
                        depth,
                        Utc::now(),
                    ));
                }
            }
        }
        trace
            .advance(StageInput::EffectsDispatched {
                applied: matched.len() - failed,
                failed,
            })
            .map_err(stage_err)?;

        Ok((emitted, trace))
    }
}

/// Dispatcher name of the rule engine
pub const RULES_HANDLER: &str = "rules";

impl EventHandler for RuleEngine {
    fn name(&self) -> &'static str {
        RULES_HANDLER
    }

    fn handle(
        &self,
        event: &ReferralEvent,
        depth: u8,
        uow: &mut UnitOfWork,
    ) -> ReferralResult<Vec<ReferralEvent>> {
        if !uow.mark_evaluated(event.event_id) {
            debug!(event_id = %event.event_id, "event already evaluated, skipping");
            return Ok(Vec::new());
        }
        let (emitted, trace) = self.evaluate(event, depth, uow)?;
        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            depth,
            stage = %trace.current(),
            emitted = emitted.len(),
            "event settled"
        );
        Ok(emitted)
    }
}
