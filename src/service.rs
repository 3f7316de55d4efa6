// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Service
//!
//! Entry point for producers and operators. Wires the dispatcher, rule
//! engine, aggregate maintainer, store, locks and notifier together.
//!
//! # Publish Flow
//!
//! ```text
//! publish(event)
//!   1. validate                      (producers may only publish SIGNUP / PURCHASE)
//!   2. lock promoter + link          (per-key, canonical order)
//!   3. dedup on event id             (already committed → Duplicate)
//!   4. load context → UnitOfWork
//!   5. dispatch                      (aggregates, then rules; cascade)
//!   6. commit                        (retried on transient store errors)
//!   7. forward notifications         (spawned, never awaited)
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{
    AggregateMaintainer, AggregateRows, AggregateScope, DriftReport, LinkRow, LinkTotals,
    PromoterRow, PromoterTotals, RebuildHandle, RebuildReport, AGGREGATES_HANDLER,
};
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchReport, EventDispatcher, EventHandler};
use crate::domain::{
    CircleId, CircleMembership, CircleTransition, Commission, ContactId, Effect, EventId,
    FailedEffect, FailureId, FailureOrigin, LinkId, Money, ProgramId, PromoterId,
};
use crate::effects::{self, StateDelta};
use crate::engine::RuleEngine;
use crate::errors::{ReferralError, ReferralResult};
use crate::events::{EventType, ReferralEvent};
use crate::locks::{KeyedGuard, KeyedLocks, LockKey, SwitchGuard};
use crate::notify::{spawn_delivery, Notification, Notifier, NullNotifier};
use crate::store::{CommitReceipt, ReferralStore, StagedTransition, UnitOfWork};

/// What a committed publish produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub event_id: EventId,
    pub receipt: CommitReceipt,
    pub dispatch: DispatchReport,
    pub commissions: Vec<Commission>,
    pub transitions: Vec<CircleTransition>,
    pub failures: Vec<FailedEffect>,
    /// A scoped rebuild was started because aggregate maintenance failed
    pub rebuild_scheduled: bool,
}

/// Result of [`ReferralService::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Committed(Box<PublishReport>),
    /// The event id is already in the log; nothing was evaluated
    Duplicate(EventId),
}

impl PublishOutcome {
    pub fn report(&self) -> Option<&PublishReport> {
        match self {
            PublishOutcome::Committed(report) => Some(report),
            PublishOutcome::Duplicate(_) => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PublishOutcome::Duplicate(_))
    }
}

/// Result of a manual circle switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched(CircleTransition),
    /// Promoter already in the target circle
    NoOp(CircleId),
}

/// Result of retrying a failed effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Resolved {
        commissions: Vec<Commission>,
        transitions: Vec<CircleTransition>,
    },
    AlreadyResolved,
    /// The effect failed again; its attempt counter was bumped
    StillFailing(ReferralError),
}

/// Referral rule engine and aggregate pipeline
pub struct ReferralService {
    store: Arc<dyn ReferralStore>,
    config: EngineConfig,
    dispatcher: EventDispatcher,
    engine: Arc<RuleEngine>,
    maintainer: Arc<AggregateMaintainer>,
    locks: KeyedLocks,
    switches: SwitchGuard,
    notifier: Arc<dyn Notifier>,
}

impl ReferralService {
    pub fn new(store: Arc<dyn ReferralStore>, config: EngineConfig) -> Self {
        let switches = SwitchGuard::new();
        let engine = Arc::new(RuleEngine::new(config.clone(), switches.clone()));
        let maintainer = Arc::new(AggregateMaintainer::new(Arc::clone(&store), config.clone()));
        // aggregates first: conditions see totals that include the event
        let dispatcher = EventDispatcher::new(config.max_cascade_depth)
            .register(maintainer.clone())
            .register(engine.clone());

        Self {
            store,
            config,
            dispatcher,
            engine,
            maintainer,
            locks: KeyedLocks::new(),
            switches,
            notifier: Arc::new(NullNotifier),
        }
    }

    /// Register an extra handler after the built-in ones
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.dispatcher = self.dispatcher.clone().register(handler);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ReferralStore> {
        &self.store
    }

    pub fn maintainer(&self) -> &Arc<AggregateMaintainer> {
        &self.maintainer
    }

    /// Record a producer event and run everything it triggers
    pub async fn publish(&self, event: ReferralEvent) -> ReferralResult<PublishOutcome> {
        event.validate()?;
        if event.event_type == EventType::CommissionGenerated {
            return Err(ReferralError::Validation(
                "COMMISSION_GENERATED events are emitted by rules, not published".to_string(),
            ));
        }

        let _guard = self.lock_event(&event).await;

        if self.store.has_event(event.event_id).await? {
            info!(event_id = %event.event_id, "event already recorded, skipping");
            return Ok(PublishOutcome::Duplicate(event.event_id));
        }

        let event_id = event.event_id;
        let program_id = event.program_id;
        let promoter_id = event.promoter_id;
        let context = self.store.load_context(program_id, promoter_id).await?;
        let mut uow = UnitOfWork::new(context);
        let dispatch = self.dispatcher.dispatch(event, &mut uow);

        let receipt = match self.commit(&mut uow).await {
            Err(ReferralError::DuplicateEvent(id)) if id == event_id => {
                return Ok(PublishOutcome::Duplicate(id));
            }
            other => other?,
        };

        let rebuild_scheduled = dispatch.failed_in(AGGREGATES_HANDLER);
        if rebuild_scheduled {
            let scope = AggregateScope::promoter(program_id, promoter_id);
            error!(%scope, event_id = %event_id, "aggregate maintenance failed, rebuilding scope");
            // detached; the outcome is logged by the rebuild itself
            drop(self.maintainer.spawn_rebuild(scope));
        }

        self.forward(&uow);

        let report = PublishReport {
            event_id,
            receipt,
            dispatch,
            commissions: uow.commissions().to_vec(),
            transitions: uow.transitions().iter().map(|t| t.transition.clone()).collect(),
            failures: uow.failures().to_vec(),
            rebuild_scheduled,
        };
        debug!(
            event_id = %event_id,
            commissions = report.commissions.len(),
            failures = report.failures.len(),
            "event settled and committed"
        );
        Ok(PublishOutcome::Committed(Box::new(report)))
    }

    /// Publish a signup
    pub async fn record_signup(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
        contact_id: ContactId,
        link_id: LinkId,
        occurred_at: DateTime<Utc>,
    ) -> ReferralResult<PublishOutcome> {
        self.publish(ReferralEvent::signup(program_id, promoter_id, contact_id, link_id, occurred_at))
            .await
    }

    /// Publish a purchase
    pub async fn record_purchase(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
        contact_id: ContactId,
        link_id: LinkId,
        revenue: Option<Money>,
        occurred_at: DateTime<Utc>,
    ) -> ReferralResult<PublishOutcome> {
        self.publish(ReferralEvent::purchase(
            program_id,
            promoter_id,
            contact_id,
            link_id,
            revenue,
            occurred_at,
        ))
        .await
    }

    /// Move a promoter to another circle outside of rule evaluation
    ///
    /// # Errors
    ///
    /// - `ConcurrentSwitchRejected` if another switch for the promoter is in
    ///   flight, or its circle changed between load and commit
    /// - `CircleNotFound` if the target is not a circle of the program
    pub async fn switch_circle(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
        target: CircleId,
    ) -> ReferralResult<SwitchOutcome> {
        let permit = self
            .switches
            .try_acquire(program_id, promoter_id)
            .ok_or(ReferralError::ConcurrentSwitchRejected(promoter_id))?;

        let context = self.store.load_context(program_id, promoter_id).await?;
        let delta = effects::switch_circle(
            program_id,
            promoter_id,
            context.current_circle(),
            target,
            &context.circles,
            Utc::now(),
        )?;

        let transition = match delta {
            StateDelta::CircleSwitched(transition) => transition,
            StateDelta::NoOp { circle_id } => {
                info!(%promoter_id, %circle_id, "promoter already in target circle, switch is a no-op");
                return Ok(SwitchOutcome::NoOp(circle_id));
            }
            StateDelta::CommissionCreated(_) => {
                return Err(ReferralError::Validation("unexpected commission from circle switch".to_string()));
            }
        };

        let mut uow = UnitOfWork::new(context);
        uow.hold_permit(permit);
        uow.stage_transition(StagedTransition {
            transition: transition.clone(),
            rule_id: None,
            event_id: None,
            depth: 0,
        });
        self.commit_with_retry(&uow).await?;
        self.forward(&uow);

        info!(%promoter_id, from = ?transition.from, to = %transition.to, "circle switched");
        Ok(SwitchOutcome::Switched(transition))
    }

    /// Re-apply a recorded failure against current state
    ///
    /// How a failure is retried follows its origin:
    ///
    /// | Origin | Retry |
    /// |--------|-------|
    /// | effect | fire the recorded rule effect again |
    /// | `aggregates` handler | rebuild the promoter's aggregates |
    /// | other handler | run that handler on the stored event again |
    /// | manual switch | repeat the circle switch |
    /// | cascade limit | refused, the limit still applies |
    pub async fn retry_failed_effect(&self, failure_id: FailureId) -> ReferralResult<RetryOutcome> {
        let failure = self
            .store
            .failed_effect(failure_id)
            .await?
            .ok_or(ReferralError::FailureNotFound(failure_id))?;
        if failure.resolved {
            return Ok(RetryOutcome::AlreadyResolved);
        }

        match &failure.origin {
            FailureOrigin::CascadeLimit => Err(ReferralError::Validation(format!(
                "failure {} was refused by the cascade limit and cannot be retried",
                failure_id
            ))),
            FailureOrigin::ManualSwitch => self.retry_manual_switch(&failure).await,
            FailureOrigin::Handler { name } if name == AGGREGATES_HANDLER => {
                self.retry_by_rebuild(&failure).await
            }
            FailureOrigin::Handler { name } => self.retry_handler(&failure, name).await,
            FailureOrigin::Effect => self.retry_effect(&failure).await,
        }
    }

    async fn source_event(&self, failure: &FailedEffect) -> ReferralResult<ReferralEvent> {
        let event_id = failure.event_id.ok_or_else(|| {
            ReferralError::Validation(format!("failure {} has no source event", failure.failure_id))
        })?;
        let stored = self
            .store
            .event(event_id)
            .await?
            .ok_or_else(|| ReferralError::Validation(format!("source event {} not recorded", event_id)))?;
        Ok(stored.event)
    }

    async fn retry_effect(&self, failure: &FailedEffect) -> ReferralResult<RetryOutcome> {
        let (Some(effect), Some(rule_id)) = (failure.effect.clone(), failure.rule_id) else {
            return Err(ReferralError::Validation(format!(
                "failure {} names no rule effect to retry",
                failure.failure_id
            )));
        };
        let event = self.source_event(failure).await?;
        let _guard = self.lock_event(&event).await;
        let mut uow = UnitOfWork::new(self.store.load_context(event.program_id, event.promoter_id).await?);

        let fired = self
            .engine
            .fire(&event, rule_id, &effect, failure.depth, &mut uow)
            .map_err(ReferralError::from)
            .map(|child| child.into_iter().collect::<Vec<_>>());
        self.settle_retry(failure, fired, uow).await
    }

    async fn retry_handler(&self, failure: &FailedEffect, name: &str) -> ReferralResult<RetryOutcome> {
        let handler = self
            .dispatcher
            .handler(name)
            .cloned()
            .ok_or_else(|| ReferralError::Validation(format!("handler '{}' is not registered", name)))?;
        let event = self.source_event(failure).await?;
        let _guard = self.lock_event(&event).await;
        let mut uow = UnitOfWork::new(self.store.load_context(event.program_id, event.promoter_id).await?);

        let handled = handler.handle(&event, failure.depth, &mut uow);
        self.settle_retry(failure, handled, uow).await
    }

    /// Dispatch what a retried effect or handler emitted and commit, or
    /// count the attempt when it failed again
    async fn settle_retry(
        &self,
        failure: &FailedEffect,
        result: ReferralResult<Vec<ReferralEvent>>,
        mut uow: UnitOfWork,
    ) -> ReferralResult<RetryOutcome> {
        let failure_id = failure.failure_id;
        match result {
            Ok(emitted) => {
                for child in emitted {
                    self.dispatcher
                        .dispatch_at(child, failure.depth.saturating_add(1), &mut uow);
                }
                uow.resolve_failure(failure_id);
                self.commit(&mut uow).await?;
                self.forward(&uow);
                info!(%failure_id, origin = ?failure.origin, "failure resolved");
                Ok(RetryOutcome::Resolved {
                    commissions: uow.commissions().to_vec(),
                    transitions: uow.transitions().iter().map(|t| t.transition.clone()).collect(),
                })
            }
            Err(err) => self.still_failing(failure, err).await,
        }
    }

    async fn retry_by_rebuild(&self, failure: &FailedEffect) -> ReferralResult<RetryOutcome> {
        let scope = AggregateScope::promoter(failure.program_id, failure.promoter_id);
        if let Err(err) = self.rebuild(scope).await {
            return self.still_failing(failure, err).await;
        }
        self.resolve_only(failure).await?;
        Ok(RetryOutcome::Resolved {
            commissions: Vec::new(),
            transitions: Vec::new(),
        })
    }

    async fn retry_manual_switch(&self, failure: &FailedEffect) -> ReferralResult<RetryOutcome> {
        let Some(Effect::SwitchCircle { target_circle_id }) = failure.effect else {
            return Err(ReferralError::Validation(format!(
                "failure {} names no circle to switch to",
                failure.failure_id
            )));
        };
        let transitions = match self
            .switch_circle(failure.program_id, failure.promoter_id, target_circle_id)
            .await
        {
            Ok(SwitchOutcome::Switched(transition)) => vec![transition],
            Ok(SwitchOutcome::NoOp(_)) => Vec::new(),
            Err(err @ (ReferralError::ConcurrentSwitchRejected(_) | ReferralError::CircleNotFound(_))) => {
                return self.still_failing(failure, err).await;
            }
            Err(err) => return Err(err),
        };
        self.resolve_only(failure).await?;
        Ok(RetryOutcome::Resolved {
            commissions: Vec::new(),
            transitions,
        })
    }

    async fn resolve_only(&self, failure: &FailedEffect) -> ReferralResult<()> {
        let mut uow = UnitOfWork::new(
            self.store
                .load_context(failure.program_id, failure.promoter_id)
                .await?,
        );
        uow.resolve_failure(failure.failure_id);
        self.commit_with_retry(&uow).await?;
        info!(failure_id = %failure.failure_id, origin = ?failure.origin, "failure resolved");
        Ok(())
    }

    async fn still_failing(&self, failure: &FailedEffect, err: ReferralError) -> ReferralResult<RetryOutcome> {
        warn!(failure_id = %failure.failure_id, error = %err, "failure still failing");
        let mut attempt = UnitOfWork::new(
            self.store
                .load_context(failure.program_id, failure.promoter_id)
                .await?,
        );
        attempt.record_attempt(failure.failure_id);
        self.commit_with_retry(&attempt).await?;
        Ok(RetryOutcome::StillFailing(err))
    }

    async fn lock_event(&self, event: &ReferralEvent) -> KeyedGuard {
        self.locks
            .lock_all([
                LockKey::Promoter(event.program_id, event.promoter_id),
                LockKey::Link(event.link_id),
            ])
            .await
    }

    /// Recompute the aggregates of `scope` now
    pub async fn rebuild(&self, scope: AggregateScope) -> ReferralResult<RebuildReport> {
        self.maintainer.rebuild(scope, &CancellationToken::new()).await
    }

    /// Recompute the aggregates of `scope` on a background task
    pub fn spawn_rebuild(&self, scope: AggregateScope) -> RebuildHandle {
        self.maintainer.spawn_rebuild(scope)
    }

    /// Cross-check stored aggregates against the log, repairing drift
    pub async fn verify(&self, scope: AggregateScope) -> ReferralResult<DriftReport> {
        self.maintainer.verify(scope).await
    }

    pub async fn promoter_totals(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<PromoterTotals> {
        self.store.promoter_totals(program_id, promoter_id).await
    }

    pub async fn promoter_daily(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<PromoterRow>> {
        self.store.promoter_daily(program_id, promoter_id).await
    }

    pub async fn link_totals(&self, link_id: LinkId) -> ReferralResult<LinkTotals> {
        self.store.link_totals(link_id).await
    }

    pub async fn link_daily(&self, link_id: LinkId) -> ReferralResult<Vec<LinkRow>> {
        self.store.link_daily(link_id).await
    }

    pub async fn aggregate_rows(&self, scope: AggregateScope) -> ReferralResult<AggregateRows> {
        self.store.aggregate_rows(&scope).await
    }

    pub async fn commissions(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<Commission>> {
        self.store.commissions(program_id, promoter_id).await
    }

    pub async fn membership(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Option<CircleMembership>> {
        self.store.membership(program_id, promoter_id).await
    }

    pub async fn failed_effects(&self) -> ReferralResult<Vec<FailedEffect>> {
        self.store.failed_effects(false).await
    }

    /// Commit, demoting refused circle transitions to failures
    ///
    /// The event and its other effects are recorded even when a transition's
    /// starting circle went stale.
    async fn commit(&self, uow: &mut UnitOfWork) -> ReferralResult<CommitReceipt> {
        match self.commit_with_retry(uow).await {
            Err(err @ ReferralError::ConcurrentSwitchRejected(_)) if !uow.transitions().is_empty() => {
                warn!(error = %err, "circle transition refused at commit, recorded as failure");
                uow.demote_transitions(&err, Utc::now());
                self.commit_with_retry(uow).await
            }
            other => other,
        }
    }

    /// Commit, retrying transient store errors with exponential backoff
    async fn commit_with_retry(&self, uow: &UnitOfWork) -> ReferralResult<CommitReceipt> {
        let mut attempt = 0;
        loop {
            match self.store.commit(uow).await {
                Err(err) if err.is_transient() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    let delay = self.config.backoff_for(attempt);
                    warn!(attempt, ?delay, error = %err, "commit failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Spawn delivery of the committed commissions and switches
    fn forward(&self, uow: &UnitOfWork) {
        let mut commission_events = uow
            .events()
            .iter()
            .filter(|e| e.event_type == EventType::CommissionGenerated);
        // commissions and their events are staged in the same order
        let mut notifications: Vec<Notification> = uow
            .commissions()
            .iter()
            .filter_map(|commission| {
                commission_events.next().map(|event| Notification::CommissionGenerated {
                    commission: commission.clone(),
                    event_id: event.event_id,
                    correlation_id: event.correlation_id,
                })
            })
            .collect();
        notifications.extend(uow.transitions().iter().map(|staged| Notification::CircleSwitched {
            transition: staged.transition.clone(),
        }));
        spawn_delivery(Arc::clone(&self.notifier), notifications);
    }
}
