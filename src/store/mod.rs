// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Store Abstraction
//!
//! The store owns everything that must change together with an event:
//! the append-only log, commissions, circle memberships, failed-effect records
//! and the aggregate rollups.
//!
//! # Transaction Boundary
//!
//! ```text
//! load_context ──→ UnitOfWork ──→ dispatch (aggregates, rules) ──→ commit
//!                   (staged)                                        (atomic)
//! ```
//!
//! Everything a dispatch produces is staged in a [`UnitOfWork`] first.
//! [`ReferralStore::commit`] makes all of it visible in one step or none of it:
//! a reader never sees an event without its aggregate contribution, or the
//! other way round.
//!
//! # Store Requirements
//!
//! 1. **Append-Only**: events are never updated or deleted
//! 2. **Dedup**: committing an event id twice is rejected
//! 3. **Compare-and-set**: a circle transition commits only if the promoter is
//!    still in the circle the transition started from
//! 4. **Ordered**: committed events receive increasing sequence numbers, used
//!    as rebuild watermarks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::aggregate::{
    AggregateBook, AggregateRows, AggregateScope, LinkRow, LinkTotals, PromoterKey, PromoterRow,
    PromoterTotals,
};
use crate::domain::{
    Circle, CircleId, CircleMembership, CircleTransition, Commission, Effect, EventId, FailedEffect,
    FailureId, FailureOrigin, LinkId, ProgramId, PromoterId, Rule, RuleId,
};
use crate::errors::{ReferralError, ReferralResult};
use crate::events::ReferralEvent;
use crate::locks::SwitchPermit;

pub mod memory;

pub use memory::InMemoryReferralStore;

/// Committed event with its log position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position in the log, starting at 1
    pub sequence: u64,
    pub event: ReferralEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregates of a scope together with the log position they reflect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub book: AggregateBook,
    pub watermark: u64,
}

/// Everything rule evaluation for one promoter needs, loaded up front
///
/// Passed explicitly into evaluation; nothing is read from shared state while
/// the dispatch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    /// Active rules of the program in declaration order
    pub rules: Vec<Rule>,
    pub circles: Vec<Circle>,
    pub membership: Option<CircleMembership>,
    /// Committed totals, not including anything staged
    pub promoter_totals: PromoterTotals,
}

impl EvaluationContext {
    pub fn new(program_id: ProgramId, promoter_id: PromoterId) -> Self {
        Self {
            program_id,
            promoter_id,
            rules: Vec::new(),
            circles: Vec::new(),
            membership: None,
            promoter_totals: PromoterTotals::default(),
        }
    }

    /// Explicit membership, else the program's default circle
    pub fn current_circle(&self) -> Option<CircleId> {
        self.membership
            .as_ref()
            .map(|m| m.circle_id)
            .or_else(|| self.circles.iter().find(|c| c.is_default).map(|c| c.circle_id))
    }

    pub fn circle_exists(&self, circle_id: CircleId) -> bool {
        self.circles
            .iter()
            .any(|c| c.circle_id == circle_id && c.program_id == self.program_id)
    }

    pub fn promoter_key(&self) -> PromoterKey {
        PromoterKey::new(self.program_id, self.promoter_id)
    }
}

/// Staged circle transition plus what produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTransition {
    pub transition: CircleTransition,
    /// `None` for manual switches
    pub rule_id: Option<RuleId>,
    pub event_id: Option<EventId>,
    pub depth: u8,
}

/// Pending changes of one dispatch, committed all-or-nothing
#[derive(Debug)]
pub struct UnitOfWork {
    pub context: EvaluationContext,
    events: Vec<ReferralEvent>,
    staged_ids: HashSet<EventId>,
    evaluated: HashSet<EventId>,
    commissions: Vec<Commission>,
    transitions: Vec<StagedTransition>,
    failures: Vec<FailedEffect>,
    resolved: Vec<FailureId>,
    attempted: Vec<FailureId>,
    delta: AggregateBook,
    permits: Vec<SwitchPermit>,
}

impl UnitOfWork {
    pub fn new(context: EvaluationContext) -> Self {
        Self {
            context,
            events: Vec::new(),
            staged_ids: HashSet::new(),
            evaluated: HashSet::new(),
            commissions: Vec::new(),
            transitions: Vec::new(),
            failures: Vec::new(),
            resolved: Vec::new(),
            attempted: Vec::new(),
            delta: AggregateBook::default(),
            permits: Vec::new(),
        }
    }

    /// Stage an event for append; `false` if the id is already staged
    pub fn stage_event(&mut self, event: ReferralEvent) -> bool {
        if !self.staged_ids.insert(event.event_id) {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn is_staged(&self, event_id: EventId) -> bool {
        self.staged_ids.contains(&event_id)
    }

    /// Claim rule evaluation for an event; `false` if it was already evaluated
    pub fn mark_evaluated(&mut self, event_id: EventId) -> bool {
        self.evaluated.insert(event_id)
    }

    pub fn stage_commission(&mut self, commission: Commission) {
        self.commissions.push(commission);
    }

    /// Stage a transition and move the context's membership along with it
    pub fn stage_transition(&mut self, staged: StagedTransition) {
        self.context.membership = Some(staged.transition.membership());
        self.transitions.push(staged);
    }

    pub fn record_failure(&mut self, failure: FailedEffect) {
        self.failures.push(failure);
    }

    pub fn resolve_failure(&mut self, failure_id: FailureId) {
        self.resolved.push(failure_id);
    }

    /// Count another retry attempt against a recorded failure
    pub fn record_attempt(&mut self, failure_id: FailureId) {
        self.attempted.push(failure_id);
    }

    pub fn hold_permit(&mut self, permit: SwitchPermit) {
        self.permits.push(permit);
    }

    pub fn holds_permit_for(&self, program_id: ProgramId, promoter_id: PromoterId) -> bool {
        self.permits
            .iter()
            .any(|p| p.program_id() == program_id && p.promoter_id() == promoter_id)
    }

    pub fn delta_mut(&mut self) -> &mut AggregateBook {
        &mut self.delta
    }

    /// Committed totals plus whatever this unit of work has staged
    pub fn current_totals(&self) -> ReferralResult<PromoterTotals> {
        let key = self.context.promoter_key();
        self.context
            .promoter_totals
            .checked_add(&self.delta.promoter(&key))
            .ok_or_else(|| ReferralError::Store(format!("promoter totals overflow for {}", key.promoter_id)))
    }

    /// Turn every staged transition into a failure record
    ///
    /// Used when the store refused the transitions on commit; the rest of the
    /// unit of work can still be recorded.
    pub fn demote_transitions(&mut self, error: &ReferralError, now: DateTime<Utc>) {
        for staged in std::mem::take(&mut self.transitions) {
            let origin = match staged.event_id {
                Some(_) => FailureOrigin::Effect,
                None => FailureOrigin::ManualSwitch,
            };
            let failure = FailedEffect::new(
                staged.event_id,
                staged.transition.program_id,
                staged.transition.promoter_id,
                staged.rule_id,
                Some(Effect::SwitchCircle {
                    target_circle_id: staged.transition.to,
                }),
                error,
                staged.depth,
                now,
            );
            self.failures.push(failure.with_origin(origin));
        }
    }

    pub fn events(&self) -> &[ReferralEvent] {
        &self.events
    }

    pub fn commissions(&self) -> &[Commission] {
        &self.commissions
    }

    pub fn transitions(&self) -> &[StagedTransition] {
        &self.transitions
    }

    pub fn failures(&self) -> &[FailedEffect] {
        &self.failures
    }

    pub fn resolved(&self) -> &[FailureId] {
        &self.resolved
    }

    pub fn attempted(&self) -> &[FailureId] {
        &self.attempted
    }

    pub fn delta(&self) -> &AggregateBook {
        &self.delta
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.commissions.is_empty()
            && self.transitions.is_empty()
            && self.failures.is_empty()
            && self.resolved.is_empty()
            && self.attempted.is_empty()
    }
}

/// What a commit made visible
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Sequence of the last appended event, or the log head if none were staged
    pub last_sequence: u64,
    pub events: usize,
    pub commissions: usize,
    pub transitions: usize,
    pub failures: usize,
}

/// Transactional storage for the referral core
#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Rules, circles, membership and committed totals for a promoter
    async fn load_context(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<EvaluationContext>;

    /// Whether an event id is already in the log
    async fn has_event(&self, event_id: EventId) -> ReferralResult<bool>;

    /// A committed event by id
    async fn event(&self, event_id: EventId) -> ReferralResult<Option<StoredEvent>>;

    /// Apply a unit of work atomically
    ///
    /// # Errors
    ///
    /// - `DuplicateEvent` if a staged event id is already committed
    /// - `ConcurrentSwitchRejected` if a transition's starting circle is stale
    /// - `FailureNotFound` if a resolved or retried failure does not exist
    /// - `Store` for storage failures (transient, may be retried)
    async fn commit(&self, uow: &UnitOfWork) -> ReferralResult<CommitReceipt>;

    /// Sequence of the newest committed event (0 when empty)
    async fn watermark(&self) -> ReferralResult<u64>;

    /// Up to `limit` events in `scope` with a sequence above `after`, in log order
    async fn events(
        &self,
        scope: &AggregateScope,
        after: u64,
        limit: usize,
    ) -> ReferralResult<Vec<StoredEvent>>;

    /// Aggregates of `scope` and the watermark they reflect, read atomically
    async fn snapshot(&self, scope: &AggregateScope) -> ReferralResult<AggregateSnapshot>;

    /// Swap the aggregates of `scope` for `rebuilt`, which reflects the log up
    /// to `as_of`; events committed after `as_of` are replayed on top first
    ///
    /// Returns the number of replayed events.
    async fn replace_aggregates(
        &self,
        scope: &AggregateScope,
        rebuilt: AggregateBook,
        as_of: u64,
    ) -> ReferralResult<usize>;

    async fn promoter_totals(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<PromoterTotals>;

    async fn promoter_daily(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<PromoterRow>>;

    /// Link totals summed over every promoter the link was used under
    async fn link_totals(&self, link_id: LinkId) -> ReferralResult<LinkTotals>;

    async fn link_daily(&self, link_id: LinkId) -> ReferralResult<Vec<LinkRow>>;

    /// Read-only rows for reporting
    async fn aggregate_rows(&self, scope: &AggregateScope) -> ReferralResult<AggregateRows>;

    async fn commissions(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<Commission>>;

    async fn membership(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Option<CircleMembership>>;

    async fn failed_effects(&self, include_resolved: bool) -> ReferralResult<Vec<FailedEffect>>;

    async fn failed_effect(&self, failure_id: FailureId) -> ReferralResult<Option<FailedEffect>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContactId, Money};
    use crate::events::EventType;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_current_circle_falls_back_to_default() {
        let program = ProgramId::new();
        let mut context = EvaluationContext::new(program, PromoterId::new());
        let base = Circle::default_for(program, "base");
        let gold = Circle::new(program, "gold");
        context.circles = vec![base.clone(), gold.clone()];

        assert_eq!(context.current_circle(), Some(base.circle_id));
        assert!(context.circle_exists(gold.circle_id));
        assert!(!context.circle_exists(CircleId::new()));
    }

    #[test]
    fn test_stage_transition_moves_membership() {
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        let mut uow = UnitOfWork::new(EvaluationContext::new(program, promoter));
        let target = CircleId::new();

        uow.stage_transition(StagedTransition {
            transition: CircleTransition {
                program_id: program,
                promoter_id: promoter,
                from: None,
                to: target,
                at: ts(),
            },
            rule_id: None,
            event_id: None,
            depth: 0,
        });

        assert_eq!(uow.context.current_circle(), Some(target));
        assert_eq!(uow.transitions().len(), 1);
    }

    #[test]
    fn test_stage_event_rejects_repeated_id() {
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        let event = ReferralEvent::signup(program, promoter, ContactId::new(), LinkId::new(), ts());
        let mut uow = UnitOfWork::new(EvaluationContext::new(program, promoter));

        assert!(uow.stage_event(event.clone()));
        assert!(!uow.stage_event(event.clone()));
        assert!(uow.is_staged(event.event_id));
        assert_eq!(uow.events().len(), 1);
    }

    #[test]
    fn test_current_totals_include_staged_delta() {
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        let mut context = EvaluationContext::new(program, promoter);
        context.promoter_totals.total_signups = 4;
        let mut uow = UnitOfWork::new(context);

        let event = ReferralEvent::signup(program, promoter, ContactId::new(), LinkId::new(), ts());
        uow.delta_mut().apply(&event).unwrap();

        let totals = uow.current_totals().unwrap();
        assert_eq!(totals.total_signups, 5);
        assert_eq!(totals.total_revenue, Money::ZERO);
        assert_eq!(event.event_type, EventType::Signup);
    }

    #[test]
    fn test_demote_transitions_records_failures() {
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        let mut uow = UnitOfWork::new(EvaluationContext::new(program, promoter));
        let rule_id = RuleId::new();
        uow.stage_transition(StagedTransition {
            transition: CircleTransition {
                program_id: program,
                promoter_id: promoter,
                from: None,
                to: CircleId::new(),
                at: ts(),
            },
            rule_id: Some(rule_id),
            event_id: Some(EventId::new()),
            depth: 0,
        });

        uow.demote_transitions(&ReferralError::ConcurrentSwitchRejected(promoter), ts());

        assert!(uow.transitions().is_empty());
        assert_eq!(uow.failures().len(), 1);
        assert_eq!(uow.failures()[0].kind, "concurrent_switch_rejected");
        assert_eq!(uow.failures()[0].rule_id, Some(rule_id));
        assert_eq!(uow.failures()[0].origin, FailureOrigin::Effect);
    }

    #[test]
    fn test_demoted_manual_switch_has_no_event() {
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        let target = CircleId::new();
        let mut uow = UnitOfWork::new(EvaluationContext::new(program, promoter));
        uow.stage_transition(StagedTransition {
            transition: CircleTransition {
                program_id: program,
                promoter_id: promoter,
                from: None,
                to: target,
                at: ts(),
            },
            rule_id: None,
            event_id: None,
            depth: 0,
        });

        uow.demote_transitions(&ReferralError::ConcurrentSwitchRejected(promoter), ts());

        let failure = &uow.failures()[0];
        assert_eq!(failure.event_id, None);
        assert_eq!(failure.origin, FailureOrigin::ManualSwitch);
        assert_eq!(
            failure.effect,
            Some(Effect::SwitchCircle {
                target_circle_id: target
            })
        );
    }
}
