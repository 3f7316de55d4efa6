// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory Referral Store
//!
//! Reference [`ReferralStore`] kept behind one `tokio::sync::RwLock`. A commit
//! validates everything under the write lock before touching any state, so it
//! becomes visible in a single step.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    AggregateSnapshot, CommitReceipt, EvaluationContext, ReferralStore, StoredEvent, UnitOfWork,
};
use crate::aggregate::{
    AggregateBook, AggregateRows, AggregateScope, LinkRow, LinkTotals, PromoterKey, PromoterRow,
    PromoterTotals,
};
use crate::domain::{
    Circle, CircleId, CircleMembership, Commission, EventId, FailedEffect, FailureId, LinkId,
    ProgramId, PromoterId, Rule,
};
use crate::errors::{ReferralError, ReferralResult};

#[derive(Debug, Default)]
struct State {
    log: Vec<StoredEvent>,
    index: HashMap<EventId, usize>,
    rules: Vec<Rule>,
    circles: Vec<Circle>,
    memberships: HashMap<(ProgramId, PromoterId), CircleMembership>,
    book: AggregateBook,
    commissions: Vec<Commission>,
    failures: Vec<FailedEffect>,
}

impl State {
    fn head(&self) -> u64 {
        self.log.last().map(|e| e.sequence).unwrap_or(0)
    }

    fn current_circle(&self, program_id: ProgramId, promoter_id: PromoterId) -> Option<CircleId> {
        self.memberships
            .get(&(program_id, promoter_id))
            .map(|m| m.circle_id)
            .or_else(|| {
                self.circles
                    .iter()
                    .find(|c| c.program_id == program_id && c.is_default)
                    .map(|c| c.circle_id)
            })
    }

    fn failure_mut(&mut self, failure_id: FailureId) -> Option<&mut FailedEffect> {
        self.failures.iter_mut().find(|f| f.failure_id == failure_id)
    }

    /// Refuse the unit of work before anything is written
    fn check(&self, uow: &UnitOfWork) -> ReferralResult<()> {
        if let Some(dup) = uow.events().iter().find(|e| self.index.contains_key(&e.event_id)) {
            return Err(ReferralError::DuplicateEvent(dup.event_id));
        }

        // Transitions chain within one unit of work: each starts where the
        // previous one ended.
        let mut observed: HashMap<(ProgramId, PromoterId), Option<CircleId>> = HashMap::new();
        for staged in uow.transitions() {
            let t = &staged.transition;
            let key = (t.program_id, t.promoter_id);
            let current = *observed
                .entry(key)
                .or_insert_with(|| self.current_circle(t.program_id, t.promoter_id));
            if current != t.from {
                return Err(ReferralError::ConcurrentSwitchRejected(t.promoter_id));
            }
            observed.insert(key, Some(t.to));
        }

        if let Some(missing) = uow
            .resolved()
            .iter()
            .chain(uow.attempted())
            .find(|id| !self.failures.iter().any(|f| f.failure_id == **id))
        {
            return Err(ReferralError::FailureNotFound(*missing));
        }
        Ok(())
    }
}

/// In-memory [`ReferralStore`]
#[derive(Debug, Default)]
pub struct InMemoryReferralStore {
    state: RwLock<State>,
    failing_commits: AtomicUsize,
    /// Added to every log scan, in milliseconds
    scan_delay_ms: AtomicU64,
}

impl InMemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; rules are evaluated in the order they were put
    pub async fn put_rule(&self, rule: Rule) -> ReferralResult<()> {
        rule.validate()?;
        let mut state = self.state.write().await;
        match state.rules.iter_mut().find(|r| r.rule_id == rule.rule_id) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
        Ok(())
    }

    /// Add a circle; a program has at most one default circle
    pub async fn put_circle(&self, circle: Circle) -> ReferralResult<()> {
        let mut state = self.state.write().await;
        if circle.is_default
            && state.circles.iter().any(|c| {
                c.program_id == circle.program_id && c.is_default && c.circle_id != circle.circle_id
            })
        {
            return Err(ReferralError::Validation(format!(
                "program {} already has a default circle",
                circle.program_id
            )));
        }
        state.circles.retain(|c| c.circle_id != circle.circle_id);
        state.circles.push(circle);
        Ok(())
    }

    /// Place a promoter in a circle without going through a transition
    pub async fn assign_circle(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
        circle_id: CircleId,
    ) -> ReferralResult<()> {
        let mut state = self.state.write().await;
        if !state
            .circles
            .iter()
            .any(|c| c.circle_id == circle_id && c.program_id == program_id)
        {
            return Err(ReferralError::CircleNotFound(circle_id));
        }
        state.memberships.insert(
            (program_id, promoter_id),
            CircleMembership {
                program_id,
                promoter_id,
                circle_id,
                since: Utc::now(),
            },
        );
        Ok(())
    }

    /// Make the next `count` commits fail with a transient store error
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Slow down every log scan, e.g. to hold a rebuild between batches
    pub fn delay_log_scans(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.scan_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Overwrite stored promoter totals without touching the log
    ///
    /// Only useful to simulate drift.
    pub async fn overwrite_promoter_totals(&self, key: PromoterKey, totals: PromoterTotals) {
        let mut state = self.state.write().await;
        state.book.promoters.insert(key, totals);
    }

    /// Number of committed events
    pub async fn len(&self) -> usize {
        self.state.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.log.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ReferralStore for InMemoryReferralStore {
    async fn load_context(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<EvaluationContext> {
        let state = self.state.read().await;
        Ok(EvaluationContext {
            program_id,
            promoter_id,
            rules: state
                .rules
                .iter()
                .filter(|r| r.program_id == program_id && r.active)
                .cloned()
                .collect(),
            circles: state
                .circles
                .iter()
                .filter(|c| c.program_id == program_id)
                .cloned()
                .collect(),
            membership: state.memberships.get(&(program_id, promoter_id)).cloned(),
            promoter_totals: state.book.promoter(&PromoterKey::new(program_id, promoter_id)),
        })
    }

    async fn has_event(&self, event_id: EventId) -> ReferralResult<bool> {
        Ok(self.state.read().await.index.contains_key(&event_id))
    }

    async fn event(&self, event_id: EventId) -> ReferralResult<Option<StoredEvent>> {
        let state = self.state.read().await;
        Ok(state.index.get(&event_id).map(|i| state.log[*i].clone()))
    }

    async fn commit(&self, uow: &UnitOfWork) -> ReferralResult<CommitReceipt> {
        if self.take_injected_failure() {
            warn!("injected commit failure");
            return Err(ReferralError::Store("injected commit failure".to_string()));
        }

        let mut state = self.state.write().await;
        state.check(uow)?;
        // merge is all-or-nothing, so an overflow leaves the state untouched
        state.book.merge(uow.delta())?;

        let recorded_at = Utc::now();
        for event in uow.events() {
            let sequence = state.head() + 1;
            let position = state.log.len();
            state.index.insert(event.event_id, position);
            state.log.push(StoredEvent {
                sequence,
                event: event.clone(),
                recorded_at,
            });
        }
        state.commissions.extend(uow.commissions().iter().cloned());
        for staged in uow.transitions() {
            let t = &staged.transition;
            state
                .memberships
                .insert((t.program_id, t.promoter_id), t.membership());
        }
        state.failures.extend(uow.failures().iter().cloned());
        for id in uow.resolved() {
            if let Some(failure) = state.failure_mut(*id) {
                failure.resolved = true;
            }
        }
        for id in uow.attempted() {
            if let Some(failure) = state.failure_mut(*id) {
                failure.attempts += 1;
            }
        }

        let receipt = CommitReceipt {
            last_sequence: state.head(),
            events: uow.events().len(),
            commissions: uow.commissions().len(),
            transitions: uow.transitions().len(),
            failures: uow.failures().len(),
        };
        debug!(
            last_sequence = receipt.last_sequence,
            events = receipt.events,
            commissions = receipt.commissions,
            "unit of work committed"
        );
        Ok(receipt)
    }

    async fn watermark(&self) -> ReferralResult<u64> {
        Ok(self.state.read().await.head())
    }

    async fn events(
        &self,
        scope: &AggregateScope,
        after: u64,
        limit: usize,
    ) -> ReferralResult<Vec<StoredEvent>> {
        let delay = self.scan_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let state = self.state.read().await;
        // sequence n sits at index n - 1
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(state.log.len());
        Ok(state.log[start..]
            .iter()
            .filter(|e| scope.includes(&e.event))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn snapshot(&self, scope: &AggregateScope) -> ReferralResult<AggregateSnapshot> {
        let state = self.state.read().await;
        Ok(AggregateSnapshot {
            book: state.book.restrict(scope),
            watermark: state.head(),
        })
    }

    async fn replace_aggregates(
        &self,
        scope: &AggregateScope,
        mut rebuilt: AggregateBook,
        as_of: u64,
    ) -> ReferralResult<usize> {
        let mut state = self.state.write().await;
        let start = usize::try_from(as_of).unwrap_or(usize::MAX).min(state.log.len());
        let mut replayed = 0;
        for stored in state.log[start..].iter().filter(|e| scope.includes(&e.event)) {
            rebuilt.apply(&stored.event)?;
            replayed += 1;
        }
        state.book.replace_scope(scope, rebuilt);
        info!(%scope, as_of, replayed, "aggregates replaced");
        Ok(replayed)
    }

    async fn promoter_totals(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<PromoterTotals> {
        let state = self.state.read().await;
        Ok(state.book.promoter(&PromoterKey::new(program_id, promoter_id)))
    }

    async fn promoter_daily(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<PromoterRow>> {
        let key = PromoterKey::new(program_id, promoter_id);
        let state = self.state.read().await;
        Ok(state
            .book
            .promoter_days
            .range((key, chrono::NaiveDate::MIN)..=(key, chrono::NaiveDate::MAX))
            .map(|((k, day), totals)| PromoterRow {
                program_id: k.program_id,
                promoter_id: k.promoter_id,
                day: Some(*day),
                totals: *totals,
            })
            .collect())
    }

    async fn link_totals(&self, link_id: LinkId) -> ReferralResult<LinkTotals> {
        self.state.read().await.book.link_by_id(link_id)
    }

    async fn link_daily(&self, link_id: LinkId) -> ReferralResult<Vec<LinkRow>> {
        let state = self.state.read().await;
        Ok(state
            .book
            .link_days
            .iter()
            .filter(|((k, _), _)| k.link_id == link_id)
            .map(|((k, day), totals)| LinkRow {
                link_id: k.link_id,
                promoter_id: k.promoter_id,
                day: Some(*day),
                totals: *totals,
            })
            .collect())
    }

    async fn aggregate_rows(&self, scope: &AggregateScope) -> ReferralResult<AggregateRows> {
        let state = self.state.read().await;
        Ok(AggregateRows::from(&state.book.restrict(scope)))
    }

    async fn commissions(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Vec<Commission>> {
        let state = self.state.read().await;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.program_id == program_id && c.promoter_id == promoter_id)
            .cloned()
            .collect())
    }

    async fn membership(
        &self,
        program_id: ProgramId,
        promoter_id: PromoterId,
    ) -> ReferralResult<Option<CircleMembership>> {
        let state = self.state.read().await;
        Ok(state.memberships.get(&(program_id, promoter_id)).cloned())
    }

    async fn failed_effects(&self, include_resolved: bool) -> ReferralResult<Vec<FailedEffect>> {
        let state = self.state.read().await;
        Ok(state
            .failures
            .iter()
            .filter(|f| include_resolved || !f.resolved)
            .cloned()
            .collect())
    }

    async fn failed_effect(&self, failure_id: FailureId) -> ReferralResult<Option<FailedEffect>> {
        let state = self.state.read().await;
        Ok(state.failures.iter().find(|f| f.failure_id == failure_id).cloned())
    }
}
