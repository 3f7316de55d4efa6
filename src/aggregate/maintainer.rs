// Copyright (c) 2025 - Cowboy AI, Inc.
//! Aggregate Maintainer
//!
//! Keeps the rollups consistent with the event log.
//!
//! - **Incremental**: as a dispatch handler, folds every staged event into the
//!   unit of work's delta book; the store merges it in the same commit as the
//!   event itself.
//! - **Rebuild**: folds the log of a scope in batches and swaps the result in.
//!   Events committed while the rebuild ran are replayed on top at swap time,
//!   so incremental writes never wait for a rebuild.
//! - **Verify**: folds the log up to a watermark and compares it with the
//!   stored rollups at that same watermark; drifted keys are repaired.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::rollup::{AggregateBook, AggregateScope};
use crate::config::EngineConfig;
use crate::dispatcher::EventHandler;
use crate::errors::{ReferralError, ReferralResult};
use crate::events::ReferralEvent;
use crate::store::{ReferralStore, UnitOfWork};

/// Outcome of a rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub scope: AggregateScope,
    /// Events folded from the log
    pub folded: usize,
    /// Events committed during the rebuild and replayed at swap time
    pub replayed: usize,
    pub watermark: u64,
}

/// Outcome of a verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub scope: AggregateScope,
    pub watermark: u64,
    /// One line per drifted key
    pub drifted: Vec<String>,
    pub repaired: bool,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }

    /// `AggregateDrift` if any key drifted
    pub fn into_result(self) -> ReferralResult<()> {
        if self.is_clean() {
            return Ok(());
        }
        Err(ReferralError::AggregateDrift {
            key: self.scope.to_string(),
            detail: self.drifted.join("; "),
        })
    }
}

/// Handle on a background rebuild
pub struct RebuildHandle {
    cancel: CancellationToken,
    join: JoinHandle<ReferralResult<RebuildReport>>,
}

impl RebuildHandle {
    /// Ask the rebuild to stop at its next batch boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> ReferralResult<RebuildReport> {
        self.join
            .await
            .map_err(|e| ReferralError::Cancelled(format!("rebuild task: {}", e)))?
    }
}

/// Incremental handler plus rebuild and verification
pub struct AggregateMaintainer {
    store: Arc<dyn ReferralStore>,
    config: EngineConfig,
}

impl AggregateMaintainer {
    pub fn new(store: Arc<dyn ReferralStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Incremental update for one event: `onEvent(event) -> updated aggregates`
    pub fn on_event(&self, event: &ReferralEvent, delta: &mut AggregateBook) -> ReferralResult<()> {
        delta.apply(event)
    }

    /// Fold the log of `scope` up to `watermark`
    async fn fold(
        &self,
        scope: &AggregateScope,
        watermark: u64,
        cancel: &CancellationToken,
    ) -> ReferralResult<(AggregateBook, usize)> {
        let mut book = AggregateBook::default();
        let mut after = 0;
        let mut folded = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ReferralError::Cancelled(format!("rebuild of {}", scope)));
            }
            let batch = self
                .store
                .events(scope, after, self.config.rebuild_batch_size)
                .await?;
            let full = batch.len() == self.config.rebuild_batch_size;

            for stored in batch.iter().take_while(|e| e.sequence <= watermark) {
                book.apply(&stored.event)?;
                folded += 1;
            }
            match batch.last() {
                Some(last) if full && last.sequence < watermark => after = last.sequence,
                _ => break,
            }
            tokio::task::yield_now().await;
        }
        Ok((book, folded))
    }

    /// Recompute the aggregates of `scope` from the log and swap them in
    pub async fn rebuild(
        &self,
        scope: AggregateScope,
        cancel: &CancellationToken,
    ) -> ReferralResult<RebuildReport> {
        let watermark = self.store.watermark().await?;
        let (book, folded) = self.fold(&scope, watermark, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ReferralError::Cancelled(format!("rebuild of {}", scope)));
        }
        let replayed = self.store.replace_aggregates(&scope, book, watermark).await?;

        info!(%scope, folded, replayed, watermark, "aggregates rebuilt");
        Ok(RebuildReport {
            scope,
            folded,
            replayed,
            watermark,
        })
    }

    /// Run a rebuild in the background, bounded by `rebuild_timeout`
    pub fn spawn_rebuild(self: &Arc<Self>, scope: AggregateScope) -> RebuildHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);
        let timeout: Duration = self.config.rebuild_timeout;

        let join = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, this.rebuild(scope, &token)).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    warn!(%scope, ?timeout, "rebuild timed out");
                    Err(ReferralError::Timeout(format!("rebuild of {}", scope)))
                }
            };
            if let Err(err) = &result {
                error!(%scope, error = %err, "background rebuild failed");
            }
            result
        });

        RebuildHandle { cancel, join }
    }

    /// Compare stored aggregates with a fold of the log; repair drifted keys
    pub async fn verify(&self, scope: AggregateScope) -> ReferralResult<DriftReport> {
        let snapshot = self.store.snapshot(&scope).await?;
        let (rebuilt, _) = self
            .fold(&scope, snapshot.watermark, &CancellationToken::new())
            .await?;
        let rebuilt = rebuilt.restrict(&scope);
        let drifted = snapshot.book.diff(&rebuilt);

        let repaired = if drifted.is_empty() {
            false
        } else {
            for line in &drifted {
                error!(%scope, drift = %line, "aggregate drift detected");
            }
            self.store
                .replace_aggregates(&scope, rebuilt, snapshot.watermark)
                .await?;
            true
        };

        Ok(DriftReport {
            scope,
            watermark: snapshot.watermark,
            drifted,
            repaired,
        })
    }
}

/// Dispatcher name of the aggregate maintainer
pub const AGGREGATES_HANDLER: &str = "aggregates";

impl EventHandler for AggregateMaintainer {
    fn name(&self) -> &'static str {
        AGGREGATES_HANDLER
    }

    fn handle(
        &self,
        event: &ReferralEvent,
        _depth: u8,
        uow: &mut UnitOfWork,
    ) -> ReferralResult<Vec<ReferralEvent>> {
        self.on_event(event, uow.delta_mut())?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{PromoterKey, PromoterTotals};
    use crate::domain::{ContactId, LinkId, ProgramId, PromoterId};
    use crate::store::{EvaluationContext, InMemoryReferralStore};
    use chrono::{DateTime, Utc};

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn commit_signups(store: &InMemoryReferralStore, program: ProgramId, promoter: PromoterId, n: usize) {
        for _ in 0..n {
            let event = ReferralEvent::signup(program, promoter, ContactId::new(), LinkId::new(), ts());
            let mut uow = UnitOfWork::new(EvaluationContext::new(program, promoter));
            uow.stage_event(event.clone());
            uow.delta_mut().apply(&event).unwrap();
            store.commit(&uow).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rebuild_reproduces_incremental_totals_in_small_batches() {
        let store = Arc::new(InMemoryReferralStore::new());
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        commit_signups(&store, program, promoter, 7).await;
        let before = store.promoter_totals(program, promoter).await.unwrap();

        let maintainer = AggregateMaintainer::new(
            store.clone(),
            EngineConfig::default().with_rebuild_batch_size(3),
        );
        let report = maintainer
            .rebuild(AggregateScope::promoter(program, promoter), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.folded, 7);
        assert_eq!(store.promoter_totals(program, promoter).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancelled_rebuild_changes_nothing() {
        let store = Arc::new(InMemoryReferralStore::new());
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        commit_signups(&store, program, promoter, 2).await;
        let key = PromoterKey::new(program, promoter);
        store
            .overwrite_promoter_totals(key, PromoterTotals::default())
            .await;

        let maintainer = AggregateMaintainer::new(store.clone(), EngineConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = maintainer
            .rebuild(AggregateScope::promoter(program, promoter), &cancel)
            .await;

        assert!(matches!(result, Err(ReferralError::Cancelled(_))));
        assert_eq!(store.promoter_totals(program, promoter).await.unwrap().total_signups, 0);
    }

    #[tokio::test]
    async fn test_verify_detects_and_repairs_drift() {
        let store = Arc::new(InMemoryReferralStore::new());
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        commit_signups(&store, program, promoter, 3).await;
        let key = PromoterKey::new(program, promoter);
        store
            .overwrite_promoter_totals(
                key,
                PromoterTotals {
                    total_signups: 99,
                    ..PromoterTotals::default()
                },
            )
            .await;

        let maintainer = AggregateMaintainer::new(store.clone(), EngineConfig::default());
        let scope = AggregateScope::promoter(program, promoter);
        let report = maintainer.verify(scope).await.unwrap();

        assert!(report.repaired);
        assert_eq!(report.drifted.len(), 1);
        assert!(matches!(
            report.into_result(),
            Err(ReferralError::AggregateDrift { .. })
        ));
        assert_eq!(store.promoter_totals(program, promoter).await.unwrap().total_signups, 3);
        assert!(maintainer.verify(scope).await.unwrap().is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_rebuild_completes() {
        let store = Arc::new(InMemoryReferralStore::new());
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        commit_signups(&store, program, promoter, 4).await;

        let maintainer = Arc::new(AggregateMaintainer::new(store.clone(), EngineConfig::default()));
        let handle = maintainer.spawn_rebuild(AggregateScope::Program { program_id: program });
        let report = handle.join().await.unwrap();

        assert_eq!(report.folded, 4);
        assert_eq!(report.watermark, 4);
    }

    /// Maintainer over a log of `n` signups that takes roughly `n * 20ms` to fold
    async fn slow_rebuild_setup(
        n: usize,
        timeout: Duration,
    ) -> (Arc<InMemoryReferralStore>, Arc<AggregateMaintainer>, ProgramId, PromoterId) {
        let store = Arc::new(InMemoryReferralStore::new());
        let program = ProgramId::new();
        let promoter = PromoterId::new();
        commit_signups(&store, program, promoter, n).await;
        store
            .overwrite_promoter_totals(
                PromoterKey::new(program, promoter),
                PromoterTotals {
                    total_signups: 99,
                    ..PromoterTotals::default()
                },
            )
            .await;
        store.delay_log_scans(Duration::from_millis(20));
        let config = EngineConfig::default()
            .with_rebuild_batch_size(1)
            .with_rebuild_timeout(timeout);
        let maintainer = Arc::new(AggregateMaintainer::new(store.clone(), config));
        (store, maintainer, program, promoter)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_rebuild_times_out_without_swapping() {
        let (store, maintainer, program, promoter) = slow_rebuild_setup(10, Duration::from_millis(5)).await;

        let handle = maintainer.spawn_rebuild(AggregateScope::promoter(program, promoter));
        let result = handle.join().await;

        assert!(matches!(result, Err(ReferralError::Timeout(_))));
        assert_eq!(store.promoter_totals(program, promoter).await.unwrap().total_signups, 99);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelling_a_running_rebuild_stops_it() {
        let (store, maintainer, program, promoter) = slow_rebuild_setup(10, Duration::from_secs(30)).await;

        let handle = maintainer.spawn_rebuild(AggregateScope::promoter(program, promoter));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        handle.cancel();
        let result = handle.join().await;

        assert!(matches!(result, Err(ReferralError::Cancelled(_))));
        assert_eq!(store.promoter_totals(program, promoter).await.unwrap().total_signups, 99);
    }
}
