// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property Tests: Rebuild Equivalence
//!
//! For any sequence of signups and purchases across promoters, links and days,
//! the incrementally maintained rollups equal a full rebuild from the log.

use proptest::prelude::*;

use crate::fixtures::*;
use cim_referral::{
    AggregateScope, ContactId, EngineConfig, EventType, Money, ReferralEvent, ReferralService, Rule,
};

#[derive(Debug, Clone)]
struct Step {
    purchase: bool,
    other_promoter: bool,
    other_link: bool,
    day: i64,
    revenue_cents: i64,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (any::<bool>(), any::<bool>(), any::<bool>(), 0i64..4, 0i64..50_000).prop_map(
        |(purchase, other_promoter, other_link, day, revenue_cents)| Step {
            purchase,
            other_promoter,
            other_link,
            day,
            revenue_cents,
        },
    )
}

fn to_event(n: u64, step: &Step) -> ReferralEvent {
    let mut event = if step.purchase {
        let mut event = purchase(n, "0");
        event.revenue = Some(Money::from_units(step.revenue_cents * 100));
        event
    } else {
        signup(n)
    };
    if step.other_promoter {
        event.promoter_id = other_promoter();
    }
    if step.other_link {
        event.link_id = other_link();
    }
    event.contact_id = ContactId::new();
    event.occurred_at = day(step.day);
    event
}

async fn seeded_service() -> ReferralService {
    let (base, gold) = circles();
    let promote = Rule::new(
        program(),
        "promote",
        EventType::CommissionGenerated,
        vec![],
        switch_to(&gold),
    )
    .expect("valid rule");
    let (_store, service) = service_with(
        EngineConfig::default().with_rebuild_batch_size(3),
        &[base, gold],
        vec![signup_threshold_rule(3, 2), revenue_rule(100, 5), promote],
    )
    .await;
    service
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: rebuild(log) == incremental rollups, and verify finds no drift
    #[test]
    fn prop_rebuild_matches_incremental(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let (before, after, clean, signups, daily) = tokio_test::block_on(async {
            let service = seeded_service().await;
            for (n, step) in steps.iter().enumerate() {
                service
                    .publish(to_event(n as u64 + 1, step))
                    .await
                    .expect("publish failed");
            }
            let before = service.aggregate_rows(AggregateScope::All).await.expect("rows");
            service.rebuild(AggregateScope::All).await.expect("rebuild");
            let after = service.aggregate_rows(AggregateScope::All).await.expect("rows");
            let clean = service.verify(AggregateScope::All).await.expect("verify").is_clean();
            let signups: u64 = after.promoters.iter().map(|row| row.totals.total_signups).sum();
            let daily: u64 = after.promoter_days.iter().map(|row| row.totals.total_signups).sum();
            (before, after, clean, signups, daily)
        });

        prop_assert_eq!(before, after);
        prop_assert!(clean);
        prop_assert_eq!(signups, steps.iter().filter(|s| !s.purchase).count() as u64);
        prop_assert_eq!(daily, signups);
    }

    /// Property: redelivering already published events leaves rollups untouched
    #[test]
    fn prop_redelivery_is_idempotent(
        steps in prop::collection::vec(step_strategy(), 1..20),
        replay in 0usize..20,
    ) {
        let (first, second, duplicates) = tokio_test::block_on(async {
            let service = seeded_service().await;
            let events: Vec<_> = steps
                .iter()
                .enumerate()
                .map(|(n, step)| to_event(n as u64 + 1, step))
                .collect();
            for event in &events {
                service.publish(event.clone()).await.expect("publish failed");
            }
            let first = service.aggregate_rows(AggregateScope::All).await.expect("rows");

            let mut duplicates = 0;
            for event in events.iter().take(replay) {
                if service.publish(event.clone()).await.expect("publish failed").is_duplicate() {
                    duplicates += 1;
                }
            }
            let second = service.aggregate_rows(AggregateScope::All).await.expect("rows");
            (first, second, duplicates)
        });

        prop_assert_eq!(first, second);
        prop_assert_eq!(duplicates, replay.min(steps.len()));
    }
}
