// Copyright (c) 2025 - Cowboy AI, Inc.
//! Concurrency Tests
//!
//! Many tasks publishing for the same promoter and link at once must not lose
//! updates, fire a threshold rule twice, or let two circle switches interleave.

mod fixtures;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use cim_referral::{
    AggregateScope, Condition, ContactId, EngineConfig, EventType, Money, Operator, Parameter,
    PublishOutcome, ReferralError, ReferralService, Rule, SwitchOutcome,
};
use fixtures::*;

async fn publish_all(service: &Arc<ReferralService>, events: Vec<cim_referral::ReferralEvent>) {
    let tasks = events.into_iter().map(|event| {
        let service = Arc::clone(service);
        tokio::spawn(async move { service.publish(event).await })
    });
    for result in join_all(tasks).await {
        let outcome = result.expect("publish task panicked").expect("publish failed");
        assert!(!outcome.is_duplicate());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_lose_no_updates() {
    let (_store, service) = service_with(EngineConfig::default(), &[], vec![]).await;
    let service = Arc::new(service);

    let mut events = Vec::new();
    for n in 0..50 {
        let mut signup = signup(n);
        signup.contact_id = ContactId::new();
        events.push(signup);
        events.push(purchase(1000 + n, "10"));
    }
    publish_all(&service, events).await;

    let totals = service.promoter_totals(program(), promoter()).await.unwrap();
    assert_eq!(totals.total_signups, 50);
    assert_eq!(totals.total_purchases, 50);
    assert_eq!(totals.total_revenue, Money::from_whole(500));

    let link = service.link_totals(link()).await.unwrap();
    assert_eq!(link.signups, 50);
    assert_eq!(link.purchases, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_threshold_rule_fires_exactly_once_under_contention() {
    let rule = Rule::new(
        program(),
        "tenth signup",
        EventType::Signup,
        vec![Condition::new(Parameter::NumOfSignups, Operator::Equals, "10")],
        fixed(25),
    )
    .unwrap();
    let (_store, service) = service_with(EngineConfig::default(), &[], vec![rule]).await;
    let service = Arc::new(service);

    publish_all(&service, (1..=20).map(signup).collect()).await;

    let commissions = service.commissions(program(), promoter()).await.unwrap();
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].amount, Money::from_whole(25));
    let totals = service.promoter_totals(program(), promoter()).await.unwrap();
    assert_eq!(totals.total_signups, 20);
    assert_eq!(totals.total_commission, Money::from_whole(25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redelivery_commits_once() {
    let (store, service) =
        service_with(EngineConfig::default(), &[], vec![signup_threshold_rule(1, 10)]).await;
    let service = Arc::new(service);

    let tasks = (0..10).map(|_| {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.publish(signup(1)).await })
    });
    let outcomes: Vec<PublishOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("publish task panicked").expect("publish failed"))
        .collect();

    let committed = outcomes.iter().filter(|o| !o.is_duplicate()).count();
    assert_eq!(committed, 1);
    assert_eq!(store.len().await, 2);
    assert_eq!(service.commissions(program(), promoter()).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_manual_switches_apply_once() {
    let (base, gold) = circles();
    let (_store, service) = service_with(EngineConfig::default(), &[base, gold.clone()], vec![]).await;
    let service = Arc::new(service);

    let tasks = (0..10).map(|_| {
        let service = Arc::clone(&service);
        let target = gold.circle_id;
        tokio::spawn(async move { service.switch_circle(program(), promoter(), target).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("switch task panicked"))
        .collect();

    let switched = results
        .iter()
        .filter(|r| matches!(r, Ok(SwitchOutcome::Switched(_))))
        .count();
    assert_eq!(switched, 1);
    for result in &results {
        assert!(matches!(
            result,
            Ok(SwitchOutcome::Switched(_))
                | Ok(SwitchOutcome::NoOp(_))
                | Err(ReferralError::ConcurrentSwitchRejected(_))
        ));
    }
    let membership = service.membership(program(), promoter()).await.unwrap();
    assert_eq!(membership.map(|m| m.circle_id), Some(gold.circle_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rebuild_during_writes_converges() {
    let config = EngineConfig::default().with_rebuild_batch_size(4);
    let (_store, service) = service_with(config, &[], vec![revenue_rule(50, 10)]).await;
    let service = Arc::new(service);

    publish_all(&service, (1..=20).map(|n| purchase(n, "5")).collect()).await;

    let writers = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            publish_all(&service, (21..=60).map(|n| purchase(n, "5")).collect()).await;
        })
    };
    let rebuilds: Vec<_> = (0..3)
        .map(|_| service.spawn_rebuild(AggregateScope::All))
        .collect();

    writers.await.expect("writer task panicked");
    for handle in rebuilds {
        handle.join().await.unwrap();
    }

    let totals = service.promoter_totals(program(), promoter()).await.unwrap();
    assert_eq!(totals.total_purchases, 60);
    assert_eq!(totals.total_revenue, Money::from_whole(300));

    let drift = service.verify(AggregateScope::All).await.unwrap();
    assert!(drift.is_clean(), "drift after concurrent rebuild: {:?}", drift.drifted);
}
