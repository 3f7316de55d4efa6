// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Dispatcher
//!
//! Process-internal pub/sub between event producers and the handlers that
//! react to them. A dispatch runs entirely inside one [`UnitOfWork`]:
//!
//! ```text
//! publish(e0)
//!   → stage e0 → aggregates(e0) → rules(e0) ─┬→ e1 (depth 1)
//!                                            └→ e2 (depth 1)
//!   → stage e1 → aggregates(e1) → rules(e1) → ...
//! ```
//!
//! Handlers run in registration order for every event, so the aggregate
//! handler must be registered before the rule engine for conditions to see
//! totals that include the event. Children are processed breadth-first after
//! their parent, and every child is dispatched before the unit of work is
//! committed: nothing emitted is dropped.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::{EventId, FailedEffect, FailureOrigin};
use crate::errors::{ReferralError, ReferralResult};
use crate::events::ReferralEvent;
use crate::store::UnitOfWork;

/// Subscriber of dispatched events
///
/// Handlers are synchronous: they only stage changes into the unit of work.
pub trait EventHandler: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// React to one event at cascade `depth`, returning follow-up events
    fn handle(
        &self,
        event: &ReferralEvent,
        depth: u8,
        uow: &mut UnitOfWork,
    ) -> ReferralResult<Vec<ReferralEvent>>;
}

/// Handler error observed during a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub event_id: EventId,
    pub error: ReferralError,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events staged, in dispatch order
    pub dispatched: Vec<EventId>,
    /// Events skipped because their id was already staged
    pub skipped: Vec<EventId>,
    /// Events refused for exceeding the cascade limit
    pub rejected: Vec<EventId>,
    pub handler_failures: Vec<HandlerFailure>,
    pub deepest: u8,
}

impl DispatchReport {
    /// Whether a named handler failed for any event
    pub fn failed_in(&self, handler: &str) -> bool {
        self.handler_failures.iter().any(|f| f.handler == handler)
    }
}

/// Fans events out to handlers and drives the cascade
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    max_depth: u8,
}

impl EventDispatcher {
    pub fn new(max_depth: u8) -> Self {
        Self {
            handlers: Vec::new(),
            max_depth,
        }
    }

    /// Register a handler; handlers run in registration order
    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Registered handler called `name`
    pub fn handler(&self, name: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Dispatch `root` and everything it cascades into
    pub fn dispatch(&self, root: ReferralEvent, uow: &mut UnitOfWork) -> DispatchReport {
        self.dispatch_at(root, 0, uow)
    }

    /// Dispatch an event that already sits at cascade `depth`
    pub fn dispatch_at(&self, root: ReferralEvent, depth: u8, uow: &mut UnitOfWork) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut queue = VecDeque::from([(root, depth)]);

        while let Some((event, depth)) = queue.pop_front() {
            if depth > self.max_depth {
                let err = ReferralError::CascadeDepthExceeded {
                    depth,
                    limit: self.max_depth,
                };
                warn!(event_id = %event.event_id, depth, "cascade limit reached, event not dispatched");
                uow.record_failure(
                    FailedEffect::new(
                        Some(event.causation_id.unwrap_or(event.event_id)),
                        event.program_id,
                        event.promoter_id,
                        None,
                        None,
                        &err,
                        depth,
                        Utc::now(),
                    )
                    .with_origin(FailureOrigin::CascadeLimit),
                );
                report.rejected.push(event.event_id);
                continue;
            }

            if !uow.stage_event(event.clone()) {
                debug!(event_id = %event.event_id, "event already staged, skipping");
                report.skipped.push(event.event_id);
                continue;
            }
            report.dispatched.push(event.event_id);
            report.deepest = report.deepest.max(depth);

            for handler in &self.handlers {
                match handler.handle(&event, depth, uow) {
                    Ok(children) => {
                        queue.extend(children.into_iter().map(|child| (child, depth.saturating_add(1))));
                    }
                    Err(err) => {
                        error!(
                            handler = handler.name(),
                            event_id = %event.event_id,
                            error = %err,
                            "handler failed"
                        );
                        uow.record_failure(
                            FailedEffect::new(
                                Some(event.event_id),
                                event.program_id,
                                event.promoter_id,
                                None,
                                None,
                                &err,
                                depth,
                                Utc::now(),
                            )
                            .with_origin(FailureOrigin::handler(handler.name())),
                        );
                        report.handler_failures.push(HandlerFailure {
                            handler: handler.name(),
                            event_id: event.event_id,
                            error: err,
                        });
                    }
                }
            }
        }

        debug!(
            dispatched = report.dispatched.len(),
            deepest = report.deepest,
            "dispatch finished"
        );
        report
    }
}
