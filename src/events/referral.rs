// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Events
//!
//! A [`ReferralEvent`] is an immutable fact: a signup, a purchase or a
//! generated commission. Events are appended once and never mutated.
//! Producers call the constructors, the rule engine derives
//! `COMMISSION_GENERATED` events with [`ReferralEvent::commission_generated`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Commission, ContactId, EventId, LinkId, Money, ProgramId, PromoterId};
use crate::errors::{ReferralError, ReferralResult};

/// Current schema version of [`ReferralEvent`]
pub const REFERRAL_EVENT_VERSION: u32 = 1;

/// Kind of referral fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Signup,
    Purchase,
    CommissionGenerated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Signup => "SIGNUP",
            EventType::Purchase => "PURCHASE",
            EventType::CommissionGenerated => "COMMISSION_GENERATED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable referral fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEvent {
    /// Event version for schema evolution
    #[serde(default = "default_event_version")]
    pub event_version: u32,

    /// Unique event identifier, the dedup key
    pub event_id: EventId,

    pub event_type: EventType,
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    pub contact_id: ContactId,
    pub link_id: LinkId,

    /// Commission amount (`COMMISSION_GENERATED` only)
    #[serde(default)]
    pub amount: Option<Money>,

    /// Purchase revenue
    #[serde(default)]
    pub revenue: Option<Money>,

    /// Contact or order id supplied by the producer
    #[serde(default)]
    pub external_id: Option<String>,

    /// Purchased item
    #[serde(default)]
    pub item_id: Option<String>,

    /// For `COMMISSION_GENERATED`: type of the event whose rule produced it
    #[serde(default)]
    pub triggered_by: Option<EventType>,

    /// Groups every event caused by one producer action
    pub correlation_id: Uuid,

    /// Direct parent event
    #[serde(default)]
    pub causation_id: Option<EventId>,

    pub occurred_at: DateTime<Utc>,
}

fn default_event_version() -> u32 {
    REFERRAL_EVENT_VERSION
}

impl ReferralEvent {
    fn base(
        event_type: EventType,
        program_id: ProgramId,
        promoter_id: PromoterId,
        contact_id: ContactId,
        link_id: LinkId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_version: REFERRAL_EVENT_VERSION,
            event_id: EventId::new(),
            event_type,
            program_id,
            promoter_id,
            contact_id,
            link_id,
            amount: None,
            revenue: None,
            external_id: None,
            item_id: None,
            triggered_by: None,
            correlation_id: Uuid::now_v7(),
            causation_id: None,
            occurred_at,
        }
    }

    /// A referred contact signed up through a link
    pub fn signup(
        program_id: ProgramId,
        promoter_id: PromoterId,
        contact_id: ContactId,
        link_id: LinkId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::base(EventType::Signup, program_id, promoter_id, contact_id, link_id, occurred_at)
    }

    /// A referred contact purchased
    pub fn purchase(
        program_id: ProgramId,
        promoter_id: PromoterId,
        contact_id: ContactId,
        link_id: LinkId,
        revenue: Option<Money>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            revenue,
            ..Self::base(EventType::Purchase, program_id, promoter_id, contact_id, link_id, occurred_at)
        }
    }

    /// Follow-up fact for a commission created while handling `parent`
    pub fn commission_generated(parent: &ReferralEvent, commission: &Commission) -> Self {
        Self {
            event_version: REFERRAL_EVENT_VERSION,
            event_id: EventId::new(),
            event_type: EventType::CommissionGenerated,
            program_id: commission.program_id,
            promoter_id: commission.promoter_id,
            contact_id: commission.contact_id,
            link_id: commission.link_id,
            amount: Some(commission.amount),
            revenue: None,
            external_id: parent.external_id.clone(),
            item_id: parent.item_id.clone(),
            triggered_by: Some(parent.event_type),
            correlation_id: parent.correlation_id,
            causation_id: Some(parent.event_id),
            occurred_at: commission.created_at,
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// UTC calendar day the event belongs to
    pub fn day(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// Check the input constraints producers must honour
    pub fn validate(&self) -> ReferralResult<()> {
        let ids = [
            ("event_id", *self.event_id.as_uuid()),
            ("program_id", *self.program_id.as_uuid()),
            ("promoter_id", *self.promoter_id.as_uuid()),
            ("contact_id", *self.contact_id.as_uuid()),
            ("link_id", *self.link_id.as_uuid()),
        ];
        if let Some((name, _)) = ids.iter().find(|(_, id)| id.is_nil()) {
            return Err(ReferralError::Validation(format!("{} must not be nil", name)));
        }

        for (name, value) in [("amount", self.amount), ("revenue", self.revenue)] {
            if value.is_some_and(|v| v.is_negative()) {
                return Err(ReferralError::Validation(format!(
                    "{} must not be negative on event {}",
                    name, self.event_id
                )));
            }
            if value.is_some_and(|v| v > Money::MAX_EVENT_AMOUNT) {
                return Err(ReferralError::Validation(format!(
                    "{} on event {} exceeds {}",
                    name, self.event_id, Money::MAX_EVENT_AMOUNT
                )));
            }
        }

        match self.event_type {
            EventType::CommissionGenerated => {
                if self.amount.is_none() || self.triggered_by.is_none() {
                    return Err(ReferralError::Validation(format!(
                        "commission event {} needs amount and triggered_by",
                        self.event_id
                    )));
                }
            }
            EventType::Signup | EventType::Purchase => {
                if self.amount.is_some() {
                    return Err(ReferralError::Validation(format!(
                        "{} event {} must not carry a commission amount",
                        self.event_type, self.event_id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommissionId, CommissionKind, RuleId};

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn purchase(revenue: i64) -> ReferralEvent {
        ReferralEvent::purchase(
            ProgramId::new(),
            PromoterId::new(),
            ContactId::new(),
            LinkId::new(),
            Some(Money::from_whole(revenue)),
            ts(),
        )
    }

    #[test]
    fn test_commission_event_chains_to_parent() {
        let parent = purchase(200).with_item_id("sku-1");
        let commission = Commission {
            commission_id: CommissionId::new(),
            program_id: parent.program_id,
            promoter_id: parent.promoter_id,
            contact_id: parent.contact_id,
            link_id: parent.link_id,
            rule_id: RuleId::new(),
            source_event_id: parent.event_id,
            amount: Money::from_whole(30),
            kind: CommissionKind::Percentage,
            created_at: parent.occurred_at,
        };

        let event = ReferralEvent::commission_generated(&parent, &commission);

        assert_eq!(event.event_type, EventType::CommissionGenerated);
        assert_eq!(event.causation_id, Some(parent.event_id));
        assert_eq!(event.correlation_id, parent.correlation_id);
        assert_eq!(event.triggered_by, Some(EventType::Purchase));
        assert_eq!(event.amount, Some(Money::from_whole(30)));
        assert_eq!(event.item_id.as_deref(), Some("sku-1"));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_revenue() {
        let event = purchase(-1);
        assert!(matches!(event.validate(), Err(ReferralError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_revenue_above_limit() {
        let mut event = purchase(1);
        event.revenue = Some(Money::from_units(i64::MAX - 10));
        assert!(matches!(event.validate(), Err(ReferralError::Validation(_))));

        event.revenue = Some(Money::MAX_EVENT_AMOUNT);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nil_ids() {
        let mut event = purchase(1);
        event.link_id = LinkId::from_uuid(Uuid::nil());
        assert!(matches!(event.validate(), Err(ReferralError::Validation(_))));
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event = purchase(5);
        let mut json = serde_json::to_value(&event).unwrap();
        json.as_object_mut().unwrap().remove("event_version");
        json.as_object_mut().unwrap().remove("item_id");

        let decoded: ReferralEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, event);
    }
}
