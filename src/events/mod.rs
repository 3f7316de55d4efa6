// Copyright (c) 2025 - Cowboy AI, Inc.
//! Referral Domain Events
//!
//! Events are immutable facts. The log of committed events is the source of
//! truth; every aggregate is derived from it.
//!
//! # Correlation and Causation
//!
//! ```text
//! PURCHASE                 correlation_id: c-1, causation_id: None,   event_id: e-1
//!   ↓ rule: REVENUE >= 100 → 15 %
//! COMMISSION_GENERATED     correlation_id: c-1, causation_id: e-1,    event_id: e-2
//! ```

pub mod referral;

pub use referral::{EventType, ReferralEvent, REFERRAL_EVENT_VERSION};
