// Copyright (c) 2025 - Cowboy AI, Inc.
//! Derived Aggregates
//!
//! Rollups are never hand-edited; they are a fold over the event log:
//!
//! ```text
//! ReferralEvent ──apply──→ AggregateBook
//!                          ├── per promoter×program       PromoterTotals
//!                          ├── per promoter×program×day   PromoterTotals
//!                          ├── per link                   LinkTotals
//!                          └── per link×day               LinkTotals
//! ```
//!
//! For every key, `total_x == Σ events of type x referencing that key`.
//!
//! - [`rollup`] - the pure fold, scopes, diffs and read rows
//! - [`maintainer`] - incremental maintenance, rebuild and drift verification

pub mod maintainer;
pub mod rollup;

pub use maintainer::{
    AggregateMaintainer, DriftReport, RebuildHandle, RebuildReport, AGGREGATES_HANDLER,
};
pub use rollup::{
    AggregateBook, AggregateRows, AggregateScope, LinkKey, LinkRow, LinkTotals, PromoterKey,
    PromoterRow, PromoterTotals,
};
