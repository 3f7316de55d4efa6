// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Rollups over the Referral Event Log
//!
//! [`AggregateBook`] holds every derived total: per promoter, per promoter and
//! day, per link, per link and day. A book is built by folding events:
//!
//! ```text
//! book = fold(events, AggregateBook::default(), AggregateBook::apply)
//! ```
//!
//! The incremental path folds the events of one unit of work into a delta book
//! and merges it into the stored book; a rebuild folds the whole log. Both go
//! through [`AggregateBook::apply`], so for the same log they agree.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{LinkId, Money, ProgramId, PromoterId};
use crate::errors::{ReferralError, ReferralResult};
use crate::events::{EventType, ReferralEvent};

/// Totals for one promoter in one program (or one day of it)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoterTotals {
    pub total_signups: u64,
    pub total_purchases: u64,
    pub total_revenue: Money,
    pub total_commission: Money,
    pub commission_through_signups: Money,
    pub commission_through_purchases: Money,
}

impl PromoterTotals {
    /// What a single event adds to its promoter's totals
    pub fn contribution(event: &ReferralEvent) -> Self {
        let mut totals = Self::default();
        match event.event_type {
            EventType::Signup => totals.total_signups = 1,
            EventType::Purchase => {
                totals.total_purchases = 1;
                totals.total_revenue = event.revenue.unwrap_or(Money::ZERO);
            }
            EventType::CommissionGenerated => {
                let amount = event.amount.unwrap_or(Money::ZERO);
                totals.total_commission = amount;
                match event.triggered_by {
                    Some(EventType::Signup) => totals.commission_through_signups = amount,
                    Some(EventType::Purchase) => totals.commission_through_purchases = amount,
                    _ => {}
                }
            }
        }
        totals
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            total_signups: self.total_signups.checked_add(other.total_signups)?,
            total_purchases: self.total_purchases.checked_add(other.total_purchases)?,
            total_revenue: self.total_revenue.checked_add(other.total_revenue)?,
            total_commission: self.total_commission.checked_add(other.total_commission)?,
            commission_through_signups: self
                .commission_through_signups
                .checked_add(other.commission_through_signups)?,
            commission_through_purchases: self
                .commission_through_purchases
                .checked_add(other.commission_through_purchases)?,
        })
    }
}

/// Totals for one link (or one day of it)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTotals {
    pub signups: u64,
    pub purchases: u64,
    pub commission: Money,
}

impl LinkTotals {
    /// What a single event adds to its link's totals
    pub fn contribution(event: &ReferralEvent) -> Self {
        match event.event_type {
            EventType::Signup => Self {
                signups: 1,
                ..Self::default()
            },
            EventType::Purchase => Self {
                purchases: 1,
                ..Self::default()
            },
            EventType::CommissionGenerated => Self {
                commission: event.amount.unwrap_or(Money::ZERO),
                ..Self::default()
            },
        }
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            signups: self.signups.checked_add(other.signups)?,
            purchases: self.purchases.checked_add(other.purchases)?,
            commission: self.commission.checked_add(other.commission)?,
        })
    }
}

/// Promoter×program key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromoterKey {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
}

impl PromoterKey {
    pub fn new(program_id: ProgramId, promoter_id: PromoterId) -> Self {
        Self {
            program_id,
            promoter_id,
        }
    }

    pub fn of(event: &ReferralEvent) -> Self {
        Self::new(event.program_id, event.promoter_id)
    }
}

/// Link key, carrying the owning promoter so scopes can select it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    pub link_id: LinkId,
}

impl LinkKey {
    pub fn of(event: &ReferralEvent) -> Self {
        Self {
            program_id: event.program_id,
            promoter_id: event.promoter_id,
            link_id: event.link_id,
        }
    }

    pub fn promoter(&self) -> PromoterKey {
        PromoterKey::new(self.program_id, self.promoter_id)
    }
}

/// Which part of the aggregates an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AggregateScope {
    All,
    Program { program_id: ProgramId },
    Promoter { program_id: ProgramId, promoter_id: PromoterId },
    Link { link_id: LinkId },
}

impl AggregateScope {
    pub fn promoter(program_id: ProgramId, promoter_id: PromoterId) -> Self {
        AggregateScope::Promoter {
            program_id,
            promoter_id,
        }
    }

    pub fn covers_promoter(&self, key: &PromoterKey) -> bool {
        match self {
            AggregateScope::All => true,
            AggregateScope::Program { program_id } => key.program_id == *program_id,
            AggregateScope::Promoter {
                program_id,
                promoter_id,
            } => key.program_id == *program_id && key.promoter_id == *promoter_id,
            AggregateScope::Link { .. } => false,
        }
    }

    pub fn covers_link(&self, key: &LinkKey) -> bool {
        match self {
            AggregateScope::Link { link_id } => key.link_id == *link_id,
            other => other.covers_promoter(&key.promoter()),
        }
    }

    /// Whether the event contributes to any key in the scope
    pub fn includes(&self, event: &ReferralEvent) -> bool {
        self.covers_promoter(&PromoterKey::of(event)) || self.covers_link(&LinkKey::of(event))
    }
}

impl std::fmt::Display for AggregateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateScope::All => write!(f, "all"),
            AggregateScope::Program { program_id } => write!(f, "program:{}", program_id),
            AggregateScope::Promoter {
                program_id,
                promoter_id,
            } => write!(f, "promoter:{}/{}", program_id, promoter_id),
            AggregateScope::Link { link_id } => write!(f, "link:{}", link_id),
        }
    }
}

/// Every derived total, keyed for deterministic iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBook {
    pub promoters: BTreeMap<PromoterKey, PromoterTotals>,
    pub promoter_days: BTreeMap<(PromoterKey, NaiveDate), PromoterTotals>,
    pub links: BTreeMap<LinkKey, LinkTotals>,
    pub link_days: BTreeMap<(LinkKey, NaiveDate), LinkTotals>,
}

fn overflow(key: impl std::fmt::Display) -> ReferralError {
    ReferralError::Store(format!("aggregate overflow for {}", key))
}

impl AggregateBook {
    /// Fold events into a fresh book
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ReferralEvent>) -> ReferralResult<Self> {
        let mut book = Self::default();
        for event in events {
            book.apply(event)?;
        }
        Ok(book)
    }

    /// Add one event's contribution to all four rollups
    ///
    /// All-or-nothing: on overflow nothing is changed.
    pub fn apply(&mut self, event: &ReferralEvent) -> ReferralResult<()> {
        let promoter = PromoterKey::of(event);
        let link = LinkKey::of(event);
        let day = event.day();
        let p = PromoterTotals::contribution(event);
        let l = LinkTotals::contribution(event);

        let promoter_total = self.promoter(&promoter).checked_add(&p).ok_or_else(|| overflow(event.event_id))?;
        let promoter_day = self
            .promoter_days
            .get(&(promoter, day))
            .copied()
            .unwrap_or_default()
            .checked_add(&p)
            .ok_or_else(|| overflow(event.event_id))?;
        let link_total = self.link(&link).checked_add(&l).ok_or_else(|| overflow(event.event_id))?;
        let link_day = self
            .link_days
            .get(&(link, day))
            .copied()
            .unwrap_or_default()
            .checked_add(&l)
            .ok_or_else(|| overflow(event.event_id))?;

        self.promoters.insert(promoter, promoter_total);
        self.promoter_days.insert((promoter, day), promoter_day);
        self.links.insert(link, link_total);
        self.link_days.insert((link, day), link_day);
        Ok(())
    }

    /// Add another book's totals key by key
    ///
    /// All-or-nothing: every sum is computed before anything is written.
    pub fn merge(&mut self, delta: &AggregateBook) -> ReferralResult<()> {
        let promoters = delta
            .promoters
            .iter()
            .map(|(k, v)| {
                self.promoter(k)
                    .checked_add(v)
                    .map(|sum| (*k, sum))
                    .ok_or_else(|| overflow(k.promoter_id))
            })
            .collect::<ReferralResult<Vec<_>>>()?;
        let promoter_days = delta
            .promoter_days
            .iter()
            .map(|(k, v)| {
                self.promoter_days
                    .get(k)
                    .copied()
                    .unwrap_or_default()
                    .checked_add(v)
                    .map(|sum| (*k, sum))
                    .ok_or_else(|| overflow(k.0.promoter_id))
            })
            .collect::<ReferralResult<Vec<_>>>()?;
        let links = delta
            .links
            .iter()
            .map(|(k, v)| {
                self.link(k)
                    .checked_add(v)
                    .map(|sum| (*k, sum))
                    .ok_or_else(|| overflow(k.link_id))
            })
            .collect::<ReferralResult<Vec<_>>>()?;
        let link_days = delta
            .link_days
            .iter()
            .map(|(k, v)| {
                self.link_days
                    .get(k)
                    .copied()
                    .unwrap_or_default()
                    .checked_add(v)
                    .map(|sum| (*k, sum))
                    .ok_or_else(|| overflow(k.0.link_id))
            })
            .collect::<ReferralResult<Vec<_>>>()?;

        self.promoters.extend(promoters);
        self.promoter_days.extend(promoter_days);
        self.links.extend(links);
        self.link_days.extend(link_days);
        Ok(())
    }

    /// Totals for a promoter, zero if no event references it
    pub fn promoter(&self, key: &PromoterKey) -> PromoterTotals {
        self.promoters.get(key).copied().unwrap_or_default()
    }

    /// Totals for a link, zero if no event references it
    pub fn link(&self, key: &LinkKey) -> LinkTotals {
        self.links.get(key).copied().unwrap_or_default()
    }

    /// Totals for a link looked up by id alone
    ///
    /// Sums every promoter and program the link was used under.
    pub fn link_by_id(&self, link_id: LinkId) -> ReferralResult<LinkTotals> {
        self.links
            .iter()
            .filter(|(k, _)| k.link_id == link_id)
            .try_fold(LinkTotals::default(), |sum, (_, v)| {
                sum.checked_add(v).ok_or_else(|| overflow(link_id))
            })
    }

    /// Copy of the entries inside `scope`
    pub fn restrict(&self, scope: &AggregateScope) -> AggregateBook {
        AggregateBook {
            promoters: self
                .promoters
                .iter()
                .filter(|(k, _)| scope.covers_promoter(k))
                .map(|(k, v)| (*k, *v))
                .collect(),
            promoter_days: self
                .promoter_days
                .iter()
                .filter(|((k, _), _)| scope.covers_promoter(k))
                .map(|(k, v)| (*k, *v))
                .collect(),
            links: self
                .links
                .iter()
                .filter(|(k, _)| scope.covers_link(k))
                .map(|(k, v)| (*k, *v))
                .collect(),
            link_days: self
                .link_days
                .iter()
                .filter(|((k, _), _)| scope.covers_link(k))
                .map(|(k, v)| (*k, *v))
                .collect(),
        }
    }

    /// Swap every entry inside `scope` for the entries of `rebuilt`
    pub fn replace_scope(&mut self, scope: &AggregateScope, rebuilt: AggregateBook) {
        self.promoters.retain(|k, _| !scope.covers_promoter(k));
        self.promoter_days.retain(|(k, _), _| !scope.covers_promoter(k));
        self.links.retain(|k, _| !scope.covers_link(k));
        self.link_days.retain(|(k, _), _| !scope.covers_link(k));

        let rebuilt = rebuilt.restrict(scope);
        self.promoters.extend(rebuilt.promoters);
        self.promoter_days.extend(rebuilt.promoter_days);
        self.links.extend(rebuilt.links);
        self.link_days.extend(rebuilt.link_days);
    }

    /// Keys whose totals differ between two books
    pub fn diff(&self, other: &AggregateBook) -> Vec<String> {
        let mut drifted = Vec::new();
        diff_map(&self.promoters, &other.promoters, |k| format!("promoter {}/{}", k.program_id, k.promoter_id), &mut drifted);
        diff_map(&self.promoter_days, &other.promoter_days, |(k, d)| format!("promoter {}/{} on {}", k.program_id, k.promoter_id, d), &mut drifted);
        diff_map(&self.links, &other.links, |k| format!("link {}", k.link_id), &mut drifted);
        diff_map(&self.link_days, &other.link_days, |(k, d)| format!("link {} on {}", k.link_id, d), &mut drifted);
        drifted
    }

    pub fn is_empty(&self) -> bool {
        self.promoters.is_empty() && self.links.is_empty()
    }
}

fn diff_map<K: Ord, V: PartialEq + std::fmt::Debug>(
    left: &BTreeMap<K, V>,
    right: &BTreeMap<K, V>,
    label: impl Fn(&K) -> String,
    out: &mut Vec<String>,
) {
    for (key, value) in left {
        match right.get(key) {
            Some(other) if other == value => {}
            Some(other) => out.push(format!("{}: {:?} != {:?}", label(key), value, other)),
            None => out.push(format!("{}: {:?} != missing", label(key), value)),
        }
    }
    for (key, value) in right {
        if !left.contains_key(key) {
            out.push(format!("{}: missing != {:?}", label(key), value));
        }
    }
}

/// Export row for one promoter aggregate (day is `None` for the running total)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoterRow {
    pub program_id: ProgramId,
    pub promoter_id: PromoterId,
    pub day: Option<NaiveDate>,
    pub totals: PromoterTotals,
}

/// Export row for one link aggregate (day is `None` for the running total)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub link_id: LinkId,
    pub promoter_id: PromoterId,
    pub day: Option<NaiveDate>,
    pub totals: LinkTotals,
}

/// Read-only rows handed to reporting
///
/// Running totals and day buckets are kept apart so summing one vector never
/// counts an event twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRows {
    /// One running total per promoter (`day` is `None`)
    pub promoters: Vec<PromoterRow>,
    /// One row per promoter and day
    pub promoter_days: Vec<PromoterRow>,
    /// One running total per link (`day` is `None`)
    pub links: Vec<LinkRow>,
    /// One row per link and day
    pub link_days: Vec<LinkRow>,
}

fn promoter_row(key: &PromoterKey, day: Option<NaiveDate>, totals: &PromoterTotals) -> PromoterRow {
    PromoterRow {
        program_id: key.program_id,
        promoter_id: key.promoter_id,
        day,
        totals: *totals,
    }
}

fn link_row(key: &LinkKey, day: Option<NaiveDate>, totals: &LinkTotals) -> LinkRow {
    LinkRow {
        link_id: key.link_id,
        promoter_id: key.promoter_id,
        day,
        totals: *totals,
    }
}

impl From<&AggregateBook> for AggregateRows {
    fn from(book: &AggregateBook) -> Self {
        Self {
            promoters: book
                .promoters
                .iter()
                .map(|(k, v)| promoter_row(k, None, v))
                .collect(),
            promoter_days: book
                .promoter_days
                .iter()
                .map(|((k, d), v)| promoter_row(k, Some(*d), v))
                .collect(),
            links: book.links.iter().map(|(k, v)| link_row(k, None, v)).collect(),
            link_days: book
                .link_days
                .iter()
                .map(|((k, d), v)| link_row(k, Some(*d), v))
                .collect(),
        }
    }
}
