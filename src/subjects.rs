// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS subject hierarchy for referral messaging
//!
//! # Subject Pattern
//!
//! ```text
//! {prefix}.{program_id}.{topic}
//! ```
//!
//! | Topic | Direction |
//! |-------|-----------|
//! | `events.ingest` | producers → worker (signup / purchase facts) |
//! | `commission.generated` | core → notifier |
//! | `circle.switched` | core → notifier |
//!
//! This allows for:
//! - Precise subscriptions (`referral.{program}.commission.generated`)
//! - Program-level wildcards (`referral.{program}.>`)
//! - Ingest across programs (`referral.*.events.ingest`)
//!
//! # Examples
//!
//! ```rust
//! use cim_referral::subjects::{ReferralSubjects, Topic};
//! use cim_referral::domain::ProgramId;
//!
//! let subjects = ReferralSubjects::default();
//! assert_eq!(subjects.ingest_all(), "referral.*.events.ingest");
//!
//! let program = ProgramId::new();
//! let subject = subjects.subject(program, Topic::CommissionGenerated);
//! assert_eq!(subject, format!("referral.{}.commission.generated", program));
//! ```

use std::fmt;

use crate::domain::ProgramId;

/// Default root namespace for referral subjects
pub const REFERRAL_ROOT: &str = "referral";

/// Message topic under a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound referral events
    EventsIngest,
    /// A commission was generated
    CommissionGenerated,
    /// A promoter moved to another circle
    CircleSwitched,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::EventsIngest => write!(f, "events.ingest"),
            Topic::CommissionGenerated => write!(f, "commission.generated"),
            Topic::CircleSwitched => write!(f, "circle.switched"),
        }
    }
}

/// Subject builder bound to a root prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralSubjects {
    prefix: String,
}

impl ReferralSubjects {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Concrete subject for one program
    pub fn subject(&self, program_id: ProgramId, topic: Topic) -> String {
        format!("{}.{}.{}", self.prefix, program_id, topic)
    }

    /// One topic across every program
    pub fn topic_wildcard(&self, topic: Topic) -> String {
        format!("{}.*.{}", self.prefix, topic)
    }

    /// Everything published for one program
    pub fn program_wildcard(&self, program_id: ProgramId) -> String {
        format!("{}.{}.>", self.prefix, program_id)
    }

    /// Ingest subscription for every program
    pub fn ingest_all(&self) -> String {
        self.topic_wildcard(Topic::EventsIngest)
    }

    /// Program id segment of a concrete subject under this prefix
    pub fn program_of(&self, subject: &str) -> Option<ProgramId> {
        let rest = subject.strip_prefix(&self.prefix)?.strip_prefix('.')?;
        let (program, _) = rest.split_once('.')?;
        program.parse().ok()
    }
}

impl Default for ReferralSubjects {
    fn default() -> Self {
        Self::new(REFERRAL_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_follow_hierarchy() {
        let subjects = ReferralSubjects::default();
        let program = ProgramId::new();

        assert_eq!(
            subjects.subject(program, Topic::CircleSwitched),
            format!("referral.{}.circle.switched", program)
        );
        assert_eq!(subjects.program_wildcard(program), format!("referral.{}.>", program));
        assert_eq!(subjects.ingest_all(), "referral.*.events.ingest");
    }

    #[test]
    fn test_custom_prefix() {
        let subjects = ReferralSubjects::new("staging.referral");
        assert_eq!(
            subjects.topic_wildcard(Topic::CommissionGenerated),
            "staging.referral.*.commission.generated"
        );
    }

    #[test]
    fn test_program_of_parses_concrete_subject() {
        let subjects = ReferralSubjects::default();
        let program = ProgramId::new();

        let subject = subjects.subject(program, Topic::EventsIngest);
        assert_eq!(subjects.program_of(&subject), Some(program));
        assert_eq!(subjects.program_of("other.x.events.ingest"), None);
        assert_eq!(subjects.program_of("referral.not-a-uuid.events.ingest"), None);
    }
}
