// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! - Rebuilding from the log reproduces the incrementally maintained rollups
//! - Redelivering any prefix of a sequence changes nothing

mod rebuild_equivalence;
