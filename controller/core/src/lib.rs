// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # ephemera controller core
//!
//! Lifecycle and garbage-collection engine for generated (ephemeral)
//! credentials.
//!
//! # Architecture
//!
//! - **Domain:** `GeneratorState` aggregate, the `Generator` contract,
//!   status conditions, repository and clock abstractions.
//! - **Application:** the generator-state reconciler, idle probe, state
//!   manager and the work-queue controller that drives reconciliation.
//! - **Infrastructure:** generator registry, built-in generators, in-memory
//!   and PostgreSQL repositories, event bus.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
