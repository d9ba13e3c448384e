// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, contracts and value objects.

pub mod clock;
pub mod condition;
pub mod context;
pub mod controller_config;
pub mod events;
pub mod generator;
pub mod generator_state;
pub mod repository;
pub mod resources;
