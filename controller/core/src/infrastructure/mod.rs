// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod generators;
pub mod repositories;
pub mod resources;

pub use event_bus::{DomainEvent, EventBus};
pub use generators::registry::{GeneratorRegistry, GeneratorRegistryBuilder, RegistryError};
