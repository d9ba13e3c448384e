// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the ephemera CLI

pub mod config;
pub mod generate;
pub mod generators;
pub mod run;
pub mod states;

pub use self::config::ConfigCommand;
pub use self::generate::GenerateArgs;
pub use self::states::StatesCommand;
