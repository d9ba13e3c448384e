// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ephemera generators`: list the generator kinds this binary ships and
//! whether the configuration enables them.

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use ephemera_core::infrastructure::generators::BUILTIN_KINDS;

use crate::bootstrap;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = bootstrap::load_config(config_path)?;
    let registry = bootstrap::build_registry(&config)?;

    println!("{}", "Generator kinds:".bold());
    for kind in BUILTIN_KINDS {
        if registry.lookup(kind).is_some() {
            println!("  {} {}", "●".green(), kind);
        } else {
            println!("  {} {} {}", "○".dimmed(), kind, "(disabled)".dimmed());
        }
    }
    Ok(())
}
