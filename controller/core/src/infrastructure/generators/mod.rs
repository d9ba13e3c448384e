// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Built-in generators and the kind registry.
//!
//! Backend-specific generators (cloud IAM keys, database users, SaaS tokens)
//! live outside this crate and register themselves through
//! [`GeneratorRegistryBuilder`] at startup, exactly like the built-ins here.

pub mod fake;
pub mod registry;
pub mod uuid;

use registry::{GeneratorRegistryBuilder, RegistryError};
use tracing::info;

/// Kinds shipped with this crate.
pub const BUILTIN_KINDS: &[&str] = &[fake::KIND, uuid::KIND];

/// Register every built-in generator whose kind is not in `disabled`.
pub fn register_builtin(
    builder: &mut GeneratorRegistryBuilder,
    disabled: &[String],
) -> Result<(), RegistryError> {
    let enabled = |kind: &str| {
        let on = !disabled.iter().any(|d| d == kind);
        if !on {
            info!("Generator kind '{}' disabled by configuration", kind);
        }
        on
    };

    if enabled(fake::KIND) {
        fake::register(builder)?;
    }
    if enabled(uuid::KIND) {
        uuid::register(builder)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin_respects_disabled() {
        let mut builder = GeneratorRegistryBuilder::new();
        register_builtin(&mut builder, &["uuid".to_string()]).unwrap();
        let registry = builder.build();
        assert_eq!(registry.kinds(), vec!["fake"]);
    }

    #[test]
    fn test_register_builtin_twice_is_rejected() {
        let mut builder = GeneratorRegistryBuilder::new();
        register_builtin(&mut builder, &[]).unwrap();
        assert!(register_builtin(&mut builder, &[]).is_err());
    }
}
