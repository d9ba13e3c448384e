// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod controller;
pub mod idle_probe;
pub mod reconciler;
pub mod state_manager;
pub mod work_queue;

pub use controller::GeneratorStateController;
pub use idle_probe::IdleDecision;
pub use reconciler::{GeneratorStateReconciler, ReconcileAction, ReconcileError};
pub use state_manager::{GenerateOutcome, GenerateRequest, GeneratorStateManager, StateManagerError};
pub use work_queue::WorkQueue;
