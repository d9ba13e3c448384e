// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ephemera run`: host the generator-state controller until a shutdown
//! signal arrives.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ephemera_core::application::controller::GeneratorStateController;
use ephemera_core::application::reconciler::GeneratorStateReconciler;
use ephemera_core::domain::clock::SystemClock;
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

use crate::bootstrap::{self, Runtime};

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = bootstrap::load_config(config_path)?;
    info!(
        "ephemera controller '{}' starting (PID: {})",
        config.metadata.name,
        std::process::id()
    );

    let metrics = &config.spec.observability.metrics;
    if metrics.enabled {
        install_metrics_exporter(metrics.port)?;
    }

    let runtime = Runtime::build(config).await?;
    if !runtime.durable {
        warn!("In-memory store selected: generator states are lost when this process exits");
    }

    let settings = runtime.config.spec.controller.clone();
    let reconciler = Arc::new(GeneratorStateReconciler::new(
        runtime.repository.clone(),
        runtime.registry.clone(),
        Arc::new(InMemoryResourceAccessor::new()),
        Arc::new(SystemClock),
        runtime.event_bus.clone(),
    ));
    let controller = Arc::new(GeneratorStateController::new(
        reconciler,
        runtime.repository.clone(),
        runtime.event_bus.clone(),
        settings,
    ));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    controller
        .run(cancel)
        .await
        .context("Generator state controller failed")?;

    info!("ephemera controller stopped");
    Ok(())
}

fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!(
        "ephemera_reconcile_total",
        "Reconcile passes by lifecycle phase and result"
    );
    metrics::describe_counter!(
        "ephemera_cleanup_total",
        "Generator cleanup calls by kind and result"
    );
    metrics::describe_histogram!(
        "ephemera_reconcile_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of a single reconcile pass"
    );

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
