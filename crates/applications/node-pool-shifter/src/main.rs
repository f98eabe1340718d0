//! node-pool-shifter - move GKE nodes between node pools
//!
//! ## Usage
//!
//! ```bash
//! # Shift from the on-demand pool to the preemptible pool, keeping 1 node per zone
//! node-pool-shifter --node-pool-from default-pool --node-pool-to preemptible-pool \
//!     --node-pool-from-min-node 1
//!
//! # Out of cluster, against a kubeconfig
//! node-pool-shifter --kubeconfig ~/.kube/config --cluster-name prod \
//!     --node-pool-from default-pool --node-pool-to preemptible-pool
//! ```

use anyhow::Context;
use clap::Parser;
use node_pool_shifter::{
    GkeNodePoolClient, KubeNodeDirectory, MetadataClient, Shifter, ShifterArgs, ShifterConfig,
    ShifterMetrics, bootstrap, kubernetes, metrics,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "node_pool_shifter=info,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = ShifterArgs::parse();
    let config = Arc::new(ShifterConfig::try_from(&args).context("invalid configuration")?);

    info!("========================================");
    info!("Node pool shifter starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("From: {} (min {} node(s) per zone)", config.from_pool, config.min_nodes_per_zone);
    info!("To: {}", config.to_pool);
    info!("Interval: {}s, cycle time: {}s", config.interval_secs, config.cycle_time_secs);
    info!("========================================");

    let client = kubernetes::connect(args.kubeconfig.as_deref())
        .await
        .context("Error initializing Kubernetes client")?;
    let directory = Arc::new(KubeNodeDirectory::new(client, config.zone_label.clone()));

    let metadata = MetadataClient::new().context("Error creating metadata client")?;
    let cluster = bootstrap::discover_cluster(
        directory.as_ref(),
        &metadata,
        args.node_name.as_deref(),
        args.cluster_name.as_deref(),
        args.cluster_location.as_deref(),
    )
    .await
    .context("Error getting project details from node; are you running this in GKE?")?;

    let pools = Arc::new(
        GkeNodePoolClient::new(cluster, metadata).context("Error creating GKE client")?,
    );
    let cluster = pools.cluster();
    info!(
        project = %cluster.project,
        location = %cluster.location,
        cluster = %cluster.name,
        "Resolved GKE cluster"
    );

    let shifter_metrics = Arc::new(ShifterMetrics::new().context("Error registering metrics")?);
    let shutdown = CancellationToken::new();

    let metrics_task = tokio::spawn({
        let shifter_metrics = shifter_metrics.clone();
        let shutdown = shutdown.clone();
        let addr = config.metrics_addr;
        let path = config.metrics_path.clone();
        async move {
            if let Err(e) = metrics::serve(addr, &path, shifter_metrics, shutdown).await {
                error!("Metrics server stopped: {}", e);
            }
        }
    });

    let shifter = Shifter::new(config.clone(), directory, pools, shifter_metrics);
    let mut loop_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shifter.run(shutdown).await }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("🛑 Shutdown signal received, waiting for the current cycle to finish...");
            shutdown.cancel();
            if let Err(e) = (&mut loop_task).await {
                error!("Control loop task failed: {}", e);
            }
        }
        result = &mut loop_task => {
            shutdown.cancel();
            if let Err(e) = result {
                error!("Control loop task failed: {}", e);
            }
        }
    }

    if let Err(e) = metrics_task.await {
        warn!("Metrics task failed: {}", e);
    }

    info!("✅ Shutdown complete");
    Ok(())
}
