use std::time::Duration;

use anyhow::Result;
use envconfig::Envconfig;
use kube::Client;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use driftrs::config::Settings;
use driftrs::cycle::Rebalancer;
use driftrs::orchestrator::{KubeOrchestrator, Orchestrator};
use driftrs::pricing::PriceBook;
use driftrs::store::{HintStore, KubeHintStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::init_from_env()?;
    let client = Client::try_default().await?;
    let rebalancer = Rebalancer {
        orchestrator: Orchestrator::Kube(KubeOrchestrator::new(client.clone())),
        store: HintStore::Kube(KubeHintStore::new(client)),
        prices: PriceBook::default(),
        settings,
    };

    let cancel = CancellationToken::new();
    // Kubernetes sends SIGTERM on pod termination; SIGINT covers local runs.
    let mut sigterm = signal(SignalKind::terminate())?;
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown requested");
        signal_token.cancel();
    });

    loop {
        match rebalancer.run_cycle(&cancel).await {
            Ok(outcome) => info!(?outcome, "cycle finished"),
            Err(e) => error!(error = %e, "cycle failed"),
        }
        if cancel.is_cancelled() || rebalancer.settings.interval_seconds == 0 {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(rebalancer.settings.interval_seconds)) => {}
        }
    }
    Ok(())
}
