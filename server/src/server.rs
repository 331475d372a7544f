use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::args::{HealthArgs, ServerArgs};
use kecs_api::AppState;
use kecs_operator::OperatorHealth;

/// Wires the state store, the ECS API, the admin surface and the operator
/// into one process and runs until SIGINT/SIGTERM.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    kecs_common::metrics::install_recorder();

    let storage = kecs_storage::connect(&args.storage_dsn)
        .await
        .context("failed to open state store")?;

    let client = build_kube_client(&args)
        .await
        .context("failed to build kubernetes client")?;

    let (intents, intents_rx) = kecs_operator::channel(256);
    let health = OperatorHealth::new();
    let cancel = CancellationToken::new();

    tokio::spawn(watch_for_shutdown(cancel.clone()));

    let operator = tokio::spawn(kecs_operator::run(
        client.clone(),
        storage.clone(),
        intents_rx,
        intents.clone(),
        args.reconcile_interval,
        health.clone(),
        cancel.clone(),
    ));

    let state = AppState::new(
        storage,
        intents,
        Some(client),
        health,
        args.reconcile_interval,
        args.region.clone(),
        args.account_id.clone(),
    );

    let api_addr: SocketAddr = format!("0.0.0.0:{}", args.api_port).parse()?;
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", args.admin_port).parse()?;
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind {api_addr}"))?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind {admin_addr}"))?;

    tracing::info!(%api_addr, %admin_addr, region = %args.region, "starting control plane");
    println!(
        "{} api={} admin={}",
        "kecs control plane up".green(),
        api_addr,
        admin_addr
    );

    let api_cancel = cancel.clone();
    let api_server = axum::serve(api_listener, kecs_api::router(state.clone()))
        .with_graceful_shutdown(async move { api_cancel.cancelled().await });
    let admin_cancel = cancel.clone();
    let admin_server = axum::serve(admin_listener, kecs_api::admin::router(state))
        .with_graceful_shutdown(async move { admin_cancel.cancelled().await });

    let (api_result, admin_result) =
        tokio::join!(async { api_server.await }, async { admin_server.await });
    api_result.context("api server failed")?;
    admin_result.context("admin server failed")?;

    operator.await.ok();
    tracing::info!("control plane stopped gracefully");
    Ok(())
}

/// Trips the cancellation token on SIGINT or SIGTERM so the API listeners,
/// projection workers and reconciler wind down together. In-flight
/// Kubernetes writes are left to the next reconcile pass.
async fn watch_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cannot listen for interrupts");
            }
            tracing::info!("interrupt received, shutting down");
        }
        _ = terminate => tracing::info!("terminate received, shutting down"),
    }
    cancel.cancel();
}

async fn build_kube_client(args: &ServerArgs) -> Result<kube::Client> {
    match &args.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig at {}", path.display()))?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await?;
            Ok(kube::Client::try_from(config)?)
        }
        None => Ok(kube::Client::try_default().await?),
    }
}

/// `kecs-server health`: probes a running control plane's admin port.
pub async fn run_health(args: HealthArgs) -> Result<()> {
    let url = format!("{}/health", args.endpoint.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {url}"))?;
    if response.status().is_success() {
        println!("{}", "healthy".green());
        Ok(())
    } else {
        bail!("control plane unhealthy: {}", response.status());
    }
}
