use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mfasrv_ca::tls;
use mfasrv_center::cli::{load_config, Cli, Command, ConfigCommand};
use mfasrv_center::{api, bootstrap, rpc, runtime};
use mfasrv_domain::config::{CenterConfig, ConfigSeverity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Several dependencies link rustls with different crypto backends; pin
    // the process default before any TLS config is built.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                eprintln!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("mfasrv-center {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the long-running service.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mfasrv=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: CenterConfig) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mfasrv center starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = bootstrap::build_state(config)?;
    let shutdown = CancellationToken::new();

    // ── Background loops ─────────────────────────────────────────────
    tokio::spawn(runtime::leader::run(
        state.store.clone(),
        state.config.ha.clone(),
        state.instance_id.clone(),
        state.is_leader.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(runtime::sweeper::run(
        state.store.clone(),
        state.config.clone(),
        state.is_leader.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(runtime::snapshot::run(
        state.snapshotter.clone(),
        state.is_leader.clone(),
        shutdown.clone(),
    ));

    // ── Administrative REST listener ─────────────────────────────────
    let rest_addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    )
    .parse()
    .context("parsing REST bind address")?;
    let rest_app = api::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());
    let rest_listener = tokio::net::TcpListener::bind(rest_addr)
        .await
        .with_context(|| format!("binding REST listener on {rest_addr}"))?;
    tracing::info!(addr = %rest_addr, "REST listener ready");
    let rest_shutdown = shutdown.clone();
    let rest_task = tokio::spawn(async move {
        axum::serve(rest_listener, rest_app)
            .with_graceful_shutdown(rest_shutdown.cancelled_owned())
            .await
    });

    // ── Optional dedicated Prometheus listener ───────────────────────
    if !state.config.server.prometheus_bind.is_empty() {
        let addr: SocketAddr = state
            .config
            .server
            .prometheus_bind
            .parse()
            .context("parsing prometheus bind address")?;
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(mfasrv_center::api::health::metrics),
        );
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding prometheus listener on {addr}"))?;
        tracing::info!(addr = %addr, "prometheus listener ready");
        let prom_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(prom_shutdown.cancelled_owned())
                .await;
        });
    }

    // ── Agent RPC plane (mutual TLS, HTTP/2) ─────────────────────────
    let plane_tls = bootstrap::ensure_plane_tls(&state)?;
    let plane_config = tls::server_config(&plane_tls).context("building plane TLS")?;
    let plane_addr: SocketAddr = state
        .config
        .plane
        .bind
        .parse()
        .context("parsing plane bind address")?;
    let plane_app = rpc::router().with_state(state.clone());
    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
        });
    }
    tracing::info!(addr = %plane_addr, "agent plane ready (mTLS)");
    let plane_task = tokio::spawn(
        axum_server::bind_rustls(
            plane_addr,
            axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(plane_config)),
        )
        .handle(handle)
        .serve(plane_app.into_make_service()),
    );

    // ── Shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown requested");
    shutdown.cancel();

    let _ = rest_task.await;
    let _ = plane_task.await;
    tracing::info!("mfasrv center stopped");
    Ok(())
}
