use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mfasrv_agent::cache::{PolicyCache, SessionCache};
use mfasrv_agent::central::{mtls_http_client, CentralClient};
use mfasrv_agent::cli::{load_config, Cli, Command};
use mfasrv_agent::decision::DecisionService;
use mfasrv_agent::gossip::{GossipReceiver, GossipSender};
use mfasrv_agent::local_store::{LocalStore, META_AGENT_ID};
use mfasrv_agent::state::AgentState;
use mfasrv_agent::stream::ResyncSignal;
use mfasrv_agent::{heartbeat, stream};
use mfasrv_domain::config::AgentConfig;
use mfasrv_protocol::{EnrollCertificateRequest, RegisterAgentRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Several dependencies link rustls with different crypto backends; pin
    // the process default before any TLS config is built.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        None | Some(Command::Serve) => {
            let config = load_config(&cli.config)?;
            run_agent(config).await
        }
        Some(Command::Enroll) => {
            let config = load_config(&cli.config)?;
            enroll(config).await
        }
        Some(Command::Version) => {
            println!("mfasrv-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mfasrv=debug")),
        )
        .json()
        .init();
}

fn hostname_of(config: &AgentConfig) -> String {
    if !config.hostname.is_empty() {
        return config.hostname.clone();
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "mfasrv-agent".into())
}

/// Register with the center, submit a CSR, and persist the issued
/// certificate next to the generated key.
async fn enroll(config: AgentConfig) -> anyhow::Result<()> {
    if config.tls.cert_path.as_os_str().is_empty() || config.tls.key_path.as_os_str().is_empty() {
        anyhow::bail!("agent.tls.cert_path and agent.tls.key_path must be set before enrolling");
    }
    let central = CentralClient::new(&config)?;
    let hostname = hostname_of(&config);

    let registered = central
        .register(&RegisterAgentRequest {
            hostname: hostname.clone(),
            agent_type: config.agent_type.clone(),
            ip: None,
            version: Some(env!("CARGO_PKG_VERSION").into()),
        })
        .await
        .context("registering with the center")?;
    let agent_id = registered
        .agent_id
        .ok_or_else(|| anyhow::anyhow!(registered.error.unwrap_or_else(|| "registration refused".into())))?;
    tracing::info!(agent_id = %agent_id, "registered");

    let (csr_pem, key_pem) = mfasrv_ca::generate_csr(&hostname, &[hostname.clone()])?;
    let enrolled = central
        .enroll_certificate(&EnrollCertificateRequest {
            agent_id: agent_id.clone(),
            agent_type: config.agent_type.clone(),
            csr_pem,
        })
        .await
        .context("enrolling certificate")?;
    let cert_pem = enrolled.signed_cert_pem.ok_or_else(|| {
        anyhow::anyhow!(enrolled.error.unwrap_or_else(|| "enrollment refused".into()))
    })?;

    std::fs::write(&config.tls.cert_path, cert_pem)
        .with_context(|| format!("writing {}", config.tls.cert_path.display()))?;
    std::fs::write(&config.tls.key_path, key_pem)
        .with_context(|| format!("writing {}", config.tls.key_path.display()))?;

    let store = LocalStore::open(&config.cache_path)?;
    store.set_meta(META_AGENT_ID, &agent_id)?;
    println!("enrolled as {agent_id}; certificate written to {}", config.tls.cert_path.display());
    Ok(())
}

async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mfasrv agent starting");
    let config = Arc::new(config);

    // ── Durable cache + warm in-memory caches ────────────────────────
    let local_store = Arc::new(LocalStore::open(&config.cache_path)?);
    let policy_cache = Arc::new(PolicyCache::warm(local_store.clone())?);
    let session_cache = Arc::new(SessionCache::warm(local_store.clone())?);

    // ── Central client + gossip ──────────────────────────────────────
    let central = Arc::new(CentralClient::new(&config)?);
    let gossip = Arc::new(GossipSender::new(
        &config.gossip_peers,
        mtls_http_client(&config)?,
    ));

    // ── Identity ─────────────────────────────────────────────────────
    let agent_id = match &config.agent_id {
        id if !id.is_empty() => id.clone(),
        _ => local_store.get_meta(META_AGENT_ID)?.unwrap_or_default(),
    };
    let state = AgentState {
        config: config.clone(),
        local_store: local_store.clone(),
        policy_cache,
        session_cache: session_cache.clone(),
        central: central.clone(),
        gossip: gossip.clone(),
        agent_id: Arc::new(RwLock::new(agent_id)),
        central_reachable: Arc::new(AtomicBool::new(false)),
        pending_challenges: Arc::new(Mutex::new(Default::default())),
    };
    ensure_registered(&state).await;

    let shutdown = CancellationToken::new();
    let resync = Arc::new(ResyncSignal::new());

    // ── Background loops ─────────────────────────────────────────────
    gossip.spawn_pumps(shutdown.clone());
    tokio::spawn(stream::run(state.clone(), resync.clone(), shutdown.clone()));
    tokio::spawn(heartbeat::run(state.clone(), resync.clone(), shutdown.clone()));
    tokio::spawn(heartbeat::run_cache_cleanup(state.clone(), shutdown.clone()));

    // ── Gossip listener (mTLS) ───────────────────────────────────────
    if !config.gossip_bind.is_empty() {
        match mfasrv_ca::tls::server_config(&config.tls) {
            Ok(tls_config) => {
                let addr: SocketAddr = config
                    .gossip_bind
                    .parse()
                    .context("parsing gossip bind address")?;
                let app = GossipReceiver::new(session_cache.clone()).router();
                let handle = axum_server::Handle::new();
                {
                    let handle = handle.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        shutdown.cancelled().await;
                        handle.graceful_shutdown(Some(std::time::Duration::from_secs(3)));
                    });
                }
                tracing::info!(addr = %addr, "gossip listener ready (mTLS)");
                tokio::spawn(
                    axum_server::bind_rustls(
                        addr,
                        axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(tls_config)),
                    )
                    .handle(handle)
                    .serve(app.into_make_service()),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "gossip listener disabled: TLS material unavailable");
            }
        }
    }

    // ── IPC endpoint for the interception shim ───────────────────────
    let service = Arc::new(DecisionService::new(state.clone()));
    #[cfg(unix)]
    {
        let socket = config.ipc_socket.clone();
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = mfasrv_agent::ipc::run(&socket, service, shutdown).await {
                tracing::error!(error = %e, "IPC endpoint failed");
            }
        });
    }
    #[cfg(not(unix))]
    tracing::warn!("IPC endpoint requires a Unix platform; shim integration disabled");

    // ── Shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown requested");
    shutdown.cancel();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tracing::info!("mfasrv agent stopped");
    Ok(())
}

/// Best-effort registration at startup; the agent serves (degraded) even
/// when the center is down, so a failure here only logs.
async fn ensure_registered(state: &AgentState) {
    if !state.agent_id().is_empty() {
        return;
    }
    let request = RegisterAgentRequest {
        hostname: hostname_of(&state.config),
        agent_type: state.config.agent_type.clone(),
        ip: None,
        version: Some(env!("CARGO_PKG_VERSION").into()),
    };
    match state.central.register(&request).await {
        Ok(response) => match response.agent_id {
            Some(id) => {
                tracing::info!(agent_id = %id, "registered with center");
                if let Err(e) = state.local_store.set_meta(META_AGENT_ID, &id) {
                    tracing::warn!(error = %e, "could not persist agent id");
                }
                *state.agent_id.write() = id;
            }
            None => tracing::warn!(
                error = response.error.as_deref().unwrap_or("unknown"),
                "registration refused"
            ),
        },
        Err(e) => {
            tracing::warn!(error = %e, "registration failed; continuing degraded");
        }
    }
}
