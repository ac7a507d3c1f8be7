//! Local IPC endpoint for the host interception shim.
//!
//! A Unix domain socket carrying newline-delimited JSON. Access control is
//! filesystem permission (0700 directory, 0600 socket — root only). Every
//! request gets at most three seconds; a timeout or any unexpected failure
//! collapses to the fail-open answer, because a faulty MFA layer must never
//! block the host authentication flow.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use mfasrv_domain::Result;
use mfasrv_protocol::{IpcRequest, IpcResponse};

use crate::decision::{AuthQuery, DecisionService};

const REQUEST_DEADLINE: Duration = Duration::from_secs(3);

pub async fn run(
    socket_path: &Path,
    service: Arc<DecisionService>,
    shutdown: CancellationToken,
) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            restrict(parent, 0o700)?;
        }
    }
    let listener = UnixListener::bind(socket_path)?;
    restrict(socket_path, 0o600)?;
    tracing::info!(socket = %socket_path.display(), "IPC endpoint listening");

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "IPC accept failed");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, service, shutdown).await {
                tracing::debug!(error = %e, "IPC connection closed with error");
            }
        });
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

async fn serve_connection(
    stream: UnixStream,
    service: Arc<DecisionService>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match tokio::time::timeout(
            REQUEST_DEADLINE,
            dispatch(&service, &line),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("IPC request exceeded its deadline; failing open");
                IpcResponse::fail_open("deadline exceeded")
            }
        };

        let mut payload = serde_json::to_vec(&response).unwrap_or_else(|_| {
            // Serializing a plain struct of strings cannot realistically
            // fail; answer open rather than hang the shim.
            br#"{"allow":true,"decision":"allow"}"#.to_vec()
        });
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
}

/// Parse and route one request. Every failure path answers fail-open.
async fn dispatch(service: &DecisionService, line: &str) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed IPC request; failing open");
            return IpcResponse::fail_open("malformed request");
        }
    };

    match request {
        IpcRequest::Preauth {
            user_name,
            domain,
            source_ip,
            protocol,
        } => {
            service
                .preauth(AuthQuery {
                    user_name,
                    domain,
                    source_ip,
                    protocol,
                })
                .await
        }
        IpcRequest::SubmitMfa {
            challenge_id,
            response,
        } => service.submit_mfa(challenge_id, response).await,
        IpcRequest::CheckStatus { challenge_id } => service.check_status(challenge_id).await,
        // FIDO2 needs the workstation endpoint agent; without a configured
        // method the layer must not block logons.
        IpcRequest::Fido2Begin { .. } | IpcRequest::Fido2Complete { .. } => {
            IpcResponse::fail_open("fido2 method not configured")
        }
    }
}

fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
