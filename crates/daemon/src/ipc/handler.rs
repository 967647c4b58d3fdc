//! Serves CLI requests against a running orchestrator.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tokio_util::sync::CancellationToken;

use super::messages::{IpcRequest, IpcResponse, IpcSessionInfo};
use super::server::{IpcConnection, IpcServer};
use crate::orchestrator::DaemonOrchestrator;

/// Accepts CLI connections until `stop` fires.
///
/// A `Stop` request is acknowledged and then cancels `stop`; the caller
/// observes the token and shuts the orchestrator down.
pub async fn serve_ipc(
    server: IpcServer,
    orchestrator: Arc<DaemonOrchestrator>,
    stop: CancellationToken,
) {
    tracing::debug!(path = %server.path().display(), "IPC server listening");

    loop {
        let conn = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to accept IPC connection: {}", e);
                    continue;
                }
            },
        };

        let orchestrator = Arc::clone(&orchestrator);
        let stop = stop.clone();
        tokio::spawn(async move {
            handle_connection(conn, &orchestrator, &stop).await;
        });
    }
}

async fn handle_connection(
    mut conn: IpcConnection,
    orchestrator: &DaemonOrchestrator,
    stop: &CancellationToken,
) {
    loop {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                let _ = conn
                    .send_response(&IpcResponse::Error {
                        message: format!("Invalid request: {}", e),
                    })
                    .await;
                return;
            }
        };

        let stopping = request == IpcRequest::Stop;
        let response = respond(orchestrator, request).await;
        if let Err(e) = conn.send_response(&response).await {
            tracing::debug!("IPC client went away: {}", e);
            return;
        }
        if stopping {
            tracing::info!("Stop requested over IPC");
            stop.cancel();
            return;
        }
    }
}

/// Builds the response to one request.
pub async fn respond(orchestrator: &DaemonOrchestrator, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Status => {
            let status = orchestrator.status().await;
            IpcResponse::Status {
                running: status.running,
                uptime_secs: status.uptime_secs,
                port: status.port,
                user_count: status.user_count,
                session_count: status.session_count,
                connection_count: orchestrator.connection_count(),
            }
        }
        IpcRequest::ListSessions => IpcResponse::Sessions {
            sessions: orchestrator
                .registry()
                .records()
                .into_iter()
                .map(|record| IpcSessionInfo {
                    username: record.username,
                    connected_at: record
                        .connected_at
                        .duration_since(UNIX_EPOCH)
                        .map_or(0, |d| d.as_secs()),
                })
                .collect(),
        },
        IpcRequest::Stop => IpcResponse::Stopping,
    }
}
