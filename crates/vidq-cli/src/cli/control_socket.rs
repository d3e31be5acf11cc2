//! Control socket served by `vidq run`, so other `vidq` invocations act on the live
//! coordinator (and its cancel tokens) instead of only the database row.
//!
//! One request line per command, one reply line back:
//! `cancel <id>`, `pause [reason]`, `resume`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use vidq_core::coordinator::Coordinator;
use vidq_core::ledger::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Cancel(JobId),
    Pause(Option<String>),
    Resume,
}

impl Request {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let rest: Vec<&str> = words.collect();
        match verb {
            "cancel" => match rest.as_slice() {
                [id] => id.parse().ok().map(Request::Cancel),
                _ => None,
            },
            "pause" if rest.is_empty() => Some(Request::Pause(None)),
            "pause" => Some(Request::Pause(Some(rest.join(" ")))),
            "resume" if rest.is_empty() => Some(Request::Resume),
            _ => None,
        }
    }

    pub(crate) fn to_line(&self) -> String {
        match self {
            Request::Cancel(id) => format!("cancel {id}"),
            Request::Pause(None) => "pause".to_string(),
            Request::Pause(Some(reason)) => format!("pause {reason}"),
            Request::Resume => "resume".to_string(),
        }
    }
}

/// Apply one request line to the coordinator and build the reply line.
pub(crate) async fn handle_line(coordinator: &Coordinator, line: &str) -> String {
    let Some(request) = Request::parse(line) else {
        return format!("error unknown command: {}", line.trim());
    };
    let result = match &request {
        Request::Cancel(id) => coordinator.cancel(*id).await.map(|changed| {
            if changed {
                format!("cancelled {id}")
            } else {
                format!("not-cancellable {id}")
            }
        }),
        Request::Pause(reason) => coordinator
            .pause_queue(reason.as_deref())
            .await
            .map(|()| "paused".to_string()),
        Request::Resume => coordinator
            .resume_queue()
            .await
            .map(|()| "resumed".to_string()),
    };
    match result {
        Ok(reply) => {
            tracing::info!(request = %request.to_line(), %reply, "control socket request");
            reply
        }
        Err(e) => format!("error {:#}", e),
    }
}

async fn serve_connection(coordinator: Arc<Coordinator>, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = handle_line(&coordinator, &line).await;
        reply.push('\n');
        write.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

/// Bind `path` (replacing a stale socket) and serve requests until the task is aborted.
pub(crate) fn spawn_control_listener(
    coordinator: Arc<Coordinator>,
    path: &Path,
) -> Result<tokio::task::JoinHandle<()>> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(coordinator, stream).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

/// Send one request to a running `vidq run` and return its reply.
/// None when no worker is listening on `path`.
pub(crate) async fn request(path: &Path, req: &Request) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(path).await {
        Ok(s) => s,
        // left behind by a worker that did not exit cleanly
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{}\n", req.to_line()).as_bytes())
        .await?;
    write.shutdown().await?;
    let reply = BufReader::new(read).lines().next_line().await?;
    Ok(reply)
}

/// Hand `req` to the running worker if there is one. Connection problems count as
/// "no worker" so the caller falls back to acting on the database directly.
pub(crate) async fn forward(req: &Request) -> Option<String> {
    let path = vidq_core::control::default_control_socket_path().ok()?;
    match request(&path, req).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::debug!(path = %path.display(), "control socket: {:#}", e);
            None
        }
    }
}
