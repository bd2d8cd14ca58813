//! Connection multiplexer: command listener, terminal-state notifier
//! and the one-shot image socket.
//!
//! Each command client gets its own task holding a bounded line
//! buffer; complete lines go through the dispatch table, and
//! unsolicited broadcasts are interleaved with replies. The notifier
//! task is the only place that clears `FrameReady`/`Error`, after
//! broadcasting the transition to every client exactly once, so no
//! client can miss a completed frame.

use crate::config::ListenAddr;
use crate::context::Daemon;
use crate::dispatch::dispatch_line;
use ccd_core::protocol::ResultCode;
use ccd_core::state::CaptureState;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Run the daemon's socket front end: notifier, optional image
/// listener, and the command accept loop (which runs forever).
pub async fn run(daemon: Arc<Daemon>) -> anyhow::Result<()> {
    spawn_notifier(daemon.clone());
    if let Some(addr) = daemon.settings.image_listen_addr()? {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "image socket listening");
        spawn_image_listener(daemon.clone(), listener);
    }
    match daemon.settings.listen_addr()? {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(%addr, "command socket listening");
            run_tcp(daemon, listener).await
        }
        ListenAddr::Unix(path) => {
            // A leftover socket file from a previous run blocks bind.
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            tracing::info!(path = %path.display(), "command socket listening");
            run_unix(daemon, listener).await
        }
    }
}

/// Accept loop over a caller-supplied TCP listener.
pub async fn run_tcp(daemon: Arc<Daemon>, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => admit(daemon.clone(), stream, peer.to_string()),
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn run_unix(daemon: Arc<Daemon>, listener: UnixListener) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => admit(daemon.clone(), stream, "unix".to_string()),
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Admit one accepted connection, refusing it past the client cap.
fn admit<S>(daemon: Arc<Daemon>, stream: S, peer: String)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if !daemon.client_connected() {
        tracing::warn!(peer, "refusing client, at capacity");
        drop(stream);
        return;
    }
    tracing::info!(peer, clients = daemon.client_count(), "client connected");
    tokio::spawn(async move {
        let result = client_loop(&daemon, stream, &peer).await;
        daemon.client_disconnected();
        match result {
            Ok(()) => tracing::info!(peer, "client disconnected"),
            Err(err) => tracing::info!(peer, error = %err, "client dropped"),
        }
    });
}

async fn client_loop<S>(daemon: &Daemon, stream: S, peer: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut notifications = daemon.notifications();
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        tokio::select! {
            read = read_half.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                if pending.len() + n > daemon.settings.line_buffer_max {
                    tracing::warn!(peer, "line buffer overflow, dropping client");
                    return Ok(());
                }
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&raw);
                    let line = text.trim_end_matches(['\r', '\n']);
                    if !respond(daemon, line, &mut write_half).await? {
                        return Ok(());
                    }
                }
            }
            note = notifications.recv() => {
                match note {
                    Ok(line) => {
                        write_half.write_all(line.as_bytes()).await?;
                        write_half.write_all(b"\n").await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(peer, skipped, "client missed broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

/// Dispatch one line and write the response. `false` means tear the
/// connection down.
async fn respond<W>(daemon: &Daemon, line: &str, writer: &mut W) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::new();
    let code = dispatch_line(daemon, line, &mut out).await;
    if code == ResultCode::Disconnected {
        return Ok(false);
    }
    let mut reply = String::new();
    for response_line in &out {
        reply.push_str(response_line);
        reply.push('\n');
    }
    if let Some(status) = code.wire_str() {
        reply.push_str(status);
        reply.push('\n');
    }
    if !reply.is_empty() {
        writer.write_all(reply.as_bytes()).await?;
    }
    Ok(true)
}

/// Spawn the terminal-state notifier.
///
/// Watches capture state transitions; on `FrameReady`/`Error` it
/// broadcasts the new state (plus `lastfilename` when a frame was
/// written) and resets the state machine to `Idle`, all under the
/// device lock. Nothing else clears terminal states.
pub fn spawn_notifier(daemon: Arc<Daemon>) -> JoinHandle<()> {
    let state_rx = daemon.state_rx();
    tokio::spawn(notifier(daemon, state_rx))
}

async fn notifier(daemon: Arc<Daemon>, mut state_rx: watch::Receiver<CaptureState>) {
    while state_rx.changed().await.is_ok() {
        let seen = *state_rx.borrow_and_update();
        if !seen.is_terminal() {
            continue;
        }
        let mut shared = daemon.lock().await;
        if !shared.state.is_terminal() {
            continue;
        }
        daemon.broadcast(format!("expstate={}", shared.state.as_wire()));
        if shared.state == CaptureState::FrameReady {
            if let Some(name) = shared.session.announce_filename.take() {
                daemon.broadcast(format!("lastfilename={name}"));
            }
        }
        daemon.set_state(&mut shared, CaptureState::Idle);
    }
}

/// Spawn the one-shot image listener: each accepted connection gets
/// the current header then the pixel payload, then is closed. No
/// handshake.
pub fn spawn_image_listener(daemon: Arc<Daemon>, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let daemon = daemon.clone();
                    tokio::spawn(async move {
                        if let Err(err) = send_image(&daemon, stream).await {
                            tracing::debug!(%peer, error = %err, "image send failed");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "image accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
}

async fn send_image(daemon: &Daemon, mut stream: TcpStream) -> anyhow::Result<()> {
    // Copy out under the bounded lock; write after releasing it.
    let (header, payload) = match daemon.lock_bounded().await {
        Some(shared) => shared.segment.snapshot(),
        None => anyhow::bail!("device lock busy"),
    };
    stream.write_all(&header.to_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}
