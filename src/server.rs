//! Accepts connections, authenticates, dispatches commands to
//! [`Handler`], and drives the 1 Hz [`crate::scheduler::Scheduler`]
//! (§4.5/§4.8 of the design).
//!
//! Concurrency model (§5): `Handler` (and the `StoreManager`/`Scheduler`
//! it owns) lives behind a single Tokio task reached only through an
//! `mpsc` channel, mirroring the teacher's single-mutable-state-behind-
//! an-actor-task style in `ws::manager::DhanFeedManager`. Every
//! connection task and the scheduler's own ticker send `ActorCommand`s
//! into that channel; nothing else touches the stores, so there is a
//! total order over writes and `mtime` updates without a store-wide lock.

use std::time::Duration;

use chrono::Local;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::constants::SCHEDULER_TICK;
use crate::error::{DatafeedError, Result};
use crate::handler::Handler;
use crate::protocol::frame::{read_frame, Frame, Reply, Request};
use crate::protocol::connection::Connection;
use crate::providers::{DividendProvider, SectorProvider};
use crate::store::manager::StoreManager;

/// A unit of work sent to the store-owning actor task.
enum ActorCommand {
    Dispatch {
        now: i64,
        request: Request,
        respond_to: oneshot::Sender<Reply>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// A cheap, cloneable handle to the actor task's inbox. Every connection
/// task gets one.
#[derive(Clone)]
struct StoreHandle {
    tx: mpsc::Sender<ActorCommand>,
}

impl StoreHandle {
    async fn dispatch(&self, request: Request) -> Result<Reply> {
        let (respond_to, rx) = oneshot::channel();
        let now = Local::now().timestamp();
        self.tx
            .send(ActorCommand::Dispatch { now, request, respond_to })
            .await
            .map_err(|_| DatafeedError::Fatal("store actor unavailable".to_string()))?;
        rx.await
            .map_err(|_| DatafeedError::Fatal("store actor dropped the response channel".to_string()))
    }

    async fn shutdown(&self) {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(ActorCommand::Shutdown { respond_to }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Runs on its own Tokio task for the lifetime of the process: owns
/// `handler` exclusively, services dispatch requests as they arrive, and
/// fires one [`Handler::tick`] per [`SCHEDULER_TICK`] interval.
async fn run_store_actor(mut handler: Handler, mut rx: mpsc::Receiver<ActorCommand>) {
    let mut ticker = tokio::time::interval(SCHEDULER_TICK);
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(ActorCommand::Dispatch { now, request, respond_to }) => {
                        let reply = handler.dispatch(now, &request);
                        let _ = respond_to.send(reply);
                    }
                    Some(ActorCommand::Shutdown { respond_to }) => {
                        if let Err(err) = handler.close() {
                            tracing::error!(error = %err, "error flushing stores on shutdown");
                        }
                        let _ = respond_to.send(());
                        return;
                    }
                    None => return,
                }
            }
            _ = ticker.tick() => {
                let now = Local::now().timestamp();
                if let Err(err) = handler.tick(now) {
                    tracing::warn!(error = %err, "scheduler tick failed");
                }
            }
        }
    }
}

/// Accepts and authenticates connections, and owns the store actor's
/// lifetime for the duration of [`Server::run`].
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Server { config }
    }

    /// Open the stores, spawn the store actor, and serve connections until
    /// `SIGINT`/`SIGTERM` (or, on non-Unix targets, `Ctrl-C` alone).
    pub async fn run(
        self,
        dividend_provider: Box<dyn DividendProvider>,
        sector_provider: Box<dyn SectorProvider>,
    ) -> Result<()> {
        let manager = StoreManager::open(&self.config.datadir, self.config.calendar)?;
        let handler = Handler::new(manager, self.config.calendar, dividend_provider, sector_provider);

        let (tx, rx) = mpsc::channel(1024);
        let actor_handle = tokio::spawn(run_store_actor(handler, rx));
        let store = StoreHandle { tx };

        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        tracing::info!(port = self.config.port, datadir = %self.config.datadir, "datafeed server listening");

        let requires_auth = self.config.requires_auth();
        let password = self.config.password.clone();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let store = store.clone();
                    let password = password.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, peer, requires_auth, password, store).await {
                            tracing::debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                _ = shutdown_signal() => {
                    tracing::info!("shutdown signal received, draining connections");
                    break;
                }
            }
        }

        // Process shutdown (§5): stop accepting, flush via the actor, then
        // let it exit. In-flight connection tasks finish their current
        // request/reply on their own; we don't forcibly kill them.
        store.shutdown().await;
        let _ = actor_handle.await;
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Drives one connection's parse state machine (§4.6): read a frame,
/// gate on auth, dispatch or handle `auth` locally, reply, repeat until
/// `quit`, clean EOF, or an unrecoverable framing error.
async fn handle_connection(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    requires_auth: bool,
    password: Option<String>,
    store: StoreHandle,
) -> Result<()> {
    let mut conn = Connection::new(stream, peer, requires_auth);

    loop {
        match read_frame(&mut conn.reader).await {
            Ok(Frame::Eof) | Ok(Frame::Quit) => return Ok(()),
            Ok(Frame::Request(req)) => {
                let reply = if req.command == "auth" {
                    handle_auth(&mut conn, &req, password.as_deref())
                } else if requires_auth && !conn.is_authenticated() {
                    Reply::Error("operation not permitted".to_string())
                } else {
                    match store.dispatch(req).await {
                        Ok(reply) => reply,
                        Err(err) => Reply::from(err),
                    }
                };
                conn.send(reply).await?;
            }
            Err(err) => {
                // Framing errors are unrecoverable mid-stream (§7): reply
                // once, then close rather than trying to resynchronize.
                let _ = conn.send(Reply::from(err)).await;
                return Ok(());
            }
        }
    }
}

fn handle_auth(conn: &mut Connection, req: &Request, password: Option<&str>) -> Reply {
    let candidate = req.arg_str(0).unwrap_or("");
    match password {
        None => {
            conn.authenticate();
            Reply::Ok
        }
        Some(expected) if expected == candidate => {
            conn.authenticate();
            Reply::Ok
        }
        Some(_) => Reply::Error("invalid password".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::providers::NullProvider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn spawn_store(dir: &std::path::Path) -> StoreHandle {
        let manager = StoreManager::open(dir, Calendar::sh_sz()).unwrap();
        let handler = Handler::new(manager, Calendar::sh_sz(), Box::new(NullProvider), Box::new(NullProvider));
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_store_actor(handler, rx));
        StoreHandle { tx }
    }

    fn tmp_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("server-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn store_handle_dispatch_round_trips_through_actor() {
        let store = spawn_store(&tmp_dir("actor"));
        let reply = store
            .dispatch(Request { command: "get_mtime".to_string(), args: vec![] })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));
        store.shutdown().await;
    }

    /// Drives a real accepted socket through [`handle_connection`] to
    /// cover the auth gate end to end (scenario 1 of §8).
    #[tokio::test]
    async fn unauthenticated_connection_is_rejected_then_auth_unlocks_it() {
        let store = spawn_store(&tmp_dir("auth-gate"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_store = store.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, peer, true, Some("pw".to_string()), server_store).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*2\r\n$4\r\nauth\r\n$2\r\npw\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+OK\r\n");

        client.write_all(b"*1\r\n$9\r\nget_mtime\r\n").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b":0\r\n");
    }

    #[tokio::test]
    async fn unauthenticated_get_mtime_is_rejected() {
        let store = spawn_store(&tmp_dir("auth-reject"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, peer, true, Some("pw".to_string()), store).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*1\r\n$9\r\nget_mtime\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"-ERR operation not permitted\r\n");
    }
}
