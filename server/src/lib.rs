// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


mod session;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use graph::PackageGraph;
use log::{debug, info};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};

///
/// Tunables for the listener and its sessions. `Default` gives the production settings;
/// tests shrink the timeouts.
///
#[derive(Clone, Debug)]
pub struct Config {
    /// Port to listen on. `0` requests an ephemeral port.
    pub port: u16,
    /// Bind to loopback rather than to every interface.
    pub loopback_only: bool,
    /// A session that makes no read progress for this long is disconnected.
    pub read_timeout: Duration,
    /// Cumulative client-active time a session may spend before being disconnected.
    /// Time the server spends dispatching is not billed against it.
    pub session_budget: Duration,
    /// Longest accepted request line, terminator included.
    pub max_frame_bytes: usize,
    /// Malformed frames tolerated before a session is cut. Effectively unbounded in
    /// production: a session is never cut for its first mistakes.
    pub max_errors: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8080,
            loopback_only: false,
            read_timeout: Duration::from_secs(30),
            session_budget: Duration::from_secs(120),
            max_frame_bytes: protocol::MAX_FRAME_BYTES,
            max_errors: u64::MAX,
        }
    }
}

///
/// The acceptor: owns the listening socket, tags each accepted connection with a
/// monotonic session id, and spawns one task per connection against the shared
/// `PackageGraph`. It never blocks on a session.
///
pub struct Server {
    exit_sender: oneshot::Sender<()>,
    exited_receiver: oneshot::Receiver<Result<(), String>>,
    port: u16,
}

impl Server {
    ///
    /// Bind and spawn the accept loop on a background task.
    ///
    /// The configured port may be `0` in order to request a random port; `Server::port`
    /// reports the port actually selected.
    ///
    pub async fn new(package_graph: Arc<PackageGraph>, config: Config) -> Result<Server, String> {
        let ip = if config.loopback_only {
            Ipv4Addr::LOCALHOST
        } else {
            Ipv4Addr::UNSPECIFIED
        };
        let listener = TcpListener::bind((ip, config.port))
            .await
            .map_err(|e| format!("Could not bind to {ip}:{}: {e}", config.port))?;
        let port = listener
            .local_addr()
            .map_err(|e| format!("No local address for listener: {e}"))?
            .port();
        info!("Package index listening on {ip}:{port}");

        let (exited_sender, exited_receiver) = oneshot::channel();
        let (exit_sender, exit_receiver) = oneshot::channel();
        tokio::spawn(Self::serve(
            package_graph,
            Arc::new(config),
            exit_receiver,
            exited_sender,
            listener,
        ));

        Ok(Server {
            exit_sender,
            exited_receiver,
            port,
        })
    }

    async fn serve(
        package_graph: Arc<PackageGraph>,
        config: Arc<Config>,
        should_exit: oneshot::Receiver<()>,
        exited: oneshot::Sender<Result<(), String>>,
        listener: TcpListener,
    ) {
        let result = Self::accept_loop(package_graph, config, should_exit, listener).await;
        info!("Server exiting with {result:?}");
        let _ = exited.send(result);
    }

    async fn accept_loop(
        package_graph: Arc<PackageGraph>,
        config: Arc<Config>,
        mut should_exit: oneshot::Receiver<()>,
        listener: TcpListener,
    ) -> Result<(), String> {
        // Sessions hold `read` while they run; shutdown takes `write` to drain them.
        let ongoing_sessions = Arc::new(RwLock::new(()));
        let mut session_id: u64 = 0;

        let result = loop {
            let (stream, peer) = tokio::select! {
                _ = &mut should_exit => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => break Err(format!("Server failed to accept connections: {e}")),
                },
            };

            session_id += 1;
            debug!("Session {session_id}: accepted connection from {peer}");

            // The guard is taken before spawning, so a shutdown arriving between accept
            // and task start still waits for this session.
            let running = ongoing_sessions.clone().read_owned().await;
            let package_graph = package_graph.clone();
            let config = config.clone();
            tokio::spawn(async move {
                session::handle(session_id, stream, &package_graph, &config).await;
                drop(running);
            });
        };

        // Taking write access proves that every session guard has been dropped.
        debug!("Waiting for in-flight sessions to complete...");
        let _ = ongoing_sessions.write().await;
        debug!("All sessions completed.");
        result
    }

    /// The port that the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    ///
    /// Wait for the accept loop to exit on its own, without asking it to. A fatal error
    /// from the listening socket surfaces here; while the server is healthy this stays
    /// pending.
    ///
    pub async fn wait(&mut self) -> Result<(), String> {
        (&mut self.exited_receiver)
            .await
            .map_err(|_| "Server exited uncleanly.".to_owned())?
    }

    ///
    /// Shut the server down by:
    /// 1. no longer accepting new connections
    /// 2. waiting for in-flight sessions to complete
    ///
    pub async fn shutdown(self) -> Result<(), String> {
        // If the exit signal cannot be sent, the accept loop is already gone.
        let _ = self.exit_sender.send(());
        self.exited_receiver
            .await
            .map_err(|_| "Server exited uncleanly.".to_owned())?
    }
}
