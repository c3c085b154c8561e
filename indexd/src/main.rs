// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use clap::Parser;
use graph::PackageGraph;
use log::info;
use server::{Config, Server};

///
/// A line-oriented TCP service that tracks packages and their dependencies: `INDEX`
/// adds or re-points a package (refused if a dependency is unindexed or a cycle would
/// form), `REMOVE` deletes one that nothing depends on, `QUERY` checks presence.
///
/// The index lives in memory only; restarting the process empties it.
///
#[derive(Debug, Parser)]
#[command(name = "indexd")]
struct Opts {
    /// Log per-request timing diagnostics.
    #[arg(long)]
    debug: bool,

    /// Bind to 127.0.0.1 instead of to every interface.
    #[arg(long)]
    localhost: bool,

    /// Port to listen on.
    #[arg(long, default_value = "8080")]
    port: u16,
}

async fn execute(opts: Opts) -> Result<(), String> {
    let package_graph = Arc::new(PackageGraph::new());
    let config = Config {
        port: opts.port,
        loopback_only: opts.localhost,
        ..Config::default()
    };
    let mut server = Server::new(package_graph.clone(), config).await?;

    tokio::select! {
        interrupt = tokio::signal::ctrl_c() => {
            interrupt.map_err(|e| format!("Could not listen for the interrupt signal: {e}"))?;
        }
        exited = server.wait() => {
            // The accept loop died underneath us: surface whatever it reported.
            exited?;
            return Err("Server exited unexpectedly.".to_owned());
        }
    }

    info!(
        "Interrupted: shutting down with {} package(s) indexed",
        package_graph.len()
    );
    server.shutdown().await
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if opts.debug {
        "debug"
    } else {
        "info"
    }))
    .init();

    if let Err(err) = execute(opts).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
