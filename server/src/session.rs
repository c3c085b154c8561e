// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Instant;

use futures::{SinkExt, StreamExt};
use graph::PackageGraph;
use log::debug;
use protocol::{Request, RequestCodec, Response, Verb};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::Config;

/// Why a session ended. Every exit path funnels through one of these, and the socket is
/// shut down in all cases.
#[derive(Debug)]
enum Terminal {
    Eof,
    ReadTimeout,
    BudgetExhausted,
    ErrorToleranceExceeded,
    SocketError(#[allow(dead_code)] std::io::Error),
}

pub(crate) async fn handle(
    session_id: u64,
    stream: TcpStream,
    package_graph: &PackageGraph,
    config: &Config,
) {
    let mut transport = Framed::new(stream, RequestCodec::new(config.max_frame_bytes));
    let terminal = run(session_id, &mut transport, package_graph, config).await;
    debug!("Session {session_id}: ended with {terminal:?}");

    let mut stream = transport.into_inner();
    let _ = stream.shutdown().await;
}

async fn run(
    session_id: u64,
    transport: &mut Framed<TcpStream, RequestCodec>,
    package_graph: &PackageGraph,
    config: &Config,
) -> Terminal {
    let mut remaining = config.session_budget;
    let mut errors: u64 = 0;
    let mut last_action = Instant::now();

    loop {
        if remaining.is_zero() {
            return Terminal::BudgetExhausted;
        }
        if errors > config.max_errors {
            return Terminal::ErrorToleranceExceeded;
        }

        let frame = match timeout(config.read_timeout, transport.next()).await {
            Err(_) => return Terminal::ReadTimeout,
            Ok(None) => return Terminal::Eof,
            Ok(Some(Err(e))) => return Terminal::SocketError(e),
            Ok(Some(Ok(frame))) => frame,
        };

        let request = match frame {
            Err(parse_error) => {
                debug!("Session {session_id}: malformed frame: {parse_error}");
                errors += 1;
                if let Err(e) = transport.send(Response::Error).await {
                    return Terminal::SocketError(e);
                }
                continue;
            }
            Ok(request) => request,
        };

        // Client-active time is the gap between completing the previous action and this
        // request arriving.
        remaining = remaining.saturating_sub(last_action.elapsed());

        let started = Instant::now();
        let response = dispatch(session_id, &request, package_graph);
        debug!(
            "Session {session_id}: {} {} -> {} in {:?}",
            request.verb.as_str(),
            request.package,
            response.as_str().trim_end(),
            started.elapsed(),
        );
        if let Err(e) = transport.send(response).await {
            return Terminal::SocketError(e);
        }
        // Stamped after the reply, so that the time spent dispatching is not billed to
        // the session.
        last_action = Instant::now();
    }
}

/// Runs one request against the graph. The graph takes its own lock; by the time the
/// response is in hand the lock has been released, so the reply I/O never happens under
/// it.
fn dispatch(session_id: u64, request: &Request, package_graph: &PackageGraph) -> Response {
    let result = match request.verb {
        Verb::Index => package_graph.index(&request.package, &request.dependencies),
        Verb::Remove => package_graph.remove(&request.package),
        Verb::Query => {
            return if package_graph.query(&request.package) {
                Response::Ok
            } else {
                Response::Fail
            };
        }
    };

    match result {
        Ok(()) => Response::Ok,
        Err(rejection) => {
            debug!(
                "Session {session_id}: {} {} refused: {rejection}",
                request.verb.as_str(),
                request.package
            );
            Response::Fail
        }
    }
}
