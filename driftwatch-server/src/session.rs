// Copyright 2025 Driftwatch Contributors (https://github.com/driftwatch/driftwatch)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-connection session handling.
//!
//! The first line of a connection selects pub or sub mode; the mode is
//! fixed for the connection's lifetime. Pub connections stream
//! observations through parse -> admit -> detect -> broadcast. Sub
//! connections drain their hub queue onto the socket.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use driftwatch_core::{format_sub_line, parse_pub_line, MetricFilter, Mode, MAX_LINE_LEN};
use driftwatch_storage::Detector;

use crate::hub::Hub;

/// Shared pieces of the server handed to every session.
pub struct SessionContext {
    pub detector: Detector,
    pub filter: MetricFilter,
    pub hub: Arc<Hub>,
}

/// Drive one accepted connection to completion.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<SessionContext>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("conn {peer} established");

    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let mode = match framed.next().await {
        Some(Ok(line)) => match Mode::parse(&line) {
            Some(mode) => mode,
            None => {
                warn!("conn {peer} sent unknown control line {line:?}, closing");
                return;
            }
        },
        Some(Err(err)) => {
            warn!("conn {peer} failed before mode selection: {err}, closing");
            return;
        }
        None => {
            info!("conn {peer} disconnected");
            return;
        }
    };

    match mode {
        Mode::Pub => {
            info!("conn {peer} mode: pub");
            pub_loop(&mut framed, &ctx, &peer).await;
        }
        Mode::Sub => {
            info!("conn {peer} mode: sub");
            sub_loop(&mut framed, &ctx, &peer).await;
        }
    }
    info!("conn {peer} disconnected");
}

/// Read observations until EOF or I/O error.
///
/// Malformed lines and per-observation detector errors are logged and
/// skipped; only the wire ends this loop.
async fn pub_loop(
    framed: &mut Framed<TcpStream, LinesCodec>,
    ctx: &SessionContext,
    peer: &str,
) {
    while let Some(result) = framed.next().await {
        let line = match result {
            Ok(line) => line,
            Err(err) => {
                warn!("conn {peer} read failed: {err}, closing");
                return;
            }
        };

        let mut stat = match parse_pub_line(&line) {
            Ok(stat) => stat,
            Err(err) => {
                warn!("conn {peer}: {err}, skipping");
                continue;
            }
        };
        if !ctx.filter.admit(&stat.name) {
            continue;
        }

        let started = Instant::now();
        if let Err(err) = ctx.detector.detect(&mut stat) {
            warn!("failed to detect {}: {err}, skipping", stat.name);
            continue;
        }
        debug!(
            "{:.2}ms {}",
            started.elapsed().as_secs_f64() * 1000.0,
            format_sub_line(&stat)
        );

        if stat.is_anomalous() {
            ctx.hub.broadcast(&stat);
        }
    }
}

/// Forward broadcast stats onto the socket until a write fails.
async fn sub_loop(
    framed: &mut Framed<TcpStream, LinesCodec>,
    ctx: &SessionContext,
    peer: &str,
) {
    let mut subscription = Arc::clone(&ctx.hub).register();
    debug!("conn {peer} registered as subscriber {}", subscription.id());

    while let Some(stat) = subscription.recv().await {
        if let Err(err) = framed.send(format_sub_line(&stat)).await {
            warn!("conn {peer} write failed: {err}, closing");
            break;
        }
    }
    // subscription drops here and unregisters from the hub
}
