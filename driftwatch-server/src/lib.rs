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

//! Driftwatch Server
//!
//! The detector daemon: accepts line-oriented pub/sub TCP connections,
//! scores published observations against their learned per-phase history,
//! and fans detected anomalies out to subscribers.

pub mod client;
pub mod config;
pub mod hub;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use driftwatch_core::MetricFilter;
use driftwatch_storage::{Detector, StateStore};

use config::ServerConfig;
use hub::Hub;
use session::{handle_connection, SessionContext};

/// A bound detector server, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl Server {
    /// Validate the configuration, open the state store and bind the
    /// listen socket. Port 0 binds an ephemeral port; see [`local_addr`].
    ///
    /// [`local_addr`]: Server::local_addr
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        info!("opening state store at {:?}", config.dbfile);
        let store = StateStore::open(&config.dbfile)?;
        let detector = Detector::new(store, config.detector_config());
        let filter = MetricFilter::new(&config.whitelist, &config.blacklist);
        let hub = Arc::new(Hub::new());

        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext {
                detector,
                filter,
                hub,
            }),
        })
    }

    /// The address actually bound, for callers that asked for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one session task per connection.
    ///
    /// An accept error is logged and the loop continues.
    pub async fn serve(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&self.ctx)));
                }
                Err(err) => warn!("failed to accept new conn: {err}"),
            }
        }
    }
}

/// Initialize tracing, then bind and serve until the process ends.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftwatch_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("starting driftwatch server");
    Server::bind(&config).await?.serve().await
}
