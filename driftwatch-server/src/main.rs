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

use anyhow::Result;
use clap::Parser;
use driftwatch_server::{config::ServerConfig, run_server};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen port (overrides config file)
    #[arg(long, env = "DRIFTWATCH_PORT")]
    port: Option<u16>,

    /// State store path (overrides config file)
    #[arg(long, env = "DRIFTWATCH_DBFILE")]
    dbfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dbfile) = args.dbfile {
        config.dbfile = dbfile;
    }

    // Run server
    run_server(config).await
}
