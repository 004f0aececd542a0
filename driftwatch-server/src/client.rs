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

//! Line-protocol client for the detector daemon.
//!
//! A connection is pinned to one mode by its first use: [`Client::publish`]
//! sends the `pub` control line lazily, [`Client::next_anomaly`] sends
//! `sub`. Mixing the two on one connection is a usage error.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use driftwatch_core::{parse_sub_line, Mode, Stat};

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection already pinned to {0:?} mode")]
    ModePinned(Mode),

    #[error("server closed the connection")]
    Disconnected,

    #[error(transparent)]
    Wire(#[from] driftwatch_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A pub or sub connection to a running detector.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    mode: Option<Mode>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            mode: None,
        })
    }

    async fn declare(&mut self, mode: Mode) -> ClientResult<()> {
        match self.mode {
            Some(current) if current == mode => Ok(()),
            Some(current) => Err(ClientError::ModePinned(current)),
            None => {
                let line = match mode {
                    Mode::Pub => "pub\n",
                    Mode::Sub => "sub\n",
                };
                self.writer.write_all(line.as_bytes()).await?;
                self.mode = Some(mode);
                Ok(())
            }
        }
    }

    /// Publish one observation.
    pub async fn publish(&mut self, name: &str, stamp: i64, value: f64) -> ClientResult<()> {
        self.declare(Mode::Pub).await?;
        let line = format!("{name} {stamp} {value}\n");
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Block until the server pushes the next anomaly.
    pub async fn next_anomaly(&mut self) -> ClientResult<Stat> {
        self.declare(Mode::Sub).await?;
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(ClientError::Disconnected);
        }
        Ok(parse_sub_line(&line)?)
    }
}
