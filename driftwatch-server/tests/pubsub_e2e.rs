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

//! End-to-end tests over real TCP sockets: publishers and subscribers talk
//! to a served detector through the line protocol.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use driftwatch_core::Stat;
use driftwatch_server::client::Client;
use driftwatch_server::config::ServerConfig;
use driftwatch_server::Server;
use driftwatch_storage::{state_key, StateStore, StoreError};

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

fn test_config(dir: &TempDir) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.port = 0;
    config.dbfile = dir.path().join("stats.db");
    config.factor = 0.07;
    config.strict = true;
    config.periodicity = [60, 10];
    config.start_size = 1;
    config
}

async fn start_server(config: &ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let server = Server::bind(config).await.expect("bind server");
    let port = server.local_addr().expect("local addr").port();
    let handle = tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (SocketAddr::from(([127, 0, 0, 1], port)), handle)
}

/// Connect a subscriber and hand its first delivery to a background task,
/// giving the server a moment to register it before anything publishes.
async fn spawn_subscriber(addr: SocketAddr) -> JoinHandle<Stat> {
    let mut sub = Client::connect(addr).await.expect("connect subscriber");
    let handle = tokio::spawn(async move {
        timeout(RECV_TIMEOUT, sub.next_anomaly())
            .await
            .expect("timed out waiting for an anomaly")
            .expect("receive anomaly")
    });
    sleep(Duration::from_millis(200)).await;
    handle
}

async fn open_store_with_retry(path: &Path) -> StateStore {
    for _ in 0..50 {
        if let Ok(store) = StateStore::open(path) {
            return store;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("state store stayed locked");
}

#[tokio::test]
async fn warm_up_then_detect_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.start_size = 2;
    let (addr, _server) = start_server(&config).await;

    let received = spawn_subscriber(addr).await;

    let mut publisher = Client::connect(addr).await.unwrap();
    for _ in 0..3 {
        publisher.publish("foo", 1000, 10.0).await.unwrap();
    }
    publisher.publish("foo", 1000, 500.0).await.unwrap();

    // the warm-up observations must not have produced deliveries, so the
    // first line the subscriber sees is the spike
    let stat = received.await.unwrap();
    assert_eq!(stat.name, "foo");
    assert_eq!(stat.stamp, 1000);
    assert_eq!(stat.value, 500.0);
    assert_eq!(stat.avg_old, 10.0);
    assert!(stat.anoma.abs() >= 1.0);
}

#[tokio::test]
async fn blacklist_precedence_skips_state_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.whitelist = vec!["*".to_string()];
    config.blacklist = vec!["sys.*".to_string()];
    let (addr, server) = start_server(&config).await;

    let mut publisher = Client::connect(addr).await.unwrap();
    publisher.publish("sys.cpu", 1, 1.0).await.unwrap();
    publisher.publish("app.cpu", 1, 1.0).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // close the session, then the acceptor, releasing the store
    drop(publisher);
    sleep(Duration::from_millis(200)).await;
    server.abort();

    let store = open_store_with_retry(&config.dbfile).await;
    let sys_key = state_key("sys.cpu", 1, 60, 10);
    let app_key = state_key("app.cpu", 1, 60, 10);
    assert!(matches!(store.load(&sys_key), Err(StoreError::NotFound)));
    let record = store.load(&app_key).unwrap();
    assert_eq!(record.avg, 1.0);
    assert_eq!(record.count, 0);
}

#[tokio::test]
async fn fan_out_reaches_every_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (addr, _server) = start_server(&config).await;

    let first = spawn_subscriber(addr).await;
    let second = spawn_subscriber(addr).await;

    let mut publisher = Client::connect(addr).await.unwrap();
    for value in [10.0, 10.0, 500.0] {
        publisher.publish("m", 1000, value).await.unwrap();
    }

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.name, "m");
    assert_eq!(first.stamp, 1000);
    assert_eq!(first.value, 500.0);
    assert!(first.anoma.abs() >= 1.0);
}

#[tokio::test]
async fn malformed_lines_do_not_close_the_pub_connection() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (addr, _server) = start_server(&config).await;

    let received = spawn_subscriber(addr).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"pub\n").await.unwrap();
    raw.write_all(b"not-a-stat\n").await.unwrap();
    raw.write_all(b"two fields\n").await.unwrap();
    raw.write_all(b"m 1 notafloat\n").await.unwrap();
    raw.write_all(b"m one 1.0\n").await.unwrap();
    // the same connection still works after the garbage
    raw.write_all(b"m 1000 10\nm 1000 10\nm 1000 500\n")
        .await
        .unwrap();

    let stat = received.await.unwrap();
    assert_eq!(stat.name, "m");
    assert_eq!(stat.value, 500.0);
}

#[tokio::test]
async fn unknown_control_line_closes_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (addr, _server) = start_server(&config).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"hello\n").await.unwrap();

    let mut buf = Vec::new();
    let read = timeout(RECV_TIMEOUT, raw.read_to_end(&mut buf))
        .await
        .expect("server should close the connection")
        .unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
async fn slow_subscriber_does_not_stall_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (addr, _server) = start_server(&config).await;

    const ANOMALIES: usize = 500;

    // fast subscriber drains everything
    let mut fast = Client::connect(addr).await.unwrap();
    let fast_task = tokio::spawn(async move {
        let mut names = Vec::with_capacity(ANOMALIES);
        for _ in 0..ANOMALIES {
            let stat = timeout(RECV_TIMEOUT, fast.next_anomaly())
                .await
                .expect("fast subscriber starved")
                .expect("receive anomaly");
            names.push(stat.name);
        }
        names
    });

    // slow subscriber registers and then never reads its socket
    let mut slow = TcpStream::connect(addr).await.unwrap();
    slow.write_all(b"sub\n").await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let mut publisher = Client::connect(addr).await.unwrap();
    for i in 0..ANOMALIES {
        let name = format!("m{i}");
        publisher.publish(&name, 1000, 10.0).await.unwrap();
        publisher.publish(&name, 1000, 10.0).await.unwrap();
        publisher.publish(&name, 1000, 500.0).await.unwrap();
    }

    // every anomaly reaches the healthy subscriber, in publish order
    let names = fast_task.await.unwrap();
    for (i, name) in names.iter().enumerate() {
        assert_eq!(name, &format!("m{i}"));
    }

    // the stuck subscriber is still registered but irrelevant
    drop(slow);
}

#[tokio::test]
async fn corrupt_stored_record_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    // pre-write garbage under the key the first publish will hit
    {
        let db = sled::open(&config.dbfile).unwrap();
        let key = state_key("foo", 1000, 60, 10);
        db.insert(key.as_bytes(), b"total garbage".as_ref()).unwrap();
        db.flush().unwrap();
    }
    sleep(Duration::from_millis(200)).await;

    let (addr, _server) = start_server(&config).await;
    let received = spawn_subscriber(addr).await;

    let mut publisher = Client::connect(addr).await.unwrap();
    // first observation hits the corrupt record and is skipped
    publisher.publish("foo", 1000, 10.0).await.unwrap();
    // the key was re-seeded, the rest behaves like a fresh metric
    publisher.publish("foo", 1000, 10.0).await.unwrap();
    publisher.publish("foo", 1000, 10.0).await.unwrap();
    publisher.publish("foo", 1000, 500.0).await.unwrap();

    let stat = received.await.unwrap();
    assert_eq!(stat.name, "foo");
    assert_eq!(stat.value, 500.0);
    assert!(stat.anoma.abs() >= 1.0);
}
