#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use rjl_common::{Frame, FrameCodec};
use rjls::config::ServerConfig;
use rjls::logger::DecisionLogger;
use rjls::server::ServerState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

pub fn test_config(listen: SocketAddr, dir: &TempDir) -> ServerConfig {
    ServerConfig {
        listen,
        rejects_path: dir.path().join("rejects.txt"),
        log_path: dir.path().join("log.txt"),
        queue_capacity: 64,
        write_timeout: 5,
        max_conns: 1000,
        max_line: 4096,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
    }
}

/// A relay running on an ephemeral port, shut down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub dir: TempDir,
    shutdown_tx: watch::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn log_path(&self) -> PathBuf {
        self.state.logger.path().to_path_buf()
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap_or_default()
    }

    /// Signal shutdown and wait for the accept loop to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

pub async fn start_server_with(tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr, &dir);
    tweak(&mut config);

    let logger = DecisionLogger::open(&config.log_path).await.unwrap();
    let state = Arc::new(ServerState::new(config, logger));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let state_clone = state.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = rjls::run_with_shutdown(listener, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    TestServer {
        addr,
        state,
        dir,
        shutdown_tx,
        handle,
    }
}

/// Wait until the relay has registered `count` connections.
pub async fn wait_for_connections(state: &ServerState, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.registry.len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timeout waiting for connections");
}

pub struct TestClient {
    pub framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    pub async fn send_report(&mut self, from: &str, to: &str, rejected: bool) {
        self.send(Frame::report(from, to, rejected)).await;
    }

    /// Write bytes straight to the socket, bypassing the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.unwrap();
        stream.flush().await.unwrap();
    }

    pub async fn recv_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timeout waiting for frame")
            .expect("connection closed")
            .unwrap()
            .unwrap()
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        match tokio::time::timeout(timeout, self.framed.next()).await {
            Ok(Some(Ok(Ok(frame)))) => Some(frame),
            _ => None,
        }
    }

    /// Receive `n` frames and return the hosts of the ADD frames among them.
    pub async fn recv_adds(&mut self, n: usize) -> Vec<String> {
        let mut hosts = Vec::with_capacity(n);
        for _ in 0..n {
            match self.recv_frame().await {
                Frame::Add { host } => hosts.push(host),
                other => panic!("expected ADD, got {other:?}"),
            }
        }
        hosts
    }

    /// Returns `true` once the server has closed the connection.
    pub async fn is_closed_within(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                match self.framed.next().await {
                    None | Some(Err(_)) => return true,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}

/// Poll the decision log until it holds `lines` lines.
pub async fn wait_for_log_lines(server: &TestServer, lines: usize) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let contents = server.log_contents();
            if contents.lines().count() >= lines {
                return contents;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timeout waiting for decision log")
}
