// Shared helpers for running a real arena server inside integration tests.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use arena::{
    network::{
        frame::{read_frame, write_frame},
        server::{GameServer, GameServerError, ServerConfig},
    },
    Game,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

// A server serving on an ephemeral port for the duration of one test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<GameServer>,
    handle: JoinHandle<Result<(), GameServerError>>,
}

impl TestServer {
    // Signal shutdown and wait for the serve loop to return.
    pub async fn stop(self) -> Result<(), GameServerError> {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server should stop promptly")
            .expect("serve task should not panic")
    }
}

// Fast ticks and a short handshake window so tests finish quickly.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("valid addr"),
        tick_rate: 60,
        handshake_timeout: Duration::from_millis(300),
        rng_seed: 7,
        ..Default::default()
    }
}

pub async fn start_server() -> TestServer {
    let config = test_config();
    let game = Game::standard(config.rng_seed);
    start_with(config, game).await
}

pub async fn start_with(config: ServerConfig, game: Game) -> TestServer {
    // Bind first so the address is known before any client connects.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");

    let server = Arc::new(GameServer::with_game(config, game));
    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.serve(listener).await });

    TestServer { addr, server, handle }
}

pub async fn raw_connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect to test server")
}

pub async fn send_json<T: Serialize>(stream: &mut TcpStream, value: &T) {
    let bytes = serde_json::to_vec(value).expect("serialize");
    write_frame(stream, &bytes).await.expect("write frame");
}

pub async fn read_json<T: DeserializeOwned>(stream: &mut TcpStream) -> T {
    let payload = read_frame(stream).await.expect("read frame");
    serde_json::from_slice(&payload).expect("valid json frame")
}
