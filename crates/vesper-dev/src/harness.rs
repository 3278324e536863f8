use std::net::SocketAddr;
use std::thread::JoinHandle;

use thiserror::Error;

use vesper_config::ServerConfig;
use vesper_server::{Server, ServerError, ShutdownHandle};

use crate::client::TestClient;

#[derive(Debug, Error)]
pub enum DevError {
    #[error("failed to start test server: {0}")]
    Start(#[from] ServerError),
    #[error("failed to connect test client: {0}")]
    Connect(#[from] std::io::Error),
}

/// An in-process `vesper-server`, listening on an ephemeral port, with its
/// event loop running on a background thread. Dropping it requests
/// graceful shutdown and joins the thread.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Binds and starts a server. `config.port` is forced to `0` (OS picks
    /// an ephemeral port) regardless of what the caller passed, so
    /// concurrently-run tests never collide on a fixed port.
    pub fn start(mut config: ServerConfig) -> Result<Self, DevError> {
        config.port = 0;
        config.bind = "127.0.0.1".to_string();
        let mut server = Server::bind(config)?;
        server.load_dataset()?;
        let addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();

        let handle = std::thread::Builder::new()
            .name("vesper-dev-test-server".to_string())
            .spawn(move || {
                if let Err(e) = server.run() {
                    tracing::error!(error = %e, "test server exited with error");
                }
            })
            .expect("failed to spawn test server thread");

        Ok(Self { addr, shutdown, handle: Some(handle) })
    }

    /// The address the test server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Opens a new client connection to this server.
    pub fn connect(&self) -> Result<TestClient, DevError> {
        Ok(TestClient::connect(self.addr)?)
    }

    /// Requests graceful shutdown and blocks until the event loop thread
    /// exits. Also happens automatically on [`Drop`].
    pub fn shutdown(&mut self) {
        self.shutdown.request();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
