//! Web server for the bridge.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::directory::Directory;
use crate::server::SessionManager;
use crate::{BridgeError, Result};

use super::router::create_router;
use super::ws::TerminalWsState;

/// Web server for browser terminals.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Configuration.
    config: Arc<Config>,
    /// Approved endpoint directory.
    directory: Arc<Directory>,
    /// Live sessions.
    sessions: SessionManager,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: Arc<Config>, directory: Arc<Directory>) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid server address: {e}")))?;

        Ok(Self {
            addr,
            config,
            directory,
            sessions: SessionManager::new(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Live sessions.
    pub fn sessions(&self) -> SessionManager {
        self.sessions.clone()
    }

    fn router(&self) -> axum::Router {
        let state = Arc::new(TerminalWsState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.directory),
            self.sessions.clone(),
        ));
        create_router(state, &self.config.server)
    }

    /// Run the web server until `shutdown` resolves, then close every
    /// session.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        let count = self.sessions.count().await;
        if count > 0 {
            tracing::info!("Closing {} session(s)", count);
        }
        self.sessions.shutdown_all().await;
        Ok(())
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Web server listening on http://{}", local_addr);

        tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticSource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn create_test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0; // Use random port
        Arc::new(config)
    }

    fn empty_directory() -> Arc<Directory> {
        Arc::new(Directory::new(StaticSource::new(Vec::new())))
    }

    #[test]
    fn test_web_server_new() {
        let server = WebServer::new(create_test_config(), empty_directory()).unwrap();
        assert_eq!(server.addr().ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_web_server_bad_address() {
        let mut config = Config::default();
        config.server.host = "not an address".to_string();
        let result = WebServer::new(Arc::new(config), empty_directory());
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_web_server_run() {
        let server = WebServer::new(create_test_config(), empty_directory()).unwrap();
        let addr = server.run_with_addr().await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("OK"), "{response}");
    }
}
