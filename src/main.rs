use std::sync::Arc;

use tracing::{error, info, warn};

use bbs_bridge::{Config, Directory, TomlFileSource, WebServer};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = bbs_bridge::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        bbs_bridge::logging::init_console_only(&config.logging.level);
    }

    info!("bbs-bridge {}", env!("CARGO_PKG_VERSION"));

    let directory = Arc::new(Directory::new(TomlFileSource::new(&config.directory.path)));
    match directory.refresh().await {
        Ok(count) => info!("Loaded {} approved endpoints from {}", count, config.directory.path),
        Err(e) => warn!(
            "Failed to load directory {}: {}. All connections will be blocked.",
            config.directory.path, e
        ),
    }

    let server = match WebServer::new(Arc::new(config), directory) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    if let Err(e) = server.run(shutdown).await {
        error!("Web server error: {}", e);
        std::process::exit(1);
    }
}
