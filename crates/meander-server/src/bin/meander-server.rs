//! Server binary: bind the control socket and serve until SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meander_server::{Server, ServerConfig};
use tracing::error;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::at_path(path),
        None => ServerConfig::default(),
    };

    let mut server = match Server::start(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .expect("failed to install signal handler");
    }

    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }
    server.shutdown();
}
