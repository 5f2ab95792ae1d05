//! Client binary: connect to a server socket and print its status.

use std::process::exit;

use meander_client::Client;
use tracing::error;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: meander-client <socket-path>");
        exit(2);
    };

    let client = match Client::connect(&path) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, path, "connect failed");
            exit(1);
        }
    };

    let welcome = client.welcome();
    println!(
        "connected: {} world {}x{}, K={}, reps={}",
        welcome.world_kind,
        welcome.size.width,
        welcome.size.height,
        welcome.k_max_steps,
        welcome.total_reps,
    );

    match client.query_status() {
        Ok(status) => println!(
            "state={} rep {}/{} clients={} owner_pid={}",
            status.sim_state,
            status.current_rep,
            status.total_reps,
            status.client_count,
            status.owner_pid,
        ),
        Err(e) => {
            error!(error = %e, "status query failed");
            exit(1);
        }
    }
}
