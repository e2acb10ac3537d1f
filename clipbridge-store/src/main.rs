use std::process::ExitCode;

use clap::Parser;
use clipbridge_store::{AppState, MAX_STORED_CLIPBOARDS, serve};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "clipbridge-store", about = "Clipboard content endpoint")]
struct StoreArgs {
    #[arg(long, default_value = "0.0.0.0:9980")]
    bind_address: String,

    /// Clipboards kept before the oldest is evicted.
    #[arg(long, default_value_t = MAX_STORED_CLIPBOARDS)]
    max_clipboards: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = StoreArgs::parse();
    let listener = match TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(address = %args.bind_address, "bind failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::with_capacity(args.max_clipboards);
    info!(
        address = %args.bind_address,
        capacity = state.capacity(),
        "clipboard store listening"
    );
    match serve(listener, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("clipboard store exited: {err}");
            ExitCode::FAILURE
        }
    }
}
