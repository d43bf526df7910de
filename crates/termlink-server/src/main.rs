use std::future::IntoFuture;
use std::net::SocketAddr;

use termlink_server::config::ServerConfig;
use termlink_server::state::AppState;
use termlink_server::{gateway, http};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    log::info!(
        "starting termlink (http :{}, gateway :{}, tmux {}, mode {})",
        config.port,
        config.ws_port,
        if config.tmux_enabled { "on" } else { "off" },
        if config.ssh.is_some() { "ssh" } else { "local" }
    );
    if config.master_token.is_none() {
        log::warn!("no master token configured; only one-time link tokens can log in");
    }

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let ws_addr = SocketAddr::from(([0, 0, 0, 0], config.ws_port));
    let state = AppState::new(config);

    let http_listener = bind_or_exit(http_addr).await;
    let ws_listener = bind_or_exit(ws_addr).await;

    let result = tokio::try_join!(
        axum::serve(http_listener, http::router(state.clone())).into_future(),
        axum::serve(ws_listener, gateway::router(state)).into_future(),
    );

    if let Err(e) = result {
        log::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}

async fn bind_or_exit(addr: SocketAddr) -> tokio::net::TcpListener {
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    }
}
