//! `SchoolChat` server -- single-process chat backend.
//!
//! Serves the chat WebSocket endpoint and the REST API over one axum
//! router with in-memory state.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin schoolchat-server
//!
//! # Run on custom address with a seeded demo workspace
//! cargo run --bin schoolchat-server -- --bind 127.0.0.1:9001 --seed-demo
//!
//! # Or via environment variable
//! SCHOOLCHAT_ADDR=127.0.0.1:9001 cargo run --bin schoolchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use schoolchat_proto::channel::Category;
use schoolchat_server::config::{ServerCliArgs, ServerConfig};
use schoolchat_server::server::{self, ChatState};

/// Registers a demo workspace with one channel per category.
async fn seed_demo(state: &ChatState) {
    let workspace = state.registry.create_workspace("Demo School", "demo").await;
    let seeds = [
        ("School Announcements", Category::Announcement, true),
        ("Math 7B", Category::Class, true),
        ("Mr. Alvarez", Category::Teacher, false),
        ("Parent Circle", Category::Parent, false),
        ("Ria", Category::Friend, false),
    ];
    for (name, category, is_group) in seeds {
        let channel_id = state.registry.register(name, category, is_group).await;
        state.registry.assign(workspace, channel_id).await;
        tracing::info!(channel_id, name, "seeded demo channel");
    }
}

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting schoolchat server");

    let state = Arc::new(ChatState::new());
    if config.seed_demo {
        seed_demo(&state).await;
    }

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "schoolchat server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
