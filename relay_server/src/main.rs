//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p relay_server -- [--addr 127.0.0.1:50000] [--discovery-port 50001] [--name relay]
//!
//! The server listens for client connections, serves the instruction/data
//! protocol against a shared registry, and broadcasts a UDP presence beacon.
//!
//! Console commands:
//!   clients  - List connected clients
//!   groups   - List groups
//!   quit     - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use relay_server::{Registry, RelayServer};
use relay_shared::config::RelayConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> RelayConfig {
    let mut cfg = RelayConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--discovery-port" if i + 1 < args.len() => {
                cfg.discovery_port = args[i + 1].parse().unwrap_or(cfg.discovery_port);
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.service_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, discovery_port = cfg.discovery_port, "starting relay server");

    let mut server = RelayServer::bind(cfg).await?;
    let local = server.local_addr()?;
    info!(%local, "server listening");

    server.start_discovery().await?;

    // Console input is informational only; the connection-handling loop
    // does all the real work independently of stdin.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'clients', 'groups', or 'quit'.");
    println!();

    let result = tokio::select! {
        result = server.run() => result,
        _ = console_loop(&mut console_rx, server.registry()) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            Ok(())
        }
    };

    server.stop_discovery().await;
    result
}

async fn console_loop(rx: &mut mpsc::Receiver<String>, registry: &Registry) {
    while let Some(line) = rx.recv().await {
        match line.as_str() {
            "clients" => {
                for name in registry.client_list().await {
                    println!("  {name}");
                }
            }
            "groups" => {
                for name in registry.group_list().await {
                    println!("  {name}");
                }
            }
            "quit" | "exit" => {
                info!("server shutting down");
                std::process::exit(0);
            }
            _ => println!("unknown command: {line}"),
        }
    }
}
