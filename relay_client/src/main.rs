//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p relay_client -- [--addr 127.0.0.1:50000] [--name alice] [--pool-size 4]
//!
//! Console commands:
//!   clients                  - List connected clients
//!   groups                   - List groups
//!   members <group>          - List a group's members
//!   create <group>           - Create a group
//!   join <group>             - Join a group
//!   leave <group>            - Leave a group
//!   leaveall                 - Leave every group
//!   send <user> <message>    - Send a private plain-text message
//!   sendgroup <group> <msg>  - Send a plain-text message to a group
//!   announce <message>       - Broadcast a plain-text message to everyone
//!   quit                     - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use relay_client::{ChatAgent, RecvHandler};
use relay_shared::config::RelayConfig;
use relay_shared::protocol::{Message, MessageType};
use tokio::sync::mpsc;
use tracing::info;

struct ConsoleRecvHandler;

#[async_trait]
impl RecvHandler for ConsoleRecvHandler {
    async fn on_message(&self, msg: Message) {
        let from = msg
            .src
            .as_ref()
            .and_then(|s| s.username.as_deref())
            .unwrap_or("?");
        match msg.msg_type {
            MessageType::PlainText => {
                let body = msg.body_as_string().unwrap_or_else(|_| "<binary>".to_string());
                println!("[{from}] {body}");
            }
            MessageType::File => {
                println!("[{from}] sent a file");
            }
            other => {
                println!("[{from}] ({other:?})");
            }
        }
    }
}

struct ClientArgs {
    cfg: RelayConfig,
    username: String,
    pool_size: usize,
}

fn parse_args() -> ClientArgs {
    let mut cfg = RelayConfig::default();
    let mut username = "guest".to_string();
    let mut pool_size = cfg.pool_size;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                username = args[i + 1].clone();
                i += 2;
            }
            "--pool-size" if i + 1 < args.len() => {
                pool_size = args[i + 1].parse().unwrap_or(pool_size);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.pool_size = pool_size;
    ClientArgs {
        cfg,
        username,
        pool_size,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    info!(server = %args.cfg.server_addr, username = %args.username, "starting relay client");

    let agent = ChatAgent::connect(
        &args.cfg,
        args.username.clone(),
        args.pool_size,
        Arc::new(ConsoleRecvHandler),
    )
    .await
    .context("connect")?;

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

    println!("Connected as '{}'. Type 'clients', 'groups', 'send <user> <msg>', 'quit', ...", args.username);
    println!();

    while let Some(line) = console_rx.recv().await {
        if let Err(e) = dispatch(&agent, &line).await {
            println!("error: {e}");
        }
    }

    agent.shutdown().await;
    Ok(())
}

async fn dispatch(agent: &ChatAgent, line: &str) -> anyhow::Result<()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(());
    }

    match tokens[0] {
        "clients" => {
            for name in agent.get_connected_clients().await? {
                println!("  {name}");
            }
        }
        "groups" => {
            for name in agent.get_groups().await? {
                println!("  {name}");
            }
        }
        "members" if tokens.len() >= 2 => {
            for name in agent.get_clients_in_group(tokens[1]).await? {
                println!("  {name}");
            }
        }
        "create" if tokens.len() >= 2 => {
            println!("{:?}", agent.create_group(tokens[1]).await?);
        }
        "join" if tokens.len() >= 2 => {
            println!("{:?}", agent.join_group(tokens[1]).await?);
        }
        "leave" if tokens.len() >= 2 => {
            println!("{:?}", agent.leave_group(tokens[1]).await?);
        }
        "leaveall" => {
            println!("{:?}", agent.leave_all_groups().await?);
        }
        "send" if tokens.len() >= 3 => {
            let body = tokens[2..].join(" ").into_bytes();
            println!(
                "{:?}",
                agent
                    .send_private(tokens[1], MessageType::PlainText, body)
                    .await?
            );
        }
        "sendgroup" if tokens.len() >= 3 => {
            let body = tokens[2..].join(" ").into_bytes();
            println!(
                "{:?}",
                agent
                    .send_group(tokens[1], MessageType::PlainText, body)
                    .await?
            );
        }
        "announce" if tokens.len() >= 2 => {
            let body = tokens[1..].join(" ").into_bytes();
            println!("{:?}", agent.announce(MessageType::PlainText, body).await?);
        }
        "quit" | "exit" => {
            std::process::exit(0);
        }
        _ => println!("unrecognized command: {line}"),
    }
    Ok(())
}
