//! LinkNet terminal client.
//!
//! Wires the core subsystems together - network manager, chat dispatcher,
//! file-transfer engine, LAN discovery - and drives them from a small
//! stdin command loop.

use anyhow::{Context, Result};
use clap::Parser;
use linknet_core::chat::ChatDispatcher;
use linknet_core::discovery::PeerDiscovery;
use linknet_core::net::NetworkManager;
use linknet_core::transfer::FileTransferEngine;
use linknet_core::types::PeerId;
use linknet_core::DEFAULT_PORT;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// LinkNet - serverless P2P chat and file sharing for local networks
#[derive(Parser)]
#[command(name = "linknet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Automatically connect to discovered peers
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    auto_connect: bool,

    /// Disable automatic connection to discovered peers
    #[arg(long)]
    no_auto_connect: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let auto_connect = cli.auto_connect && !cli.no_auto_connect;
    info!(port = cli.port, auto_connect, "linknet starting");

    // Network core.
    let network = NetworkManager::new();
    network
        .start(cli.port)
        .await
        .context("failed to start network manager")?;

    network.set_connection_callback(|peer, status| {
        println!("* peer {peer} is now {status}");
    });
    network.set_error_callback(|text| {
        eprintln!("! network error: {text}");
    });

    // Chat consumes its messages and hands everything else down the chain
    // to the file-transfer engine.
    let chat = ChatDispatcher::new(network.clone());
    let transfer = FileTransferEngine::new(network.clone());
    chat.set_next_handler(transfer.handler());
    network.set_message_callback(chat.handler());

    chat.set_chat_callback(|entry| {
        println!("[{}] {}: {}", entry.timestamp, entry.sender_id, entry.content);
    });

    transfer.set_request_callback(|peer, filename, size| {
        println!("* incoming file from {peer}: {filename} ({size} bytes) - accepting");
        true
    });
    transfer.set_progress_callback(|peer, path, progress| {
        info!(%peer, path, "transfer progress: {:.1}%", progress * 100.0);
    });
    transfer.set_completed_callback(|peer, path, ok, error| {
        if ok {
            println!("* transfer complete: {path} ({peer})");
        } else {
            println!("* transfer failed: {path} ({peer}): {error}");
        }
    });

    // Discovery is best-effort; without it, explicit `connect` still works.
    let discovery = PeerDiscovery::new();
    if let Err(e) = discovery.start(network.local_port()) {
        warn!(error = %e, "peer discovery unavailable; automatic peer finding disabled");
    } else {
        let discovered_network = network.clone();
        discovery.set_discovered_callback(move |ip, port| {
            println!("* discovered peer at {ip}:{port}");
            if auto_connect {
                let network = discovered_network.clone();
                let address = ip.to_string();
                tokio::spawn(async move {
                    let _ = network.connect(&address, port).await;
                });
            }
        });
    }

    print_help();
    command_loop(&network, &chat, &transfer).await;

    // Shutdown order: discovery, then network (transfers die with their
    // sessions).
    discovery.stop().await;
    network.stop().await;
    info!("linknet stopped");
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  peers                      list connected peers");
    println!("  connect <ip> <port>        connect to a peer");
    println!("  send <peer> <text>         send a chat message (peer = id prefix)");
    println!("  broadcast <text>           send a chat message to every peer");
    println!("  sendfile <peer> <path>     send a file");
    println!("  cancel <peer> <path>       cancel a file transfer");
    println!("  transfers                  list ongoing transfers");
    println!("  history <peer>             show chat history");
    println!("  quit                       exit");
}

async fn command_loop(
    network: &NetworkManager,
    chat: &ChatDispatcher,
    transfer: &FileTransferEngine,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(3, ' ');
        let command = parts.next().unwrap_or_default();

        match command {
            "quit" | "exit" => break,
            "help" => print_help(),
            "peers" => {
                for peer in network.connected_peers() {
                    println!("  {} {} ({})", peer.id, peer.addr, peer.status);
                }
            }
            "connect" => {
                let (Some(ip), Some(port)) = (parts.next(), parts.next()) else {
                    println!("usage: connect <ip> <port>");
                    continue;
                };
                match port.parse::<u16>() {
                    Ok(port) => {
                        if network.connect(ip, port).await.is_ok() {
                            println!("* connected to {ip}:{port}");
                        }
                    }
                    Err(_) => println!("invalid port: {port}"),
                }
            }
            "send" => {
                let (Some(prefix), Some(text)) = (parts.next(), parts.next()) else {
                    println!("usage: send <peer> <text>");
                    continue;
                };
                match resolve_peer(network, prefix) {
                    Some(peer) => {
                        if !chat.send(peer, text).await {
                            println!("send failed (peer gone?)");
                        }
                    }
                    None => println!("no connected peer matches '{prefix}'"),
                }
            }
            "broadcast" => {
                let Some(text) = parts.next() else {
                    println!("usage: broadcast <text>");
                    continue;
                };
                let rest = parts.next().map(|r| format!(" {r}")).unwrap_or_default();
                chat.broadcast(format!("{text}{rest}")).await;
            }
            "sendfile" => {
                let (Some(prefix), Some(path)) = (parts.next(), parts.next()) else {
                    println!("usage: sendfile <peer> <path>");
                    continue;
                };
                match resolve_peer(network, prefix) {
                    Some(peer) => match transfer.send_file(peer, path).await {
                        Ok(()) => println!("* transfer started: {path}"),
                        Err(e) => println!("transfer failed: {e}"),
                    },
                    None => println!("no connected peer matches '{prefix}'"),
                }
            }
            "cancel" => {
                let (Some(prefix), Some(path)) = (parts.next(), parts.next()) else {
                    println!("usage: cancel <peer> <path>");
                    continue;
                };
                match resolve_peer(network, prefix) {
                    Some(peer) => transfer.cancel(peer, path).await,
                    None => println!("no connected peer matches '{prefix}'"),
                }
            }
            "transfers" => {
                for row in transfer.ongoing().await {
                    println!(
                        "  {} {} [{}] {:.1}%",
                        row.peer,
                        row.path,
                        row.status,
                        row.progress * 100.0
                    );
                }
            }
            "history" => {
                let Some(prefix) = parts.next() else {
                    println!("usage: history <peer>");
                    continue;
                };
                match resolve_peer(network, prefix) {
                    Some(peer) => {
                        for entry in chat.history(peer, 50) {
                            println!("  [{}] {}: {}", entry.timestamp, entry.sender_name, entry.content);
                        }
                    }
                    None => println!("no connected peer matches '{prefix}'"),
                }
            }
            other => println!("unknown command: {other} (try 'help')"),
        }
    }
}

/// Match a connected peer by hex-id prefix.
fn resolve_peer(network: &NetworkManager, prefix: &str) -> Option<PeerId> {
    network
        .connected_peers()
        .into_iter()
        .find(|peer| hex::encode(peer.id.as_bytes()).starts_with(prefix))
        .map(|peer| peer.id)
}
