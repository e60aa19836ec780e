//! Standalone signaling relay
//!
//! Run with: cargo run --example signal_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signal_server                    # binds to 0.0.0.0:3001
//!   cargo run --example signal_server localhost          # binds to 127.0.0.1:3001
//!   cargo run --example signal_server 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! The relay tracks room membership and forwards negotiation payloads
//! between participants; it never touches media. Point `mesh_client` (or
//! any client speaking the same JSON protocol) at it.

use std::net::SocketAddr;

use roomlink::{ServerConfig, SignalServer};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:3001
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:3001
/// - "0.0.0.0:3001" -> 0.0.0.0:3001
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 3001;

    // Replace "localhost" with "127.0.0.1"
    let normalized = arg.replace("localhost", "127.0.0.1");

    // Try parsing as SocketAddr first (includes port)
    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // Try parsing as IP address without port
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: signal_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:3001)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  signal_server                     # binds to 0.0.0.0:3001");
    eprintln!("  signal_server localhost           # binds to 127.0.0.1:3001");
    eprintln!("  signal_server 127.0.0.1:9000      # binds to 127.0.0.1:9000");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "0.0.0.0:3001".parse()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roomlink=debug".parse()?)
                .add_directive("signal_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    };

    println!("Starting signaling relay on {}", config.bind_addr);
    println!();
    println!("Connect clients with:");
    println!("  cargo run --example mesh_client -- ws://{} --create alice", bind_addr);
    println!("  cargo run --example mesh_client -- ws://{} <ROOM_ID> bob", bind_addr);
    println!();

    let server = SignalServer::new(config);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Shut down.");
    Ok(())
}
