use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::error;

use kad_overlay::config::{self, Args};
use kad_overlay::crypto::signing;
use kad_overlay::server::Server;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> kad_overlay::Result<()> {
    let key_bytes = std::fs::read(&args.key).map_err(|e| {
        kad_overlay::OverlayError::Config(format!("reading {}: {e}", args.key.display()))
    })?;
    let signing_key = signing::load_signing_key(&key_bytes)?;

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", args.port)
        .parse()
        .expect("constructed bind address is always valid");
    let socket = UdpSocket::bind(bind_addr).await?;

    let local_ip = discover_local_ip().await?;
    let local_addr = SocketAddr::new(local_ip, args.port);

    let server = Arc::new(Server::new(
        socket,
        local_addr,
        config::DEFAULT_K,
        config::DEFAULT_DIFFICULTY,
        config::ALPHA,
    ));

    if let Some(boot_ip) = args.boot_addr {
        let boot_addr = SocketAddr::new(boot_ip, config::DEFAULT_PORT);
        server.bootstrap(boot_addr).await?;
    }

    let listener = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "listener exited");
            }
        })
    };

    let commands = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut lines = BufReader::new(stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                let signature = signing::sign(&signing_key, line.as_bytes())
                    .to_bytes()
                    .to_vec();
                server.submit_command(line, signature).await;
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = listener => {}
        _ = commands => {}
    }

    Ok(())
}

/// Discover the local outbound IP by asking the OS which interface it
/// would use to reach a public address, without sending any data — the
/// same trick as dialing a UDP "connection" and reading back its local
/// address.
async fn discover_local_ip() -> kad_overlay::Result<std::net::IpAddr> {
    let probe = UdpSocket::bind("0.0.0.0:0").await?;
    probe.connect("8.8.8.8:80").await?;
    Ok(probe.local_addr()?.ip())
}
