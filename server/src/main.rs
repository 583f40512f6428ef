use clap::Parser;
use log::info;
use server::{ClientsManager, SocketConnectionWaiter, DEFAULT_PORT};
use shared::ConnectionConfig;
use std::time::Duration;

/// Lobby server: accepts game clients and answers their requests.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[clap(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Maximum number of simultaneous clients
        #[clap(short, long, default_value = "64")]
        max_clients: usize,
        /// Longest wait for a connection per accept round, in milliseconds
        #[clap(long, default_value = "500")]
        accept_timeout_ms: u64,
        /// Close sessions idle for this many seconds
        #[clap(long, default_value = "300")]
        idle_timeout_secs: u64,
    }

    env_logger::init();
    let args = Args::parse();

    let clients = ClientsManager::new(args.max_clients, Duration::from_secs(args.idle_timeout_secs));
    let mut waiter = SocketConnectionWaiter::new(clients, ConnectionConfig::default());
    waiter.init_on(&args.host, args.port).await?;
    info!("Lobby server listening on {:?}", waiter.local_addr());

    let accepted = waiter
        .accept_until(Duration::from_millis(args.accept_timeout_ms), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        "Received Ctrl+C, shutting down after {} connections ({} still open)",
        accepted,
        waiter.dispatcher().client_count()
    );
    waiter.deinit();
    Ok(())
}
