use clap::{Parser, Subcommand};
use client::MasterClient;
use log::info;
use shared::{Packet, RequestId};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lobby server host name or address
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Lobby server port
    #[arg(short = 'p', long, default_value_t = 0x4D44)]
    port: u16,

    /// Budget for connecting and for each request, in milliseconds
    #[arg(short = 't', long, default_value = "1000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure round trips to the lobby server
    Ping {
        #[arg(short = 'c', long, default_value = "4")]
        count: u32,
    },
    /// Send one request made of strings and print the answer's strings
    Request {
        /// Request id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_request_id)]
        id: RequestId,
        /// Strings appended to the payload in order
        text: Vec<String>,
    },
    /// Fetch a file over HTTP and store it locally
    Download {
        /// Web server host; the lobby server options are ignored
        host: String,
        /// Path on the web server, starting with '/'
        path: String,
        output: PathBuf,
    },
}

fn parse_request_id(raw: &str) -> Result<RequestId, String> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed
        .map(RequestId)
        .map_err(|e| format!("invalid request id '{}': {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=debug for detailed logging");
    }

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    if let Command::Download { host, path, output } = &args.command {
        info!("Downloading http://{}{} to {}", host, path, output.display());
        shared::download_http_file(host, path, output, timeout).await?;
        println!("saved {}", output.display());
        return Ok(());
    }

    info!("Connecting to {}:{}", args.server, args.port);
    let mut master = MasterClient::connect(&args.server, args.port, timeout).await?;

    match args.command {
        Command::Ping { count } => {
            for seq in 1..=count {
                let rtt = master.ping().await?;
                println!("pong from {}: seq={} time={:?}", args.server, seq, rtt);
            }
        }
        Command::Request { id, text } => {
            let mut packet = Packet::new(id);
            for part in &text {
                packet.append(part);
            }
            master.request(&mut packet).await?;

            println!("response {} ({} bytes)", packet.request_id(), packet.payload_len());
            while packet.remaining() > 0 {
                println!("  {:?}", packet.get_string());
            }
        }
        Command::Download { .. } => {}
    }

    master.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_id() {
        assert_eq!(parse_request_id("7"), Ok(RequestId(7)));
        assert_eq!(parse_request_id("0x30"), Ok(RequestId::CHAT_SENDMSG));
        assert!(parse_request_id("lobby").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["client", "-p", "9000", "request", "--id", "0x04", "hi"])
            .unwrap();
        assert_eq!(args.port, 9000);
        match args.command {
            Command::Request { id, text } => {
                assert_eq!(id, RequestId::FEEDBACK);
                assert_eq!(text, vec!["hi".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
