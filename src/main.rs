//! voltkv server entry point: parses arguments, sets up logging, runs the
//! boot sequence, and serves until Ctrl+C.

use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use voltkv::{Server, ServerConfig};

/// Command-line options.
struct Args {
    host: String,
    port: u16,
    log_file: PathBuf,
    snapshot_file: PathBuf,
    snapshot_interval: Duration,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: voltkv::DEFAULT_HOST.to_string(),
            port: voltkv::DEFAULT_PORT,
            log_file: PathBuf::from("commands.log"),
            snapshot_file: PathBuf::from("dump.db"),
            snapshot_interval: Duration::from_secs(10),
        }
    }
}

impl Args {
    fn parse() -> Self {
        let mut parsed = Args::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    parsed.host = take_value(&args, &mut i, "--host");
                }
                "--port" | "-p" => {
                    parsed.port = take_value(&args, &mut i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                }
                "--log-file" => {
                    parsed.log_file = PathBuf::from(take_value(&args, &mut i, "--log-file"));
                }
                "--snapshot-file" => {
                    parsed.snapshot_file =
                        PathBuf::from(take_value(&args, &mut i, "--snapshot-file"));
                }
                "--snapshot-interval" => {
                    let secs: u64 = take_value(&args, &mut i, "--snapshot-interval")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid snapshot interval");
                            std::process::exit(1);
                        });
                    parsed.snapshot_interval = Duration::from_secs(secs);
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("voltkv version {}", voltkv::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        parsed
    }
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
voltkv - A Persistent, Typed In-Memory Key-Value Server

USAGE:
    voltkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 6399)
        --log-file <PATH>          Command log file (default: commands.log)
        --snapshot-file <PATH>     Snapshot file (default: dump.db)
        --snapshot-interval <SEC>  Seconds between snapshots (default: 10)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    voltkv                              # Start on 127.0.0.1:6399
    voltkv --port 6400                  # Different port
    voltkv --snapshot-interval 60       # Snapshot once a minute
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        log_path: args.log_file,
        snapshot_path: args.snapshot_file,
        snapshot_interval: args.snapshot_interval,
    };

    let server = Server::bootstrap(config)?;
    let listener = server.bind().await?;
    info!("ready to accept connections, Ctrl+C to shut down");

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("shutdown signal received");
    };

    tokio::select! {
        _ = server.run(listener) => {}
        _ = shutdown => {}
    }

    server.final_snapshot();
    info!("server shutdown complete");
    Ok(())
}
