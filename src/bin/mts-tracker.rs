use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use minitorrent::config::{DEFAULT_MAX_REQUEST_LEN, TrackerConfig};
use minitorrent::util::logging::init_logging;
use minitorrent::TrackerServer;

#[derive(Parser, Debug)]
#[command(name="mts-tracker", version, about="Track which peers hold which files")]
struct Args {
    #[arg(long, default_value="0.0.0.0:5000")]
    bind: SocketAddr,

    #[arg(long, default_value_t=DEFAULT_MAX_REQUEST_LEN, help="Largest request accepted, in bytes")]
    max_request_len: usize,

    #[arg(long, help="Drop connections that send nothing for this many seconds")]
    read_timeout_secs: Option<u64>,

    #[arg(long, help="Write logs to <DIR>/tracker.log instead of stderr")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_logging(args.log_dir.as_deref(), "tracker.log");

    let config = TrackerConfig {
        bind: args.bind,
        max_request_len: args.max_request_len,
        read_timeout: args.read_timeout_secs.map(Duration::from_secs),
    };
    match TrackerServer::bind(&config).await {
        Ok(server) => {
            server.run().await;
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
