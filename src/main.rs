use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use minitorrent::config::{AgentConfig, DEFAULT_CHUNK_SIZE, DEFAULT_TRACKER};
use minitorrent::util::logging::init_logging;
use minitorrent::{Agent, DownloadOutcome};

#[derive(Parser, Debug)]
#[command(name="mts-peer", version, about="Seed a file and fetch it from other peers")]
struct Args {
    #[arg(help="File name to look up on the tracker, or path to a .mts descriptor")]
    target: String,

    #[arg(help="IP address advertised to other peers")]
    ip: IpAddr,

    #[arg(help="Port the seeder listens on (0 picks a free one)")]
    port: u16,

    #[arg(long, default_value=DEFAULT_TRACKER, help="Tracker asked for metadata by file name")]
    tracker: String,

    #[arg(long, default_value="shared")]
    shared_dir: PathBuf,

    #[arg(long, default_value="downloaded")]
    download_dir: PathBuf,

    #[arg(long, default_value="0.0.0.0", help="Address the seeder binds to")]
    bind: IpAddr,

    #[arg(long, help="Give up on a peer after this many seconds")]
    timeout_secs: Option<u64>,

    #[arg(long, help="Give up on the tracker after this many seconds")]
    tracker_timeout_secs: Option<u64>,

    #[arg(long, help="Check downloads against the descriptor's size and digest")]
    verify: bool,

    #[arg(long, default_value_t=DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, help="Show a progress bar while downloading")]
    progress: bool,

    #[arg(long, help="Write logs to <DIR>/peer.log instead of stderr")]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> AgentConfig {
        AgentConfig {
            tracker: self.tracker.clone(),
            shared_dir: self.shared_dir.clone(),
            download_dir: self.download_dir.clone(),
            bind_ip: self.bind,
            attempt_timeout: self.timeout_secs.map(Duration::from_secs),
            tracker_timeout: self.tracker_timeout_secs.map(Duration::from_secs),
            verify: self.verify,
            chunk_size: self.chunk_size.max(1),
            show_progress: self.progress,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_logging(args.log_dir.as_deref(), "peer.log");

    let agent = Agent::new(args.config(), args.ip, args.port);
    let running = match agent.start(&args.target).await {
        Ok(running) => running,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Seeding '{}' on {}", running.descriptor.filename, running.endpoint);
    match &running.outcome {
        DownloadOutcome::Downloaded { from, download } => {
            println!("Downloaded '{}' from {from} to {}", running.descriptor.filename, download.path.display());
        },
        DownloadOutcome::NoPeerServed => println!("No peer served the file"),
    }

    running.serve_forever().await;
    ExitCode::SUCCESS
}
