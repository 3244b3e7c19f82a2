use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use minitorrent::config::DEFAULT_TRACKER_PORT;
use minitorrent::metadata::Descriptor;
use minitorrent::metadata::descriptor::descriptor_path;

#[derive(Parser, Debug)]
#[command(name="mts-make", version, about="Write the .mts descriptor for a file")]
struct Args {
    file: PathBuf,

    #[arg(default_value="127.0.0.1")]
    tracker_ip: IpAddr,

    #[arg(default_value_t=DEFAULT_TRACKER_PORT)]
    tracker_port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let tracker = SocketAddr::new(args.tracker_ip, args.tracker_port).to_string();

    let descriptor = match Descriptor::author(&args.file, &tracker).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("Unable to describe {}: {e}", args.file.display());
            return ExitCode::FAILURE;
        }
    };

    let out = descriptor_path(&args.file);
    if let Err(e) = descriptor.save(&out).await {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    println!("Wrote {}:\n{descriptor}", out.display());
    ExitCode::SUCCESS
}
