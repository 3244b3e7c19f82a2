pub mod config;
pub mod metadata;
pub mod peer;
pub mod tracker;
pub mod util;

pub use config::{AgentConfig, TrackerConfig};
pub use metadata::{ContentHash, Descriptor};
pub use peer::{Agent, DownloadOutcome, PeerEndpoint, RunningAgent};
pub use tracker::{TrackerClient, TrackerServer};
