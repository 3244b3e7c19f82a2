pub mod client;
pub mod message;
pub mod registry;
pub mod server;

pub use client::{TrackerClient, TrackerError};
pub use message::{MessageError, Request};
pub use registry::Registry;
pub use server::{ServerError, TrackerServer};
