pub mod descriptor;

pub use descriptor::{ContentHash, Descriptor, DescriptorError};
