use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::sha256::{HashError, sha256_file};

/// Extension appended to a file name to name its descriptor.
pub const DESCRIPTOR_EXTENSION: &str = "mts";

const HASH_LENGTH: usize = 64;

/// Hex encoded SHA-256 digest identifying a piece of content.
///
/// Always 64 lowercase hexadecimal characters once constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentHashError {
    #[error("content hash must have 64 characters but has {0}")]
    InvalidLength(usize),
    #[error("content hash contains non-hexadecimal character {0:?}")]
    NotHexadecimal(char),
}

impl ContentHash {
    pub fn from_digest<D: AsRef<[u8]>>(digest: D) -> Self {
        ContentHash(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ContentHashError;

    fn try_from(value: String) -> std::result::Result<Self, ContentHashError> {
        let length = value.chars().count();
        if length != HASH_LENGTH {
            return Err(ContentHashError::InvalidLength(length));
        }
        if let Some(c) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ContentHashError::NotHexadecimal(c));
        }
        Ok(ContentHash(value.to_ascii_lowercase()))
    }
}

impl TryFrom<&str> for ContentHash {
    type Error = ContentHashError;

    fn try_from(value: &str) -> std::result::Result<Self, ContentHashError> {
        ContentHash::try_from(value.to_string())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> String {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata describing one shareable file.
///
/// Produced once by [`Descriptor::author`] and treated as read-only
/// afterwards. Two descriptors with the same `sha256` name the same content
/// no matter what their file names say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub filename: String,
    pub size: u64,
    pub sha256: ContentHash,
    pub tracker: String,
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("unable to read descriptor {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("unable to write descriptor {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("descriptor is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("descriptor file name {0:?} must be a single plain path component")]
    InvalidFilename(String),
    #[error("descriptor tracker address {0:?} must have the form host:port")]
    InvalidTracker(String),
    #[error("{0:?} has no file name")]
    MissingFilename(PathBuf),
    #[error(transparent)]
    Hash(#[from] HashError),
}

type Result<T> = std::result::Result<T, DescriptorError>;

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "file: {} ({} bytes)", self.filename, self.size)?;
        writeln!(f, "sha256: {}", self.sha256)?;
        writeln!(f, "tracker: {}", self.tracker)
    }
}

impl Descriptor {
    /// Builds the descriptor for the file at `path` by hashing its contents.
    pub async fn author<P: AsRef<Path>>(path: P, tracker: &str) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| DescriptorError::MissingFilename(path.to_path_buf()))?;
        let (sha256, size) = sha256_file(path).await?;
        let descriptor = Descriptor { filename, size, sha256, tracker: tracker.to_string() };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| DescriptorError::Read { path: path.to_path_buf(), source })?;
        Descriptor::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: Descriptor = serde_json::from_slice(bytes)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DescriptorError::Write { path: path.to_path_buf(), source })?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| DescriptorError::Write { path: path.to_path_buf(), source })
    }

    /// Rejects names that would escape the directory they are joined onto.
    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == self.filename.as_str() => (),
            _ => return Err(DescriptorError::InvalidFilename(self.filename.clone())),
        }
        match self.tracker.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(DescriptorError::InvalidTracker(self.tracker.clone())),
        }
    }

    /// Name under which seeders serve this descriptor, e.g. `report.pdf.mts`.
    pub fn descriptor_name(&self) -> String {
        descriptor_name(&self.filename)
    }
}

pub fn descriptor_name(filename: &str) -> String {
    format!("{filename}.{DESCRIPTOR_EXTENSION}")
}

/// Path of the descriptor written alongside `path`.
pub fn descriptor_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut os = path.as_ref().as_os_str().to_owned();
    os.push(".");
    os.push(DESCRIPTOR_EXTENSION);
    PathBuf::from(os)
}
