use std::io;
use std::net::IpAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::metadata::{ContentHash, Descriptor, DescriptorError};
use crate::peer::PeerEndpoint;

/// Acknowledgement sent for a successful registration.
pub const REGISTERED: &str = "Registered";

/// Largest reply a tracker sends or a client accepts. Metadata listings grow
/// with the number of shared files, so this is well above the request limit.
pub const MAX_RESPONSE_LEN: usize = 8 * 1024 * 1024;

/// A control-plane request. Each connection carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Register {
        sha256: ContentHash,
        ip: IpAddr,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Descriptor>,
    },
    GetPeers {
        sha256: ContentHash,
        ip: IpAddr,
        port: u16,
    },
    #[serde(rename = "list_meta")]
    ListMetadata,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message is not valid json for this request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("peer port must not be zero")]
    ZeroPort,
    #[error("metadata is malformed: {0}")]
    Metadata(#[from] DescriptorError),
    #[error("metadata describes {meta} but the request registers {request}")]
    MetadataHashMismatch { request: ContentHash, meta: ContentHash },
    #[error("connection failed while exchanging a message: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed before a message arrived")]
    Closed,
}

impl Request {
    pub fn register(descriptor: &Descriptor, peer: PeerEndpoint) -> Self {
        Request::Register {
            sha256: descriptor.sha256.clone(),
            ip: peer.ip,
            port: peer.port,
            meta: Some(descriptor.clone()),
        }
    }

    pub fn get_peers(hash: &ContentHash, peer: PeerEndpoint) -> Self {
        Request::GetPeers { sha256: hash.clone(), ip: peer.ip, port: peer.port }
    }

    /// Parses and structurally validates an untrusted request.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let request: Request = serde_json::from_slice(bytes)?;
        request.validate()?;
        Ok(request)
    }

    pub fn encode(&self) -> Result<Bytes, MessageError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    fn validate(&self) -> Result<(), MessageError> {
        match self {
            Request::Register { sha256, port, meta, .. } => {
                if *port == 0 {
                    return Err(MessageError::ZeroPort);
                }
                if let Some(descriptor) = meta {
                    descriptor.validate()?;
                    if descriptor.sha256 != *sha256 {
                        return Err(MessageError::MetadataHashMismatch {
                            request: sha256.clone(),
                            meta: descriptor.sha256.clone(),
                        });
                    }
                }
                Ok(())
            },
            Request::GetPeers { port, .. } if *port == 0 => Err(MessageError::ZeroPort),
            _ => Ok(()),
        }
    }
}

pub type ControlFrames<S> = Framed<S, LengthDelimitedCodec>;

/// Wraps a stream in the control-plane framing: a 4-byte big-endian length
/// followed by one JSON document.
pub fn control_frames<S: AsyncRead + AsyncWrite>(stream: S, max_frame_length: usize) -> ControlFrames<S> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec();
    Framed::new(stream, codec)
}

pub async fn read_frame<S>(frames: &mut ControlFrames<S>) -> Result<Bytes, MessageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match frames.next().await {
        Some(frame) => Ok(frame?.freeze()),
        None => Err(MessageError::Closed),
    }
}

pub async fn write_json<S, T>(frames: &mut ControlFrames<S>, value: &T) -> Result<(), MessageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let bytes = Bytes::from(serde_json::to_vec(value)?);
    frames.send(bytes).await?;
    Ok(())
}

pub async fn read_json<S, T>(frames: &mut ControlFrames<S>) -> Result<T, MessageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_frame(frames).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
