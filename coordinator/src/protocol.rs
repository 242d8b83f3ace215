//! Wire format of the workload activation channel.
//!
//! Each message is a JSON document preceded by its length as a 4-byte
//! big-endian integer. Frames above [`MAX_FRAME_SIZE`] are refused before any
//! allocation.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    constants::MAX_FRAME_SIZE,
    errors::{Result, ServerError},
};

/// First message a marble sends after the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActivationRequest {
    /// Workload class whose policy the quote is checked against.
    pub marble_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Quote binding the marble's TLS certificate, base64 encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub quote: Vec<u8>,
}

/// Coordinator's answer to an [`ActivationRequest`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivationResponse {
    Accepted {
        marble_type: String,
        payload: serde_json::Value,
    },
    Rejected {
        reason: String,
    },
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ServerError::Protocol(format!(
            "frame of {} bytes exceeds {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    // Bounded by MAX_FRAME_SIZE above.
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ServerError::Protocol(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_SIZE}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| ServerError::Protocol(format!("malformed message: {e}")))
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
