//! Length-prefixed framing over a byte stream.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! serialized message. The length is validated against [`MAX_FRAME_SIZE`]
//! and the header minimum before the body is allocated.

use super::message::{Message, HEADER_SIZE};
use crate::error::{Error, ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Upper bound on a frame body. Anything larger is malformed.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Serialize a message with its length prefix.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let body = message.to_bytes();
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Write one framed message as a single logical write.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one frame body from the stream.
///
/// Returns the raw body bytes; the caller parses them with
/// [`Message::from_bytes`]. Fails with `ProtocolError::Malformed` when the
/// declared length is below the header minimum or above [`MAX_FRAME_SIZE`],
/// and with the underlying I/O error (including `UnexpectedEof` on a clean
/// close) otherwise.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    reader.read_exact(&mut len_buf).await.map_err(Error::Io)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len < HEADER_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "declared frame length {len} below header minimum"
        ))
        .into());
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "declared frame length {len} exceeds maximum"
        ))
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(Error::Io)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use crate::types::PeerId;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let original = Message::new(
            PeerId::random(),
            Payload::Chat {
                content: "framed".into(),
            },
        );
        write_frame(&mut client, &original).await.expect("write");

        let body = read_frame(&mut server).await.expect("read");
        let parsed = Message::from_bytes(&body).expect("parse");
        assert_eq!(original, parsed);
    }

    #[tokio::test]
    async fn test_frames_preserve_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let first = Message::new(PeerId::random(), Payload::Ping);
        let second = Message::new(
            PeerId::random(),
            Payload::Chat {
                content: "second".into(),
            },
        );
        write_frame(&mut client, &first).await.expect("write 1");
        write_frame(&mut client, &second).await.expect("write 2");

        let body = read_frame(&mut server).await.expect("read 1");
        assert_eq!(Message::from_bytes(&body).expect("parse 1"), first);
        let body = read_frame(&mut server).await.expect("read 2");
        assert_eq!(Message::from_bytes(&body).expect("parse 2"), second);
    }

    #[tokio::test]
    async fn test_undersized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &10u32.to_be_bytes())
            .await
            .expect("write");

        assert!(matches!(
            read_frame(&mut server).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_SIZE as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut client, &huge.to_be_bytes())
            .await
            .expect("write");

        assert!(matches!(
            read_frame(&mut server).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(Error::Io(_))));
    }
}
