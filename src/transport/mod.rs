//! Transport layer for daemon ↔ automation helper communication.
//!
//! Provides length-prefixed JSON framing and [`PipeSurfaceProvider`], which
//! hosts each automation surface in a helper process driven over its
//! stdin/stdout pipes.

pub mod protocol;
pub mod stdio_pipe;

pub use protocol::{HelperMessage, HelperRequest};
pub use stdio_pipe::{PipeSurface, PipeSurfaceProvider};

use anyhow::Result;

/// Maximum message size (64 MB). Safety valve against malformed messages.
const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Write a length-prefixed message to a writer.
///
/// Format: [4-byte big-endian length][payload bytes]
pub async fn send_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| anyhow::anyhow!("Message too large: {} bytes", payload.len()))?;
    anyhow::ensure!(
        len <= MAX_MESSAGE_SIZE,
        "Message exceeds max size: {len} > {MAX_MESSAGE_SIZE}"
    );

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message from a reader.
///
/// Returns the raw payload bytes. Enforces `MAX_MESSAGE_SIZE`.
pub async fn recv_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    anyhow::ensure!(
        len <= MAX_MESSAGE_SIZE,
        "Message exceeds max size: {len} > {MAX_MESSAGE_SIZE}"
    );

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut framed = u32::try_from(payload.len()).unwrap().to_be_bytes().to_vec();
        framed.extend_from_slice(payload);
        framed
    }

    #[tokio::test]
    async fn send_writes_length_prefix() {
        let mut writer = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 5])
            .write(b"hello")
            .build();
        send_message(&mut writer, b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn recv_handles_split_reads() {
        let framed = frame(br#"{"type":"ready"}"#);
        let (head, tail) = framed.split_at(6);
        let mut reader = tokio_test::io::Builder::new().read(head).read(tail).build();

        let received = recv_message(&mut reader).await.unwrap();
        assert_eq!(received, br#"{"type":"ready"}"#);
    }

    #[tokio::test]
    async fn empty_payload() {
        let mut buf = Vec::new();
        send_message(&mut buf, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = recv_message(&mut cursor).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut cursor = std::io::Cursor::new((MAX_MESSAGE_SIZE + 1).to_be_bytes().to_vec());
        let err = recv_message(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("exceeds max size"));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut framed = frame(b"abcdef");
        framed.truncate(7);
        let mut cursor = std::io::Cursor::new(framed);
        assert!(recv_message(&mut cursor).await.is_err());
    }

    #[test]
    fn protocol_serialize_request() {
        let req = HelperRequest::Evaluate {
            id: 7,
            script: "1 + 1".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"evaluate""#));
        assert!(json.contains(r#""id":7"#));

        let json = serde_json::to_string(&HelperRequest::ScrollBy { delta_y: 240 }).unwrap();
        assert_eq!(json, r#"{"type":"scroll_by","delta_y":240}"#);
    }

    #[test]
    fn protocol_deserialize_messages() {
        let msg: HelperMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(msg, HelperMessage::Ready);

        let msg: HelperMessage =
            serde_json::from_str(r#"{"type":"page_finished","url":"https://a.test/"}"#).unwrap();
        assert_eq!(
            msg,
            HelperMessage::PageFinished {
                url: "https://a.test/".into()
            }
        );

        let msg: HelperMessage =
            serde_json::from_str(r#"{"type":"script_result","id":3,"result":"\"found\""}"#)
                .unwrap();
        assert!(matches!(msg, HelperMessage::ScriptResult { id: 3, .. }));
    }
}
