//! Frame transports.
//!
//! A transport moves whole frames; it knows nothing about message ids or
//! contexts. On a unix socket every frame is prefixed with its length as a
//! big-endian `u32`.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BinapiError, BinapiResult};

/// Frames larger than this are treated as a corrupted stream.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: Vec<u8>) -> BinapiResult<()>;

    /// Next frame from the dataplane, `None` once the peer closed.
    async fn recv(&self) -> BinapiResult<Option<Vec<u8>>>;
}

/// Length-prefixed frames over a unix stream socket.
pub struct UnixTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl UnixTransport {
    pub async fn connect(path: impl AsRef<Path>) -> BinapiResult<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            BinapiError::Transport(format!("connect {}: {}", path.display(), e))
        })?;
        debug!(socket = %path.display(), "connected to VPP API socket");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

/// Reads one length-prefixed frame; `None` on a clean EOF.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> BinapiResult<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(BinapiError::Transport(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> BinapiResult<()> {
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl Transport for UnixTransport {
    async fn send(&self, frame: Vec<u8>) -> BinapiResult<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame).await
    }

    async fn recv(&self) -> BinapiResult<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Connection;
    use crate::dialect::Dialect;
    use crate::sim::SimVpp;
    use std::time::Duration;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_frames_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let sim = SimVpp::new(Dialect::Vpp2001);
        let server = {
            let sim = sim.clone();
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                while let Some(frame) = read_frame(&mut stream).await.unwrap() {
                    for reply in sim.handle_frame(&frame) {
                        write_frame(&mut stream, &reply).await.unwrap();
                    }
                }
            })
        };

        let transport = UnixTransport::connect(&path).await.unwrap();
        let conn = Connection::connect(transport, "test-agent", Duration::from_secs(2))
            .await
            .unwrap();
        conn.ping().await.unwrap();
        assert!(conn.has_message("punt_socket_dump_916fb004"));

        drop(conn);
        server.abort();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let data = (MAX_FRAME_LEN + 1).to_be_bytes();
        let mut reader: &[u8] = &data;
        assert!(read_frame(&mut reader).await.is_err());

        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_length_prefix() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, b'a', b'b', b'c'])
            .read(&[0, 0, 0, 2])
            .read(b"hi")
            .build();
        write_frame(&mut mock, b"abc").await.unwrap();
        assert_eq!(read_frame(&mut mock).await.unwrap(), Some(b"hi".to_vec()));
        assert_eq!(read_frame(&mut mock).await.unwrap(), None);
    }
}
