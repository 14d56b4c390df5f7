//! Write half of the bridge socket, shared between sessions.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::warn;

use crate::application::dispatcher::{FrameWriter, WriteError};

/// Holds the current session's write half, or nothing between sessions.
#[derive(Default)]
pub struct SharedWriter {
    half: Mutex<Option<OwnedWriteHalf>>,
}

impl SharedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, half: OwnedWriteHalf) {
        *self.half.lock().await = Some(half);
    }

    /// Drops the write half, closing our side of the socket.
    pub async fn clear(&self) {
        self.half.lock().await.take();
    }

    pub async fn is_open(&self) -> bool {
        self.half.lock().await.is_some()
    }
}

#[async_trait]
impl FrameWriter for SharedWriter {
    async fn write_frame(&self, bytes: &[u8]) -> Result<(), WriteError> {
        let mut guard = self.half.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(WriteError::NotConnected);
        };
        if let Err(e) = half.write_all(bytes).await {
            warn!(error = %e, "socket write failed; dropping write half");
            guard.take();
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_write_without_socket_is_not_connected() {
        let writer = SharedWriter::new();

        let err = writer.write_frame(b"Z1\r").await.unwrap_err();

        assert!(matches!(err, WriteError::NotConnected));
    }

    #[tokio::test]
    async fn test_bytes_reach_the_peer_until_cleared() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        let (_read, write) = client.into_split();
        let writer = SharedWriter::new();
        writer.install(write).await;

        // Act
        writer.write_frame(b"ZQS00\r").await.unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        writer.clear().await;

        // Assert
        assert_eq!(&buf, b"ZQS00\r");
        assert!(!writer.is_open().await);
        assert!(matches!(
            writer.write_frame(b"k\r").await,
            Err(WriteError::NotConnected)
        ));
    }
}
