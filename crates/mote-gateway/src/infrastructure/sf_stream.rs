//! Async serial-forwarder stream I/O.
//!
//! The byte stream carries a 2-byte handshake in each direction and then
//! length-prefixed packets (see [`mote_core::sf`]).  A single `read()` may
//! return part of a packet or several packets, so [`SfReader`] buffers bytes
//! and drains complete packets with [`sf::decode_packet`] until it reports
//! `InsufficientData`.

use std::io;
use std::time::Duration;

use mote_core::sf::{self, SfError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum SfStreamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] SfError),

    #[error("no handshake from partner within {0:?}")]
    HandshakeTimeout(Duration),

    /// The partner closed the stream in the middle of a packet.
    #[error("stream closed with {0} bytes of an incomplete packet buffered")]
    TruncatedPacket(usize),
}

/// Exchanges the `"U "` handshake with the partner.
///
/// # Errors
///
/// [`SfStreamError::HandshakeTimeout`] when the exchange does not finish in
/// `limit`, [`SfError::BadHandshake`] when the partner's first byte is not
/// `'U'`, or the underlying I/O error.
pub async fn handshake<S>(stream: &mut S, limit: Duration) -> Result<(), SfStreamError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(&sf::HANDSHAKE).await?;
        stream.flush().await?;
        let mut partner = [0u8; 2];
        stream.read_exact(&mut partner).await?;
        sf::check_handshake(partner)?;
        Ok::<(), SfStreamError>(())
    };
    match timeout(limit, exchange).await {
        Ok(result) => result,
        Err(_) => Err(SfStreamError::HandshakeTimeout(limit)),
    }
}

/// Writes one length-prefixed packet.
pub async fn write_packet<W>(writer: &mut W, packet: &[u8]) -> Result<(), SfStreamError>
where
    W: AsyncWrite + Unpin,
{
    let framed = sf::encode_packet(packet)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Buffered packet reader over the read half of a stream.
pub struct SfReader<R> {
    inner: R,
    recv_buf: Vec<u8>,
    read_tmp: Vec<u8>,
}

impl<R: AsyncRead + Unpin> SfReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recv_buf: Vec::with_capacity(1024),
            read_tmp: vec![0u8; 1024],
        }
    }

    /// Returns the next packet, or `None` on a clean end of stream.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn read_packet(&mut self) -> Result<Option<Vec<u8>>, SfStreamError> {
        loop {
            match sf::decode_packet(&self.recv_buf) {
                Ok((packet, consumed)) => {
                    self.recv_buf.drain(..consumed);
                    return Ok(Some(packet));
                }
                Err(SfError::InsufficientData { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let n = self.inner.read(&mut self.read_tmp).await?;
            if n == 0 {
                if self.recv_buf.is_empty() {
                    return Ok(None);
                }
                return Err(SfStreamError::TruncatedPacket(self.recv_buf.len()));
            }
            self.recv_buf.extend_from_slice(&self.read_tmp[..n]);
        }
    }

    /// Bytes buffered but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.recv_buf.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_handshake_succeeds_with_u_partner() {
        let mut stream = Builder::new().write(b"U ").read(b"U ").build();

        let result = handshake(&mut stream, Duration::from_secs(1)).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_handshake_rejects_other_partner() {
        let mut stream = Builder::new().write(b"U ").read(b"HT").build();

        let result = handshake(&mut stream, Duration::from_secs(1)).await;

        assert!(matches!(
            result,
            Err(SfStreamError::Protocol(SfError::BadHandshake([b'H', b'T'])))
        ));
    }

    #[tokio::test]
    async fn test_handshake_times_out_on_silent_partner() {
        let mut stream = Builder::new()
            .write(b"U ")
            .wait(Duration::from_secs(5))
            .build();

        let result = handshake(&mut stream, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(SfStreamError::HandshakeTimeout(_))));
    }

    #[tokio::test]
    async fn test_handshake_fails_when_partner_hangs_up() {
        let mut stream = Builder::new().write(b"U ").read(b"U").build();

        let result = handshake(&mut stream, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(SfStreamError::Io(_))));
    }

    #[tokio::test]
    async fn test_packets_split_across_reads_are_reassembled() {
        // Arrange: one packet delivered in three pieces
        let mock = Builder::new().read(&[3, 0xAA]).read(&[0xBB]).read(&[0xCC]).build();
        let mut reader = SfReader::new(mock);

        // Act
        let packet = reader.read_packet().await.unwrap();

        // Assert
        assert_eq!(packet, Some(vec![0xAA, 0xBB, 0xCC]));
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_coalesced_packets_are_returned_one_at_a_time() {
        let mock = Builder::new().read(&[1, 0x01, 2, 0x02, 0x03, 0]).build();
        let mut reader = SfReader::new(mock);

        assert_eq!(reader.read_packet().await.unwrap(), Some(vec![0x01]));
        assert_eq!(reader.read_packet().await.unwrap(), Some(vec![0x02, 0x03]));
        assert_eq!(reader.read_packet().await.unwrap(), Some(vec![]));
        assert_eq!(reader.read_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_packet_is_an_error() {
        let mock = Builder::new().read(&[4, 0x01, 0x02]).build();
        let mut reader = SfReader::new(mock);

        let result = reader.read_packet().await;

        assert!(matches!(result, Err(SfStreamError::TruncatedPacket(3))));
    }

    #[tokio::test]
    async fn test_write_packet_prefixes_length() {
        let mut mock = Builder::new().write(&[2, 0x10, 0x20]).build();

        write_packet(&mut mock, &[0x10, 0x20]).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_packet_rejects_oversized_packet() {
        let mut mock = Builder::new().build();

        let result = write_packet(&mut mock, &[0u8; 256]).await;

        assert!(matches!(
            result,
            Err(SfStreamError::Protocol(SfError::PacketTooLong(256)))
        ));
    }
}
