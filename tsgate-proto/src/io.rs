//! Reading PDUs out of a byte stream that may deliver them in arbitrary chunks.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    pdu::{self, Pdu, HEADER_LENGTH},
    ReadError,
};

/// Reads PDUs from an [`AsyncRead`], buffering partial packets until they are complete.
pub struct PduReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PduReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, BytesMut::with_capacity(1024))
    }

    /// Creates a reader which first consumes the bytes in `buf` before reading from `reader`.
    pub fn with_buffer(reader: R, buf: BytesMut) -> Self {
        Self { reader, buf }
    }

    /// Reads the next PDU.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly between two packets, and
    /// [`ReadError::UnexpectedEof`] if it ends in the middle of one.
    pub async fn read_pdu(&mut self) -> Result<Option<Pdu>, ReadError> {
        loop {
            match pdu::decode(&self.buf) {
                Ok((pdu, consumed)) => {
                    self.buf.advance(consumed);
                    return Ok(Some(pdu));
                }
                Err(error) if error.is_incomplete() => {}
                Err(error) => return Err(error.into()),
            }

            self.buf.reserve(HEADER_LENGTH);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return match self.buf.is_empty() {
                    true => Ok(None),
                    false => Err(ReadError::UnexpectedEof),
                };
            }
        }
    }

    /// Reads exactly `N` raw bytes from the stream, taking buffered bytes first.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        while self.buf.len() < N {
            self.buf.reserve(N - self.buf.len());
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Err(ReadError::UnexpectedEof);
            }
        }

        let mut array = [0u8; N];
        self.buf.copy_to_slice(&mut array);
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{
        pdu::{CloseChannel, DataPdu},
        MalformedPdu, StatusCode,
    };

    #[tokio::test]
    async fn reads_pdus_split_across_writes() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = PduReader::new(server);

        let data = Pdu::Data(DataPdu::new(Bytes::from(vec![7u8; 300])).unwrap());
        let close = Pdu::Close(CloseChannel { status: StatusCode::OK });
        let mut wire = data.encode().to_vec();
        wire.extend_from_slice(&close.encode());

        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(5) {
                client.write_all(chunk).await.unwrap();
            }
        });

        assert_eq!(reader.read_pdu().await.unwrap(), Some(data));
        assert_eq!(reader.read_pdu().await.unwrap(), Some(close));
        writer.await.unwrap();
        assert!(reader.read_pdu().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_packet_is_an_error() {
        let bytes = Pdu::Keepalive.encode();
        let mut reader = PduReader::new(&bytes[..5]);
        assert!(matches!(reader.read_pdu().await, Err(ReadError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn malformed_packet_is_reported() {
        let mut reader = PduReader::new(&[0x03u8, 0, 0, 0, 8, 0, 0, 0][..]);
        assert!(matches!(
            reader.read_pdu().await,
            Err(ReadError::Malformed(MalformedPdu::UnknownType(0x03)))
        ));
    }

    #[tokio::test]
    async fn raw_prefix_then_pdus() {
        let mut wire = vec![0xAB; 16];
        wire.extend_from_slice(&Pdu::Keepalive.encode());
        let mut reader = PduReader::new(&wire[..]);

        assert_eq!(reader.read_array::<16>().await.unwrap(), [0xAB; 16]);
        assert_eq!(reader.read_pdu().await.unwrap(), Some(Pdu::Keepalive));
        assert!(reader.read_pdu().await.unwrap().is_none());
    }
}
