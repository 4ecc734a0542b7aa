//! Length-prefixed text framing.
//!
//! Wire format:
//! ```text
//! [u16 BE: payload_len][payload_len bytes of UTF-8 text]
//! ```

use crate::error::NetworkError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Largest payload the 2-byte length prefix can describe.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Codec turning 2-byte length-prefixed frames into strings and back.
#[derive(Debug)]
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
}

impl MessageCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(2)
            .max_frame_length(MAX_MESSAGE_LEN)
            .big_endian()
            .new_codec();

        Self { inner }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = String;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, NetworkError> {
        match self.inner.decode(src)? {
            Some(frame) => String::from_utf8(frame.to_vec())
                .map(Some)
                .map_err(|_| NetworkError::InvalidUtf8),
            None => Ok(None),
        }
    }
}

impl Encoder<String> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), NetworkError> {
        if item.len() > MAX_MESSAGE_LEN {
            return Err(NetworkError::MessageTooLarge(item.len()));
        }
        self.inner.encode(Bytes::from(item), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        codec.encode("put 5 a".to_string(), &mut buf).unwrap();

        assert_eq!(&buf[..2], &[0, 7]);
        assert_eq!(&buf[2..], b"put 5 a");
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0u8, 3, b'E'][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"OF");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("EOF".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0u8, 2, 0xff, 0xfe][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetworkError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let big = "x".repeat(MAX_MESSAGE_LEN + 1);

        assert!(matches!(
            codec.encode(big, &mut buf),
            Err(NetworkError::MessageTooLarge(_))
        ));
    }
}
