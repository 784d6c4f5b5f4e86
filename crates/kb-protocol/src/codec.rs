//! Envelope codec and tokio framing
//!
//! [`encode`]/[`decode`] work on whole frames; [`FrameCodec`] wraps the same
//! rules for `Framed` streams.

use bincode::Options;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// bincode settings shared by both directions
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Serialize a message with its frame header into `dst`
pub fn encode_into(message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = wire_options().serialize(message)?;
    let payload_len = payload.len();

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    FrameHeader::new(message.message_type(), payload_len as u32).encode(dst);
    dst.extend_from_slice(&payload);

    Ok(())
}

/// Encode a message as a complete frame
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one complete frame
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let mut buf = BytesMut::from(frame);
    let header = FrameHeader::decode(&mut buf)?.ok_or(ProtocolError::IncompleteFrame {
        expected: HEADER_SIZE,
        actual: frame.len(),
    })?;

    let payload_len = header.payload_length as usize;
    if buf.len() < payload_len {
        return Err(ProtocolError::IncompleteFrame {
            expected: HEADER_SIZE + payload_len,
            actual: frame.len(),
        });
    }
    if buf.len() > payload_len {
        return Err(ProtocolError::TrailingBytes(buf.len() - payload_len));
    }

    decode_payload(header, &buf)
}

/// Deserialize a payload and check it against the header discriminant
fn decode_payload(header: FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let message: Message = wire_options().deserialize(payload)?;

    let payload_type = message.message_type();
    if payload_type != header.message_type {
        return Err(ProtocolError::TypeMismatch {
            header: header.message_type,
            payload: payload_type,
        });
    }

    Ok(message)
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            // Save header and wait for more data
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        decode_payload(header, &payload).map(Some)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&message, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallEnvelope, CallId, Headers, Method, ResultEnvelope};
    use crate::message::MessageType;

    fn sample_call(body: &[u8], headers: Headers) -> Message {
        Message::Call(CallEnvelope::new(
            CallId::generate(),
            "payment",
            Method::Post,
            headers,
            Bytes::copy_from_slice(body),
        ))
    }

    #[test]
    fn test_call_roundtrip_with_binary_body() {
        let body: Vec<u8> = (0..=255u8).collect();
        let mut headers = Headers::new();
        headers.insert("header-kiosk-id".to_string(), "K-001".to_string());
        let message = sample_call(&body, headers);

        let frame = encode(&message).unwrap();
        assert_eq!(frame[0], MessageType::Call.as_u8());

        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_roundtrip_empty_headers_and_body() {
        let message = sample_call(b"", Headers::new());
        assert_eq!(decode(&encode(&message).unwrap()).unwrap(), message);

        let result = Message::Result(ResultEnvelope::ok(CallId::generate(), Bytes::new()));
        assert_eq!(decode(&encode(&result).unwrap()).unwrap(), result);
    }

    #[test]
    fn test_codec_stream_of_frames() {
        let mut codec = FrameCodec::new();
        let first = sample_call(br#"{"order_id":1}"#, Headers::new());
        let second = Message::Heartbeat { timestamp: 7 };

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();
        let message = Message::Heartbeat { timestamp: 12345 };

        let mut full_buf = BytesMut::new();
        codec.encode(message.clone(), &mut full_buf).unwrap();

        // Header split across reads
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, payload still missing a byte
        partial.extend_from_slice(&full_buf.split_to(full_buf.len() - 1));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(message));
    }

    #[test]
    fn test_header_payload_mismatch_is_protocol_error() {
        let result = Message::Result(ResultEnvelope::ok(CallId::generate(), &b"x"[..]));
        let mut frame = BytesMut::from(&encode(&result).unwrap()[..]);
        frame[0] = MessageType::Call.as_u8();

        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::TypeMismatch {
                header: MessageType::Call,
                payload: MessageType::Result,
            })
        ));
    }

    #[test]
    fn test_garbage_payload_is_protocol_error() {
        let mut buf = BytesMut::new();
        FrameHeader::new(MessageType::Call, 4).encode(&mut buf);
        buf.extend_from_slice(&[0xFF; 4]);

        let mut codec = FrameCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_and_trailing_frames() {
        let frame = encode(&Message::Heartbeat { timestamp: 1 }).unwrap();

        assert!(matches!(
            decode(&frame[..frame.len() - 1]),
            Err(ProtocolError::IncompleteFrame { .. })
        ));

        let mut long = frame.to_vec();
        long.push(0);
        assert!(matches!(decode(&long), Err(ProtocolError::TrailingBytes(1))));
    }
}
