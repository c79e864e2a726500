//! Binary frame codec for the voice service protocol
//!
//! Every message starts with a four-byte header: protocol version and
//! header size (in 4-byte words) packed into byte 0, message type and flag
//! bits in byte 1, serialization and compression methods in byte 2, byte 3
//! reserved. Depending on the flags, a signed sequence number, an event
//! number, and a length-prefixed session or connection id follow, then a
//! length-prefixed payload. The payload length always reflects the
//! post-compression size.
//!
//! Encoding and decoding are pure transforms over byte buffers; the
//! transport layer is elsewhere.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::event::Event;
use crate::error::{Error, Result};

/// Wire protocol version (high nibble of byte 0)
pub const PROTOCOL_VERSION: u8 = 0b0001;
/// Header size in 4-byte words (low nibble of byte 0)
const HEADER_WORDS: u8 = 0b0001;

/// Message type (high nibble of byte 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client request with a serialized payload
    FullRequest = 0b0001,
    /// Client request carrying only audio bytes
    AudioOnlyRequest = 0b0010,
    /// Server response with a serialized payload
    FullResponse = 0b1001,
    /// Server response carrying only audio bytes
    AudioOnlyResponse = 0b1011,
    /// Server error report
    Error = 0b1111,
}

impl MessageType {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0b0001 => Ok(Self::FullRequest),
            0b0010 => Ok(Self::AudioOnlyRequest),
            0b1001 => Ok(Self::FullResponse),
            0b1011 => Ok(Self::AudioOnlyResponse),
            0b1111 => Ok(Self::Error),
            other => Err(Error::MalformedFrame(format!(
                "unknown message type {other:#06b}"
            ))),
        }
    }
}

/// Flag bits (low nibble of byte 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// A big-endian i32 sequence number follows the header
    pub const HAS_SEQUENCE: u8 = 0b0001;
    /// This is the final packet of its direction
    pub const LAST_PACKET: u8 = 0b0010;
    /// A big-endian u32 event number follows the header
    pub const HAS_EVENT: u8 = 0b0100;

    /// Wrap raw flag bits.
    #[must_use]
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether a sequence number is present.
    #[must_use]
    pub const fn has_sequence(self) -> bool {
        self.0 & Self::HAS_SEQUENCE != 0
    }

    /// Whether this is the final packet.
    #[must_use]
    pub const fn is_last(self) -> bool {
        self.0 & Self::LAST_PACKET != 0
    }

    /// Whether an event number is present.
    #[must_use]
    pub const fn has_event(self) -> bool {
        self.0 & Self::HAS_EVENT != 0
    }
}

/// Payload serialization method (high nibble of byte 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Serialization {
    /// Raw bytes (audio)
    Raw = 0b0000,
    /// JSON document
    Json = 0b0001,
}

impl Serialization {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0b0000 => Ok(Self::Raw),
            0b0001 => Ok(Self::Json),
            other => Err(Error::MalformedFrame(format!(
                "unknown serialization method {other:#06b}"
            ))),
        }
    }
}

/// Payload compression method (low nibble of byte 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// Payload is uncompressed
    None = 0b0000,
    /// Payload is gzip-compressed
    Gzip = 0b0001,
}

impl Compression {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0b0000 => Ok(Self::None),
            0b0001 => Ok(Self::Gzip),
            other => Err(Error::MalformedFrame(format!(
                "unknown compression method {other:#06b}"
            ))),
        }
    }
}

/// A fully decoded frame
///
/// The payload has already been decompressed when the compression bit was
/// set and decompression succeeded; when decompression fails the original
/// bytes are kept so the consumer fails with a precise serialization error
/// instead of a silent drop.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Message type from the header
    pub message_type: MessageType,
    /// Flag bits from the header
    pub flags: MessageFlags,
    /// Declared payload serialization
    pub serialization: Serialization,
    /// Declared payload compression
    pub compression: Compression,
    /// Sequence number, present when the sequence flag is set
    pub sequence: Option<i32>,
    /// Event number, present when the event flag is set
    pub event: Option<Event>,
    /// Session id accompanying a session-scoped event
    pub session_id: Option<String>,
    /// Connection id accompanying a connection-scoped event
    pub connection_id: Option<String>,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Whether the sender marked this as the final packet.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.flags.is_last()
    }
}

/// Encode a full request with a serialized payload.
///
/// A sequence number, when given, is written after the header with the
/// sequence flag set; `last` additionally sets the last-packet flag.
///
/// # Errors
///
/// Returns an error if gzip compression fails.
pub fn encode_full_request(
    payload: &[u8],
    sequence: Option<i32>,
    last: bool,
    compress: bool,
) -> Result<Vec<u8>> {
    encode_request(MessageType::FullRequest, Serialization::Json, payload, sequence, last, compress)
}

/// Encode an audio-only request.
///
/// The zero-length final packet of a recognition upload is
/// `encode_audio_request(&[], None, true, false)`.
///
/// # Errors
///
/// Returns an error if gzip compression fails.
pub fn encode_audio_request(
    audio: &[u8],
    sequence: Option<i32>,
    last: bool,
    compress: bool,
) -> Result<Vec<u8>> {
    encode_request(MessageType::AudioOnlyRequest, Serialization::Raw, audio, sequence, last, compress)
}

/// Encode an event-flagged request (synthesis control messages).
///
/// Session-scoped events carry a session-id block between the event number
/// and the payload; connection-scoped and bare events do not.
///
/// # Errors
///
/// Returns an error if a session-scoped event is missing its session id.
pub fn encode_event_request(
    event: Event,
    session_id: Option<&str>,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.push((PROTOCOL_VERSION << 4) | HEADER_WORDS);
    out.push(((MessageType::FullRequest as u8) << 4) | MessageFlags::HAS_EVENT);
    out.push(((Serialization::Json as u8) << 4) | Compression::None as u8);
    out.push(0);
    out.extend_from_slice(&(event as u32).to_be_bytes());
    if event.carries_session_id() {
        let id = session_id.ok_or_else(|| {
            Error::MalformedFrame(format!("event {event:?} requires a session id"))
        })?;
        out.extend_from_slice(&u32_len(id.as_bytes())?.to_be_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    out.extend_from_slice(&u32_len(payload)?.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn encode_request(
    message_type: MessageType,
    serialization: Serialization,
    payload: &[u8],
    sequence: Option<i32>,
    last: bool,
    compress: bool,
) -> Result<Vec<u8>> {
    let mut flags = 0u8;
    if sequence.is_some() {
        flags |= MessageFlags::HAS_SEQUENCE;
    }
    if last {
        flags |= MessageFlags::LAST_PACKET;
    }
    let compression = if compress { Compression::Gzip } else { Compression::None };
    let body = if compress { gzip(payload)? } else { payload.to_vec() };

    let mut out = Vec::with_capacity(12 + body.len());
    out.push((PROTOCOL_VERSION << 4) | HEADER_WORDS);
    out.push(((message_type as u8) << 4) | flags);
    out.push(((serialization as u8) << 4) | compression as u8);
    out.push(0);
    if let Some(seq) = sequence {
        out.extend_from_slice(&seq.to_be_bytes());
    }
    out.extend_from_slice(&u32_len(&body)?.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one frame.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] when the buffer is truncated, a
/// declared length exceeds the remaining bytes, or a header field is
/// unknown; returns [`Error::Protocol`] when the frame is a server error
/// report. Never returns a partial parse.
pub fn decode(data: &[u8]) -> Result<Frame> {
    let mut reader = Reader::new(data);
    let byte0 = reader.u8()?;
    let version = byte0 >> 4;
    if version != PROTOCOL_VERSION {
        return Err(Error::MalformedFrame(format!(
            "unsupported protocol version {version}"
        )));
    }
    let header_words = byte0 & 0x0f;
    let byte1 = reader.u8()?;
    let message_type = MessageType::from_wire(byte1 >> 4)?;
    let flags = MessageFlags::new(byte1 & 0x0f);
    let byte2 = reader.u8()?;
    let serialization = Serialization::from_wire(byte2 >> 4)?;
    let compression = Compression::from_wire(byte2 & 0x0f)?;
    reader.u8()?; // reserved
    // Extended headers pad to a multiple of 4 bytes; skip the extension.
    if header_words > HEADER_WORDS {
        reader.take(usize::from(header_words - HEADER_WORDS) * 4)?;
    }

    if message_type == MessageType::Error {
        let code = reader.u32()?;
        let len = reader.u32()? as usize;
        let raw = reader.take(len)?;
        let body = match compression {
            Compression::Gzip => gunzip_or_keep(raw),
            Compression::None => raw.to_vec(),
        };
        return Err(Error::Protocol {
            code,
            message: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let sequence = if flags.has_sequence() { Some(reader.i32()?) } else { None };

    let mut event = None;
    let mut session_id = None;
    let mut connection_id = None;
    if flags.has_event() {
        let number = reader.u32()?;
        let typed = Event::from_wire(number)
            .ok_or_else(|| Error::MalformedFrame(format!("unknown event number {number}")))?;
        if typed.carries_session_id() {
            session_id = Some(reader.utf8_block()?);
        } else if typed.carries_connection_id() {
            connection_id = Some(reader.utf8_block()?);
        }
        event = Some(typed);
    }

    let len = reader.u32()? as usize;
    let raw = reader.take(len)?;
    if reader.remaining() != 0 {
        return Err(Error::MalformedFrame(format!(
            "{} trailing bytes after payload",
            reader.remaining()
        )));
    }
    let payload = match compression {
        Compression::Gzip => gunzip_or_keep(raw),
        Compression::None => raw.to_vec(),
    };

    Ok(Frame {
        message_type,
        flags,
        serialization,
        compression,
        sequence,
        event,
        session_id,
        connection_id,
        payload,
    })
}

fn u32_len(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len())
        .map_err(|_| Error::MalformedFrame("block exceeds u32 length".into()))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip data, keeping the original bytes when decompression
/// fails so the payload consumer surfaces the real parse error.
fn gunzip_or_keep(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match GzDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => data.to_vec(),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::MalformedFrame(format!(
                "need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn utf8_block(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::MalformedFrame(format!("invalid utf-8 in id block: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_request_round_trip_uncompressed() {
        let payload = br#"{"hello":"world"}"#;
        let encoded = encode_full_request(payload, None, false, false).unwrap();
        assert_eq!(encoded[0], 0x11);
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.message_type, MessageType::FullRequest);
        assert_eq!(frame.serialization, Serialization::Json);
        assert_eq!(frame.compression, Compression::None);
        assert_eq!(frame.sequence, None);
        assert!(!frame.is_last());
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn full_request_round_trip_gzip() {
        let payload = br#"{"request":{"model_name":"bigmodel"}}"#;
        let encoded = encode_full_request(payload, Some(1), false, true).unwrap();
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.compression, Compression::Gzip);
        assert_eq!(frame.sequence, Some(1));
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn audio_request_last_packet() {
        let encoded = encode_audio_request(&[], Some(-5), true, true).unwrap();
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.message_type, MessageType::AudioOnlyRequest);
        assert!(frame.is_last());
        assert_eq!(frame.sequence, Some(-5));
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn event_request_with_session_id() {
        let encoded =
            encode_event_request(Event::StartSession, Some("abc-123"), br"{}").unwrap();
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.event, Some(Event::StartSession));
        assert_eq!(frame.session_id.as_deref(), Some("abc-123"));
        assert_eq!(frame.payload, br"{}");
    }

    #[test]
    fn event_request_without_id_block() {
        let encoded = encode_event_request(Event::StartConnection, None, br"{}").unwrap();
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.event, Some(Event::StartConnection));
        assert_eq!(frame.session_id, None);
        assert_eq!(frame.connection_id, None);
    }

    #[test]
    fn session_event_requires_session_id() {
        assert!(encode_event_request(Event::TaskRequest, None, br"{}").is_err());
    }

    #[test]
    fn error_frame_yields_protocol_error() {
        let message = b"quota exceeded";
        let mut data = vec![0x11, 0b1111_0000, 0b0001_0000, 0x00];
        data.extend_from_slice(&45_000_081u32.to_be_bytes());
        data.extend_from_slice(&u32::try_from(message.len()).unwrap().to_be_bytes());
        data.extend_from_slice(message);
        match decode(&data) {
            Err(Error::Protocol { code, message }) => {
                assert_eq!(code, 45_000_081);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_prefixes_are_malformed() {
        let payload = br#"{"k":"v"}"#;
        let encoded = encode_full_request(payload, Some(7), false, true).unwrap();
        for cut in 0..encoded.len() {
            let result = decode(&encoded[..cut]);
            assert!(
                matches!(result, Err(Error::MalformedFrame(_))),
                "prefix of {cut} bytes decoded to {result:?}"
            );
        }
    }

    #[test]
    fn oversized_declared_length_is_malformed() {
        let mut data = vec![0x11, 0b0001_0000, 0b0001_0000, 0x00];
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"short");
        assert!(matches!(decode(&data), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut encoded = encode_full_request(br"{}", None, false, false).unwrap();
        encoded.push(0xff);
        assert!(matches!(decode(&encoded), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn unknown_message_type_is_malformed() {
        let data = [0x11, 0b0111_0000, 0b0001_0000, 0x00, 0, 0, 0, 0];
        assert!(matches!(decode(&data), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn corrupt_gzip_keeps_original_bytes() {
        let mut data = vec![0x11, 0b0001_0000, 0b0001_0001, 0x00];
        let body = b"not gzip at all";
        data.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes());
        data.extend_from_slice(body);
        let frame = decode(&data).unwrap();
        assert_eq!(frame.payload, body);
    }

    #[test]
    fn audio_response_with_event_and_audio() {
        // Server-shaped frame: audio-only response carrying a synthesis event.
        let audio = [0u8, 1, 2, 3, 4, 5];
        let sid = "s-1";
        let mut data = vec![0x11, 0b1011_0100, 0b0000_0000, 0x00];
        data.extend_from_slice(&(Event::TtsResponse as u32).to_be_bytes());
        data.extend_from_slice(&u32::try_from(sid.len()).unwrap().to_be_bytes());
        data.extend_from_slice(sid.as_bytes());
        data.extend_from_slice(&u32::try_from(audio.len()).unwrap().to_be_bytes());
        data.extend_from_slice(&audio);
        let frame = decode(&data).unwrap();
        assert_eq!(frame.message_type, MessageType::AudioOnlyResponse);
        assert_eq!(frame.event, Some(Event::TtsResponse));
        assert_eq!(frame.session_id.as_deref(), Some(sid));
        assert_eq!(frame.payload, audio);
    }
}
