//! Batch framing.
//!
//! A batch is the atomic unit of writing and addressing. Its wire form is
//! identical on the socket and in partition files, so appends and reads move
//! the same bytes end to end.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncBufRead;

use crate::error::{ProtocolError, ProtocolResult};
use crate::line::{parse_crc, parse_uint, read_body, read_line};
use crate::{valid_topic, MAX_BODY_BYTES, MAX_MESSAGES_PER_BATCH};

/// A single message inside a batch.
///
/// The id is ordinal within its batch and never appears on the wire; only
/// batches are addressable outside the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Ordinal of this message within its batch.
    pub id: u64,
    /// Opaque payload bytes.
    pub body: Bytes,
}

/// Parsed fields of a `BATCH` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    /// Topic the batch belongs to.
    pub topic: String,
    /// Declared number of messages.
    pub messages: u64,
    /// Declared CRC-32 of the body bytes (decimal on the wire).
    pub crc: u32,
    /// Declared body length, excluding the trailing `\r\n`.
    pub body_len: u64,
    /// Byte length of the header line including its `\r\n`.
    pub line_len: u64,
}

impl BatchHeader {
    /// Parses a header from a line with its `\r\n` already stripped.
    pub fn parse(line: &[u8]) -> ProtocolResult<Self> {
        let mut parts = line.split(|&b| b == b' ');
        if parts.next() != Some(b"BATCH".as_slice()) {
            return Err(ProtocolError::InvalidProtocolLine);
        }
        let (Some(topic), Some(count), Some(crc), Some(body_len), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(ProtocolError::InvalidFormat("wrong argument count"));
        };

        let topic = std::str::from_utf8(topic)
            .map_err(|_| ProtocolError::InvalidTopic(String::from_utf8_lossy(topic).into_owned()))?
            .to_string();
        if !valid_topic(&topic) {
            return Err(ProtocolError::InvalidTopic(topic));
        }

        Ok(Self {
            topic,
            messages: parse_uint(count)?,
            crc: parse_crc(crc)?,
            body_len: parse_uint(body_len)?,
            line_len: line.len() as u64 + 2,
        })
    }

    /// Reads and parses one header line. Returns `Ok(None)` on a clean end
    /// of stream, which is how partition scans detect the log tail.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Self>> {
        match read_line(reader).await? {
            None => Ok(None),
            Some(line) => Self::parse(&line).map(Some),
        }
    }

    /// Total wire length of the framed batch this header describes.
    #[must_use]
    pub const fn wire_len(&self) -> u64 {
        self.line_len + self.body_len + 2
    }
}

/// An ordered group of messages submitted and stored atomically.
#[derive(Debug, Clone)]
pub struct Batch {
    topic: String,
    messages: Vec<Message>,
    /// Original wire bytes when parsed from a stream. Batches built locally
    /// encode on demand.
    wire: Option<Bytes>,
}

impl Batch {
    /// Creates an empty batch for a topic.
    ///
    /// # Errors
    /// Returns an error if the topic name is invalid.
    pub fn new(topic: impl Into<String>) -> ProtocolResult<Self> {
        let topic = topic.into();
        if !valid_topic(&topic) {
            return Err(ProtocolError::InvalidTopic(topic));
        }
        Ok(Self {
            topic,
            messages: Vec::new(),
            wire: None,
        })
    }

    /// Appends a message body.
    ///
    /// # Errors
    /// Rejects empty messages and batches that would exceed the body or
    /// message-count limits.
    pub fn append(&mut self, body: impl Into<Bytes>) -> ProtocolResult<()> {
        let body = body.into();
        if body.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        if self.messages.len() as u64 >= MAX_MESSAGES_PER_BATCH {
            return Err(ProtocolError::TooLarge {
                size: self.messages.len() as u64 + 1,
                max: MAX_MESSAGES_PER_BATCH,
            });
        }
        let new_len = self.body_len() + message_frame_len(body.len() as u64);
        if new_len > MAX_BODY_BYTES {
            return Err(ProtocolError::TooLarge {
                size: new_len,
                max: MAX_BODY_BYTES,
            });
        }
        self.messages.push(Message {
            id: self.messages.len() as u64,
            body,
        });
        self.wire = None;
        Ok(())
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the messages in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.messages.len() as u64
    }

    /// Returns true if the batch has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the body length in bytes, excluding the trailing `\r\n`.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| message_frame_len(m.body.len() as u64))
            .sum()
    }

    /// Computes the CRC-32 (IEEE) of the body bytes.
    ///
    /// Emitted as unsigned decimal on the wire for compatibility with
    /// existing log data; never hex.
    #[must_use]
    pub fn crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for m in &self.messages {
            hash_message_frame(&mut hasher, &m.body);
        }
        hasher.finalize()
    }

    /// Encodes the full wire form, header line through trailing `\r\n`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let body = self.encode_body();
        let header = format!(
            "BATCH {} {} {} {}\r\n",
            self.topic,
            self.messages.len(),
            crc32fast::hash(&body),
            body.len()
        );
        let mut buf = BytesMut::with_capacity(header.len() + body.len() + 2);
        buf.put_slice(header.as_bytes());
        buf.put_slice(&body);
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// Returns the wire bytes, preserving the original framing for batches
    /// parsed off a stream.
    #[must_use]
    pub fn wire_bytes(&self) -> Bytes {
        match &self.wire {
            Some(wire) => wire.clone(),
            None => self.encode(),
        }
    }

    /// Returns the total wire length in bytes.
    #[must_use]
    pub fn wire_len(&self) -> u64 {
        self.wire_bytes().len() as u64
    }

    fn encode_body(&self) -> Bytes {
        // Safe cast: body_len is bounded by MAX_BODY_BYTES.
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = BytesMut::with_capacity(self.body_len() as usize);
        for m in &self.messages {
            buf.put_slice(format!("MSG {}\r\n", m.body.len()).as_bytes());
            buf.put_slice(&m.body);
            buf.put_slice(b"\r\n");
        }
        buf.freeze()
    }

    /// Reads and validates one framed batch. Returns `Ok(None)` on a clean
    /// end of stream.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Self>> {
        let Some(line) = read_line(reader).await? else {
            return Ok(None);
        };
        let header = BatchHeader::parse(&line)?;
        Self::read_after_header(reader, &header, &line).await.map(Some)
    }

    /// Reads the body of a batch whose header line has been consumed.
    pub(crate) async fn read_after_header<R: AsyncBufRead + Unpin>(
        reader: &mut R,
        header: &BatchHeader,
        line: &[u8],
    ) -> ProtocolResult<Self> {
        if header.body_len > MAX_BODY_BYTES {
            return Err(ProtocolError::TooLarge {
                size: header.body_len,
                max: MAX_BODY_BYTES,
            });
        }
        if header.messages > MAX_MESSAGES_PER_BATCH {
            return Err(ProtocolError::TooLarge {
                size: header.messages,
                max: MAX_MESSAGES_PER_BATCH,
            });
        }

        let body = Bytes::from(read_body(reader, header.body_len).await?);

        let computed = crc32fast::hash(&body);
        if computed != header.crc {
            return Err(ProtocolError::CrcMismatch {
                declared: header.crc,
                computed,
            });
        }

        let messages = parse_messages(&body)?;
        if messages.is_empty() {
            return Err(ProtocolError::InvalidFormat("empty batch"));
        }
        if messages.len() as u64 != header.messages {
            return Err(ProtocolError::InvalidFormat("message count mismatch"));
        }

        let mut wire = BytesMut::with_capacity(line.len() + body.len() + 4);
        wire.put_slice(line);
        wire.put_slice(b"\r\n");
        wire.put_slice(&body);
        wire.put_slice(b"\r\n");

        Ok(Self {
            topic: header.topic.clone(),
            messages,
            wire: Some(wire.freeze()),
        })
    }
}

/// Wire length of one `MSG` frame carrying `len` payload bytes. Client
/// writers use this to size batches before appending.
#[must_use]
pub fn message_frame_len(len: u64) -> u64 {
    // "MSG " + digits + "\r\n" + payload + "\r\n"
    4 + decimal_digits(len) + 2 + len + 2
}

fn decimal_digits(mut n: u64) -> u64 {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn hash_message_frame(hasher: &mut crc32fast::Hasher, body: &[u8]) {
    hasher.update(format!("MSG {}\r\n", body.len()).as_bytes());
    hasher.update(body);
    hasher.update(b"\r\n");
}

/// Parses the `MSG` frames of a batch body.
fn parse_messages(body: &Bytes) -> ProtocolResult<Vec<Message>> {
    let mut messages = Vec::new();
    let mut pos = 0usize;

    while pos < body.len() {
        let rest = &body[pos..];
        if !rest.starts_with(b"MSG ") {
            return Err(ProtocolError::InvalidProtocolLine);
        }
        let header_end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(ProtocolError::InvalidProtocolLine)?;
        let len = parse_uint(&rest[4..header_end])?;
        if len == 0 {
            return Err(ProtocolError::EmptyMessage);
        }
        if len > body.len() as u64 {
            return Err(ProtocolError::InvalidBodyLength(len));
        }

        let msg_start = pos + header_end + 2;
        // Safe cast: len is bounded by the body length, checked above.
        #[allow(clippy::cast_possible_truncation)]
        let msg_end = msg_start + len as usize;
        if msg_end + 2 > body.len() {
            return Err(ProtocolError::InvalidBodyLength(len));
        }
        if &body[msg_end..msg_end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidBodyLength(len));
        }

        messages.push(Message {
            id: messages.len() as u64,
            body: body.slice(msg_start..msg_end),
        });
        pos = msg_end + 2;
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> Batch {
        let mut batch = Batch::new("events").unwrap();
        batch.append(&b"hello"[..]).unwrap();
        batch.append(&b"world!"[..]).unwrap();
        batch
    }

    #[tokio::test]
    async fn test_batch_roundtrip() {
        let batch = sample_batch();
        let wire = batch.encode();

        let mut input: &[u8] = &wire;
        let parsed = Batch::read_from(&mut input).await.unwrap().unwrap();

        assert_eq!(parsed.topic(), "events");
        assert_eq!(parsed.message_count(), 2);
        assert_eq!(parsed.messages()[0].body, &b"hello"[..]);
        assert_eq!(parsed.messages()[1].body, &b"world!"[..]);
        // Framing is preserved byte for byte.
        assert_eq!(parsed.wire_bytes(), wire);
    }

    #[tokio::test]
    async fn test_crc_tamper_detected() {
        let wire = sample_batch().encode();
        let mut tampered = wire.to_vec();
        // Flip one bit inside the body region.
        let body_start = tampered.windows(2).position(|w| w == b"\r\n").unwrap() + 2;
        tampered[body_start + 7] ^= 0x01;

        let mut input: &[u8] = &tampered;
        assert!(matches!(
            Batch::read_from(&mut input).await,
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let batch = sample_batch();
        let body = batch.encode_body();
        let wire = format!(
            "BATCH events 3 {} {}\r\n",
            crc32fast::hash(&body),
            body.len()
        );
        let mut framed = wire.into_bytes();
        framed.extend_from_slice(&body);
        framed.extend_from_slice(b"\r\n");

        let mut input: &[u8] = &framed;
        assert!(matches!(
            Batch::read_from(&mut input).await,
            Err(ProtocolError::InvalidFormat("message count mismatch"))
        ));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let body = b"MSG 0\r\n\r\n";
        let wire = format!("BATCH events 1 {} {}\r\n", crc32fast::hash(body), body.len());
        let mut framed = wire.into_bytes();
        framed.extend_from_slice(body);
        framed.extend_from_slice(b"\r\n");

        let mut input: &[u8] = &framed;
        assert!(matches!(
            Batch::read_from(&mut input).await,
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn test_zero_message_batch_rejected() {
        let mut input: &[u8] = b"BATCH events 0 0 0\r\n\r\n";
        assert!(matches!(
            Batch::read_from(&mut input).await,
            Err(ProtocolError::InvalidFormat("empty batch"))
        ));
    }

    #[test]
    fn test_append_empty_rejected() {
        let mut batch = Batch::new("events").unwrap();
        assert!(matches!(
            batch.append(Bytes::new()),
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[test]
    fn test_header_parse() {
        let header = BatchHeader::parse(b"BATCH events 1 12345 14").unwrap();
        assert_eq!(header.topic, "events");
        assert_eq!(header.messages, 1);
        assert_eq!(header.crc, 12345);
        assert_eq!(header.body_len, 14);
        // "BATCH events 1 12345 14" + CRLF
        assert_eq!(header.line_len, 25);
        assert_eq!(header.wire_len(), 25 + 14 + 2);
    }

    #[test]
    fn test_header_rejects_bad_arity() {
        assert!(matches!(
            BatchHeader::parse(b"BATCH events 1 12345"),
            Err(ProtocolError::InvalidFormat("wrong argument count"))
        ));
        assert!(matches!(
            BatchHeader::parse(b"BATCH events 1 12345 14 extra"),
            Err(ProtocolError::InvalidFormat("wrong argument count"))
        ));
    }

    #[test]
    fn test_header_rejects_bad_topic() {
        assert!(matches!(
            BatchHeader::parse(b"BATCH bad.topic 1 0 0"),
            Err(ProtocolError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_wire_len_matches_header_arithmetic() {
        let batch = sample_batch();
        let wire = batch.encode();
        let line_end = wire.windows(2).position(|w| w == b"\r\n").unwrap();
        let header = BatchHeader::parse(&wire[..line_end]).unwrap();
        assert_eq!(header.wire_len(), wire.len() as u64);
        assert_eq!(batch.wire_len(), wire.len() as u64);
    }

    #[test]
    fn test_crc_matches_encode() {
        let batch = sample_batch();
        assert_eq!(batch.crc(), crc32fast::hash(&batch.encode_body()));
    }
}
