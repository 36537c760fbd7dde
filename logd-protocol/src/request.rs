//! Request parsing.
//!
//! Requests are single lines except `BATCH`, which carries a framed body.

use tokio::io::AsyncBufRead;

use crate::batch::{Batch, BatchHeader};
use crate::error::{ProtocolError, ProtocolResult};
use crate::line::{parse_uint, read_line};
use crate::valid_topic;

/// A parsed client request.
#[derive(Debug, Clone)]
pub enum Request {
    /// `BATCH <topic> <count> <crc32> <body_length>` plus framed body.
    Batch(Batch),
    /// `READ <topic> <offset> <messages_limit>`.
    Read {
        /// Topic to read from.
        topic: String,
        /// Byte offset of the first batch; must be a batch boundary.
        offset: u64,
        /// Stop after this many messages; 0 subscribes to the topic.
        messages: u64,
    },
    /// `TAIL <topic> <messages_limit>`.
    Tail {
        /// Topic to tail.
        topic: String,
        /// Carried for grammar compatibility; tails always subscribe.
        messages: u64,
    },
    /// `HEAD <topic>`.
    Head {
        /// Topic whose head offset is requested.
        topic: String,
    },
    /// `STATS`.
    Stats,
    /// `PING`.
    Ping,
    /// `CLOSE`.
    Close,
    /// `SLEEP <ms>` (test-only).
    Sleep {
        /// Milliseconds to sleep.
        millis: u64,
    },
    /// `SHUTDOWN`.
    Shutdown,
}

impl Request {
    /// Reads one request from the stream. Returns `Ok(None)` on a clean end
    /// of stream between requests.
    pub async fn read_from<R: AsyncBufRead + Unpin>(
        reader: &mut R,
    ) -> ProtocolResult<Option<Self>> {
        let Some(line) = read_line(reader).await? else {
            return Ok(None);
        };

        let mut parts = line.split(|&b| b == b' ');
        let name = parts.next().unwrap_or_default();
        let args: Vec<&[u8]> = parts.collect();

        let req = match name {
            b"BATCH" => {
                let header = BatchHeader::parse(&line)?;
                let batch = Batch::read_after_header(reader, &header, &line).await?;
                Self::Batch(batch)
            }
            b"READ" => {
                let [topic, offset, messages] = exact_args(&args)?;
                Self::Read {
                    topic: parse_topic(topic)?,
                    offset: parse_uint(offset)?,
                    messages: parse_uint(messages)?,
                }
            }
            b"TAIL" => {
                let [topic, messages] = exact_args(&args)?;
                Self::Tail {
                    topic: parse_topic(topic)?,
                    messages: parse_uint(messages)?,
                }
            }
            b"HEAD" => {
                let [topic] = exact_args(&args)?;
                Self::Head {
                    topic: parse_topic(topic)?,
                }
            }
            b"STATS" => {
                let [] = exact_args(&args)?;
                Self::Stats
            }
            b"PING" => {
                let [] = exact_args(&args)?;
                Self::Ping
            }
            b"CLOSE" => {
                let [] = exact_args(&args)?;
                Self::Close
            }
            b"SLEEP" => {
                let [millis] = exact_args(&args)?;
                Self::Sleep {
                    millis: parse_uint(millis)?,
                }
            }
            b"SHUTDOWN" => {
                let [] = exact_args(&args)?;
                Self::Shutdown
            }
            other => {
                let mut name = String::from_utf8_lossy(other).into_owned();
                name.truncate(32);
                return Err(ProtocolError::UnknownCommand(name));
            }
        };
        Ok(Some(req))
    }

    /// Returns the command name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Batch(_) => "BATCH",
            Self::Read { .. } => "READ",
            Self::Tail { .. } => "TAIL",
            Self::Head { .. } => "HEAD",
            Self::Stats => "STATS",
            Self::Ping => "PING",
            Self::Close => "CLOSE",
            Self::Sleep { .. } => "SLEEP",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Returns the topic this request addresses, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Batch(batch) => Some(batch.topic()),
            Self::Read { topic, .. } | Self::Tail { topic, .. } | Self::Head { topic } => {
                Some(topic)
            }
            _ => None,
        }
    }

    /// Returns true for commands serialized through a per-topic event queue.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Batch(_) | Self::Read { .. } | Self::Tail { .. })
    }

    /// Returns true for requests that answer with a chunk stream.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Tail { .. })
    }
}

fn exact_args<'a, const N: usize>(args: &[&'a [u8]]) -> ProtocolResult<[&'a [u8]; N]> {
    <[&[u8]; N]>::try_from(args.to_vec())
        .map_err(|_| ProtocolError::InvalidFormat("wrong argument count"))
}

fn parse_topic(token: &[u8]) -> ProtocolResult<String> {
    let topic = std::str::from_utf8(token)
        .map_err(|_| ProtocolError::InvalidTopic(String::from_utf8_lossy(token).into_owned()))?;
    if !valid_topic(topic) {
        return Err(ProtocolError::InvalidTopic(topic.to_string()));
    }
    Ok(topic.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(input: &[u8]) -> ProtocolResult<Option<Request>> {
        let mut reader = input;
        Request::read_from(&mut reader).await
    }

    #[tokio::test]
    async fn test_parse_read() {
        let req = parse(b"READ events 128 10\r\n").await.unwrap().unwrap();
        match req {
            Request::Read {
                topic,
                offset,
                messages,
            } => {
                assert_eq!(topic, "events");
                assert_eq!(offset, 128);
                assert_eq!(messages, 10);
            }
            other => panic!("expected READ, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_simple_commands() {
        assert!(matches!(
            parse(b"PING\r\n").await.unwrap().unwrap(),
            Request::Ping
        ));
        assert!(matches!(
            parse(b"STATS\r\n").await.unwrap().unwrap(),
            Request::Stats
        ));
        assert!(matches!(
            parse(b"CLOSE\r\n").await.unwrap().unwrap(),
            Request::Close
        ));
        assert!(matches!(
            parse(b"SHUTDOWN\r\n").await.unwrap().unwrap(),
            Request::Shutdown
        ));
        assert!(matches!(
            parse(b"SLEEP 50\r\n").await.unwrap().unwrap(),
            Request::Sleep { millis: 50 }
        ));
    }

    #[tokio::test]
    async fn test_parse_batch() {
        let mut batch = Batch::new("events").unwrap();
        batch.append(&b"hello"[..]).unwrap();
        let wire = batch.encode();

        let req = parse(&wire).await.unwrap().unwrap();
        match req {
            Request::Batch(parsed) => {
                assert_eq!(parsed.topic(), "events");
                assert_eq!(parsed.wire_bytes(), wire);
            }
            other => panic!("expected BATCH, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command() {
        assert!(matches!(
            parse(b"FLY events\r\n").await,
            Err(ProtocolError::UnknownCommand(name)) if name == "FLY"
        ));
    }

    #[tokio::test]
    async fn test_wrong_arity() {
        assert!(matches!(
            parse(b"READ events 0\r\n").await,
            Err(ProtocolError::InvalidFormat("wrong argument count"))
        ));
        assert!(matches!(
            parse(b"PING now\r\n").await,
            Err(ProtocolError::InvalidFormat("wrong argument count"))
        ));
    }

    #[tokio::test]
    async fn test_malformed_integer() {
        assert!(matches!(
            parse(b"READ events x 1\r\n").await,
            Err(ProtocolError::InvalidFormat("malformed integer"))
        ));
    }

    #[tokio::test]
    async fn test_invalid_topic() {
        assert!(matches!(
            parse(b"HEAD bad/topic\r\n").await,
            Err(ProtocolError::InvalidTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_eof() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[test]
    fn test_blocking_set() {
        let read = Request::Read {
            topic: "t".into(),
            offset: 0,
            messages: 0,
        };
        assert!(read.is_blocking());
        assert!(read.is_read());
        assert!(!Request::Ping.is_blocking());
        assert!(!Request::Stats.is_read());
    }
}
