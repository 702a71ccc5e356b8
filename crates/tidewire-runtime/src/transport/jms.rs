//! JMS producer over the broker's STOMP 1.2 endpoint
//!
//! JMS brokers (ActiveMQ, Artemis) expose STOMP next to their native
//! protocol; a JMS topic `name` is reachable as destination `/topic/name`.
//! Only the producer side of STOMP is spoken: CONNECT, SEND, DISCONNECT.

use super::{
    expect_variant, ChannelConnector, ChannelSlot, OutboundChannel, ProducerError,
    TransportProducer,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use tidewire_core::{ProducerState, ProtocolKind, TransportProtocol};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Producer for JMS descriptors.
pub struct JmsProducer {
    slot: ChannelSlot,
}

impl JmsProducer {
    pub(crate) fn new(slot: ChannelSlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl TransportProducer for JmsProducer {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Jms
    }

    fn state(&self) -> ProducerState {
        self.slot.state()
    }

    async fn connect(&mut self, protocol: &TransportProtocol) -> Result<(), ProducerError> {
        self.slot.begin_connect(protocol, ProtocolKind::Jms)?;
        let jms = expect_variant!(protocol, Jms, ProtocolKind::Jms);
        self.slot.open(protocol).await?;
        info!(
            "JMS producer connected to {}:{} (topic {})",
            jms.broker_hostname, jms.port, jms.topic_name
        );
        Ok(())
    }

    async fn publish(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        self.slot.publish(payload).await
    }

    async fn disconnect(&mut self) -> Result<(), ProducerError> {
        self.slot.close().await
    }
}

// =============================================================================
// STOMP framing
// =============================================================================

/// A decoded STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
}

impl StompFrame {
    /// Parse one frame, without its trailing NUL.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        // Heart-beat EOLs may precede the command line.
        let start = raw.iter().position(|b| *b != b'\n' && *b != b'\r')?;
        let raw = &raw[start..];
        let header_end = match (find(raw, b"\n\n"), find(raw, b"\r\n\r\n")) {
            (Some(lf), Some(crlf)) if crlf < lf => (crlf, crlf + 4),
            (Some(lf), _) => (lf, lf + 2),
            (None, Some(crlf)) => (crlf, crlf + 4),
            (None, None) => return None,
        };

        let head = std::str::from_utf8(&raw[..header_end.0]).ok()?;
        let mut lines = head.lines();
        let command = lines.next()?.trim_end_matches('\r').to_string();
        let mut headers = IndexMap::new();
        for line in lines {
            if let Some((key, value)) = line.trim_end_matches('\r').split_once(':') {
                // Repeated headers: the first occurrence wins.
                headers
                    .entry(unescape_header(key))
                    .or_insert_with(|| unescape_header(value));
            }
        }
        Some(Self {
            command,
            headers,
            body: raw[header_end.1..].to_vec(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Encode a frame. Header values of non-CONNECT frames are escaped.
pub fn encode_frame(command: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let escape = command != "CONNECT";
    let mut frame = Vec::with_capacity(command.len() + body.len() + 64);
    frame.extend_from_slice(command.as_bytes());
    frame.push(b'\n');
    for (key, value) in headers {
        if escape {
            frame.extend_from_slice(escape_header(key).as_bytes());
            frame.push(b':');
            frame.extend_from_slice(escape_header(value).as_bytes());
        } else {
            frame.extend_from_slice(key.as_bytes());
            frame.push(b':');
            frame.extend_from_slice(value.as_bytes());
        }
        frame.push(b'\n');
    }
    frame.push(b'\n');
    frame.extend_from_slice(body);
    frame.push(0);
    frame
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Destination a JMS topic is published to.
pub fn topic_destination(topic_name: &str) -> String {
    format!("/topic/{}", topic_name)
}

// =============================================================================
// STOMP channel
// =============================================================================

/// Opens STOMP sessions over TCP.
#[derive(Debug, Clone, Default)]
pub struct StompConnector;

impl StompConnector {
    pub fn new() -> Self {
        Self
    }
}

async fn read_frame(stream: &mut BufReader<TcpStream>) -> Result<StompFrame, ProducerError> {
    let mut raw = Vec::new();
    let n = stream
        .read_until(0, &mut raw)
        .await
        .map_err(|e| ProducerError::ConnectFailed(e.to_string()))?;
    if n == 0 {
        return Err(ProducerError::ConnectFailed(
            "connection closed by broker".to_string(),
        ));
    }
    if raw.last() == Some(&0) {
        raw.pop();
    }
    StompFrame::parse(&raw)
        .ok_or_else(|| ProducerError::ConnectFailed("malformed STOMP frame".to_string()))
}

#[async_trait]
impl ChannelConnector for StompConnector {
    async fn open(
        &self,
        protocol: &TransportProtocol,
    ) -> Result<Box<dyn OutboundChannel>, ProducerError> {
        let jms = expect_variant!(protocol, Jms, ProtocolKind::Jms);

        let tcp = TcpStream::connect((jms.broker_hostname.as_str(), jms.port))
            .await
            .map_err(|e| ProducerError::ConnectFailed(e.to_string()))?;
        let mut stream = BufReader::new(tcp);

        let connect = encode_frame(
            "CONNECT",
            &[
                ("accept-version", "1.2"),
                ("host", jms.broker_hostname.as_str()),
                ("heart-beat", "0,0"),
            ],
            b"",
        );
        stream
            .write_all(&connect)
            .await
            .map_err(|e| ProducerError::ConnectFailed(e.to_string()))?;

        let reply = read_frame(&mut stream).await?;
        match reply.command.as_str() {
            "CONNECTED" => {
                debug!(
                    "STOMP session to {} established (version {})",
                    protocol.broker_address(),
                    reply.header("version").unwrap_or("?")
                );
            }
            "ERROR" => {
                let reason = reply
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| String::from_utf8_lossy(&reply.body).into_owned());
                return Err(ProducerError::ConnectFailed(reason));
            }
            other => {
                return Err(ProducerError::ConnectFailed(format!(
                    "unexpected STOMP frame {}",
                    other
                )))
            }
        }

        Ok(Box::new(StompChannel {
            stream,
            destination: topic_destination(&jms.topic_name),
        }))
    }
}

struct StompChannel {
    stream: BufReader<TcpStream>,
    destination: String,
}

#[async_trait]
impl OutboundChannel for StompChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        let length = payload.len().to_string();
        let frame = encode_frame(
            "SEND",
            &[
                ("destination", self.destination.as_str()),
                ("content-length", length.as_str()),
            ],
            payload,
        );
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ProducerError::PublishFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ProducerError> {
        let frame = encode_frame("DISCONNECT", &[], b"");
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ProducerError::PublishFailed(e.to_string()))?;
        self.stream
            .shutdown()
            .await
            .map_err(|e| ProducerError::PublishFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_core::JmsTransport;
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_send_frame() {
        let frame = encode_frame(
            "SEND",
            &[("destination", "/topic/a:b"), ("content-length", "2")],
            b"hi",
        );
        assert_eq!(
            frame,
            b"SEND\ndestination:/topic/a\\cb\ncontent-length:2\n\nhi\0".to_vec()
        );
    }

    #[test]
    fn test_parse_frame() {
        let frame =
            StompFrame::parse(b"\nCONNECTED\r\nversion:1.2\r\nserver:x\\cy\r\n\r\nbody").unwrap();
        assert_eq!(frame.command, "CONNECTED");
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("server"), Some("x:y"));
        assert_eq!(frame.body, b"body".to_vec());
    }

    #[test]
    fn test_parse_rejects_headerless_garbage() {
        assert!(StompFrame::parse(b"CONNECTED").is_none());
        assert!(StompFrame::parse(b"\n\n").is_none());
    }

    async fn read_raw_frame(stream: &mut BufReader<TcpStream>) -> StompFrame {
        let mut raw = Vec::new();
        stream.read_until(0, &mut raw).await.unwrap();
        raw.pop();
        StompFrame::parse(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_stomp_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(socket);
            let connect = read_raw_frame(&mut stream).await;
            stream
                .write_all(&encode_frame("CONNECTED", &[("version", "1.2")], b""))
                .await
                .unwrap();
            let send = read_raw_frame(&mut stream).await;
            let disconnect = read_raw_frame(&mut stream).await;
            (connect, send, disconnect)
        });

        let protocol = TransportProtocol::Jms(JmsTransport::new("127.0.0.1", port, "sensors"));
        let mut channel = StompConnector::new().open(&protocol).await.unwrap();
        channel.send(b"{\"v\":1}").await.unwrap();
        channel.close().await.unwrap();

        let (connect, send, disconnect) = server.await.unwrap();
        assert_eq!(connect.command, "CONNECT");
        assert_eq!(connect.header("accept-version"), Some("1.2"));
        assert_eq!(send.command, "SEND");
        assert_eq!(send.header("destination"), Some("/topic/sensors"));
        assert_eq!(send.header("content-length"), Some("7"));
        assert_eq!(send.body, b"{\"v\":1}".to_vec());
        assert_eq!(disconnect.command, "DISCONNECT");
    }

    #[tokio::test]
    async fn test_error_frame_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(socket);
            read_raw_frame(&mut stream).await;
            stream
                .write_all(&encode_frame("ERROR", &[("message", "bad credentials")], b""))
                .await
                .unwrap();
        });

        let protocol = TransportProtocol::Jms(JmsTransport::new("127.0.0.1", port, "t"));
        match StompConnector::new().open(&protocol).await {
            Err(ProducerError::ConnectFailed(reason)) => assert_eq!(reason, "bad credentials"),
            _ => panic!("expected ConnectFailed"),
        }
    }
}
