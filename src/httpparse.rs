//! Streaming HTTP/1.1 response parser.
//!
//! A [`ResponseParser`] is owned by one event-loop session and reused for
//! every response on that socket: [`ResponseParser::reset`] clears the
//! per-message state without freeing buffers, so steady-state parsing
//! allocates nothing. Input arrives in arbitrary read-sized chunks;
//! [`ResponseParser::execute`] consumes what belongs to the current message
//! and reports completion through [`MessageState`].
//!
//! Headers and body bytes are only retained when assertion evaluation
//! needs them; otherwise the body is counted and discarded.

use thiserror::Error;

use crate::asserts::MAX_BODY_SIZE;

/// Malformed response data. The owning socket closes for the rest of the
/// run when one of these is raised.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid status line")]
    InvalidStatusLine,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("invalid chunk framing")]
    InvalidChunk,
    #[error("unexpected data after message end")]
    TrailingData,
}

/// Accumulated state of the response currently being parsed.
#[derive(Debug, Default)]
pub struct MessageState {
    pub status: u16,
    /// Value of the `Content-Length` header, when present.
    pub content_length: Option<u64>,
    /// Actual body bytes seen on the wire (chunk framing excluded).
    pub body_bytes: u64,
    pub headers_complete: bool,
    pub complete: bool,
    /// Collected only when the parser was built with `collect = true`.
    pub headers: Vec<(String, String)>,
    /// Collected only when `collect = true`, capped at `MAX_BODY_SIZE`.
    pub body: Vec<u8>,
}

impl MessageState {
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StatusLine,
    Header,
    FixedBody { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailer,
    Complete,
}

/// Resettable streaming parser for one socket's response stream.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    line: Vec<u8>,
    chunked: bool,
    collect: bool,
    msg: MessageState,
}

impl ResponseParser {
    /// `collect` retains headers and a capped body for assertion snapshots.
    pub fn new(collect: bool) -> Self {
        Self {
            state: State::StatusLine,
            line: Vec::with_capacity(256),
            chunked: false,
            collect,
            msg: MessageState::default(),
        }
    }

    pub fn message(&self) -> &MessageState {
        &self.msg
    }

    pub fn message_mut(&mut self) -> &mut MessageState {
        &mut self.msg
    }

    /// Clears per-message state for the next response on the same socket.
    /// Buffer capacity is retained.
    pub fn reset(&mut self) {
        self.state = State::StatusLine;
        self.line.clear();
        self.chunked = false;
        self.msg.status = 0;
        self.msg.content_length = None;
        self.msg.body_bytes = 0;
        self.msg.headers_complete = false;
        self.msg.complete = false;
        self.msg.headers.clear();
        self.msg.body.clear();
    }

    /// Feeds a read chunk to the parser. Returns the number of bytes
    /// consumed; consumption stops once the message completes, so a caller
    /// that sees `complete` with unconsumed input is looking at protocol
    /// garbage (nothing further was requested on this socket).
    pub fn execute(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let mut i = 0;

        while i < data.len() {
            match self.state {
                State::Complete => return Err(ParseError::TrailingData),

                State::StatusLine
                | State::Header
                | State::ChunkSize
                | State::ChunkDataEnd
                | State::Trailer => {
                    match data[i..].iter().position(|&b| b == b'\n') {
                        Some(rel) => {
                            self.line.extend_from_slice(&data[i..i + rel]);
                            i += rel + 1;
                            if self.line.last() == Some(&b'\r') {
                                self.line.pop();
                            }
                            self.on_line()?;
                            self.line.clear();
                        }
                        None => {
                            self.line.extend_from_slice(&data[i..]);
                            i = data.len();
                        }
                    }
                }

                State::FixedBody { remaining } => {
                    let take = remaining.min((data.len() - i) as u64) as usize;
                    self.push_body(&data[i..i + take]);
                    i += take;
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.finish();
                    } else {
                        self.state = State::FixedBody { remaining };
                    }
                }

                State::ChunkData { remaining } => {
                    let take = remaining.min((data.len() - i) as u64) as usize;
                    self.push_body(&data[i..i + take]);
                    i += take;
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.state = State::ChunkDataEnd;
                    } else {
                        self.state = State::ChunkData { remaining };
                    }
                }
            }

            if self.msg.complete {
                break;
            }
        }

        Ok(i)
    }

    fn on_line(&mut self) -> Result<(), ParseError> {
        match self.state {
            State::StatusLine => {
                // Tolerate stray empty lines between pipelined messages.
                if self.line.is_empty() {
                    return Ok(());
                }
                self.parse_status_line()
            }
            State::Header => {
                if self.line.is_empty() {
                    self.end_of_headers();
                    Ok(())
                } else {
                    self.parse_header_line()
                }
            }
            State::ChunkSize => self.parse_chunk_size(),
            State::ChunkDataEnd => {
                if self.line.is_empty() {
                    self.state = State::ChunkSize;
                    Ok(())
                } else {
                    Err(ParseError::InvalidChunk)
                }
            }
            State::Trailer => {
                if self.line.is_empty() {
                    self.finish();
                }
                // Trailer fields themselves are ignored.
                Ok(())
            }
            _ => unreachable!("line accumulation only runs in line states"),
        }
    }

    fn parse_status_line(&mut self) -> Result<(), ParseError> {
        let line = &self.line;
        if line.len() < 12
            || !line.starts_with(b"HTTP/1.")
            || !line[7].is_ascii_digit()
            || line[8] != b' '
        {
            return Err(ParseError::InvalidStatusLine);
        }
        if line.len() > 12 && line[12] != b' ' {
            return Err(ParseError::InvalidStatusLine);
        }

        let mut status = 0u16;
        for &b in &line[9..12] {
            if !b.is_ascii_digit() {
                return Err(ParseError::InvalidStatusLine);
            }
            status = status * 10 + u16::from(b - b'0');
        }

        self.msg.status = status;
        self.state = State::Header;
        Ok(())
    }

    fn parse_header_line(&mut self) -> Result<(), ParseError> {
        let line = &self.line;
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        if colon == 0 {
            return Err(ParseError::InvalidHeader);
        }

        let name = std::str::from_utf8(&line[..colon])
            .map_err(|_| ParseError::InvalidHeader)?
            .trim();
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ParseError::InvalidHeader)?
            .trim();

        if name.eq_ignore_ascii_case("content-length") {
            let n: u64 = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
            self.msg.content_length = Some(n);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            self.chunked = true;
        }

        if self.collect {
            self.msg.headers.push((name.to_string(), value.to_string()));
        }

        Ok(())
    }

    fn end_of_headers(&mut self) {
        self.msg.headers_complete = true;

        // 1xx, 204 and 304 never carry a body.
        if self.msg.status < 200 || self.msg.status == 204 || self.msg.status == 304 {
            self.finish();
        } else if self.chunked {
            self.state = State::ChunkSize;
        } else {
            match self.msg.content_length {
                Some(0) | None => self.finish(),
                Some(n) => self.state = State::FixedBody { remaining: n },
            }
        }
    }

    fn parse_chunk_size(&mut self) -> Result<(), ParseError> {
        let line = std::str::from_utf8(&self.line).map_err(|_| ParseError::InvalidChunk)?;
        // Chunk extensions after ';' are ignored.
        let size_part = line.split(';').next().unwrap_or("").trim();
        if size_part.is_empty() {
            return Err(ParseError::InvalidChunk);
        }

        let size = u64::from_str_radix(size_part, 16).map_err(|_| ParseError::InvalidChunk)?;
        if size == 0 {
            self.state = State::Trailer;
        } else {
            self.state = State::ChunkData { remaining: size };
        }
        Ok(())
    }

    fn push_body(&mut self, data: &[u8]) {
        self.msg.body_bytes += data.len() as u64;
        if self.collect && self.msg.body.len() < MAX_BODY_SIZE {
            let take = data.len().min(MAX_BODY_SIZE - self.msg.body.len());
            self.msg.body.extend_from_slice(&data[..take]);
        }
    }

    fn finish(&mut self) {
        self.msg.complete = true;
        self.state = State::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ResponseParser, data: &[u8]) -> usize {
        parser.execute(data).expect("parse failed")
    }

    #[test]
    fn test_simple_response_with_content_length() {
        let mut parser = ResponseParser::new(false);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let consumed = feed(&mut parser, wire);

        assert_eq!(consumed, wire.len());
        let msg = parser.message();
        assert!(msg.complete);
        assert!(msg.headers_complete);
        assert_eq!(msg.status, 200);
        assert_eq!(msg.content_length, Some(5));
        assert_eq!(msg.body_bytes, 5);
        // Body bytes are discarded when not collecting.
        assert!(msg.body.is_empty());
    }

    #[test]
    fn test_collect_retains_headers_and_body() {
        let mut parser = ResponseParser::new(true);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";
        feed(&mut parser, wire);

        let msg = parser.message();
        assert_eq!(msg.body, b"hello");
        assert!(msg
            .headers
            .iter()
            .any(|(n, v)| n == "Content-Type" && v == "text/plain"));
    }

    #[test]
    fn test_byte_by_byte_feeding() {
        let mut parser = ResponseParser::new(true);
        let wire: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found";

        for &b in wire {
            assert!(!parser.message().complete);
            feed(&mut parser, &[b]);
        }

        let msg = parser.message();
        assert!(msg.complete);
        assert_eq!(msg.status, 404);
        assert_eq!(msg.body, b"not found");
    }

    #[test]
    fn test_chunked_body() {
        let mut parser = ResponseParser::new(true);
        let wire =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let consumed = feed(&mut parser, wire);

        assert_eq!(consumed, wire.len());
        let msg = parser.message();
        assert!(msg.complete);
        assert_eq!(msg.body_bytes, 11);
        assert_eq!(msg.body, b"hello world");
    }

    #[test]
    fn test_chunked_with_extensions_and_trailers() {
        let mut parser = ResponseParser::new(true);
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nwire\r\n0\r\nX-Checksum: abc\r\n\r\n";
        feed(&mut parser, wire);

        let msg = parser.message();
        assert!(msg.complete);
        assert_eq!(msg.body, b"wire");
    }

    #[test]
    fn test_no_body_statuses_complete_at_headers() {
        for status in ["204 No Content", "304 Not Modified", "100 Continue"] {
            let mut parser = ResponseParser::new(false);
            let wire = format!("HTTP/1.1 {}\r\nServer: t\r\n\r\n", status);
            feed(&mut parser, wire.as_bytes());
            assert!(parser.message().complete, "status {}", status);
            assert_eq!(parser.message().body_bytes, 0);
        }
    }

    #[test]
    fn test_missing_length_means_empty_body() {
        let mut parser = ResponseParser::new(false);
        feed(&mut parser, b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(parser.message().complete);
        assert_eq!(parser.message().body_bytes, 0);
    }

    #[test]
    fn test_reset_reuses_parser_for_pipelining() {
        let mut parser = ResponseParser::new(true);

        for i in 0..3 {
            let body = format!("body-{}", i);
            let wire = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let consumed = feed(&mut parser, wire.as_bytes());
            assert_eq!(consumed, wire.len());
            assert!(parser.message().complete);
            assert_eq!(parser.message().body, body.as_bytes());
            parser.reset();
            assert!(!parser.message().complete);
        }
    }

    #[test]
    fn test_consumption_stops_at_message_end() {
        let mut parser = ResponseParser::new(false);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokEXTRA";
        let consumed = feed(&mut parser, wire);

        assert!(parser.message().complete);
        assert_eq!(consumed, wire.len() - 5);
        assert_eq!(parser.execute(b"EXTRA"), Err(ParseError::TrailingData));
    }

    #[test]
    fn test_invalid_status_line() {
        let mut parser = ResponseParser::new(false);
        assert_eq!(
            parser.execute(b"NOPE 200 OK\r\n"),
            Err(ParseError::InvalidStatusLine)
        );

        let mut parser = ResponseParser::new(false);
        assert_eq!(
            parser.execute(b"HTTP/1.1 2x0 OK\r\n"),
            Err(ParseError::InvalidStatusLine)
        );
    }

    #[test]
    fn test_invalid_header_and_length() {
        let mut parser = ResponseParser::new(false);
        assert_eq!(
            parser.execute(b"HTTP/1.1 200 OK\r\nno-colon-here\r\n"),
            Err(ParseError::InvalidHeader)
        );

        let mut parser = ResponseParser::new(false);
        assert_eq!(
            parser.execute(b"HTTP/1.1 200 OK\r\nContent-Length: five\r\n"),
            Err(ParseError::InvalidContentLength)
        );
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut parser = ResponseParser::new(false);
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        feed(&mut parser, head);
        assert_eq!(parser.execute(b"zz\r\n"), Err(ParseError::InvalidChunk));
    }

    #[test]
    fn test_body_collection_is_capped() {
        let mut parser = ResponseParser::new(true);
        let total = MAX_BODY_SIZE + 1024;
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", total);
        feed(&mut parser, head.as_bytes());

        let chunk = vec![b'x'; 64 * 1024];
        let mut sent = 0;
        while sent < total {
            let n = chunk.len().min(total - sent);
            feed(&mut parser, &chunk[..n]);
            sent += n;
        }

        let msg = parser.message();
        assert!(msg.complete);
        assert_eq!(msg.body_bytes, total as u64);
        assert_eq!(msg.body.len(), MAX_BODY_SIZE);
    }

    #[test]
    fn test_status_line_without_reason() {
        let mut parser = ResponseParser::new(false);
        feed(&mut parser, b"HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n");
        assert!(parser.message().complete);
        assert_eq!(parser.message().status, 200);
    }
}
