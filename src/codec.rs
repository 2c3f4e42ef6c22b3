//! HTTP/1.x wire format: request heads, chunked request bodies and an
//! incremental response parser.

use http::StatusCode;
use url::Url;

use crate::constants::{header, CHUNKED, CRLF, HTTP_SLASH, MAX_HEAD_SIZE};
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::method::Method;
use crate::response::Response;

/// Longest chunk-size line or trailer section accepted.
const MAX_LINE_SIZE: usize = 8 * 1024;

/// Most header fields accepted in one response head or trailer section.
const MAX_HEADERS: usize = 128;

/// `METHOD SP target SP HTTP/version CRLF`, one `name: value CRLF` per header, blank line
pub fn encode_head(method: Method, target: &str, version: &str, headers: &Headers) -> Vec<u8> {
    let mut head = String::with_capacity(128);
    head.push_str(method.as_str());
    head.push(' ');
    head.push_str(target);
    head.push(' ');
    head.push_str(HTTP_SLASH);
    head.push_str(version);
    head.push_str(CRLF);
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str(CRLF);
    }
    head.push_str(CRLF);
    head.into_bytes()
}

/// Frame `data` as one chunk of a chunked body
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut chunk = format!("{:X}{}", data.len(), CRLF).into_bytes();
    chunk.extend_from_slice(data);
    chunk.extend_from_slice(CRLF.as_bytes());
    chunk
}

/// Terminating chunk of a chunked body, with no trailers
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked(Chunk),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body(Framing),
    Done,
}

/// Incremental HTTP/1.x response parser
///
/// Bytes are pushed in as they arrive with [`feed`](ResponseParser::feed);
/// interim `1xx` heads are skipped. A response without declared length ends
/// when the peer closes, signalled with [`finish`](ResponseParser::finish).
pub struct ResponseParser {
    state: State,
    buffer: Vec<u8>,
    response: Response,
    method: Method,
    received: u64,
}

impl ResponseParser {
    /// Parser for the response to a `method` request sent to `url`
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            state: State::Head,
            buffer: Vec::new(),
            response: Response::empty(url),
            method,
            received: 0,
        }
    }

    /// Push bytes; returns `true` once the response is complete
    pub fn feed(&mut self, data: &[u8]) -> Result<bool> {
        self.received += data.len() as u64;
        if self.state == State::Done {
            return Ok(true);
        }
        self.buffer.extend_from_slice(data);
        while self.advance()? {}
        Ok(self.state == State::Done)
    }

    /// The peer closed the stream
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            State::Done => Ok(()),
            State::Body(Framing::UntilClose) => {
                self.state = State::Done;
                Ok(())
            }
            State::Head if self.received == 0 => Err(Error::malformed(
                "connection closed before any response bytes arrived",
            )),
            _ => Err(Error::malformed(
                "connection closed before the response was complete",
            )),
        }
    }

    /// Check whether status line and headers have been parsed
    pub fn head_complete(&self) -> bool {
        self.state != State::Head
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// Response assembled so far
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    /// Make one step of progress; `false` when more input is needed
    fn advance(&mut self) -> Result<bool> {
        match self.state {
            State::Head => self.parse_head(),
            State::Body(Framing::Length(remaining)) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buffer.len() as u64) as usize;
                self.response.append_body(&self.buffer[..take]);
                self.buffer.drain(..take);
                let remaining = remaining - take as u64;
                self.state = if remaining == 0 {
                    State::Done
                } else {
                    State::Body(Framing::Length(remaining))
                };
                Ok(true)
            }
            State::Body(Framing::Chunked(chunk)) => self.parse_chunked(chunk),
            State::Body(Framing::UntilClose) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                self.response.append_body(&self.buffer);
                self.buffer.clear();
                Ok(false)
            }
            State::Done => Ok(false),
        }
    }

    fn parse_head(&mut self) -> Result<bool> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Response::new(&mut slots);
        let parsed = httparse::ParserConfig::default()
            .allow_obsolete_multiline_headers_in_responses(true)
            .parse_response(&mut head, &self.buffer)
            .map_err(|e| Error::malformed(format!("invalid response head: {}", e)))?;
        let len = match parsed {
            httparse::Status::Complete(len) if len > MAX_HEAD_SIZE => {
                return Err(Error::malformed("response head too large"));
            }
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial if self.buffer.len() > MAX_HEAD_SIZE => {
                return Err(Error::malformed("response head too large"));
            }
            httparse::Status::Partial => return Ok(false),
        };

        let version = format!("1.{}", head.version.unwrap_or(1));
        let code = head.code.unwrap_or_default();
        let status = StatusCode::from_u16(code)
            .map_err(|_| Error::malformed(format!("invalid status code {}", code)))?;
        let reason = head.reason.unwrap_or_default().to_string();
        let fields = owned_fields(head.headers);
        self.buffer.drain(..len);

        self.response.clear_head();
        self.response.set_status_line(version, status, reason);
        for (name, value) in fields {
            self.response.add_header(name, value);
        }

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            tracing::trace!(status = status.as_u16(), "skipping interim response");
            return Ok(true);
        }

        self.state = self.framing(status)?;
        Ok(true)
    }

    fn framing(&self, status: StatusCode) -> Result<State> {
        let bodyless = self.method == Method::Head
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || (self.method == Method::Connect && status.is_success());
        if bodyless {
            return Ok(State::Done);
        }

        let headers = self.response.headers();
        let codings: Vec<&str> = headers
            .get_all(header::TRANSFER_ENCODING)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if let Some(last) = codings.last() {
            if last.eq_ignore_ascii_case(CHUNKED) {
                return Ok(State::Body(Framing::Chunked(Chunk::Size)));
            }
            return Ok(State::Body(Framing::UntilClose));
        }

        let mut length: Option<u64> = None;
        for value in headers
            .get_all(header::CONTENT_LENGTH)
            .flat_map(|v| v.split(','))
        {
            let parsed: u64 = value
                .trim()
                .parse()
                .map_err(|_| Error::malformed(format!("invalid Content-Length '{}'", value)))?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(Error::malformed("conflicting Content-Length values"));
                }
                _ => length = Some(parsed),
            }
        }

        Ok(match length {
            Some(0) => State::Done,
            Some(n) => State::Body(Framing::Length(n)),
            None => State::Body(Framing::UntilClose),
        })
    }

    fn parse_chunked(&mut self, chunk: Chunk) -> Result<bool> {
        match chunk {
            Chunk::Size => {
                let (consumed, size) = match httparse::parse_chunk_size(&self.buffer)
                    .map_err(|_| Error::malformed("invalid chunk size line"))?
                {
                    httparse::Status::Complete(parsed) => parsed,
                    httparse::Status::Partial if self.buffer.len() > MAX_LINE_SIZE => {
                        return Err(Error::malformed("chunk size line too long"));
                    }
                    httparse::Status::Partial => return Ok(false),
                };
                self.buffer.drain(..consumed);
                self.state = if size == 0 {
                    State::Body(Framing::Chunked(Chunk::Trailer))
                } else {
                    State::Body(Framing::Chunked(Chunk::Data(size)))
                };
                Ok(true)
            }
            Chunk::Data(remaining) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buffer.len() as u64) as usize;
                self.response.append_body(&self.buffer[..take]);
                self.buffer.drain(..take);
                let remaining = remaining - take as u64;
                self.state = State::Body(Framing::Chunked(if remaining == 0 {
                    Chunk::DataEnd
                } else {
                    Chunk::Data(remaining)
                }));
                Ok(true)
            }
            Chunk::DataEnd => {
                if self.buffer.len() < 2 {
                    return Ok(false);
                }
                if &self.buffer[..2] != CRLF.as_bytes() {
                    return Err(Error::malformed("chunk data not followed by CRLF"));
                }
                self.buffer.drain(..2);
                self.state = State::Body(Framing::Chunked(Chunk::Size));
                Ok(true)
            }
            Chunk::Trailer => {
                let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let parsed = httparse::parse_headers(&self.buffer, &mut slots)
                    .map_err(|e| Error::malformed(format!("invalid trailer: {}", e)))?;
                let (consumed, fields) = match parsed {
                    httparse::Status::Complete((consumed, trailers)) => {
                        (consumed, owned_fields(trailers))
                    }
                    httparse::Status::Partial if self.buffer.len() > MAX_LINE_SIZE => {
                        return Err(Error::malformed("chunk trailer too long"));
                    }
                    httparse::Status::Partial => return Ok(false),
                };
                self.buffer.drain(..consumed);
                for (name, value) in fields {
                    self.response.add_header(name, value);
                }
                self.state = State::Done;
                Ok(true)
            }
        }
    }
}

/// Copy parsed fields out of the read buffer; folded values are joined with a space
fn owned_fields(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|header| {
            let value = String::from_utf8_lossy(header.value);
            let value = value
                .split("\r\n")
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (header.name.to_string(), value)
        })
        .collect()
}
