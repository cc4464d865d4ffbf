//! HTTP/1.1 client codec.
//!
//! [`HttpClientCodec`] implements `tokio_util`'s [`Encoder`] and [`Decoder`]:
//! requests are serialised verbatim, responses are parsed incrementally into
//! [`HttpObject`] pieces so body bytes are surfaced as soon as they arrive.
//!
//! Body framing follows RFC 9112 §6.3: `HEAD`, `1xx`, `204` and `304`
//! responses have no body; a chunked transfer coding wins over
//! `Content-Length`; anything else is delimited by connection close.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{CodecError, PipelineError};
use crate::http::{Headers, HttpObject, HttpRequest, Method, ResponseHead, Version};
use crate::pipeline::{Event, Message, Stage};

const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_LINE_SIZE: usize = 8 * 1024;

#[derive(Debug)]
enum DecodeState {
    Head,
    Empty,
    Fixed { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkEnd,
    Trailers(Headers),
    UntilClose,
}

/// Stateful HTTP/1.1 client codec.
///
/// Each encoded request records its method so the matching response can be
/// framed correctly (a `HEAD` response never has a body).
#[derive(Debug)]
pub struct HttpClientCodec {
    state: DecodeState,
    pending: VecDeque<Method>,
}

impl Default for HttpClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientCodec {
    /// Codec waiting for the first response head.
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            pending: VecDeque::new(),
        }
    }

    /// Requests encoded whose final response head has not arrived yet.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn body_state(&mut self, head: &ResponseHead) -> Result<DecodeState, CodecError> {
        // 1xx leaves the request outstanding; the final response follows.
        if head.is_informational() {
            return Ok(DecodeState::Empty);
        }
        let method = self.pending.pop_front();
        if method == Some(Method::Head) || head.status == 204 || head.status == 304 {
            return Ok(DecodeState::Empty);
        }

        if let Some(coding) = head.headers.get("transfer-encoding") {
            let chunked = coding
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
            return Ok(if chunked {
                DecodeState::ChunkSize
            } else {
                DecodeState::UntilClose
            });
        }

        match head.headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(|remaining| DecodeState::Fixed { remaining })
                .map_err(|_| CodecError::InvalidContentLength(value.to_string())),
            None => Ok(DecodeState::UntilClose),
        }
    }
}

fn parse_head(src: &mut BytesMut) -> Result<Option<ResponseHead>, CodecError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut storage);
    let len = match response.parse(&src[..])? {
        httparse::Status::Partial => {
            if src.len() > MAX_HEAD_SIZE {
                return Err(CodecError::HeadTooLarge {
                    limit: MAX_HEAD_SIZE,
                });
            }
            return Ok(None);
        }
        httparse::Status::Complete(len) => len,
    };

    let version = if response.version == Some(0) {
        Version::Http10
    } else {
        Version::Http11
    };
    let mut headers = Headers::new();
    for header in response.headers.iter() {
        headers.append(header.name, String::from_utf8_lossy(header.value));
    }
    let head = ResponseHead {
        version,
        status: response.code.unwrap_or_default(),
        reason: response.reason.unwrap_or_default().to_string(),
        headers,
    };
    src.advance(len);
    Ok(Some(head))
}

/// Drop stray CR/LF bytes left in front of the next status line.
fn skip_blank_lines(src: &mut BytesMut) {
    let blank = src.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
    src.advance(blank);
}

/// Split one CRLF-terminated line off the front of `src`, without the CRLF.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let mut line = src.split_to(pos + 2);
            line.truncate(pos);
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE_SIZE => Err(CodecError::InvalidChunk(format!(
            "line exceeds {MAX_LINE_SIZE} bytes"
        ))),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, CodecError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CodecError::InvalidChunk("chunk size is not ASCII".into()))?;
    // Chunk extensions after ';' are ignored.
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16)
        .map_err(|_| CodecError::InvalidChunk(format!("bad chunk size {size:?}")))
}

fn take_body(src: &mut BytesMut, remaining: u64) -> (HttpObject, u64) {
    let n = usize::try_from(remaining).map_or(src.len(), |r| r.min(src.len()));
    let chunk = src.split_to(n).freeze();
    (HttpObject::Content(chunk), remaining - n as u64)
}

fn last() -> HttpObject {
    HttpObject::Last {
        trailers: Headers::new(),
    }
}

impl Encoder<HttpRequest> for HttpClientCodec {
    type Error = CodecError;

    fn encode(&mut self, request: HttpRequest, dst: &mut BytesMut) -> Result<(), CodecError> {
        let method = request.method.as_str();
        let version = request.version.as_str();
        let headers_len: usize = request
            .headers
            .iter()
            .map(|(n, v)| n.len() + v.len() + 4)
            .sum();
        dst.reserve(method.len() + request.target.len() + version.len() + headers_len + 6);

        dst.put_slice(method.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(request.target.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(version.as_bytes());
        dst.put_slice(b"\r\n");
        for (name, value) in request.headers.iter() {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        self.pending.push_back(request.method);
        Ok(())
    }
}

impl Decoder for HttpClientCodec {
    type Item = HttpObject;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HttpObject>, CodecError> {
        loop {
            // Taken by value; every path that keeps decoding the same
            // message puts the next state back.
            match std::mem::replace(&mut self.state, DecodeState::Head) {
                DecodeState::Head => {
                    skip_blank_lines(src);
                    let Some(head) = parse_head(src)? else {
                        return Ok(None);
                    };
                    self.state = self.body_state(&head)?;
                    return Ok(Some(HttpObject::Head(head)));
                }
                DecodeState::Empty => return Ok(Some(last())),
                DecodeState::Fixed { remaining } => {
                    if remaining == 0 {
                        return Ok(Some(last()));
                    }
                    if src.is_empty() {
                        self.state = DecodeState::Fixed { remaining };
                        return Ok(None);
                    }
                    let (content, remaining) = take_body(src, remaining);
                    self.state = DecodeState::Fixed { remaining };
                    return Ok(Some(content));
                }
                DecodeState::ChunkSize => {
                    let Some(line) = take_line(src)? else {
                        self.state = DecodeState::ChunkSize;
                        return Ok(None);
                    };
                    self.state = match parse_chunk_size(&line)? {
                        0 => DecodeState::Trailers(Headers::new()),
                        remaining => DecodeState::ChunkData { remaining },
                    };
                }
                DecodeState::ChunkData { remaining } => {
                    if src.is_empty() {
                        self.state = DecodeState::ChunkData { remaining };
                        return Ok(None);
                    }
                    let (content, remaining) = take_body(src, remaining);
                    self.state = if remaining == 0 {
                        DecodeState::ChunkEnd
                    } else {
                        DecodeState::ChunkData { remaining }
                    };
                    return Ok(Some(content));
                }
                DecodeState::ChunkEnd => {
                    if src.len() < 2 {
                        self.state = DecodeState::ChunkEnd;
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(CodecError::InvalidChunk(
                            "missing CRLF after chunk data".into(),
                        ));
                    }
                    src.advance(2);
                    self.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailers(mut trailers) => {
                    let Some(line) = take_line(src)? else {
                        self.state = DecodeState::Trailers(trailers);
                        return Ok(None);
                    };
                    if line.is_empty() {
                        return Ok(Some(HttpObject::Last { trailers }));
                    }
                    let text = String::from_utf8_lossy(&line);
                    let Some((name, value)) = text.split_once(':') else {
                        return Err(CodecError::InvalidChunk(format!(
                            "malformed trailer {text:?}"
                        )));
                    };
                    trailers.append(name.trim(), value.trim());
                    self.state = DecodeState::Trailers(trailers);
                }
                DecodeState::UntilClose => {
                    self.state = DecodeState::UntilClose;
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(HttpObject::Content(src.split().freeze())));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<HttpObject>, CodecError> {
        if let Some(object) = self.decode(src)? {
            return Ok(Some(object));
        }
        match self.state {
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::UntilClose => {
                self.state = DecodeState::Head;
                Ok(Some(last()))
            }
            _ => {
                self.state = DecodeState::Head;
                src.clear();
                Err(CodecError::Incomplete)
            }
        }
    }
}

/// Pipeline stage wrapping [`HttpClientCodec`].
///
/// Inbound raw bytes become [`Message::Response`] events; outbound
/// [`Message::Request`]s become raw bytes.
#[derive(Debug, Default)]
pub struct HttpCodecStage {
    codec: HttpClientCodec,
    buffer: BytesMut,
}

impl HttpCodecStage {
    /// Fresh codec stage with an empty read buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for HttpCodecStage {
    fn name(&self) -> &'static str {
        "http-codec"
    }

    fn inbound(&mut self, event: Event, out: &mut Vec<Event>) -> Result<(), PipelineError> {
        match event {
            Event::Read(Message::Bytes(bytes)) => {
                self.buffer.extend_from_slice(&bytes);
                while let Some(object) = self.codec.decode(&mut self.buffer)? {
                    out.push(Event::Read(Message::Response(object)));
                }
            }
            Event::Inactive => {
                while let Some(object) = self.codec.decode_eof(&mut self.buffer)? {
                    out.push(Event::Read(Message::Response(object)));
                }
                out.push(Event::Inactive);
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn outbound(&mut self, message: Message, out: &mut Vec<Message>) -> Result<(), PipelineError> {
        match message {
            Message::Request(request) => {
                let mut dst = BytesMut::new();
                self.codec.encode(request, &mut dst)?;
                out.push(Message::Bytes(dst.freeze()));
            }
            other => out.push(other),
        }
        Ok(())
    }
}
