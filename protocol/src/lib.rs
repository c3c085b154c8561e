// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use std::fmt;
use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// The number of bytes a single request line may occupy, terminator included. Longer
/// lines are answered with `ERROR` and discarded through their terminating newline.
pub const MAX_FRAME_BYTES: usize = 1024;

///
/// The three request verbs, in the exact spelling clients must use.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verb {
    Index,
    Remove,
    Query,
}

impl Verb {
    fn parse(token: &str) -> Option<Verb> {
        match token {
            "INDEX" => Some(Verb::Index),
            "REMOVE" => Some(Verb::Remove),
            "QUERY" => Some(Verb::Query),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Index => "INDEX",
            Verb::Remove => "REMOVE",
            Verb::Query => "QUERY",
        }
    }
}

///
/// One decoded request line: `VERB|NAME|DEPS`.
///
/// The dependency list is de-duplicated (first occurrence wins) and empty items are
/// dropped, so `a,,a,b` decodes the same as `a,b`. A `REMOVE` or `QUERY` carries the
/// field too; it must parse, but the graph ignores it.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub verb: Verb,
    pub package: String,
    pub dependencies: Vec<String>,
}

///
/// The only three byte sequences the server ever writes.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Response {
    Ok,
    Fail,
    Error,
}

impl Response {
    pub fn as_str(self) -> &'static str {
        match self {
            Response::Ok => "OK\n",
            Response::Fail => "FAIL\n",
            Response::Error => "ERROR\n",
        }
    }
}

/// Why a request line was rejected at the wire level. All variants elicit `ERROR` and
/// leave the graph untouched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The line did not contain exactly three `|`-separated fields.
    FieldCount(usize),
    /// The verb field was not one of the three known verbs, byte for byte.
    UnknownVerb(String),
    EmptyPackage,
    /// Package names are opaque, but may not begin or end with whitespace.
    PaddedPackage,
    /// The line hit the frame cap before its terminating newline.
    OverlongFrame,
    /// The line was not valid UTF-8.
    InvalidUtf8,
    /// The connection ended with bytes that were never newline-terminated.
    MissingNewline,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::FieldCount(fields) => {
                write!(f, "expected 3 `|`-separated fields, got {fields}")
            }
            ParseError::UnknownVerb(verb) => write!(f, "unknown verb {verb:?}"),
            ParseError::EmptyPackage => write!(f, "empty package name"),
            ParseError::PaddedPackage => {
                write!(f, "package name has leading or trailing whitespace")
            }
            ParseError::OverlongFrame => {
                write!(f, "line exceeded the {MAX_FRAME_BYTES} byte frame cap")
            }
            ParseError::InvalidUtf8 => write!(f, "line was not valid UTF-8"),
            ParseError::MissingNewline => write!(f, "trailing bytes with no newline"),
        }
    }
}

///
/// Parse one request line, with the terminating newline already stripped.
///
pub fn parse_request(line: &str) -> Result<Request, ParseError> {
    let mut fields = line.split('|');
    let (verb, package, deps) = match (fields.next(), fields.next(), fields.next(), fields.next())
    {
        (Some(verb), Some(package), Some(deps), None) => (verb, package, deps),
        _ => return Err(ParseError::FieldCount(line.split('|').count())),
    };

    let verb = Verb::parse(verb).ok_or_else(|| ParseError::UnknownVerb(verb.to_owned()))?;
    if package.is_empty() {
        return Err(ParseError::EmptyPackage);
    }
    if package.trim() != package {
        return Err(ParseError::PaddedPackage);
    }

    let mut dependencies: Vec<String> = Vec::new();
    for dep in deps.split(',') {
        if dep.is_empty() || dependencies.iter().any(|d| d == dep) {
            continue;
        }
        dependencies.push(dep.to_owned());
    }

    Ok(Request {
        verb,
        package: package.to_owned(),
        dependencies,
    })
}

/// One inbound frame: either a request, or the reason the line was malformed. Malformed
/// lines are values rather than stream errors so that a session can answer `ERROR` and
/// keep reading.
pub type Frame = Result<Request, ParseError>;

///
/// Codec for the framed transport: splits the inbound byte stream on newlines (with a
/// hard cap on line length) and decodes each line into a `Frame`; encodes the three
/// fixed responses.
///
pub struct RequestCodec {
    max_frame_bytes: usize,
    lines: LinesCodec,
}

impl RequestCodec {
    pub fn new(max_frame_bytes: usize) -> RequestCodec {
        RequestCodec {
            max_frame_bytes,
            lines: LinesCodec::new_with_max_length(max_frame_bytes),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        match self.lines.decode(src) {
            Ok(Some(line)) => Ok(Some(parse_request(&line))),
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Err(ParseError::OverlongFrame)))
            }
            // LinesCodec surfaces undecodable bytes as an InvalidData io error; the line
            // has already been consumed, so the stream itself is still usable.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(ParseError::InvalidUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Bytes that were never newline-terminated: consume them as one malformed frame.
        // The inner codec's scan position is tied to the buffer we just dropped, so it is
        // replaced rather than reused.
        src.clear();
        self.lines = LinesCodec::new_with_max_length(self.max_frame_bytes);
        Ok(Some(Err(ParseError::MissingNewline)))
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = io::Error;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.extend_from_slice(response.as_str().as_bytes());
        Ok(())
    }
}
