//! HTTP message model: start lines, headers, and the framing derived from them.

mod head;
mod headers;
mod line;
mod request;

use std::fmt::{self, Display};

pub use self::{
    head::{HeadParser, MessageHead},
    headers::{parse_header_line, Headers},
    line::{reason_phrase, RequestLine, StartLine, StatusLine},
    request::Request,
};
use crate::{FramingError, HttpError};

/// Framing attributes of a message, resolved once its header block is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framing {
    /// Declared content length, `None` if unknown.
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub content_type: Option<ContentType>,
    pub content_encoding: ContentEncoding,
}

impl Framing {
    /// Resolve framing from a message's header fields.
    pub fn from_fields<'a>(
        fields: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, HttpError> {
        let mut framing = Framing::default();

        for (name, value) in fields {
            if name.eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| FramingError::BadContentLength)?;

                // Repeated lengths are only acceptable if they agree
                if framing.content_length.map_or(false, |previous| previous != length) {
                    return Err(FramingError::BadContentLength.into());
                }
                framing.content_length = Some(length);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                let value = value.trim().to_ascii_lowercase();
                if value != "chunked" {
                    return Err(HttpError::UnsupportedTransferEncoding(value));
                }
                framing.chunked = true;
            } else if name.eq_ignore_ascii_case("content-type") {
                framing.content_type = Some(ContentType::parse(value));
            } else if name.eq_ignore_ascii_case("content-encoding") {
                framing.content_encoding = ContentEncoding::parse(value);
            }
        }

        Ok(framing)
    }

    /// Returns true if the message carries an entity body.
    pub fn has_entity_body(&self) -> bool {
        self.chunked || self.content_length.map_or(false, |length| length > 0)
    }
}

/// Media type with its parameters, `type/subtype; name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub mime: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();

        let params = parts
            .filter_map(|part| {
                let (name, value) = part.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        Self { mime, params }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(param, _)| param.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    pub fn is_multipart(&self) -> bool {
        self.mime == "multipart/form-data"
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime)?;

        for (name, value) in &self.params {
            write!(f, "; {}={}", name, value)?;
        }

        Ok(())
    }
}

/// Transformation applied to an entity body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    /// The zlib format, as `deflate` is used in practice.
    Deflate,
    /// Any other coding, including `br`, which can't be decoded.
    Unsupported(String),
}

impl ContentEncoding {
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();

        match value.as_str() {
            "" | "identity" => ContentEncoding::Identity,
            "gzip" | "x-gzip" => ContentEncoding::Gzip,
            "deflate" => ContentEncoding::Deflate,
            _ => ContentEncoding::Unsupported(value),
        }
    }

    /// Header value of this encoding, `None` for identity.
    pub fn as_header(&self) -> Option<&str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gzip"),
            ContentEncoding::Deflate => Some("deflate"),
            ContentEncoding::Unsupported(value) => Some(value),
        }
    }
}

/// Codings a client declared it accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptEncoding {
    pub gzip: bool,
    pub deflate: bool,
    pub br: bool,
}

impl AcceptEncoding {
    pub fn parse(value: &str) -> Self {
        let mut accept = AcceptEncoding::default();

        for item in value.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or("").trim();

            // An explicit zero quality refuses the coding
            let refused = parts.any(|param| {
                param
                    .trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .map_or(false, |q| q == 0.0)
            });
            if refused {
                continue;
            }

            if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
                accept.gzip = true;
            } else if coding.eq_ignore_ascii_case("deflate") {
                accept.deflate = true;
            } else if coding.eq_ignore_ascii_case("br") {
                accept.br = true;
            }
        }

        accept
    }

    /// Best supported coding for compressing a response, gzip preferred.
    pub fn preferred(&self) -> Option<ContentEncoding> {
        if self.gzip {
            Some(ContentEncoding::Gzip)
        } else if self.deflate {
            Some(ContentEncoding::Deflate)
        } else {
            None
        }
    }
}
