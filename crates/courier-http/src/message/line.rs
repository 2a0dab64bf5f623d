use std::fmt::{self, Display};

use crate::{FramingError, HttpError};

/// First line of a message, identifying it as a request or response.
pub trait StartLine: Sized {
    fn parse(line: &str) -> Result<Self, HttpError>;
}

/// `METHOD SP request-target SP HTTP-version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: version.into(),
        }
    }
}

impl StartLine for RequestLine {
    /// Split on the first and last space, so a target containing spaces survives.
    fn parse(line: &str) -> Result<Self, HttpError> {
        let first = line.find(' ').ok_or(FramingError::NotWellFormed)?;
        if first == 0 {
            return Err(FramingError::MissingMethod.into());
        }

        let last = line.rfind(' ').ok_or(FramingError::NotWellFormed)?;
        if first == last || last == line.len() - 1 {
            return Err(FramingError::MissingVersion.into());
        }

        let target = line[first + 1..last].trim();
        if target.is_empty() {
            return Err(FramingError::MissingTarget.into());
        }

        let value = Self {
            method: line[..first].to_string(),
            target: target.to_string(),
            version: line[last + 1..].to_string(),
        };
        Ok(value)
    }
}

impl Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.target, self.version)
    }
}

/// `HTTP-version SP status-code [SP reason-phrase]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    /// Status line with the canonical reason phrase for `code`.
    pub fn new(code: u16) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            code,
            reason: reason_phrase(code).to_string(),
        }
    }
}

impl StartLine for StatusLine {
    fn parse(line: &str) -> Result<Self, HttpError> {
        let first = match line.find(' ') {
            Some(first) if first > 0 && first < line.len() - 1 => first,
            _ => return Err(FramingError::NotWellFormed.into()),
        };
        let version = line[..first].to_string();
        let rest = &line[first + 1..];

        // The reason phrase is optional, and may itself contain spaces
        let (code, reason) = match rest.split_once(' ') {
            Some((code, reason)) if !reason.is_empty() => (code, Some(reason)),
            _ => (rest, None),
        };

        let code = parse_status_code(code.trim())?;
        let reason = reason.unwrap_or_else(|| reason_phrase(code)).to_string();

        Ok(Self {
            version,
            code,
            reason,
        })
    }
}

impl Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.version, self.code)?;

        if !self.reason.is_empty() {
            write!(f, " {}", self.reason)?;
        }

        Ok(())
    }
}

fn parse_status_code(value: &str) -> Result<u16, HttpError> {
    if value.len() != 3 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(FramingError::BadStatusCode.into());
    }

    let code = value.parse().map_err(|_| FramingError::BadStatusCode)?;
    if code < 100 {
        return Err(FramingError::BadStatusCode.into());
    }

    Ok(code)
}

/// Canonical reason phrase of a status code, empty if the code isn't registered.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_round_trip() {
        for line in [
            "GET / HTTP/1.1",
            "POST /submit?a=1&b=2 HTTP/1.0",
            "OPTIONS * HTTP/1.1",
        ] {
            let parsed = RequestLine::parse(line).unwrap();
            assert_eq!(parsed.to_string(), line);
        }
    }

    #[test]
    fn request_line_fields() {
        let line = RequestLine::parse("DELETE /items/7 HTTP/1.1").unwrap();
        assert_eq!(line, RequestLine::new("DELETE", "/items/7", "HTTP/1.1"));
    }

    #[test]
    fn request_line_errors_classified() {
        let cases = [
            ("GET", FramingError::NotWellFormed),
            (" / HTTP/1.1", FramingError::MissingMethod),
            ("GET /", FramingError::MissingVersion),
            ("GET / ", FramingError::MissingVersion),
            ("GET    HTTP/1.1", FramingError::MissingTarget),
        ];

        for (line, expected) in cases {
            match RequestLine::parse(line) {
                Err(HttpError::Framing(error)) => assert_eq!(error, expected, "line {:?}", line),
                other => panic!("line {:?} parsed as {:?}", line, other),
            }
        }
    }

    #[test]
    fn status_line_round_trip() {
        for line in ["HTTP/1.1 200 OK", "HTTP/1.1 404 Not Found", "HTTP/1.0 299 Custom Thing"] {
            let parsed = StatusLine::parse(line).unwrap();
            assert_eq!(parsed.to_string(), line);
        }
    }

    #[test]
    fn status_line_reason_defaults_to_canonical() {
        let line = StatusLine::parse("HTTP/1.1 404").unwrap();
        assert_eq!(line.code, 404);
        assert_eq!(line.reason, "Not Found");

        let line = StatusLine::parse("HTTP/1.1 503 ").unwrap();
        assert_eq!(line.reason, "Service Unavailable");
    }

    #[test]
    fn bad_status_code_rejected() {
        for line in ["HTTP/1.1 abc OK", "HTTP/1.1 20 OK", "HTTP/1.1 2000 OK", "HTTP/1.1 099"] {
            assert!(
                matches!(
                    StatusLine::parse(line),
                    Err(HttpError::Framing(FramingError::BadStatusCode))
                ),
                "line {:?}",
                line
            );
        }

        assert!(matches!(
            StatusLine::parse("HTTP/1.1"),
            Err(HttpError::Framing(FramingError::NotWellFormed))
        ));
    }
}
