//! Minimal HTTP/1.1 request parsing and response encoding.

use hap_core::error::{ParseError, Result};
use std::collections::HashMap;

/// Header block larger than this is refused.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Body larger than this is refused.
const MAX_BODY_LEN: usize = 64 * 1024;

pub const PAIRING_CONTENT_TYPE: &str = "application/pairing+tlv8";

/// Parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Parse one request from the front of `data`.
    ///
    /// Returns the request and the number of bytes it occupied, or `None`
    /// while the request is still incomplete.
    ///
    /// ```text
    /// POST /pair-verify HTTP/1.1\r\n
    /// Content-Type: application/pairing+tlv8\r\n
    /// Content-Length: N\r\n
    /// \r\n
    /// [body]
    /// ```
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            if data.len() > MAX_HEADER_LEN {
                return Err(ParseError::InvalidValue("request headers too large".to_string()).into());
            }
            return Ok(None);
        };

        let header_str = std::str::from_utf8(&data[..header_end])
            .map_err(|_| ParseError::InvalidValue("invalid UTF-8 in headers".to_string()))?;
        let mut lines = header_str.lines();

        let request_line = lines.next().ok_or(ParseError::MissingField("request line"))?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidValue(format!(
                "invalid request line: {}",
                request_line
            ))
            .into());
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ParseError::InvalidValue(format!("unsupported version: {}", version)).into());
        }

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let content_length = match header_value(&headers, "Content-Length") {
            Some(value) => value.parse::<usize>().map_err(|_| {
                ParseError::InvalidValue(format!("invalid Content-Length: {}", value))
            })?,
            None => 0,
        };
        if content_length > MAX_BODY_LEN {
            return Err(ParseError::InvalidLength {
                field: "Content-Length",
                expected: MAX_BODY_LEN,
                actual: content_length,
            }
            .into());
        }

        let body_start = header_end + 4;
        let total = body_start + content_length;
        if data.len() < total {
            return Ok(None);
        }

        Ok(Some((
            Self {
                method: method.to_string(),
                path: path.to_string(),
                headers,
                body: data[body_start..total].to_vec(),
            },
            total,
        )))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// HTTP response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }

    /// `200 OK` carrying a TLV8 body.
    pub fn pairing(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(PAIRING_CONTENT_TYPE),
            body,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        470 => "Connection Authorization Required",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
