//! Initial request parsing and destination discovery.
//!
//! Only the request line is interpreted. Everything else in the header
//! block is forwarded untouched (plain HTTP) or dropped (CONNECT).

use std::fmt;
use std::io::{self, BufRead};
use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;
use url::{Host, Url};

/// Response written to the client once a CONNECT tunnel's host is reachable.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Reasons a client connection is rejected before bridging starts.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request line '{0}'")]
    MalformedRequestLine(String),

    #[error("request header does not fit in {0} bytes")]
    HeaderTooLarge(usize),

    #[error("invalid destination '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("cannot resolve '{destination}'")]
    Unresolvable {
        destination: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("cannot connect to '{destination}'")]
    Connect {
        destination: String,
        #[source]
        source: io::Error,
    },
}

impl RequestError {
    /// Short label used as a metrics dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::MalformedRequestLine(_) => "malformed_request_line",
            RequestError::HeaderTooLarge(_) => "header_too_large",
            RequestError::InvalidUri { .. } => "invalid_uri",
            RequestError::Unresolvable { .. } => "unresolvable",
            RequestError::Connect { .. } => "connect_setup",
        }
    }

    /// True when the client sent something unusable; false when the
    /// destination could not be reached.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, RequestError::Unresolvable { .. } | RequestError::Connect { .. })
    }
}

/// A complete header block found at the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// First line, without its line terminator.
    pub request_line: String,
    /// Bytes occupied by the header block, blank line included.
    pub len: usize,
}

/// Look for a header block terminated by an empty line.
///
/// Lines may end in `\n` or `\r\n`. Returns `None` until the blank line
/// has arrived.
pub fn find_header<R: BufRead>(mut reader: R) -> Option<RequestHead> {
    let mut request_line = None;
    let mut len = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).ok()?;
        if n == 0 || line.last() != Some(&b'\n') {
            return None;
        }
        len += n;

        let content = trim_line_end(&line);
        if request_line.is_none() {
            request_line = Some(String::from_utf8_lossy(content).into_owned());
        }
        if content.is_empty() {
            return request_line.map(|request_line| RequestHead { request_line, len });
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `METHOD URI VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl RequestLine {
    /// Split on whitespace; exactly three tokens are required.
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(uri), Some(version), None) => Ok(Self {
                method: method.to_string(),
                uri: uri.to_string(),
                version: version.to_string(),
            }),
            _ => Err(RequestError::MalformedRequestLine(line.to_string())),
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Host and port the request should be forwarded to.
    ///
    /// CONNECT targets usually arrive as bare `host:port`; they are read as
    /// `https://host:port`. Missing ports default per scheme.
    pub fn destination(&self) -> Result<Destination, RequestError> {
        let uri = if self.is_connect() && !self.uri.contains("://") {
            format!("https://{}", self.uri)
        } else {
            self.uri.clone()
        };

        let invalid = |reason: String| RequestError::InvalidUri {
            uri: uri.clone(),
            reason,
        };

        let url = Url::parse(&uri).map_err(|e| invalid(e.to_string()))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(invalid("missing host".into())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid(format!("no default port for scheme '{}'", url.scheme())))?;

        Ok(Destination { host, port })
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// Where an outbound connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    /// Resolve to the first socket address. May block on DNS.
    pub fn resolve(&self) -> Result<SocketAddr, RequestError> {
        let unresolvable = |source| RequestError::Unresolvable {
            destination: self.to_string(),
            source,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| unresolvable(Some(e)))?
            .next()
            .ok_or_else(|| unresolvable(None))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
