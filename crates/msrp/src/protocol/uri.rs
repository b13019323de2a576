use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use http::Uri;

use crate::protocol::ParseError;

/// An `msrp://` or `msrps://` URI as it appears in To-Path and From-Path.
///
/// The URI is validated with [`http::Uri`], but equality and hashing use the
/// exact text, which is how paths are matched against session URIs.
#[derive(Debug, Clone)]
pub struct MsrpUri {
    raw: String,
    inner: Uri,
}

impl MsrpUri {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let inner = Uri::from_str(s).map_err(|e| ParseError::invalid_header(format!("invalid uri {s:?}: {e}")))?;
        match inner.scheme_str() {
            Some("msrp" | "msrps") => {}
            _ => return Err(ParseError::invalid_header(format!("uri {s:?} is not an msrp uri"))),
        }
        if inner.authority().is_none() {
            return Err(ParseError::invalid_header(format!("uri {s:?} has no authority")));
        }
        Ok(Self { raw: s.to_string(), inner })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> Option<&str> {
        self.inner.host()
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.port_u16()
    }

    /// The session id part of the path, without the leading `/` and the `;transport` suffix.
    pub fn session_id(&self) -> &str {
        let path = self.inner.path().trim_start_matches('/');
        path.split(';').next().unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.inner.scheme_str() == Some("msrps")
    }
}

impl FromStr for MsrpUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for MsrpUri {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for MsrpUri {}

impl Hash for MsrpUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for MsrpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses a space separated path of one or more URIs.
pub fn parse_path(value: &str) -> Result<Vec<MsrpUri>, ParseError> {
    let path = value.split(' ').filter(|s| !s.is_empty()).map(MsrpUri::parse).collect::<Result<Vec<_>, _>>()?;
    if path.is_empty() {
        return Err(ParseError::invalid_header("empty path"));
    }
    Ok(path)
}

pub(crate) fn format_path(path: &[MsrpUri]) -> String {
    path.iter().map(MsrpUri::as_str).collect::<Vec<_>>().join(" ")
}
