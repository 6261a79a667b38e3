//! Caller identity extraction.
//!
//! Object-storage clients present their access key in one of several
//! encodings. The extractor tries them in a fixed order and stops at the first
//! one that yields a well-formed key:
//!
//! 1. `Authorization: <alg> Credential=<key>/<scope>, ...` (SigV4 header)
//! 2. `Authorization: <scheme> <key>:<signature>` (SigV2 header)
//! 3. `?X-Amz-Credential=<key>/<scope>` (SigV4 presigned URL)
//! 4. `?AWSAccessKeyId=<key>` (SigV2 presigned URL)
//! 5. configured custom headers carrying the key verbatim
//!
//! Malformed input at any step falls through to the next one. Extraction only
//! scans strings left to right, so its cost is linear in the input length.

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, InvalidHeaderName, AUTHORIZATION};
use serde::{Serialize, Serializer};
use tracing::trace;

/// Identifier reported when no credential could be found.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Custom headers consulted when no signature-based credential is present.
pub const DEFAULT_CUSTOM_HEADERS: [&str; 2] = ["x-api-key", "x-access-key"];

const V4_CREDENTIAL_MARKER: &str = "Credential=";
const V4_QUERY_PARAM: &str = "X-Amz-Credential";
const V2_QUERY_PARAM: &str = "AWSAccessKeyId";

/// Canonical per-caller key.
///
/// Cheap to clone; hashes and compares like the underlying string so maps
/// keyed by `Identifier` can be queried with a `&str`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Arc<str>);

impl Identifier {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// The identifier used for requests without credentials.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_IDENTIFIER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        &*self.0 == UNKNOWN_IDENTIFIER
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Which extraction rule produced the identifier.
///
/// Diagnostic only; the quota decision never depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthMethod {
    #[serde(rename = "v4_header")]
    V4Header,
    #[serde(rename = "v2_header")]
    V2Header,
    #[serde(rename = "v4_query")]
    V4Query,
    #[serde(rename = "v2_query")]
    V2Query,
    #[serde(rename = "custom_header")]
    CustomHeader,
    #[serde(rename = "none")]
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::V4Header => "v4_header",
            AuthMethod::V2Header => "v2_header",
            AuthMethod::V4Query => "v4_query",
            AuthMethod::V2Query => "v2_query",
            AuthMethod::CustomHeader => "custom_header",
            AuthMethod::None => "none",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of identity extraction for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub identifier: Identifier,
    pub method: AuthMethod,
}

impl Identity {
    fn found(key: &str, method: AuthMethod) -> Self {
        Self {
            identifier: Identifier::from(key),
            method,
        }
    }

    /// The identity of a request that carried no usable credential.
    pub fn unknown() -> Self {
        Self {
            identifier: Identifier::unknown(),
            method: AuthMethod::None,
        }
    }
}

/// Derives caller identities from request headers and query strings.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    custom_headers: Vec<HeaderName>,
}

impl IdentityExtractor {
    /// Create an extractor consulting the given custom headers, in order.
    pub fn new(custom_headers: Vec<HeaderName>) -> Self {
        Self { custom_headers }
    }

    /// Create an extractor from header names given as strings.
    pub fn with_custom_headers<S: AsRef<str>>(names: &[S]) -> Result<Self, InvalidHeaderName> {
        let custom_headers = names
            .iter()
            .map(|name| HeaderName::from_bytes(name.as_ref().trim().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(custom_headers))
    }

    /// The custom headers consulted by the last extraction rule.
    pub fn custom_headers(&self) -> &[HeaderName] {
        &self.custom_headers
    }

    /// Extract the caller identity from a request.
    ///
    /// `query` is the raw query string, with or without the leading `?`.
    pub fn extract(&self, headers: &HeaderMap, query: Option<&str>) -> Identity {
        let identity = self
            .from_authorization(headers)
            .or_else(|| query.and_then(from_query))
            .or_else(|| self.from_custom_headers(headers))
            .unwrap_or_else(Identity::unknown);

        trace!(
            identifier = %identity.identifier,
            auth_method = %identity.method,
            "Extracted caller identity"
        );

        identity
    }

    fn from_authorization(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;

        if let Some(key) = v4_credential_key(value) {
            return Some(Identity::found(key, AuthMethod::V4Header));
        }

        v2_signature_key(value).map(|key| Identity::found(key, AuthMethod::V2Header))
    }

    fn from_custom_headers(&self, headers: &HeaderMap) -> Option<Identity> {
        self.custom_headers.iter().find_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            checked_key(value.trim()).map(|key| Identity::found(key, AuthMethod::CustomHeader))
        })
    }
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new(
            DEFAULT_CUSTOM_HEADERS
                .into_iter()
                .map(HeaderName::from_static)
                .collect(),
        )
    }
}

/// `... Credential=<key>/<scope> ...` → `<key>`.
fn v4_credential_key(value: &str) -> Option<&str> {
    let start = value.find(V4_CREDENTIAL_MARKER)? + V4_CREDENTIAL_MARKER.len();
    scoped_key(&value[start..])
}

/// `<scheme> <key>:<signature>` → `<key>`.
fn v2_signature_key(value: &str) -> Option<&str> {
    let (scheme, rest) = value.trim().split_once(' ')?;
    if scheme.is_empty() {
        return None;
    }
    let (key, _signature) = rest.trim_start().split_once(':')?;
    checked_key(key)
}

/// `<key>/<scope>` → `<key>`; a credential without a scope is malformed.
fn scoped_key(value: &str) -> Option<&str> {
    let (key, _scope) = value.split_once('/')?;
    checked_key(key)
}

fn checked_key(key: &str) -> Option<&str> {
    let malformed = key.is_empty()
        || key
            .chars()
            .any(|c| c.is_whitespace() || c == ',' || c == '=');
    (!malformed).then_some(key)
}

fn from_query(query: &str) -> Option<Identity> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut v4_value = None;
    let mut v2_value = None;

    for pair in query.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = percent_decode(name);
        if v4_value.is_none() && name == V4_QUERY_PARAM {
            v4_value = Some(percent_decode(value));
        } else if v2_value.is_none() && name == V2_QUERY_PARAM {
            v2_value = Some(percent_decode(value));
        }
    }

    if let Some(key) = v4_value.as_deref().and_then(scoped_key) {
        return Some(Identity::found(key, AuthMethod::V4Query));
    }

    v2_value
        .as_deref()
        .and_then(checked_key)
        .map(|key| Identity::found(key, AuthMethod::V2Query))
}

/// Decode `%XX` escapes and `+` in a query component.
///
/// Invalid escapes are kept literally; invalid UTF-8 is replaced.
fn percent_decode(input: &str) -> Cow<'_, str> {
    if !input.contains(['%', '+']) {
        return Cow::Borrowed(input);
    }

    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        decoded.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }

    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
