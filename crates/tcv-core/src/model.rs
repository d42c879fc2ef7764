//! # Statement model
//!
//! The records that flow from a learning record store (LRS) to the viewer.
//!
//! A [`Statement`] keeps the handful of fields the viewer reasons about as
//! named members and everything else verbatim. Actor, verb and object change
//! shape between protocol dialects, so they stay untyped JSON until the
//! rendering boundary decides how to read them.
//!
//! # Ordering Key
//!
//! Statements are ordered by `stored` only: the server-assigned ISO-8601
//! timestamp. For that format byte-wise string comparison equals
//! chronological comparison, so the key is compared as a plain string and is
//! never parsed.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::TcvError;

// =============================================================================
// Protocol versions
// =============================================================================

/// Protocol revision spoken by one LRS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V0_9,
    V0_95,
    V1_0_0,
}

/// Wire shape family. 0.9 wraps identity values in arrays and uses bare verb
/// strings; later revisions flatten both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Legacy,
    Modern,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 3] = [Self::V0_9, Self::V0_95, Self::V1_0_0];

    /// Value of the `X-Experience-API-Version` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0_9 => "0.9",
            Self::V0_95 => "0.95",
            Self::V1_0_0 => "1.0.0",
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::V0_9 => Dialect::Legacy,
            Self::V0_95 | Self::V1_0_0 => Dialect::Modern,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = TcvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0.9" => Ok(Self::V0_9),
            "0.95" => Ok(Self::V0_95),
            "1.0" | "1.0.0" => Ok(Self::V1_0_0),
            other => Err(TcvError::config(format!(
                "unknown protocol version '{}' (expected 0.9, 0.95 or 1.0.0)",
                other
            ))),
        }
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Statement
// =============================================================================

/// One recorded experience event as returned by an LRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Server-assigned storage time; the sole ordering key.
    #[serde(default)]
    pub stored: String,

    /// 0.9 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,

    /// Every field the viewer does not name, kept for raw display.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statement {
    /// Minimal statement with only identity and ordering key set.
    pub fn new(id: impl Into<String>, stored: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor: None,
            verb: None,
            object: None,
            result: None,
            context: None,
            timestamp: None,
            stored: stored.into(),
            in_progress: None,
            extra: Map::new(),
        }
    }

    /// Compare two statements by storage time.
    #[inline]
    pub fn cmp_stored(&self, other: &Self) -> Ordering {
        self.stored.as_str().cmp(other.stored.as_str())
    }

    /// Shape family this statement was written in: a bare verb string
    /// marks a 0.9 statement.
    pub fn dialect(&self) -> Dialect {
        match self.verb {
            Some(Value::String(_)) => Dialect::Legacy,
            _ => Dialect::Modern,
        }
    }
}

// =============================================================================
// Pages and continuation
// =============================================================================

/// Opaque pagination handle (`more` link) returned by a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a statement query, newest `stored` first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementPage {
    #[serde(default)]
    pub statements: Vec<Statement>,

    /// Absent, `null` and `""` all mean there is nothing further.
    #[serde(default, deserialize_with = "deserialize_more")]
    pub more: Option<ContinuationToken>,
}

impl StatementPage {
    pub fn new(statements: Vec<Statement>, more: Option<ContinuationToken>) -> Self {
        Self { statements, more }
    }

    /// The last page of a result set.
    pub fn last(statements: Vec<Statement>) -> Self {
        Self::new(statements, None)
    }
}

fn deserialize_more<'de, D>(deserializer: D) -> Result<Option<ContinuationToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(ContinuationToken::new))
}

// =============================================================================
// Source identity
// =============================================================================

/// Identity of one (endpoint, credential, version) triple.
///
/// The credential only enters as a short SHA-256 fingerprint, so ids can be
/// logged and shown to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId {
    endpoint: String,
    version: ProtocolVersion,
    credential: String,
}

impl SourceId {
    pub fn new(endpoint: &str, credential: Option<&str>, version: ProtocolVersion) -> Self {
        let credential = match credential {
            Some(secret) => fingerprint(secret),
            None => "anonymous".to_string(),
        };
        Self {
            endpoint: endpoint.to_string(),
            version,
            credential,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.endpoint, self.version, self.credential)
    }
}

fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
