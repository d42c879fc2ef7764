//! # Search form
//!
//! Raw viewer form input (query-string or CLI flags) and its translation
//! into a [`QueryDescriptor`]. Field names match the viewer's form ids so a
//! browser query string deserializes directly.
//!
//! Agents built from the email/account fields use the 0.9 array-wrapped
//! encoding; each source's dialect up-converts them when serializing.

use serde::de::{Error as _, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TcvError};
use crate::model::ProtocolVersion;
use crate::query::{QueryDescriptor, DEFAULT_LIMIT};

/// Which configured sources a fresh search queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionFilter {
    #[default]
    All,
    Only(ProtocolVersion),
}

impl VersionFilter {
    pub fn admits(&self, version: ProtocolVersion) -> bool {
        match self {
            Self::All => true,
            Self::Only(v) => *v == version,
        }
    }
}

impl FromStr for VersionFilter {
    type Err = TcvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "all" => Ok(Self::All),
            other => other
                .parse::<ProtocolVersion>()
                .map(Self::Only)
                .map_err(|e| TcvError::invalid_search("version", e.to_string())),
        }
    }
}

impl fmt::Display for VersionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(v) => write!(f, "{}", v),
        }
    }
}

/// Viewer search form state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchForm {
    pub actor_json: Option<String>,
    pub actor_email: Option<String>,
    /// `homePage::accountName`
    pub actor_account: Option<String>,
    pub verb: Option<String>,
    pub object_json: Option<String>,
    pub activity_id: Option<String>,
    pub registration: Option<String>,
    #[serde(deserialize_with = "checkbox")]
    pub context: bool,
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(deserialize_with = "checkbox")]
    pub authoritative: bool,
    #[serde(deserialize_with = "checkbox")]
    pub sparse: bool,
    pub instructor_json: Option<String>,
    pub version: Option<String>,
}

/// A form flag: a JSON boolean, or the text a browser checkbox submits.
fn checkbox<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(text) => match text.trim() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" | "" => Ok(false),
            other => Err(D::Error::invalid_value(
                Unexpected::Str(other),
                &"on, off, true, false, 1 or 0",
            )),
        },
    }
}

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            actor_json: None,
            actor_email: None,
            actor_account: None,
            verb: None,
            object_json: None,
            activity_id: None,
            registration: None,
            context: false,
            since: None,
            until: None,
            authoritative: true,
            sparse: false,
            instructor_json: None,
            version: None,
        }
    }
}

impl SearchForm {
    /// Build the descriptor, requesting `limit` statements per source page.
    pub fn to_descriptor(&self, limit: u32) -> Result<QueryDescriptor> {
        Ok(QueryDescriptor {
            verb: non_empty(&self.verb),
            object: self.object()?,
            registration: non_empty(&self.registration),
            context: self.context,
            actor: self.actor()?,
            since: non_empty(&self.since).map(with_time_zone),
            until: non_empty(&self.until).map(with_time_zone),
            limit: if limit == 0 { DEFAULT_LIMIT } else { limit },
            authoritative: self.authoritative,
            sparse: self.sparse,
            instructor: parse_json("instructorJson", &self.instructor_json)?,
        })
    }

    pub fn version_filter(&self) -> Result<VersionFilter> {
        match non_empty(&self.version) {
            Some(v) => v.parse(),
            None => Ok(VersionFilter::All),
        }
    }

    fn actor(&self) -> Result<Option<Value>> {
        if let Some(actor) = parse_json("actorJson", &self.actor_json)? {
            return Ok(Some(actor));
        }

        let mut actor = Map::new();

        if let Some(email) = non_empty(&self.actor_email) {
            let mbox = if email.contains("mailto:") {
                email
            } else {
                format!("mailto:{}", email)
            };
            actor.insert("mbox".into(), json!([mbox]));
        }

        if let Some(account) = non_empty(&self.actor_account) {
            let (home, name) = account.split_once("::").ok_or_else(|| {
                TcvError::invalid_search("actorAccount", "expected 'homePage::accountName'")
            })?;
            actor.insert(
                "account".into(),
                json!([{"accountServiceHomePage": home, "accountName": name}]),
            );
        }

        Ok(if actor.is_empty() {
            None
        } else {
            Some(Value::Object(actor))
        })
    }

    fn object(&self) -> Result<Option<Value>> {
        if let Some(object) = parse_json("objectJson", &self.object_json)? {
            return Ok(Some(object));
        }
        Ok(non_empty(&self.activity_id).map(|id| json!({ "id": id })))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_json(field: &'static str, raw: &Option<String>) -> Result<Option<Value>> {
    match non_empty(raw) {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| TcvError::invalid_search(field, e.to_string())),
        None => Ok(None),
    }
}

/// Dates picked without an offset are taken as UTC.
fn with_time_zone(date: String) -> String {
    if date.contains('+') || date.contains('Z') {
        date
    } else {
        format!("{}Z", date)
    }
}
