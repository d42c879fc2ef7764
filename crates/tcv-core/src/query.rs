//! # Query Descriptor
//!
//! An immutable set of statement filters, fanned out unchanged to every
//! source of a search. Each source serializes it for its own protocol
//! dialect: 0.9 endpoints receive agents exactly as given, later revisions
//! receive agents up-converted from the array-wrapped legacy encoding.
//!
//! Serialization walks a fixed field table, so the produced query string is
//! deterministic and does not depend on map iteration order.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Dialect, ProtocolVersion};

/// Page size requested from each source unless configured otherwise.
pub const DEFAULT_LIMIT: u32 = 25;

/// Characters `encodeURIComponent` leaves alone; LRSs in the wild expect
/// exactly this escaping.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Statement search filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub verb: Option<String>,
    pub object: Option<Value>,
    pub registration: Option<String>,
    pub context: bool,
    pub actor: Option<Value>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: u32,
    pub authoritative: bool,
    pub sparse: bool,
    pub instructor: Option<Value>,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            verb: None,
            object: None,
            registration: None,
            context: false,
            actor: None,
            since: None,
            until: None,
            limit: DEFAULT_LIMIT,
            authoritative: true,
            sparse: false,
            instructor: None,
        }
    }
}

type FieldReader = fn(&QueryDescriptor) -> Option<Value>;

/// Serialization order and omission rule of every field.
///
/// Nullable filters read as `None` when unset and are left out of the query
/// string. `context`, `limit`, `authoritative` and `sparse` always read as
/// `Some` because LRS defaults for them differ between protocol revisions.
const FIELDS: [(&str, FieldReader); 11] = [
    ("verb", |q| q.verb.clone().map(Value::String)),
    ("object", |q| q.object.clone()),
    ("registration", |q| q.registration.clone().map(Value::String)),
    ("context", |q| Some(Value::Bool(q.context))),
    ("actor", |q| q.actor.clone()),
    ("since", |q| q.since.clone().map(Value::String)),
    ("until", |q| q.until.clone().map(Value::String)),
    ("limit", |q| Some(Value::from(q.limit))),
    ("authoritative", |q| Some(Value::Bool(q.authoritative))),
    ("sparse", |q| Some(Value::Bool(q.sparse))),
    ("instructor", |q| q.instructor.clone()),
];

impl QueryDescriptor {
    /// Copy of this descriptor with agents rewritten for `version`.
    pub fn converted(&self, version: ProtocolVersion) -> QueryDescriptor {
        match version.dialect() {
            Dialect::Legacy => self.clone(),
            Dialect::Modern => QueryDescriptor {
                actor: self.actor.as_ref().and_then(up_convert_agent),
                instructor: self.instructor.as_ref().and_then(up_convert_agent),
                ..self.clone()
            },
        }
    }

    /// Present fields in table order, values not yet URL-encoded.
    ///
    /// Strings are taken verbatim; objects and arrays are JSON-encoded.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        FIELDS
            .iter()
            .filter_map(|(key, read)| {
                read(self)
                    .filter(|v| !v.is_null())
                    .map(|v| (*key, value_text(&v)))
            })
            .collect()
    }

    /// `key=value&...` for the given protocol version.
    pub fn to_query_string(&self, version: ProtocolVersion) -> String {
        self.converted(version)
            .pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(&v, URI_COMPONENT)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Full statements URL for one endpoint. `endpoint` is expected to end
    /// in `/`.
    pub fn query_url(&self, endpoint: &str, version: ProtocolVersion) -> String {
        format!("{}statements?{}", endpoint, self.to_query_string(version))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrite a 0.9 agent (`{"mbox": ["mailto:.."], "account": [{..}]}`) into
/// the flattened shape. Already-flat identifiers pass through; an agent left
/// with no identifier at all is dropped.
pub fn up_convert_agent(agent: &Value) -> Option<Value> {
    let Some(fields) = agent.as_object() else {
        return Some(agent.clone());
    };

    let mut converted = Map::new();

    match fields.get("mbox") {
        Some(Value::Array(boxes)) => {
            if let Some(first) = boxes.first() {
                converted.insert("mbox".into(), first.clone());
            }
        }
        Some(Value::Null) | None => {}
        Some(flat) => {
            converted.insert("mbox".into(), flat.clone());
        }
    }

    match fields.get("account") {
        Some(Value::Array(accounts)) => {
            if let Some(first) = accounts.first() {
                let mut account = Map::new();
                if let Some(home) = first.get("accountServiceHomePage") {
                    account.insert("homePage".into(), home.clone());
                }
                if let Some(name) = first.get("accountName") {
                    account.insert("name".into(), name.clone());
                }
                converted.insert("account".into(), Value::Object(account));
            }
        }
        Some(Value::Null) | None => {}
        Some(flat) => {
            converted.insert("account".into(), flat.clone());
        }
    }

    for key in ["mbox_sha1sum", "openid"] {
        if let Some(v) = fields.get(key).filter(|v| !v.is_null()) {
            converted.insert(key.into(), v.clone());
        }
    }

    if converted.is_empty() {
        None
    } else {
        Some(Value::Object(converted))
    }
}
