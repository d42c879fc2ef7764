//! # Statement rendering
//!
//! Human-readable one-line summaries ("Ann completed 'Quiz 1' with score
//! 80%"). Actor, verb and object are read according to the dialect the
//! statement was written in.
//!
//! Rendering is the boundary where malformed statements surface. A statement
//! that cannot be summarized degrades to its identifier; it never stops the
//! rest of the feed from rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Dialect, Statement};

/// Why a statement could not be summarized.
#[derive(Error, Debug, PartialEq)]
pub enum RenderError {
    #[error("statement has no {0}")]
    Missing(&'static str),
}

/// Readable pieces of one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementSummary {
    pub actor: String,
    pub verb: String,
    pub target: String,
    pub answer: Option<String>,
    pub score: Option<String>,
}

impl StatementSummary {
    pub fn line(&self) -> String {
        let mut line = format!("{} {} '{}'", self.actor, self.verb, self.target);
        match &self.answer {
            Some(answer) => {
                line.push_str(" with response '");
                line.push_str(answer);
                line.push('\'');
            }
            None => line.push('.'),
        }
        if let Some(score) = &self.score {
            line.push_str(" with score ");
            line.push_str(score);
        }
        line
    }
}

/// Summarize a statement, or explain which part is missing.
pub fn summarize(stmt: &Statement) -> Result<StatementSummary, RenderError> {
    let dialect = stmt.dialect();
    let object = stmt.object.as_ref().ok_or(RenderError::Missing("object"))?;

    let mut verb = verb_text(stmt, dialect)?;
    let target = target_text(object, dialect)?;
    let mut answer = None;

    let activity_type = object
        .pointer("/definition/type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if activity_type == "question" || activity_type.contains("interaction") {
        if let Some(result) = &stmt.result {
            if let Some(success) = result.get("success").and_then(Value::as_bool) {
                let prefix = if success { "correctly " } else { "incorrectly " };
                verb = format!("{}{}", prefix, verb);
            }
            if let Some(response) = response_text(stmt) {
                answer = Some(truncate(&response, 30));
            }
        }
    }

    Ok(StatementSummary {
        actor: stmt
            .actor
            .as_ref()
            .map(|a| agent_name(a, dialect))
            .unwrap_or_default(),
        verb,
        target,
        answer,
        score: score_text(stmt),
    })
}

/// Summary line, falling back to the identifier for malformed statements.
pub fn render_line(stmt: &Statement) -> String {
    match summarize(stmt) {
        Ok(summary) => summary.line(),
        Err(e) => {
            tracing::warn!(
                "Error occurred while trying to display statement with id {}: {}",
                stmt.id,
                e
            );
            format!("statement {}", stmt.id)
        }
    }
}

// =============================================================================
// Agents
// =============================================================================

fn agent_name(agent: &Value, dialect: Dialect) -> String {
    let name = match dialect {
        Dialect::Legacy => legacy_agent_name(agent),
        Dialect::Modern => modern_agent_name(agent),
    };
    name.unwrap_or_else(|| truncate(&agent.to_string(), 20))
}

fn legacy_agent_name(agent: &Value) -> Option<String> {
    let first = |key: &str| agent.get(key).and_then(first_str);

    if let Some(name) = first("name") {
        return Some(name.to_string());
    }
    if let (Some(given), Some(last)) = (first("firstName"), first("lastName")) {
        return Some(format!("{} {}", given, last));
    }
    if let (Some(given), Some(family)) = (first("givenName"), first("familyName")) {
        return Some(format!("{} {}", given, family));
    }
    if let Some(mbox) = first("mbox") {
        return Some(mbox.replace("mailto:", ""));
    }
    agent
        .get("account")
        .and_then(|a| a.as_array()?.first()?.get("accountName")?.as_str())
        .map(str::to_string)
}

fn modern_agent_name(agent: &Value) -> Option<String> {
    if let Some(name) = agent.get("name").and_then(Value::as_str) {
        return Some(name.to_string());
    }
    if let Some(mbox) = agent.get("mbox").and_then(Value::as_str) {
        return Some(mbox.replace("mailto:", ""));
    }
    let account = agent.get("account")?;
    account
        .get("accountName")
        .or_else(|| account.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 0.9 wraps identity values in arrays; tolerate bare strings too.
fn first_str(value: &Value) -> Option<&str> {
    match value {
        Value::Array(items) => items.first()?.as_str(),
        Value::String(s) => Some(s),
        _ => None,
    }
}

// =============================================================================
// Verbs and targets
// =============================================================================

fn verb_text(stmt: &Statement, dialect: Dialect) -> Result<String, RenderError> {
    let verb = stmt.verb.as_ref().ok_or(RenderError::Missing("verb"))?;
    match dialect {
        Dialect::Legacy => {
            let mut text = match verb.as_str() {
                Some("interacted") => "interacted with".to_string(),
                Some(other) => other.to_string(),
                None => return Err(RenderError::Missing("verb")),
            };
            if let Some(custom) = stmt
                .context
                .as_ref()
                .and_then(|c| c.pointer("/extensions/verb"))
                .and_then(Value::as_str)
            {
                text = custom.to_string();
            }
            if stmt.in_progress == Some(true) {
                text.push_str(" (in progress)");
            }
            Ok(text)
        }
        Dialect::Modern => {
            if let Some(display) = verb.get("display").and_then(lang_value) {
                return Ok(display);
            }
            verb.get("id")
                .or_else(|| verb.get("uri"))
                .and_then(Value::as_str)
                .map(|id| truncate(id, 20))
                .ok_or(RenderError::Missing("verb id"))
        }
    }
}

fn target_text(object: &Value, dialect: Dialect) -> Result<String, RenderError> {
    if let Some(kind) = object.get("objectType").and_then(Value::as_str) {
        if kind != "Activity" {
            return Ok(agent_name(object, dialect));
        }
    }

    if let Some(definition) = object.get("definition") {
        if let Some(name) = definition.get("name").and_then(lang_value) {
            return Ok(name);
        }
        if let Some(description) = definition.get("description").and_then(lang_value) {
            return Ok(truncate(&description, 48));
        }
    }

    object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RenderError::Missing("object id"))
}

/// Pick a display string from a language map: `und`, then `en-US`, then
/// whatever comes first.
fn lang_value(map: &Value) -> Option<String> {
    let map = map.as_object()?;
    map.get("und")
        .or_else(|| map.get("en-US"))
        .or_else(|| map.values().next())
        .and_then(Value::as_str)
        .map(str::to_string)
}

// =============================================================================
// Results
// =============================================================================

fn score_text(stmt: &Statement) -> Option<String> {
    let score = stmt.result.as_ref()?.get("score")?;
    if let Some(scaled) = score.get("scaled").and_then(Value::as_f64) {
        return Some(format!("{}%", (scaled * 100.0).round()));
    }
    score.get("raw").map(|raw| match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Response decoded against the interaction's components where possible,
/// e.g. `"a[,]b"` against choices becomes `"Alpha, Beta"`.
pub fn response_text(stmt: &Statement) -> Option<String> {
    let response = stmt.result.as_ref()?.get("response")?.as_str()?;

    let Some(definition) = stmt.object.as_ref().and_then(|o| o.get("definition")) else {
        return Some(response.to_string());
    };
    if definition.get("type").and_then(Value::as_str) != Some("cmi.interaction") {
        return Some(response.to_string());
    }
    let Some(interaction) = definition.get("interactionType").and_then(Value::as_str) else {
        return Some(response.to_string());
    };

    let decoded = match interaction {
        "choice" | "sequencing" => decode_components(definition, "choices", response, false),
        "likert" => decode_components(definition, "scale", response, false),
        "performance" => decode_components(definition, "steps", response, true),
        "matching" => decode_matching(definition, response),
        _ => None,
    };
    Some(decoded.unwrap_or_else(|| response.to_string()))
}

fn component_description(components: &[Value], id: &str) -> Option<String> {
    components
        .iter()
        .find(|c| c.get("id").and_then(Value::as_str) == Some(id))
        .and_then(|c| c.get("description"))
        .and_then(lang_value)
}

fn decode_components(
    definition: &Value,
    component: &str,
    response: &str,
    with_values: bool,
) -> Option<String> {
    let components = definition.get(component)?.as_array()?;
    if components.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    for item in response.split("[,]") {
        let (id, value) = match item.split_once("[.]") {
            Some((id, value)) if with_values => (id, Some(value)),
            _ => (item, None),
        };
        if let Some(description) = component_description(components, id) {
            match value {
                Some(value) => parts.push(format!("{} -> {}", description, value)),
                None => parts.push(description),
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn decode_matching(definition: &Value, response: &str) -> Option<String> {
    let sources = definition.get("source")?.as_array()?;
    let targets = definition.get("target")?.as_array()?;
    if sources.is_empty() || targets.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    for pair in response.split("[,]") {
        let (source_id, target_id) = pair.split_once("[.]").unwrap_or((pair, ""));
        let Some(source) = component_description(sources, source_id) else {
            continue;
        };
        match component_description(targets, target_id) {
            Some(target) => parts.push(format!("{} -> {}", source, target)),
            None => parts.push(source),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

// =============================================================================
// Text helpers
// =============================================================================

/// Shorten to at most `length` characters, marking the cut with `...`.
pub fn truncate(text: &str, length: usize) -> String {
    let count = text.chars().count();
    if count < 4 || count <= length {
        return text.to_string();
    }
    let kept: String = text.chars().take(length.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// "3 days ago" style age of a `stored` timestamp.
pub fn relative_age(stored: &str, now: DateTime<Utc>) -> Option<String> {
    let stored = DateTime::parse_from_rfc3339(stored).ok()?.with_timezone(&Utc);
    let secs = (now - stored).num_seconds();
    if secs < 1 {
        return Some("just now".to_string());
    }

    let (amount, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 30 * 86_400 => (s / 86_400, "day"),
        s if s < 365 * 86_400 => (s / (30 * 86_400), "month"),
        s => (s / (365 * 86_400), "year"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    Some(format!("{} {}{} ago", amount, unit, plural))
}
