//! Hook event validation.
//!
//! The envelope is checked against `schemas/hook_event.schema.json`; the tool
//! input is checked against the `$defs` entry the catalog names for the tool.
//! Tools without a schema entry (including unknown tools) accept any object.

use chrono::{DateTime, Utc};
use jsonschema::Draft;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::classifier::ToolCatalog;
use crate::core::types::EventType;

const HOOK_EVENT_SCHEMA: &str = include_str!("../../schemas/hook_event.schema.json");
const TOOL_INPUT_SCHEMA: &str = include_str!("../../schemas/tool_input.schema.json");

const HOOK_EVENT_SCHEMA_NAME: &str = "hook_event";

/// Host field name accepted in place of `event_type`.
const EVENT_TYPE_ALIAS: &str = "hook_event_name";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("event must be a JSON object")]
    NotAnObject,
    #[error("invalid event field {field}: {message}")]
    InvalidField { field: String, message: String },
    #[error("invalid tool_input for {tool}: {field}: {message}")]
    InvalidToolInput {
        tool: String,
        field: String,
        message: String,
    },
    #[error("embedded schema {name} is unusable: {message}")]
    Schema { name: String, message: String },
}

/// Event that passed envelope and tool-input validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub event_type: EventType,
    pub session_id: String,
    pub tool_name: Option<String>,
    /// Always an object; empty when the event carried none.
    pub tool_input: Value,
    pub tool_response: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Host id of the tool call, shared by its Pre and Post events.
    pub tool_use_id: Option<String>,
    /// SHA-256 over the canonical event; identical events share it.
    pub fingerprint: String,
}

impl ValidatedEvent {
    pub fn tool_name(&self) -> &str {
        self.tool_name.as_deref().unwrap_or_default()
    }

    /// Fingerprint usable for replay detection.
    ///
    /// Only events carrying a call id or a timestamp can be told apart from a
    /// legitimate rerun of the same command, so anonymous events yield `None`.
    pub fn replay_key(&self) -> Option<&str> {
        (self.tool_use_id.is_some() || self.timestamp.is_some()).then_some(self.fingerprint.as_str())
    }
}

/// Validate a raw hook payload.
pub fn validate_event(raw: &Value, catalog: &ToolCatalog) -> Result<ValidatedEvent, SchemaError> {
    let envelope = normalize_envelope(raw)?;
    let envelope_schema = parse_schema(HOOK_EVENT_SCHEMA, HOOK_EVENT_SCHEMA_NAME)?;
    check_against(&envelope, HOOK_EVENT_SCHEMA_NAME, &envelope_schema)
        .map_err(|(field, message)| SchemaError::InvalidField { field, message })?;

    let event_type = envelope
        .get("event_type")
        .and_then(Value::as_str)
        .and_then(EventType::parse)
        .ok_or_else(|| SchemaError::InvalidField {
            field: "event_type".to_string(),
            message: "must be PreToolUse, PostToolUse or Stop".to_string(),
        })?;
    let session_id = string_field(&envelope, "session_id").unwrap_or_default();
    let tool_name = string_field(&envelope, "tool_name");
    let tool_use_id = string_field(&envelope, "tool_use_id");
    let tool_input = envelope
        .get("tool_input")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let tool_response = envelope.get("tool_response").cloned();
    let timestamp = match envelope.get("timestamp").and_then(Value::as_str) {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| SchemaError::InvalidField {
                    field: "timestamp".to_string(),
                    message: format!("not an RFC 3339 timestamp ({err})"),
                })?,
        ),
        None => None,
    };

    if let Some(tool) = tool_name.as_deref() {
        validate_tool_input(tool, &tool_input, catalog)?;
    }

    let fingerprint = fingerprint(&json!({
        "event_type": event_type.label(),
        "session_id": session_id,
        "tool_name": tool_name,
        "tool_input": tool_input,
        "tool_response": tool_response,
        "timestamp": envelope.get("timestamp"),
        "tool_use_id": tool_use_id,
    }));

    Ok(ValidatedEvent {
        event_type,
        session_id,
        tool_name,
        tool_input,
        tool_response,
        timestamp,
        tool_use_id,
        fingerprint,
    })
}

fn normalize_envelope(raw: &Value) -> Result<Value, SchemaError> {
    let Some(object) = raw.as_object() else {
        return Err(SchemaError::NotAnObject);
    };
    let mut object = object.clone();
    if !object.contains_key("event_type") {
        if let Some(alias) = object.get(EVENT_TYPE_ALIAS).cloned() {
            object.insert("event_type".to_string(), alias);
        }
    }
    Ok(Value::Object(object))
}

fn validate_tool_input(tool: &str, input: &Value, catalog: &ToolCatalog) -> Result<(), SchemaError> {
    let invalid = |field: String, message: String| SchemaError::InvalidToolInput {
        tool: tool.to_string(),
        field,
        message,
    };
    if !input.is_object() {
        return Err(invalid("tool_input".to_string(), "must be an object".to_string()));
    }
    let Some(def_name) = catalog.get(tool).and_then(|spec| spec.schema.as_deref()) else {
        return Ok(());
    };
    let defs = parse_schema(TOOL_INPUT_SCHEMA, "tool_input")?;
    let schema = defs
        .get("$defs")
        .and_then(|defs| defs.get(def_name))
        .ok_or_else(|| SchemaError::Schema {
            name: format!("tool_input/$defs/{def_name}"),
            message: "definition missing".to_string(),
        })?;
    check_against(input, def_name, schema).map_err(|(field, message)| {
        let field = if field == "event" {
            "tool_input".to_string()
        } else {
            format!("tool_input/{field}")
        };
        invalid(field, message)
    })
}

fn parse_schema(raw: &str, name: &str) -> Result<Value, SchemaError> {
    serde_json::from_str(raw).map_err(|err| SchemaError::Schema {
        name: name.to_string(),
        message: err.to_string(),
    })
}

/// Validate `instance`; on failure return the first offending field and all messages.
fn check_against(instance: &Value, name: &str, schema: &Value) -> Result<(), (String, String)> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| (name.to_string(), format!("schema failed to compile: {err}")))?;
    let errors: Vec<(String, String)> = compiled
        .iter_errors(instance)
        .map(|err| (err.instance_path().to_string(), err.to_string()))
        .collect();
    let Some((first_path, _)) = errors.first() else {
        return Ok(());
    };
    let field = match first_path.trim_start_matches('/') {
        "" => "event".to_string(),
        path => path.to_string(),
    };
    let messages: Vec<String> = errors.into_iter().map(|(_, message)| message).collect();
    Err((field, messages.join("; ")))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn fingerprint(canonical: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
