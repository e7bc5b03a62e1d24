//! Wire-level message envelope.
//!
//! Per the design notes, dynamic `params`/`result` payloads are modeled as an
//! explicit sum type rather than threaded through as untyped strings or a
//! bare `serde_json::Value` re-export — callers that want a typed view parse
//! `Value::Map` fields themselves via `serde_json` on the contained value,
//! but every subsystem boundary in this crate speaks `Value`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::method::Method;
use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(field))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(l) => serde_json::Value::Array(l.into_iter().map(Into::into).collect()),
            Value::Map(m) => {
                serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// `{code, message, data?}` per §7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u32,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(e: &GatewayError) -> Self {
        ErrorEnvelope {
            code: e.code(),
            kind: e.kind().to_string(),
            message: e.to_string(),
            data: None,
        }
    }
}

impl ErrorEnvelope {
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// `{id, type, result?, error?}` — the standard response envelope (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub method: Option<Method>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Request,
    Response,
    Notification,
    Error,
    Ping,
    Pong,
    Close,
}

impl Envelope {
    pub fn request(id: u64, method: Method, params: Value) -> Self {
        Envelope {
            id,
            kind: EnvelopeKind::Request,
            method: Some(method),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: u64, result: Value) -> Self {
        Envelope {
            id,
            kind: EnvelopeKind::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn notification(method: Method, params: Value) -> Self {
        Envelope {
            id: 0,
            kind: EnvelopeKind::Notification,
            method: Some(method),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn error(id: u64, error: &GatewayError) -> Self {
        Envelope {
            id,
            kind: EnvelopeKind::Error,
            method: None,
            params: None,
            result: None,
            error: Some(error.into()),
        }
    }
}

// `Method` needs to round-trip through JSON as its string name, not as the
// derived enum tag, so the textual framing mode matches the binary mode's
// logical fields (§4.1).
impl Serialize for Method {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Method::from_name(&s).map_err(serde::de::Error::custom)
    }
}
