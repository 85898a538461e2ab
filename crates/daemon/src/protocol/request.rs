// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Strict JSON-RPC 2.0 request parsing.
//!
//! The version field must equal "2.0", `id` and `method` are required,
//! unknown top-level keys are rejected, and `params` is either an object of
//! named parameters or omitted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::response::{codes, RpcError};

/// Request identifier: integer or string, echoed back in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

/// A parse failure, with the request id when one could be recovered so the
/// error response can still be correlated.
#[derive(Debug)]
pub struct RequestParseError {
    pub id: Option<RequestId>,
    pub error: RpcError,
}

impl RequestParseError {
    fn new(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self { id, error: RpcError { code, message: message.into() } }
    }
}

/// A validated JSON-RPC request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Map<String, Value>>,
}

impl RpcRequest {
    /// Build a request (client side and tests).
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self { id: id.into(), method: method.into(), params: None }
    }

    /// Attach a single named string parameter.
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        let mut params = self.params.take().unwrap_or_default();
        params.insert(key.to_string(), Value::String(value.to_string()));
        self.params = Some(params);
        self
    }

    /// Serialize to the wire JSON shape.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        obj.insert(
            "id".to_string(),
            match &self.id {
                RequestId::Number(n) => Value::from(*n),
                RequestId::Text(s) => Value::String(s.clone()),
            },
        );
        obj.insert("method".to_string(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            obj.insert("params".to_string(), Value::Object(params.clone()));
        }
        Value::Object(obj)
    }

    /// Parse and validate one framed request payload.
    pub fn parse(payload: &[u8]) -> Result<Self, RequestParseError> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| {
            RequestParseError::new(None, codes::PARSE_ERROR, format!("parse error: {e}"))
        })?;

        let Value::Object(obj) = value else {
            return Err(RequestParseError::new(
                None,
                codes::INVALID_REQUEST,
                "request must be a JSON object",
            ));
        };

        // Best-effort id for error correlation, validated properly below.
        let id = parse_id(obj.get("id"));

        for key in obj.keys() {
            if !matches!(key.as_str(), "jsonrpc" | "id" | "method" | "params") {
                return Err(RequestParseError::new(
                    id,
                    codes::INVALID_REQUEST,
                    format!("unexpected key '{key}'"),
                ));
            }
        }

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == "2.0" => {}
            Some(_) => {
                return Err(RequestParseError::new(
                    id,
                    codes::INVALID_REQUEST,
                    "jsonrpc version must be \"2.0\"",
                ))
            }
            None => {
                return Err(RequestParseError::new(
                    id,
                    codes::INVALID_REQUEST,
                    "missing jsonrpc version",
                ))
            }
        }

        let Some(id) = id else {
            return Err(RequestParseError::new(
                None,
                codes::INVALID_REQUEST,
                "missing or invalid id",
            ));
        };

        let method = match obj.get("method") {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            _ => {
                return Err(RequestParseError::new(
                    Some(id),
                    codes::INVALID_REQUEST,
                    "missing or invalid method",
                ))
            }
        };

        let params = match obj.get("params") {
            None => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => {
                return Err(RequestParseError::new(
                    Some(id),
                    codes::INVALID_PARAMS,
                    "params must be an object of named parameters",
                ))
            }
        };

        Ok(Self { id, method, params })
    }

    /// Extract the single named string parameter this method requires.
    pub fn single_str_param(&self, key: &str) -> Result<&str, RpcError> {
        let params = self.params.as_ref().ok_or_else(|| RpcError {
            code: codes::INVALID_PARAMS,
            message: format!("missing required parameter '{key}'"),
        })?;
        if let Some(extra) = params.keys().find(|k| k.as_str() != key) {
            return Err(RpcError {
                code: codes::INVALID_PARAMS,
                message: format!("unexpected parameter '{extra}'"),
            });
        }
        match params.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(RpcError {
                code: codes::INVALID_PARAMS,
                message: format!("parameter '{key}' must be a string"),
            }),
            None => Err(RpcError {
                code: codes::INVALID_PARAMS,
                message: format!("missing required parameter '{key}'"),
            }),
        }
    }

    /// Assert this method takes no parameters.
    pub fn no_params(&self) -> Result<(), RpcError> {
        match &self.params {
            None => Ok(()),
            Some(map) if map.is_empty() => Ok(()),
            Some(_) => Err(RpcError {
                code: codes::INVALID_PARAMS,
                message: "method takes no parameters".to_string(),
            }),
        }
    }
}

fn parse_id(value: Option<&Value>) -> Option<RequestId> {
    match value {
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number),
        Some(Value::String(s)) => Some(RequestId::Text(s.clone())),
        _ => None,
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
