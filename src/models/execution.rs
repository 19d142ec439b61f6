//! Execution-related data models.
//!
//! This module defines types for SQL execution requests and results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Safety gate for an execution call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Only statements classified as read-only may run.
    #[default]
    ReadOnly,
    /// Any statement may run.
    Write,
}

impl ExecutionMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A parameter value for parameterized queries.
///
/// Scalars use their plain JSON form. Bytes are written as `{"base64": "..."}`
/// so a string that happens to be valid base64 never reads back as bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data, `{"base64": "..."}` in JSON
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Binary data as a single-key `{"base64": "..."}` object.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Encoded {
        base64: String,
    }

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Encoded {
            base64: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Encoded::deserialize(deserializer)?;
        STANDARD
            .decode(&encoded.base64)
            .map_err(serde::de::Error::custom)
    }
}

/// A named parameter, bound positionally in the order of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParameter {
    pub name: String,
    pub value: QueryParam,
}

impl BoundParameter {
    pub fn new(name: impl Into<String>, value: QueryParam) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub sql: String,
    /// Natural-language request that produced `sql`; recorded in logs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default)]
    pub parameters: Vec<BoundParameter>,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl ExecuteRequest {
    /// Create a read-only request without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            user_query: None,
            parameters: Vec::new(),
            mode: ExecutionMode::ReadOnly,
        }
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach the user request text.
    pub fn with_user_query(mut self, user_query: impl Into<String>) -> Self {
        self.user_query = Some(user_query.into());
        self
    }

    /// Add a parameter to this request.
    pub fn with_param(mut self, name: impl Into<String>, value: QueryParam) -> Self {
        self.parameters.push(BoundParameter::new(name, value));
        self
    }

    /// Parameter values in binding order.
    pub fn param_values(&self) -> Vec<QueryParam> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }
}

/// Outcome of an execution call. Also attached to `DbError::Execution` as the partial result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<JsonValue>>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// `None` means the call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub parameters: Vec<BoundParameter>,
    /// Set when the row limit cut the result
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    /// Start a result for a request, carrying its bound parameters.
    pub fn for_request(request: &ExecuteRequest) -> Self {
        Self {
            parameters: request.parameters.clone(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.error_message.is_none()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_untagged() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "text"]"#).unwrap();
        assert!(params[0].is_null());
        assert_eq!(params[1], QueryParam::Bool(true));
        assert_eq!(params[2], QueryParam::Int(42));
        assert_eq!(params[3], QueryParam::Float(1.5));
        assert_eq!(params[4].type_name(), "string");
    }

    #[test]
    fn test_bound_parameters_survive_json() {
        let params = vec![
            BoundParameter::new("blob", QueryParam::Bytes(vec![0x00, 0x01])),
            // Valid base64 text must stay text
            BoundParameter::new("code", QueryParam::String("AAE=".into())),
            BoundParameter::new("ratio", QueryParam::Float(2.0)),
            BoundParameter::new("count", QueryParam::Int(2)),
        ];
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains(r#""value":{"base64":"AAE="}"#));

        let back: Vec<BoundParameter> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        assert_eq!(back[0].value.type_name(), "bytes");
        assert_eq!(back[1].value.type_name(), "string");
    }

    #[test]
    fn test_request_defaults_to_read_only() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"sql":"SELECT 1"}"#).unwrap();
        assert_eq!(req.mode, ExecutionMode::ReadOnly);
        assert!(req.parameters.is_empty());
    }

    #[test]
    fn test_result_carries_request_parameters() {
        let req = ExecuteRequest::new("SELECT ?")
            .with_param("id", QueryParam::Int(7))
            .with_mode(ExecutionMode::Write);
        let result = ExecutionResult::for_request(&req);
        assert!(result.success());
        assert_eq!(result.parameters[0].name, "id");
        assert_eq!(req.param_values(), vec![QueryParam::Int(7)]);
    }
}
