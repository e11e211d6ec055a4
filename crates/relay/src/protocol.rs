//! Line-delimited JSON protocol spoken with the parent process.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller-chosen request identifier, opaque to the bridge.
pub type RequestId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Execute,
    Interrupt,
    Restart,
    Shutdown,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub code: Option<String>,
}

impl Request {
    /// Parses one inbound line. Blank and malformed lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Busy,
    Idle,
    Restarted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ready {
        language: String,
    },
    Stream {
        id: Option<RequestId>,
        name: String,
        text: String,
    },
    ExecuteResult {
        id: Option<RequestId>,
        execution_count: Option<i64>,
        data: Map<String, Value>,
    },
    DisplayData {
        id: Option<RequestId>,
        data: Map<String, Value>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    Status {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        state: StatusState,
    },
}

impl Response {
    /// Error not tied to any request, such as a failed startup.
    pub fn startup_error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::command_error(None, ename, evalue)
    }

    pub fn command_error(
        id: Option<RequestId>,
        ename: impl Into<String>,
        evalue: impl Into<String>,
    ) -> Self {
        Response::Error {
            id,
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    /// Serialized form including the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Joins multi-part text values (lists of string fragments) into single
/// strings. Values that are already flat are left untouched.
pub fn flatten_mime_bundle(data: Map<String, Value>) -> Map<String, Value> {
    data.into_iter()
        .map(|(mime, value)| match value {
            Value::Array(parts) if parts.iter().all(Value::is_string) => {
                let joined: String = parts.iter().filter_map(Value::as_str).collect();
                (mime, Value::String(joined))
            }
            other => (mime, other),
        })
        .collect()
}
