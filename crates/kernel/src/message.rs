use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub type MessageId = String;

pub const PROTOCOL_VERSION: &str = "5.3";

pub fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: MessageId,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

/// A decoded Jupyter message, without its wire signature.
#[derive(Debug, Clone, PartialEq)]
pub struct JupyterMessage {
    pub identities: Vec<Bytes>,
    pub header: Header,
    /// Kept untyped because kernels send `{}` when there is no parent.
    pub parent_header: Value,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl JupyterMessage {
    pub fn new(session: &str, msg_type: &str, content: Value) -> Self {
        Self::with_id(new_message_id(), session, msg_type, content)
    }

    pub fn with_id(msg_id: MessageId, session: &str, msg_type: &str, content: Value) -> Self {
        let header = Header {
            msg_id,
            session: session.to_string(),
            username: std::env::var("USER").unwrap_or_else(|_| "username".to_string()),
            date: chrono::Utc::now().to_rfc3339(),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        };

        Self {
            identities: Vec::new(),
            header,
            parent_header: json!({}),
            metadata: json!({}),
            content,
            buffers: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header
            .get("msg_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Code submission whose message id is fixed before it is sent, so callers can
/// record the id before any reply or output for it exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    message_id: MessageId,
    code: String,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            code: code.into(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn into_message(self, session: &str) -> JupyterMessage {
        let content = json!({
            "code": self.code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        });

        JupyterMessage::with_id(self.message_id, session, "execute_request", content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Busy,
    Idle,
    Other(String),
}

impl From<&str> for ExecutionState {
    fn from(state: &str) -> Self {
        match state {
            "busy" => ExecutionState::Busy,
            "idle" => ExecutionState::Idle,
            other => ExecutionState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Stream {
        name: String,
        text: String,
    },
    ExecuteResult {
        execution_count: Option<i64>,
        data: Map<String, Value>,
    },
    DisplayData {
        data: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    Status {
        state: ExecutionState,
    },
    Unclassified {
        msg_type: String,
    },
}

/// An output published by the kernel on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEvent {
    pub parent_id: Option<MessageId>,
    pub kind: EventKind,
}

impl KernelEvent {
    pub fn new(parent_id: Option<&str>, kind: EventKind) -> Self {
        Self {
            parent_id: parent_id.map(String::from),
            kind,
        }
    }

    pub fn from_message(message: &JupyterMessage) -> Self {
        let content = &message.content;

        let kind = match message.msg_type() {
            "stream" => EventKind::Stream {
                name: str_field(content, "name").unwrap_or("stdout").to_string(),
                text: str_field(content, "text").unwrap_or_default().to_string(),
            },
            "execute_result" => EventKind::ExecuteResult {
                execution_count: content.get("execution_count").and_then(Value::as_i64),
                data: data_field(content),
            },
            "display_data" => EventKind::DisplayData {
                data: data_field(content),
            },
            "error" => EventKind::Error {
                ename: str_field(content, "ename").unwrap_or("Error").to_string(),
                evalue: str_field(content, "evalue").unwrap_or_default().to_string(),
                traceback: content
                    .get("traceback")
                    .and_then(Value::as_array)
                    .map(|lines| lines.iter().map(line_text).collect())
                    .unwrap_or_default(),
            },
            "status" => EventKind::Status {
                state: str_field(content, "execution_state")
                    .unwrap_or_default()
                    .into(),
            },
            other => EventKind::Unclassified {
                msg_type: other.to_string(),
            },
        };

        Self::new(message.parent_id(), kind)
    }
}

fn str_field<'a>(content: &'a Value, key: &str) -> Option<&'a str> {
    content.get(key).and_then(Value::as_str)
}

fn data_field(content: &Value) -> Map<String, Value> {
    content
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

// Traceback lines are text on the wire. Anything else a kernel sends is
// rendered as its JSON text so the line keeps its place in the traceback.
fn line_text(line: &Value) -> String {
    match line {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
