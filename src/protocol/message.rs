//! Typed protocol messages and their document form.
//!
//! Every message is a single document whose `type` field names the variant:
//!
//! | type            | fields                                                         |
//! |-----------------|----------------------------------------------------------------|
//! | `open_session`  | `budget: int`                                                  |
//! | `session`       | `session_id: string, budget: int`                              |
//! | `probe`         | `session_id, tensor: f32[], shape: int[], want, probe_id?`     |
//! | `response`      | `label: int, probs?: f32[], gradient?: f32[], queries_remaining` |
//! | `close_session` | `session_id: string`                                           |
//! | `closed`        | `session_id: string`                                           |
//! | `error`         | `kind: string, message: string`                                |

use std::fmt;

use rand::Rng;

use crate::core::document::{self, Document, Value};
use crate::core::tensor::Tensor;
use crate::error::{ProtocolError, Result};

/// Server-assigned session handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Fresh random 128-bit id, hex encoded.
    pub fn generate() -> Self {
        let raw: u128 = rand::rng().random();
        Self(format!("{raw:032x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a probe asks the server to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Want {
    /// Predicted label only
    #[default]
    Label,
    /// Label and full probability vector
    Probs,
    /// Label, probabilities and input gradient
    Gradient,
}

impl Want {
    pub fn as_str(self) -> &'static str {
        match self {
            Want::Label => "label",
            Want::Probs => "probs",
            Want::Gradient => "gradient",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "label" => Ok(Want::Label),
            "probs" => Ok(Want::Probs),
            "gradient" => Ok(Want::Gradient),
            other => Err(ProtocolError::MalformedDocument(format!(
                "unknown output kind '{other}'"
            ))),
        }
    }
}

/// One candidate input submitted for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub tensor: Tensor,
    pub want: Want,
    /// Idempotency key; a redelivered probe with the same key is answered
    /// from the session's replay cache without charging the budget.
    pub probe_id: Option<String>,
}

impl Probe {
    pub fn new(tensor: Tensor, want: Want) -> Self {
        Self {
            tensor,
            want,
            probe_id: None,
        }
    }

    pub fn with_probe_id<S: Into<String>>(mut self, probe_id: S) -> Self {
        self.probe_id = Some(probe_id.into());
        self
    }
}

/// The server's answer to a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub label: i64,
    pub probs: Option<Vec<f32>>,
    pub gradient: Option<Vec<f32>>,
    pub queries_remaining: u64,
}

/// Error carried over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub kind: String,
    pub message: String,
}

impl ErrorReply {
    /// Rebuild the typed error on the receiving side.
    pub fn into_error(self) -> ProtocolError {
        ProtocolError::from_remote(&self.kind, &self.message)
    }
}

impl From<&ProtocolError> for ErrorReply {
    fn from(err: &ProtocolError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpenSession { budget: u64 },
    SessionOpened { session_id: SessionId, budget: u64 },
    Probe { session_id: SessionId, probe: Probe },
    Response(Response),
    CloseSession { session_id: SessionId },
    SessionClosed { session_id: SessionId },
    Error(ErrorReply),
}

impl Message {
    /// Value of the `type` field, also used as the dispatcher opcode.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::OpenSession { .. } => "open_session",
            Message::SessionOpened { .. } => "session",
            Message::Probe { .. } => "probe",
            Message::Response(_) => "response",
            Message::CloseSession { .. } => "close_session",
            Message::SessionClosed { .. } => "closed",
            Message::Error(_) => "error",
        }
    }

    pub fn from_error(err: &ProtocolError) -> Self {
        Message::Error(ErrorReply::from(err))
    }

    pub fn to_document(&self) -> Document {
        let doc = Document::new().with("type", self.type_name());
        match self {
            Message::OpenSession { budget } => doc.with("budget", to_wire_int(*budget)),
            Message::SessionOpened { session_id, budget } => doc
                .with("session_id", session_id.as_str())
                .with("budget", to_wire_int(*budget)),
            Message::Probe { session_id, probe } => {
                let shape: Vec<i64> = probe.tensor.shape().iter().map(|&d| d as i64).collect();
                let mut doc = doc
                    .with("session_id", session_id.as_str())
                    .with("tensor", probe.tensor.data().to_vec())
                    .with("shape", shape)
                    .with("want", probe.want.as_str());
                if let Some(id) = &probe.probe_id {
                    doc.insert("probe_id", id.as_str());
                }
                doc
            }
            Message::Response(r) => {
                let mut doc = doc.with("label", r.label);
                if let Some(probs) = &r.probs {
                    doc.insert("probs", probs.clone());
                }
                if let Some(gradient) = &r.gradient {
                    doc.insert("gradient", gradient.clone());
                }
                doc.with("queries_remaining", to_wire_int(r.queries_remaining))
            }
            Message::CloseSession { session_id } | Message::SessionClosed { session_id } => {
                doc.with("session_id", session_id.as_str())
            }
            Message::Error(e) => doc
                .with("kind", e.kind.as_str())
                .with("message", e.message.as_str()),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let msg = match str_field(doc, "type")? {
            "open_session" => Message::OpenSession {
                budget: uint_field(doc, "budget")?,
            },
            "session" => Message::SessionOpened {
                session_id: SessionId::from(str_field(doc, "session_id")?),
                budget: uint_field(doc, "budget")?,
            },
            "probe" => {
                let data = f32_array_field(doc, "tensor")?
                    .ok_or_else(|| missing("tensor"))?
                    .to_vec();
                let shape = shape_field(doc)?;
                let want = Want::parse(str_field(doc, "want")?)?;
                let probe_id = match doc.get("probe_id") {
                    None => None,
                    Some(v) => Some(
                        v.as_str()
                            .ok_or_else(|| wrong_type("probe_id", "string", v))?
                            .to_string(),
                    ),
                };
                Message::Probe {
                    session_id: SessionId::from(str_field(doc, "session_id")?),
                    probe: Probe {
                        tensor: Tensor::from_raw_parts(shape, data),
                        want,
                        probe_id,
                    },
                }
            }
            "response" => Message::Response(Response {
                label: int_field(doc, "label")?,
                probs: f32_array_field(doc, "probs")?.map(<[f32]>::to_vec),
                gradient: f32_array_field(doc, "gradient")?.map(<[f32]>::to_vec),
                queries_remaining: uint_field(doc, "queries_remaining")?,
            }),
            "close_session" => Message::CloseSession {
                session_id: SessionId::from(str_field(doc, "session_id")?),
            },
            "closed" => Message::SessionClosed {
                session_id: SessionId::from(str_field(doc, "session_id")?),
            },
            "error" => Message::Error(ErrorReply {
                kind: str_field(doc, "kind")?.to_string(),
                message: str_field(doc, "message")?.to_string(),
            }),
            other => {
                return Err(ProtocolError::MalformedDocument(format!(
                    "unknown message type '{other}'"
                )))
            }
        };
        Ok(msg)
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        document::encode(&self.to_document())
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_document(&document::decode(bytes)?)
    }
}

fn to_wire_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn missing(key: &str) -> ProtocolError {
    ProtocolError::MalformedDocument(format!("missing field '{key}'"))
}

fn wrong_type(key: &str, expected: &str, got: &Value) -> ProtocolError {
    ProtocolError::MalformedDocument(format!(
        "field '{key}' should be {expected}, got {}",
        got.type_name()
    ))
}

fn str_field<'a>(doc: &'a Document, key: &str) -> Result<&'a str> {
    let value = doc.get(key).ok_or_else(|| missing(key))?;
    value.as_str().ok_or_else(|| wrong_type(key, "string", value))
}

fn int_field(doc: &Document, key: &str) -> Result<i64> {
    let value = doc.get(key).ok_or_else(|| missing(key))?;
    value.as_i64().ok_or_else(|| wrong_type(key, "integer", value))
}

fn uint_field(doc: &Document, key: &str) -> Result<u64> {
    let raw = int_field(doc, key)?;
    u64::try_from(raw)
        .map_err(|_| ProtocolError::MalformedDocument(format!("field '{key}' is negative: {raw}")))
}

fn f32_array_field<'a>(doc: &'a Document, key: &str) -> Result<Option<&'a [f32]>> {
    match doc.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f32_array()
            .map(Some)
            .ok_or_else(|| wrong_type(key, "f32-array", value)),
    }
}

fn shape_field(doc: &Document) -> Result<Vec<usize>> {
    let value = doc.get("shape").ok_or_else(|| missing("shape"))?;
    let dims = value
        .to_i64_array()
        .ok_or_else(|| wrong_type("shape", "int-array", value))?;
    dims.into_iter()
        .map(|d| {
            usize::try_from(d).map_err(|_| {
                ProtocolError::MalformedDocument(format!("negative shape dimension {d}"))
            })
        })
        .collect()
}
