use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub name: String,
    pub version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of running text recognition on one page bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Text(String),
    /// The recognizer ran but could not read the page (timeout, crash, bad image).
    Unreadable(String),
}
