use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    #[serde(alias = "modify")]
    Update,
}

impl ChangeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file-level change proposed by a generator. Untrusted until it has been
/// through [`crate::sandbox::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeChange {
    pub path: String,
    pub operation: ChangeOperation,
    pub content: String,
}

impl CodeChange {
    pub fn new(
        path: impl Into<String>,
        operation: ChangeOperation,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            operation,
            content: content.into(),
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(path, ChangeOperation::Create, content)
    }
}

/// Generator output shape: content may arrive inline or base64 encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct WireChange {
    pub path: String,
    pub operation: ChangeOperation,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_b64: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChangeDecodeError {
    #[error("invalid base64 content for {path}: {source}")]
    Base64 {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("decoded content for {path} is not utf-8")]
    NotUtf8 { path: String },
}

impl WireChange {
    pub fn decode(self) -> Result<CodeChange, ChangeDecodeError> {
        let content = match self.content_b64.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|source| ChangeDecodeError::Base64 {
                        path: self.path.clone(),
                        source,
                    })?;
                String::from_utf8(bytes).map_err(|_| ChangeDecodeError::NotUtf8 {
                    path: self.path.clone(),
                })?
            }
            _ => self.content,
        };
        Ok(CodeChange {
            path: self.path,
            operation: self.operation,
            content,
        })
    }
}
