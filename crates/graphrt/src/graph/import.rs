//! Options controlling how serialized graph definitions are decoded.

use serde::{Deserialize, Serialize};

use super::def::{GraphDef, GraphDefError};

/// Encoding of a serialized graph definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    /// JSON when the first non-whitespace byte is `{`, bincode otherwise.
    #[default]
    Auto,
    Json,
    Bincode,
}

impl GraphFormat {
    pub fn detect(bytes: &[u8]) -> GraphFormat {
        match bytes.iter().find(|byte| !byte.is_ascii_whitespace()) {
            Some(b'{') => GraphFormat::Json,
            _ => GraphFormat::Bincode,
        }
    }

    pub(crate) fn decode(self, bytes: &[u8]) -> Result<GraphDef, GraphDefError> {
        match self {
            GraphFormat::Auto => GraphFormat::detect(bytes).decode(bytes),
            GraphFormat::Json => GraphDef::from_json_slice(bytes),
            GraphFormat::Bincode => GraphDef::from_bincode_slice(bytes),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub format: GraphFormat,
    /// Namespace prepended to every node name as `<prefix>/<name>`.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl ImportOptions {
    pub fn with_format(mut self, format: GraphFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub(crate) fn qualify(&self, name: &str) -> String {
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
            _ => name.to_string(),
        }
    }
}
