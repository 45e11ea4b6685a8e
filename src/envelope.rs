//! Inbound command envelopes.
//!
//! An envelope is the untyped string-to-string bag a push transport hands
//! us. The only key every envelope must carry is `type`; everything else is
//! interpreted by the handler for that type.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// Key holding the command discriminator.
pub const TYPE_KEY: &str = "type";

/// One inbound command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    fields: HashMap<String, String>,
}

impl Envelope {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    /// Build an envelope from a JSON object.
    ///
    /// String values are taken as-is; other scalars are stringified and
    /// `null` entries are dropped, matching how extras are flattened by the
    /// debug trigger.
    pub fn from_json(value: &Value) -> anyhow::Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("envelope must be a JSON object"))?;
        let fields = object
            .iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key.clone(), s.clone())),
                other => Some((key.clone(), other.to_string())),
            })
            .collect();
        Ok(Self { fields })
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Field lookup that treats blank values as absent.
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// The command kind, or `None` when `type` is absent.
    pub fn kind(&self) -> Option<CommandKind> {
        self.get(TYPE_KEY).map(CommandKind::from_type)
    }
}

impl<K, V> FromIterator<(K, V)> for Envelope
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Command discriminator carried in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `x1`: run a shell command and post its stdout.
    ShellRelay,
    /// `x2`: load a page, click an element by text, then scroll.
    PageClickAutomation,
    /// `x3`: perform an HTTP request and post the response body.
    HttpRelay,
    /// `x4`: search, page through results until a target site, then scroll.
    SearchAndScroll,
    Unknown(String),
}

impl CommandKind {
    pub fn from_type(raw: &str) -> Self {
        match raw {
            "x1" => Self::ShellRelay,
            "x2" => Self::PageClickAutomation,
            "x3" => Self::HttpRelay,
            "x4" => Self::SearchAndScroll,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn wire_name(&self) -> &str {
        match self {
            Self::ShellRelay => "x1",
            Self::PageClickAutomation => "x2",
            Self::HttpRelay => "x3",
            Self::SearchAndScroll => "x4",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ShellRelay => "shell-relay",
            Self::PageClickAutomation => "page-click",
            Self::HttpRelay => "http-relay",
            Self::SearchAndScroll => "search-and-scroll",
            Self::Unknown(raw) => return write!(f, "unknown({raw})"),
        };
        write!(f, "{name}({})", self.wire_name())
    }
}
