//! LSP payload shapes for the hover-only capability subset.
//!
//! Field names follow the LSP wire format (camelCase) via serde renames.
//! Every capability level defaults so a sparse `initialize` payload from a
//! permissive client still deserializes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hover content format declared by the client and selected by the server.
///
/// The LSP wire values are `"plaintext"` and `"markdown"`. Anything else a
/// client declares is preserved in [`MarkupKind::Unrecognized`] so handlers
/// can apply an explicit fallback instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupKind {
    PlainText,
    Markdown,
    Unrecognized(String),
}

impl MarkupKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PlainText => "plaintext",
            Self::Markdown => "markdown",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl Serialize for MarkupKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MarkupKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "plaintext" => Self::PlainText,
            "markdown" => Self::Markdown,
            _ => Self::Unrecognized(raw),
        })
    }
}

/// `window/showMessage` severity. Serialized as the LSP numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
    Log = 4,
}

impl MessageType {
    /// Convert from the LSP numeric code (1=Error, 2=Warning, 3=Info, 4=Log).
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Info),
            4 => Some(Self::Log),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> u64 {
        self as u64
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        Self::from_lsp(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown MessageType code {raw}")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "processId", default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

impl InitializeParams {
    /// Build the params an editor-side client sends: our process id plus the
    /// hover content formats it can render, in preference order.
    #[must_use]
    pub fn with_hover_formats(formats: Vec<MarkupKind>) -> Self {
        Self {
            process_id: Some(std::process::id()),
            capabilities: ClientCapabilities {
                text_document: TextDocumentClientCapabilities {
                    hover: HoverClientCapabilities {
                        content_format: formats,
                    },
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(rename = "textDocument", default)]
    pub text_document: TextDocumentClientCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextDocumentClientCapabilities {
    #[serde(default)]
    pub hover: HoverClientCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoverClientCapabilities {
    /// Acceptable hover content formats, most preferred first.
    #[serde(rename = "contentFormat", default)]
    pub content_format: Vec<MarkupKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(rename = "hoverProvider", default)]
    pub hover_provider: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Where a hover occurred: document plus zero-indexed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentPositionParams {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl TextDocumentPositionParams {
    #[must_use]
    pub fn new(uri: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            text_document: TextDocumentIdentifier { uri: uri.into() },
            position: Position { line, character },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowMessageParams {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub message: String,
}
