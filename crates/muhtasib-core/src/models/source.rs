use std::fmt;

use serde::{Deserialize, Serialize};

/// Webmail providers with an attachment API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gmail => f.write_str("gmail"),
            Provider::Outlook => f.write_str("outlook"),
        }
    }
}

/// Where an attachment comes from.
///
/// Descriptors are produced once from user input and never mutated; the tag alone
/// selects which fetcher handles the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    DirectUrl {
        url: String,
    },
    Gmail {
        message_id: String,
        /// Attachment id or part id hint. Resolved from the part list when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_id: Option<String>,
    },
    Outlook {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_id: Option<String>,
    },
}

impl SourceDescriptor {
    pub fn direct_url(url: impl Into<String>) -> Self {
        SourceDescriptor::DirectUrl { url: url.into() }
    }

    pub fn gmail(message_id: impl Into<String>, attachment_id: Option<String>) -> Self {
        SourceDescriptor::Gmail {
            message_id: message_id.into(),
            attachment_id,
        }
    }

    pub fn outlook(message_id: impl Into<String>, attachment_id: Option<String>) -> Self {
        SourceDescriptor::Outlook {
            message_id: message_id.into(),
            attachment_id,
        }
    }

    /// Provider backing this descriptor, `None` for direct URLs
    pub fn provider(&self) -> Option<Provider> {
        match self {
            SourceDescriptor::DirectUrl { .. } => None,
            SourceDescriptor::Gmail { .. } => Some(Provider::Gmail),
            SourceDescriptor::Outlook { .. } => Some(Provider::Outlook),
        }
    }

    /// Short label used for logs and as a file-name hint
    pub fn kind_name(&self) -> &'static str {
        match self {
            SourceDescriptor::DirectUrl { .. } => "direct_url",
            SourceDescriptor::Gmail { .. } => "gmail",
            SourceDescriptor::Outlook { .. } => "outlook",
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::DirectUrl { url } => f.write_str(url),
            SourceDescriptor::Gmail {
                message_id,
                attachment_id,
            }
            | SourceDescriptor::Outlook {
                message_id,
                attachment_id,
            } => {
                let provider = self.kind_name();
                match attachment_id {
                    Some(att) => write!(f, "{}:{}/{}", provider, message_id, att),
                    None => write!(f, "{}:{}", provider, message_id),
                }
            }
        }
    }
}
