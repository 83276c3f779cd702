// Mastodon entity types, as returned by the REST and streaming APIs.
//
// Only the fields the relay pipeline and its sinks read are modelled.
// Everything else in the JSON is ignored by serde.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audience scope of a status.
///
/// Servers are free to add levels (some forks ship `local` or `limited`),
/// so anything unrecognised is kept verbatim in `Other` instead of failing
/// the whole status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
    Other(String),
}

impl Visibility {
    pub fn as_str(&self) -> &str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
            Visibility::Other(s) => s,
        }
    }
}

impl From<String> for Visibility {
    fn from(s: String) -> Self {
        match s.as_str() {
            "public" => Visibility::Public,
            "unlisted" => Visibility::Unlisted,
            "private" => Visibility::Private,
            "direct" => Visibility::Direct,
            _ => Visibility::Other(s),
        }
    }
}

impl From<Visibility> for String {
    fn from(v: Visibility) -> Self {
        v.as_str().to_string()
    }
}

/// Parses a user-supplied visibility name. Only the four standard levels
/// are accepted, so a typo in configuration is an error.
impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Visibility::from(s.trim().to_lowercase()) {
            Visibility::Other(name) => anyhow::bail!("Unknown visibility {name:?}"),
            known => Ok(known),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account on the origin network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `user` for local accounts, `user@domain` for remote ones
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A hashtag attached to a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A media attachment reference. The relay never downloads media itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A published status, snapshotted at the moment it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub account: Account,
    pub visibility: Visibility,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub media_attachments: Vec<Attachment>,
    #[serde(default)]
    pub sensitive: bool,
    /// Only present when the request was authenticated
    #[serde(default)]
    pub muted: Option<bool>,
    /// Whether our own account has already reblogged this status
    #[serde(default)]
    pub reblogged: Option<bool>,
    /// Set when this status is itself a reblog of another one
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub reblogs_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Status {
    pub fn is_muted(&self) -> bool {
        self.muted.unwrap_or(false)
    }

    pub fn is_reblogged(&self) -> bool {
        self.reblogged.unwrap_or(false)
    }

    pub fn is_reblog(&self) -> bool {
        self.reblog.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to_id.is_some()
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.name.as_str())
    }
}

/// Ancestors and descendants of a status within its thread.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub ancestors: Vec<Status>,
    #[serde(default)]
    pub descendants: Vec<Status>,
}

/// Relationship between our account and another account.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub followed_by: bool,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub muting: bool,
}
