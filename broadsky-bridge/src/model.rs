use std::{fmt::Display, str::FromStr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown repo op action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// A record level operation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: Action,
    /// `<collection>/<record key>`
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

impl RepoOp {
    pub fn new(action: Action, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
            cid: None,
        }
    }

    /// First path segment, e.g. `app.bsky.feed.post`.
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    pub seq: i64,
    pub rebase: bool,
    pub too_big: bool,
    pub repo: String,
    pub commit: Option<String>,
    pub rev: Option<String>,
    pub since: Option<String>,
    pub blocks: Bytes,
    pub ops: Vec<RepoOp>,
    pub blobs: Vec<String>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HandleEvent {
    pub seq: i64,
    pub did: String,
    pub handle: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One decoded upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Commit(CommitEvent),
    Handle(HandleEvent),
    Info(InfoEvent),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Commit(_) => "commit",
            StreamEvent::Handle(_) => "handle",
            StreamEvent::Info(_) => "info",
        }
    }
}
