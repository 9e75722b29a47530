//! Read-only records describing remote items returned by the listing API.
//!
//! Every wire field is optional: the API is free to omit anything, and a
//! descriptor missing what an exporter needs must turn into a per-item
//! failure instead of a decode error for the whole page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Anything the paginator can de-duplicate and the pool can name.
pub trait Descriptor: Send + Sync + std::fmt::Debug + 'static {
    /// Stable identity used to drop duplicates across overlapping pages.
    fn key(&self) -> Option<String>;

    /// Human readable label for logs and reports.
    fn label(&self) -> String;
}

/// Login of the account owning a repository or gist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Owner {
    pub login: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositoryDescriptor {
    pub name: Option<String>,

    /// `owner/name`
    pub full_name: Option<String>,

    pub clone_url: Option<String>,

    pub ssh_url: Option<String>,

    #[serde(default)]
    pub has_wiki: bool,

    pub owner: Option<Owner>,
}

impl RepositoryDescriptor {
    /// Convenience constructor used by tests and fakes.
    pub fn new(owner: &str, name: &str, clone_url: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            full_name: Some(format!("{}/{}", owner, name)),
            clone_url: Some(clone_url.to_string()),
            ssh_url: None,
            has_wiki: false,
            owner: Some(Owner {
                login: Some(owner.to_string()),
                extra: Map::new(),
            }),
        }
    }
}

impl Descriptor for RepositoryDescriptor {
    fn key(&self) -> Option<String> {
        self.full_name.clone().or_else(|| self.name.clone())
    }

    fn label(&self) -> String {
        self.full_name
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "<unnamed repository>".to_string())
    }
}

/// One file entry of a gist.
///
/// `content` is withheld by the API for large files; `raw_url` is then the
/// only way to obtain the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GistFile {
    pub filename: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    pub raw_url: Option<String>,

    #[serde(default)]
    pub truncated: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GistDescriptor {
    pub id: Option<String>,

    pub owner: Option<Owner>,

    #[serde(default)]
    pub files: BTreeMap<String, GistFile>,

    pub git_pull_url: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Every other field the API returned, kept verbatim for `gist.json`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GistDescriptor {
    pub fn owner_login(&self) -> Option<&str> {
        self.owner.as_ref().and_then(|o| o.login.as_deref())
    }
}

impl Descriptor for GistDescriptor {
    fn key(&self) -> Option<String> {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| "<gist without id>".to_string())
    }
}
