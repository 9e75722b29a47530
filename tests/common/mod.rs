//! Common test utilities and helpers for gitvault tests
#![allow(dead_code)]

use async_trait::async_trait;
use gitvault::descriptor::{GistDescriptor, GistFile, Owner, RepositoryDescriptor};
use gitvault::error::ApiError;
use gitvault::github::{GitHubApi, ListScope, Page, PageCursor};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

const SCRUBBED_ENV: &[&str] = &[
    "GITHUB_TOKEN",
    "GITVAULT_NOAUTH",
    "GITVAULT_THREADS",
    "GITVAULT_USER",
    "GITVAULT_OUTPUT_DIR",
    "GITVAULT_TIMEOUT",
    "GITVAULT_INCLUDE_GISTS",
    "GITVAULT_INCLUDE_WIKIS",
    "RUST_LOG",
];

/// The built binary with a private config directory and no inherited settings.
pub fn gitvault(config_home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gitvault"));
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    cmd.env("XDG_CONFIG_HOME", config_home);
    cmd
}

/// In-memory API serving fixed listings, paged by the requested size.
pub struct FakeGitHub {
    pub login: String,
    pub repos: Vec<RepositoryDescriptor>,
    pub gists: Vec<GistDescriptor>,
    pub raw: HashMap<String, Vec<u8>>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeGitHub {
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            repos: Vec::new(),
            gists: Vec::new(),
            raw: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }
}

fn slice_page<T: Clone>(items: &[T], cursor: PageCursor) -> Page<T> {
    let per_page = cursor.per_page as usize;
    let start = (cursor.page as usize - 1) * per_page;
    let end = (start + per_page).min(items.len());
    let page_items = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();

    Page {
        items: page_items,
        next_page: if end < items.len() { cursor.page + 1 } else { 0 },
        rate: None,
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn authenticated_login(&self) -> Result<String, ApiError> {
        self.requests.lock().unwrap().push("user".to_string());
        Ok(self.login.clone())
    }

    async fn repositories_page(
        &self,
        _scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<RepositoryDescriptor>, ApiError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("repos?page={}", cursor.page));
        Ok(slice_page(&self.repos, cursor))
    }

    async fn gists_page(
        &self,
        _scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<GistDescriptor>, ApiError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("gists?page={}", cursor.page));
        Ok(slice_page(&self.gists, cursor))
    }

    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.requests.lock().unwrap().push(format!("raw {}", url));
        self.raw.get(url).cloned().ok_or_else(|| ApiError::Status {
            status: 404,
            url: url.to_string(),
            message: "Not Found".to_string(),
        })
    }
}

pub fn gist(id: &str, owner: &str, files: &[(&str, Option<&str>, Option<&str>)]) -> GistDescriptor {
    GistDescriptor {
        id: Some(id.to_string()),
        owner: Some(Owner {
            login: Some(owner.to_string()),
            ..Default::default()
        }),
        files: files
            .iter()
            .map(|(name, content, raw_url)| {
                (
                    name.to_string(),
                    GistFile {
                        filename: Some(name.to_string()),
                        content: content.map(str::to_string),
                        raw_url: raw_url.map(str::to_string),
                        ..Default::default()
                    },
                )
            })
            .collect(),
        ..Default::default()
    }
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=gitvault", "-c", "user.email=gitvault@example.com"])
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("Failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create `<dir>/<name>.git` (bare, one commit on `main`) and its work tree.
pub fn create_remote(dir: &Path, name: &str) -> std::path::PathBuf {
    let work = dir.join(format!("{}-work", name));
    std::fs::create_dir_all(&work).unwrap();
    git(&work, &["init", "-q"]);
    git(&work, &["commit", "-q", "--allow-empty", "-m", "initial"]);
    git(&work, &["branch", "-M", "main"]);

    let bare = dir.join(format!("{}.git", name));
    git(
        dir,
        &["clone", "-q", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()],
    );
    bare
}

/// Add a commit to the remote created by [`create_remote`] and return its id.
pub fn push_commit(dir: &Path, name: &str, message: &str) -> String {
    let work = dir.join(format!("{}-work", name));
    let bare = dir.join(format!("{}.git", name));
    git(&work, &["commit", "-q", "--allow-empty", "-m", message]);
    git(&work, &["push", "-q", bare.to_str().unwrap(), "main"]);
    git(&work, &["rev-parse", "HEAD"])
}
