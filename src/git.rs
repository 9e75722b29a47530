use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::descriptor::{Descriptor, RepositoryDescriptor};
use crate::error::ExportError;
use crate::github::Auth;
use crate::pool::ItemExporter;

/// Exit status and merged stdout/stderr of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub status: String,
    pub combined: String,
}

/// Environment variable the credential helper reads the token from.
const TOKEN_ENV: &str = "GITVAULT_GIT_TOKEN";

/// Answers git's credential requests from [`TOKEN_ENV`], so the token never
/// lands in argv or in the mirror's stored remote URL.
const CREDENTIAL_HELPER: &str =
    "credential.helper=!f() { echo username=x-access-token; echo \"password=${GITVAULT_GIT_TOKEN}\"; }; f";

/// Runs the `git` executable. The exit status and combined output are the
/// only error signal the exporter looks at.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// `envs` are added to the child's environment.
    async fn run(&self, args: &[String], cwd: &Path, envs: &[(String, String)]) -> std::io::Result<GitOutput>;
}

/// The `git` found on `PATH`.
pub struct SystemGit;

#[async_trait]
impl GitRunner for SystemGit {
    async fn run(&self, args: &[String], cwd: &Path, envs: &[(String, String)]) -> std::io::Result<GitOutput> {
        let output = AsyncCommand::new("git")
            .args(args)
            .current_dir(cwd)
            // Never block on a credential prompt for a repository we cannot read.
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(envs.iter().cloned())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(GitOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            combined,
        })
    }
}

/// Transport used when a token is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    /// HTTPS clone URL, token supplied through a credential helper
    #[default]
    Https,
    /// The repository's SSH URL, relying on the local SSH agent
    Ssh,
}

/// Local state of a repository's destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoPresence {
    NotPresent,
    Present,
}

impl RepoPresence {
    pub fn detect(path: &Path) -> Self {
        if path.exists() {
            RepoPresence::Present
        } else {
            RepoPresence::NotPresent
        }
    }
}

/// What an export did to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoAction {
    Cloned { path: PathBuf },
    Updated { path: PathBuf },
}

/// Mirrors repositories into `<root>/<name>`.
pub struct RepositoryExporter {
    git: Arc<dyn GitRunner>,
    root: PathBuf,
    auth: Auth,
    protocol: CloneProtocol,
    include_wikis: bool,
}

impl RepositoryExporter {
    pub fn new(git: Arc<dyn GitRunner>, root: PathBuf, auth: Auth, protocol: CloneProtocol) -> Self {
        Self {
            git,
            root,
            auth,
            protocol,
            include_wikis: false,
        }
    }

    /// Also mirror `<name>.wiki` for repositories that have a wiki.
    pub fn with_wikis(mut self, include_wikis: bool) -> Self {
        self.include_wikis = include_wikis;
        self
    }

    /// Pick the URL to clone from. This is also what the mirror stores as
    /// its `origin`, so it never carries credentials.
    pub fn remote_url(&self, repo: &RepositoryDescriptor) -> Result<String, ExportError> {
        let clone_url = repo
            .clone_url
            .as_deref()
            .ok_or_else(|| ExportError::InvalidDescriptor(format!("{} has no clone URL", repo.label())))?;

        if self.auth.token().is_some() && self.protocol == CloneProtocol::Ssh {
            if let Some(ssh_url) = &repo.ssh_url {
                return Ok(ssh_url.clone());
            }
            debug!("{} has no SSH URL, using HTTPS", repo.label());
        }

        Ok(clone_url.to_string())
    }

    /// Config flags and environment that authenticate one HTTPS invocation.
    fn credentials(&self, url: &str) -> (Vec<String>, Vec<(String, String)>) {
        match self.auth.token() {
            Some(token) if url.starts_with("https://") => (
                vec![
                    "-c".to_string(),
                    "credential.helper=".to_string(),
                    "-c".to_string(),
                    CREDENTIAL_HELPER.to_string(),
                ],
                vec![(TOKEN_ENV.to_string(), token.to_string())],
            ),
            _ => (Vec::new(), Vec::new()),
        }
    }

    /// Clone or update one repository.
    pub async fn mirror(&self, repo: &RepositoryDescriptor) -> Result<RepoAction, ExportError> {
        let name = repo
            .name
            .as_deref()
            .ok_or_else(|| ExportError::InvalidDescriptor("repository has no name".to_string()))?;
        validate_name(name)?;

        let url = self.remote_url(repo)?;
        let action = self.clone_or_update(name, &url).await?;

        if self.include_wikis && repo.has_wiki {
            let wiki_name = format!("{}.wiki", name);
            if let Err(e) = self.clone_or_update(&wiki_name, &wiki_url(&url)).await {
                warn!("Wiki backup failed for {}: {}", repo.label(), e);
            }
        }

        Ok(action)
    }

    async fn clone_or_update(&self, name: &str, url: &str) -> Result<RepoAction, ExportError> {
        let target = self.root.join(name);

        match RepoPresence::detect(&target) {
            RepoPresence::Present => {
                info!("Repository {} already exists, updating", name);
                self.update(&target, url).await?;
                Ok(RepoAction::Updated { path: target })
            }
            RepoPresence::NotPresent => {
                info!("Cloning {} -> {}", name, target.display());
                self.clone(name, url).await?;
                Ok(RepoAction::Cloned { path: target })
            }
        }
    }

    async fn clone(&self, name: &str, url: &str) -> Result<(), ExportError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ExportError::Write {
                path: self.root.clone(),
                source,
            })?;

        let (mut args, envs) = self.credentials(url);
        // Full history: no --depth.
        args.extend([
            "clone".to_string(),
            "--mirror".to_string(),
            url.to_string(),
            name.to_string(),
        ]);

        let output = self
            .git
            .run(&args, &self.root, &envs)
            .await
            .map_err(ExportError::Spawn)?;
        if !output.success {
            return Err(ExportError::Clone {
                status: output.status,
                output: self.redact(&output.combined),
            });
        }

        debug!("Cloned {}", name);
        Ok(())
    }

    async fn update(&self, path: &Path, url: &str) -> Result<(), ExportError> {
        // Re-point origin first: the URL may have changed since the clone,
        // and older mirrors may still carry credentials in it.
        let set_url = vec![
            "remote".to_string(),
            "set-url".to_string(),
            "origin".to_string(),
            url.to_string(),
        ];
        self.run_update_step(&set_url, path, &[]).await?;

        let (mut args, envs) = self.credentials(url);
        args.extend(["remote".to_string(), "update".to_string(), "--prune".to_string()]);
        self.run_update_step(&args, path, &envs).await?;

        debug!("Updated {}", path.display());
        Ok(())
    }

    async fn run_update_step(
        &self,
        args: &[String],
        path: &Path,
        envs: &[(String, String)],
    ) -> Result<(), ExportError> {
        let output = self.git.run(args, path, envs).await.map_err(ExportError::Spawn)?;
        if !output.success {
            return Err(ExportError::Update {
                status: output.status,
                output: self.redact(&output.combined),
            });
        }
        Ok(())
    }

    fn redact(&self, text: &str) -> String {
        match self.auth.token() {
            Some(token) if !token.is_empty() => text.replace(token, "[REDACTED]"),
            _ => text.to_string(),
        }
    }
}

#[async_trait]
impl ItemExporter<RepositoryDescriptor> for RepositoryExporter {
    async fn export(&self, repo: &RepositoryDescriptor) -> Result<(), ExportError> {
        match self.mirror(repo).await? {
            RepoAction::Cloned { path } => info!("Successfully cloned {} to {}", repo.label(), path.display()),
            RepoAction::Updated { path } => info!("Successfully updated {} at {}", repo.label(), path.display()),
        }
        Ok(())
    }
}

fn wiki_url(url: &str) -> String {
    format!("{}.wiki.git", url.strip_suffix(".git").unwrap_or(url))
}

fn validate_name(name: &str) -> Result<(), ExportError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(ExportError::InvalidDescriptor(format!(
            "unsafe repository name: {:?}",
            name
        )));
    }
    Ok(())
}
