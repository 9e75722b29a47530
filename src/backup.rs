//! Backup Orchestrator - drives one complete backup pass
//!
//! Resolves the acting account, lists its repositories (and optionally its
//! gists) page by page under the rate limiter, and drains each listing
//! through a bounded worker pool. Repositories are fully drained before gist
//! work starts. Per-item failures end up in the report; only conditions that
//! make the whole run meaningless are returned as errors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::descriptor::{GistDescriptor, RepositoryDescriptor};
use crate::error::{BackupError, ListingError};
use crate::gist::GistExporter;
use crate::git::{CloneProtocol, GitRunner, RepositoryExporter};
use crate::github::{Auth, GitHubApi, ListScope, DEFAULT_PER_PAGE};
use crate::paginate::Paginator;
use crate::pool::{PoolRun, WorkerPool};
use crate::ratelimit::RateLimiter;

/// Whose data to back up, and with which credentials.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    /// Required in anonymous mode; resolved from the token otherwise.
    pub username: Option<String>,
    pub auth: Auth,
}

/// Settings for one pass, derived from the validated configuration.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub include_gists: bool,
    pub include_wikis: bool,
    pub clone_protocol: CloneProtocol,
    pub per_page: u8,
}

impl BackupOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            concurrency: 5,
            include_gists: true,
            include_wikis: false,
            clone_protocol: CloneProtocol::Https,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.output_dir.join("repos")
    }

    pub fn gists_dir(&self) -> PathBuf {
        self.output_dir.join("gists")
    }
}

/// Counts for one phase (repositories or gists).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub listed: usize,
    pub succeeded: usize,
    /// `(item, reason)` for every failed item, so they can be retried.
    pub failures: Vec<(String, String)>,
    pub not_dispatched: usize,
    /// The listing broke off after the first page; only part was backed up.
    pub listing_truncated: bool,
}

impl PhaseReport {
    fn from_run(listed: usize, run: PoolRun, listing_truncated: bool) -> Self {
        let failures = run
            .failures()
            .map(|(label, reason)| (label.to_string(), reason.to_string()))
            .collect();

        Self {
            listed,
            succeeded: run.succeeded(),
            failures,
            not_dispatched: run.not_dispatched,
            listing_truncated,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Results from a complete backup pass
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub username: String,
    pub repositories: PhaseReport,
    /// `None` when gists were disabled or the run was cancelled first.
    pub gists: Option<PhaseReport>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl BackupReport {
    pub fn total_failed(&self) -> usize {
        self.repositories.failed() + self.gists.as_ref().map(PhaseReport::failed).unwrap_or(0)
    }
}

/// The backup orchestrator.
pub struct Backup {
    api: Arc<dyn GitHubApi>,
    git: Arc<dyn GitRunner>,
    options: BackupOptions,
    limiter: RateLimiter,
    cancel: Arc<AtomicBool>,
}

impl Backup {
    pub fn new(api: Arc<dyn GitHubApi>, git: Arc<dyn GitRunner>, options: BackupOptions) -> Self {
        Self {
            api,
            git,
            options,
            limiter: RateLimiter::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag, typically raised by a signal handler.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Run a complete backup pass.
    pub async fn run(&self, target: &BackupTarget) -> Result<BackupReport, BackupError> {
        let start_time = Instant::now();

        let username = self.resolve_username(target).await?;
        let scope = match target.auth {
            Auth::Anonymous => ListScope::User(username.clone()),
            Auth::Token(_) => ListScope::Authenticated,
        };

        info!("Starting backup for {} into {}", username, self.options.output_dir.display());

        let repositories = self.backup_repositories(target, &scope).await?;

        let gists = if !self.options.include_gists {
            None
        } else if self.is_cancelled() {
            info!("Cancelled before gist backup");
            None
        } else {
            Some(self.backup_gists(&scope, &username).await?)
        };

        let report = BackupReport {
            username,
            repositories,
            gists,
            cancelled: self.is_cancelled(),
            duration: start_time.elapsed(),
        };

        info!(
            "Backup completed in {:.2}s: {} failed items",
            report.duration.as_secs_f64(),
            report.total_failed()
        );

        Ok(report)
    }

    async fn resolve_username(&self, target: &BackupTarget) -> Result<String, BackupError> {
        match &target.auth {
            Auth::Anonymous => target
                .username
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    BackupError::UsernameResolution("a username is required in anonymous mode".to_string())
                }),
            Auth::Token(_) => {
                let login = self
                    .api
                    .authenticated_login()
                    .await
                    .map_err(|e| BackupError::UsernameResolution(e.to_string()))?;

                if let Some(configured) = &target.username {
                    if !configured.eq_ignore_ascii_case(&login) {
                        warn!(
                            "Configured username {} differs from token owner {}; backing up {}",
                            configured, login, login
                        );
                    }
                }

                Ok(login)
            }
        }
    }

    async fn backup_repositories(
        &self,
        target: &BackupTarget,
        scope: &ListScope,
    ) -> Result<PhaseReport, BackupError> {
        let repos_dir = self.options.repos_dir();
        create_output_dir(&repos_dir).await?;

        let api = &self.api;
        let listing = Paginator::new(&self.limiter, self.options.per_page)
            .with_cancel(&self.cancel)
            .list_all("repositories", move |cursor| api.repositories_page(scope, cursor))
            .await;
        let (repos, truncated) = accept_listing::<RepositoryDescriptor>(listing)?;

        info!("Found {} repositories", repos.len());

        let exporter = RepositoryExporter::new(
            self.git.clone(),
            repos_dir,
            target.auth.clone(),
            self.options.clone_protocol,
        )
        .with_wikis(self.options.include_wikis);

        let listed = repos.len();
        let run = WorkerPool::new(self.options.concurrency)
            .run(repos, Arc::new(exporter), &self.cancel)
            .await;

        let report = PhaseReport::from_run(listed, run, truncated);
        log_phase("Repositories", &report);
        Ok(report)
    }

    async fn backup_gists(&self, scope: &ListScope, username: &str) -> Result<PhaseReport, BackupError> {
        let gists_dir = self.options.gists_dir();
        create_output_dir(&gists_dir).await?;

        let api = &self.api;
        let listing = Paginator::new(&self.limiter, self.options.per_page)
            .with_cancel(&self.cancel)
            .list_all("gists", move |cursor| api.gists_page(scope, cursor))
            .await;
        let (mut gists, truncated) = accept_listing::<GistDescriptor>(listing)?;

        // `/gists` cannot filter by owner server-side.
        if *scope == ListScope::Authenticated {
            gists.retain(|g| g.owner_login().map(|o| o.eq_ignore_ascii_case(username)).unwrap_or(false));
        }

        info!("Found {} gists for user {}", gists.len(), username);

        let exporter = GistExporter::new(self.api.clone(), gists_dir);
        let listed = gists.len();
        let run = WorkerPool::new(self.options.concurrency)
            .run(gists, Arc::new(exporter), &self.cancel)
            .await;

        let report = PhaseReport::from_run(listed, run, truncated);
        log_phase("Gists", &report);
        Ok(report)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A first-page failure aborts the run; a later one keeps what was listed.
fn accept_listing<T: std::fmt::Debug>(
    listing: Result<Vec<T>, ListingError<T>>,
) -> Result<(Vec<T>, bool), BackupError> {
    match listing {
        Ok(items) => Ok((items, false)),
        Err(e) if e.is_first_page() => Err(BackupError::Listing {
            resource: e.resource,
            source: e.source,
        }),
        Err(e) => {
            warn!(
                "Continuing with {} {} listed before page {} failed: {}",
                e.partial.len(),
                e.resource,
                e.page,
                e.source
            );
            Ok((e.partial, true))
        }
    }
}

async fn create_output_dir(path: &std::path::Path) -> Result<(), BackupError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BackupError::OutputDirectory {
            path: path.to_path_buf(),
            source,
        })
}

fn log_phase(phase: &str, report: &PhaseReport) {
    info!(
        "{}: {} listed, {} succeeded, {} failed, {} not dispatched",
        phase,
        report.listed,
        report.succeeded,
        report.failed(),
        report.not_dispatched
    );
    for (item, reason) in &report.failures {
        warn!("  {} failed: {}", item, reason);
    }
}
