//! gitvault - GitHub account backup
//!
//! gitvault mirrors every repository owned by a GitHub account, and
//! optionally its gists, into a local directory tree. Re-running it refreshes
//! the existing mirrors in place.
//!
//! ## Core Features
//!
//! - **Paged listing**: every page of the repository and gist collections,
//!   throttled against the API rate limit
//! - **Mirror clones**: `git clone --mirror`, then `git remote update --prune`
//! - **Gists**: file contents plus a `gist.json` metadata record
//! - **Bounded concurrency**: a fixed number of exports in flight
//! - **Configuration**: YAML file, environment and command-line layers
//!
//! ## Modules
//!
//! - [`backup`]: the orchestrator tying one pass together
//! - [`github`]: API client and the [`github::GitHubApi`] seam
//! - [`paginate`] and [`ratelimit`]: listing and throttling
//! - [`git`] and [`gist`]: per-item exporters
//! - [`pool`]: bounded worker pool
//! - [`config`]: configuration management and parsing

pub mod backup;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod gist;
pub mod git;
pub mod github;
pub mod paginate;
pub mod pool;
pub mod ratelimit;
pub mod shutdown;

pub use backup::{Backup, BackupOptions, BackupReport, BackupTarget, PhaseReport};
pub use config::Config;
pub use descriptor::{GistDescriptor, RepositoryDescriptor};
pub use error::{ApiError, BackupError, ExportError, ListingError};
pub use git::{CloneProtocol, GitRunner, RepositoryExporter, SystemGit};
pub use github::{Auth, GitHubApi, GitHubClient};
pub use pool::WorkerPool;
