//! Content fingerprinting for cache validity.
//!
//! Derives a signature for a project's underlying content state from its
//! version-control state. Uses the git2 library for native git operations,
//! run on the blocking pool since git2 is synchronous.
//!
//! Fingerprint forms:
//! - clean working tree: `{revision}`
//! - uncommitted changes: `{revision}-dirty-{diffHash}`
//! - no version control: `ts-{unix_millis}`, unstable on purpose so
//!   unversioned content invalidates the cache on every read.

use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::{DiffOptions, Repository as GitRepo, StatusOptions};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Hex chars kept from the dirty-diff hash.
const DIFF_HASH_LEN: usize = 12;

/// Service deriving cache-validity fingerprints from version control.
#[derive(Clone, Default)]
pub struct FingerprintService;

impl FingerprintService {
    pub fn new() -> Self {
        Self
    }

    /// Compute the fingerprint for a project path.
    pub async fn fingerprint(&self, project_path: &Path) -> Result<String> {
        let path = project_path.to_path_buf();

        tokio::task::spawn_blocking(move || compute_fingerprint(&path))
            .await
            .map_err(|e| Error::Internal(format!("Fingerprint task failed: {}", e)))?
    }

    /// Paths changed between two revisions, for incremental consumers.
    pub async fn changed_files(
        &self,
        project_path: &Path,
        from_revision: &str,
        to_revision: &str,
    ) -> Result<Vec<PathBuf>> {
        let path = project_path.to_path_buf();
        let from = from_revision.to_string();
        let to = to_revision.to_string();

        tokio::task::spawn_blocking(move || compute_changed_files(&path, &from, &to))
            .await
            .map_err(|e| Error::Internal(format!("Changed-files task failed: {}", e)))?
    }
}

fn compute_fingerprint(path: &Path) -> Result<String> {
    let repo = match GitRepo::discover(path) {
        Ok(repo) => repo,
        Err(_) => {
            // Unversioned content: timestamp marker, fresh on every call
            let marker = format!("ts-{}", Utc::now().timestamp_millis());
            debug!(path = %path.display(), marker = %marker, "No version control, using timestamp fingerprint");
            return Ok(marker);
        }
    };

    let head = repo.head()?;
    let revision = head.peel_to_commit()?.id().to_string();

    if !is_dirty(&repo)? {
        return Ok(revision);
    }

    let diff_hash = dirty_diff_hash(&repo)?;
    Ok(format!("{}-dirty-{}", revision, diff_hash))
}

fn is_dirty(repo: &GitRepo) -> Result<bool> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);

    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

/// Hash the workdir diff (including untracked content) so distinct sets of
/// uncommitted changes produce distinct fingerprints.
fn dirty_diff_hash(repo: &GitRepo) -> Result<String> {
    let mut opts = DiffOptions::new();
    opts.include_untracked(true).show_untracked_content(true);

    let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;

    let mut hasher = Sha256::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        hasher.update([line.origin() as u8]);
        hasher.update(line.content());
        true
    })?;

    let digest = hex::encode(hasher.finalize());
    Ok(digest[..DIFF_HASH_LEN].to_string())
}

fn compute_changed_files(path: &Path, from: &str, to: &str) -> Result<Vec<PathBuf>> {
    let repo = GitRepo::discover(path)?;

    let from_tree = repo.revparse_single(from)?.peel_to_commit()?.tree()?;
    let to_tree = repo.revparse_single(to)?.peel_to_commit()?.tree()?;

    let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;

    let mut files = Vec::new();
    for delta in diff.deltas() {
        if let Some(p) = delta.new_file().path().or_else(|| delta.old_file().path()) {
            files.push(p.to_path_buf());
        }
    }

    files.sort();
    files.dedup();

    Ok(files)
}
