//! Enumerating the linear commit/tree sequence to rewrite.
//!
//! The listing is either read from a file recorded earlier or produced by
//! the host git. Both use the `git rev-list --format=%T --reverse` shape:
//! alternating `commit <hex>` and `<tree hex>` lines, oldest commit first.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    process::Command,
};

use tracing::debug;

use crate::{hash::Sha1, Error, Result};

/// One commit to rewrite, paired with its top tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rev {
    pub commit: Sha1,
    pub tree: Sha1,
}

fn parse_listing(reader: impl BufRead) -> Result<Vec<Rev>> {
    let mut revs = Vec::new();
    let mut pending: Option<Sha1> = None;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if let Some(hex) = line.strip_prefix("commit ") {
            if pending.is_some() {
                return Err(Error::InvariantViolated(
                    "commit line not followed by a tree line".to_string(),
                ));
            }
            pending = Some(Sha1::from_hex(hex)?);
        } else {
            let commit = pending.take().ok_or_else(|| {
                Error::InvariantViolated(format!("tree line {line} has no preceding commit"))
            })?;
            revs.push(Rev {
                commit,
                tree: Sha1::from_hex(line)?,
            });
        }
    }
    if pending.is_some() {
        return Err(Error::InvariantViolated(
            "trailing commit line has no tree".to_string(),
        ));
    }
    debug!(revisions = revs.len(), "parsed listing");
    Ok(revs)
}

/// Reads a pre-recorded listing file.
pub fn from_file(path: &Path) -> Result<Vec<Rev>> {
    parse_listing(BufReader::new(File::open(path)?))
}

/// Enumerates `branch` by running the host git, oldest commit first.
pub fn from_git(branch: &str) -> Result<Vec<Rev>> {
    let output = Command::new("git")
        .args(["rev-list", "--format=%T", "--reverse", branch])
        .output()?;
    if !output.status.success() {
        return Err(Error::InvariantViolated(format!(
            "git rev-list failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_listing(output.stdout.as_slice())
}

/// The loose-object directory of the repository we are running inside.
pub fn origin_objects_dir() -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .output()?;
    if !output.status.success() {
        return Err(Error::InvariantViolated(
            "not inside a git repository".to_string(),
        ));
    }
    let gitdir = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(PathBuf::from(gitdir).join("objects"))
}
