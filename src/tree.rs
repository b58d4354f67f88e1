//! The binary tree codec.
//!
//! A tree payload is a run of `<mode> <filename>\0<20 raw hash bytes>`
//! entries with no separator between them. Modes are ASCII octal with no
//! leading zero: file-ish entries start with `1` (`100644`, `100755`,
//! `120000`, `160000`), subtrees are exactly `40000`.

use std::path::Path;

use crate::{
    hash::Sha1,
    objects::{self, ObjType},
    Error, Result,
};

/// One tree entry. `name` stays raw: filenames are not guaranteed to be
/// UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: Vec<u8>,
    pub name: Vec<u8>,
    pub sha1: Sha1,
}

impl TreeEntry {
    #[inline]
    pub fn is_subtree(&self) -> bool {
        self.mode == b"40000"
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.mode.first() == Some(&b'1')
    }

    /// Canonical sort key: git orders a subtree as if its name ended in `/`
    /// (legacy ordering quirk, load-bearing for hash stability).
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.clone();
        if self.is_subtree() {
            key.push(b'/');
        }
        key
    }
}

/// Parses a tree payload. No ordering is assumed on input; entries are
/// re-sorted on serialization.
pub fn parse_tree(sha1: &Sha1, payload: &[u8]) -> Result<Vec<TreeEntry>> {
    let truncated = || Error::corrupt(sha1, "truncated tree entry");
    let mut entries = Vec::new();
    let mut at = 0;
    while at < payload.len() {
        let space = payload[at..]
            .iter()
            .position(|b| *b == b' ')
            .map(|i| at + i)
            .ok_or_else(truncated)?;
        let nul = payload[space..]
            .iter()
            .position(|b| *b == 0)
            .map(|i| space + i)
            .ok_or_else(truncated)?;
        if payload.len() < nul + 21 {
            return Err(truncated());
        }
        entries.push(TreeEntry {
            mode: payload[at..space].to_vec(),
            name: payload[space + 1..nul].to_vec(),
            sha1: Sha1::from_raw(&payload[nul + 1..nul + 21])?,
        });
        at = nul + 21;
    }
    Ok(entries)
}

/// Reads and parses the tree object `sha1` from `objdir`.
pub fn read_tree(sha1: &Sha1, objdir: &Path) -> Result<Vec<TreeEntry>> {
    let (objtype, payload) = objects::read_obj(sha1, objdir)?;
    if objtype != ObjType::Tree {
        return Err(Error::corrupt(
            sha1,
            format!("expected tree, found {}", objtype.as_str()),
        ));
    }
    parse_tree(sha1, &payload)
}

/// Serializes entries in canonical order. Names are unique in a well-formed
/// tree, so the sort key never ties.
pub fn serialize_tree(mut entries: Vec<TreeEntry>) -> Vec<u8> {
    entries.sort_by_cached_key(TreeEntry::sort_key);
    let mut payload = Vec::new();
    for entry in &entries {
        payload.extend_from_slice(&entry.mode);
        payload.push(b' ');
        payload.extend_from_slice(&entry.name);
        payload.push(0);
        payload.extend_from_slice(entry.sha1.raw());
    }
    payload
}

/// Serializes and writes a tree object into `objdir`.
pub fn write_tree(entries: Vec<TreeEntry>, objdir: &Path) -> Result<Sha1> {
    objects::write_obj(ObjType::Tree, &serialize_tree(entries), objdir)
}
