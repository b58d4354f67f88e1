//! The tree mangler: a memoized, recursive rewrite of one tree subgraph.
//!
//! Every translated tree is cached under its original hash; subtrees shared
//! between commits are rewritten once. The cache (and the other tables
//! here) are shared across all phase-1 workers; each key is written once
//! and checked with compare-and-set semantics, a mismatch is fatal.

use tracing::debug;

use crate::{
    config::{has_bin_ext, Options, BIN_EXTS, POINTER_SUFFIX},
    hash::Sha1,
    memo::MemoMap,
    objects::{self, ObjType},
    tree::{self, TreeEntry},
    Error, Result,
};

/// Shared state for one rewrite run. Phase-1 workers hold it behind an
/// `Arc`; phase 2 reads the results out of `root_trees`.
pub struct Mangler {
    opts: Options,
    /// original tree hash -> rewritten tree hash
    tree_cache: MemoMap<Sha1, Sha1>,
    /// optional base `.gitignore` blob -> derived ignore blob
    ignore_cache: MemoMap<Option<Sha1>, Sha1>,
    /// original top-tree hash -> rewritten top-tree hash
    root_trees: MemoMap<Sha1, Sha1>,
    /// blobs staged for the external bucket, kept for the final count
    extracted: MemoMap<Sha1, ()>,
}

impl Mangler {
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            tree_cache: MemoMap::new(),
            ignore_cache: MemoMap::new(),
            root_trees: MemoMap::new(),
            extracted: MemoMap::new(),
        }
    }

    #[inline]
    pub fn opts(&self) -> &Options {
        &self.opts
    }

    /// How many distinct blobs were extracted (or would have been, on a
    /// dry run).
    #[inline]
    pub fn extracted_count(&self) -> usize {
        self.extracted.len()
    }

    /// Phase-2 lookup: the rewritten hash of a commit's top tree.
    #[inline]
    pub fn rewritten_root(&self, orig: &Sha1) -> Option<Sha1> {
        self.root_trees.get(orig)
    }

    /// Translates one commit's top tree and records the result under the
    /// original hash. Worker entry point for phase 1.
    pub fn translate_top_tree(&self, top: Sha1) -> Result<()> {
        let mangled = self.mangle_tree(top, false, 0)?;
        let winner = self.root_trees.insert_if_absent(top, mangled);
        if winner != mangled {
            return Err(Error::InvariantViolated(format!(
                "top tree {top} rewritten to both {winner} and {mangled}"
            )));
        }
        Ok(())
    }

    /// Rewrites one tree, recursing into subtrees that are (or trigger) the
    /// target directory.
    ///
    /// `in_target` is latched: once a subtree matched the suffix, every
    /// descendant counts as target content no matter its name. `depth` is 1
    /// at the target root, the only level where `.gitignore` is managed.
    /// Subtrees that neither are in the target nor end with the suffix are
    /// left untouched, child hash and all.
    ///
    /// An unchanged tree returns its original hash and writes nothing.
    fn mangle_tree(&self, root: Sha1, in_target: bool, depth: usize) -> Result<Sha1> {
        if let Some(cached) = self.tree_cache.get(&root) {
            return Ok(cached);
        }

        let mut changed = false;
        let mut base_gitignore = None;
        let mut entries = Vec::new();
        for mut entry in tree::read_tree(&root, &self.opts.orig_objects)? {
            if entry.is_file() {
                if in_target && depth == 1 && entry.name == b".gitignore" {
                    // re-emitted below, augmented
                    base_gitignore = Some(entry.sha1);
                    continue;
                }
                if in_target && has_bin_ext(&entry.name) {
                    entry = self.replace_with_pointer(entry)?;
                    changed = true;
                }
            } else if !entry.is_subtree() {
                return Err(Error::corrupt(
                    &root,
                    format!(
                        "unexpected entry mode {}",
                        String::from_utf8_lossy(&entry.mode)
                    ),
                ));
            } else if in_target || entry.name.ends_with(self.opts.subtree_suffix.as_bytes()) {
                let old = entry.sha1;
                entry.sha1 = self.mangle_tree(old, true, depth + 1)?;
                changed |= entry.sha1 != old;
            }
            entries.push(entry);
        }

        if in_target && depth == 1 {
            entries.push(TreeEntry {
                mode: b"100644".to_vec(),
                name: b".gitignore".to_vec(),
                sha1: self.build_gitignore(base_gitignore)?,
            });
            changed = true;
        }

        let res = if changed {
            tree::write_tree(entries, &self.opts.new_objects)?
        } else {
            root
        };
        let winner = self.tree_cache.insert_if_absent(root, res);
        if winner != res {
            return Err(Error::InvariantViolated(format!(
                "tree {root} rewritten to both {winner} and {res}"
            )));
        }
        if changed {
            debug!(old = %root, new = %res, depth, "rewrote tree");
        }
        Ok(res)
    }

    /// Swaps a binary blob entry for a pointer blob. The original bytes go
    /// to the staging area under their own hash; the entry keeps its name
    /// plus the pointer suffix.
    fn replace_with_pointer(&self, mut entry: TreeEntry) -> Result<TreeEntry> {
        let orig = entry.sha1;
        self.extracted.insert_if_absent(orig, ());
        if !self.opts.skip_staging {
            objects::extract_blob(&orig, &self.opts.staging, &self.opts.orig_objects)?;
        }
        let pointer = format!("src {}/{}.blob\n", self.opts.uri_prefix, orig.hex());
        entry.sha1 = objects::write_obj(
            ObjType::Blob,
            pointer.as_bytes(),
            &self.opts.new_objects,
        )?;
        entry.name.extend_from_slice(POINTER_SUFFIX);
        Ok(entry)
    }

    /// Derives the `.gitignore` blob for the target root: the base blob's
    /// content (if any) plus an unconditional newline, then one `*<ext>`
    /// glob per binary extension. Memoized per base blob.
    fn build_gitignore(&self, base: Option<Sha1>) -> Result<Sha1> {
        if let Some(cached) = self.ignore_cache.get(&base) {
            return Ok(cached);
        }

        let mut content = Vec::new();
        if let Some(base_sha1) = &base {
            let (objtype, payload) = objects::read_obj(base_sha1, &self.opts.orig_objects)?;
            if objtype != ObjType::Blob {
                return Err(Error::corrupt(
                    base_sha1,
                    format!("expected blob, found {}", objtype.as_str()),
                ));
            }
            content.extend_from_slice(&payload);
            content.push(b'\n');
        }
        for ext in BIN_EXTS {
            content.extend_from_slice(format!("*{ext}\n").as_bytes());
        }

        let sha1 = objects::write_obj(ObjType::Blob, &content, &self.opts.new_objects)?;
        let winner = self.ignore_cache.insert_if_absent(base, sha1);
        if winner != sha1 {
            return Err(Error::InvariantViolated(format!(
                "ignore blob for base {base:?} derived as both {winner} and {sha1}"
            )));
        }
        Ok(sha1)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn options(dir: &TempDir) -> Options {
        Options {
            orig_objects: dir.path().join("orig"),
            new_objects: dir.path().join("new"),
            staging: dir.path().join("staging"),
            subtree_suffix: "Tests".to_string(),
            uri_prefix: "gs://unit-bucket".to_string(),
            jobs: 2,
            skip_staging: false,
        }
    }

    fn expected_globs() -> Vec<u8> {
        let mut want = Vec::new();
        for ext in BIN_EXTS {
            want.extend_from_slice(format!("*{ext}\n").as_bytes());
        }
        want
    }

    #[test]
    fn gitignore_from_blank_base() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let mangler = Mangler::new(opts.clone());

        let sha1 = mangler.build_gitignore(None).unwrap();
        let (objtype, payload) = objects::read_obj(&sha1, &opts.new_objects).unwrap();
        assert_eq!(objtype, ObjType::Blob);
        assert_eq!(payload, expected_globs());
    }

    #[test]
    fn gitignore_keeps_base_as_prefix() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let base = objects::write_obj(ObjType::Blob, b"foo\n", &opts.orig_objects).unwrap();
        let mangler = Mangler::new(opts.clone());

        let sha1 = mangler.build_gitignore(Some(base)).unwrap();
        let (_, payload) = objects::read_obj(&sha1, &opts.new_objects).unwrap();
        let mut want = b"foo\n\n".to_vec();
        want.extend_from_slice(&expected_globs());
        assert_eq!(payload, want);
    }

    #[test]
    fn gitignore_is_memoized() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let base = objects::write_obj(ObjType::Blob, b"keep me\n", &opts.orig_objects).unwrap();
        let mangler = Mangler::new(opts.clone());

        let first = mangler.build_gitignore(Some(base)).unwrap();
        // with the origin store gone, only the memo can answer
        fs::remove_dir_all(&opts.orig_objects).unwrap();
        let second = mangler.build_gitignore(Some(base)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn translated_tree_is_cached() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let blob = objects::write_obj(ObjType::Blob, b"text\n", &opts.orig_objects).unwrap();
        let top = tree::write_tree(
            vec![TreeEntry {
                mode: b"100644".to_vec(),
                name: b"a.txt".to_vec(),
                sha1: blob,
            }],
            &opts.orig_objects,
        )
        .unwrap();
        let mangler = Mangler::new(opts.clone());

        mangler.translate_top_tree(top).unwrap();
        assert_eq!(mangler.rewritten_root(&top), Some(top));

        // second translation must not touch the origin store at all
        fs::remove_dir_all(&opts.orig_objects).unwrap();
        mangler.translate_top_tree(top).unwrap();
        assert_eq!(mangler.rewritten_root(&top), Some(top));
    }
}
