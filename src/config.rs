//! Run-time knobs and the binary-extension contract.

use std::path::PathBuf;

/// Extensions classified as binary assets, ascending. The generated
/// `.gitignore` emits one `*<ext>` glob per entry in this exact order.
pub const BIN_EXTS: &[&str] = &[
    ".aif", ".bin", ".bmp", ".cur", ".gif", ".icm", ".ico", ".jpeg", ".jpg",
    ".m4a", ".m4v", ".mov", ".mp3", ".mp4", ".mpg", ".oga", ".ogg", ".ogv",
    ".otf", ".pdf", ".png", ".sitx", ".swf", ".tiff", ".ttf", ".wav",
    ".webm", ".webp", ".woff", ".woff2", ".zip",
];

/// Name suffix appended to a replaced entry, marking it as a pointer file.
pub const POINTER_SUFFIX: &[u8] = b".gitcs";

/// Case-insensitive test of a filename's extension against [`BIN_EXTS`].
/// Names are raw bytes. A lone leading dot (`.gitignore`) is a hidden file,
/// not an extension.
pub fn has_bin_ext(name: &[u8]) -> bool {
    let Some(dot) = name.iter().rposition(|b| *b == b'.') else {
        return false;
    };
    if dot == 0 {
        return false;
    }
    let ext = name[dot..].to_ascii_lowercase();
    BIN_EXTS.iter().any(|e| e.as_bytes() == ext.as_slice())
}

/// Everything a rewrite run needs to know, resolved once at startup and
/// immutable from then on.
#[derive(Debug, Clone)]
pub struct Options {
    /// The origin `.git/objects` directory. Never written.
    pub orig_objects: PathBuf,
    /// Where rewritten loose objects land. Never read back except for
    /// existence checks.
    pub new_objects: PathBuf,
    /// Staging area for extracted binaries, one `<hex>.blob` each.
    pub staging: PathBuf,
    /// Subtree name suffix that triggers descent, e.g. `Tests`.
    pub subtree_suffix: String,
    /// External bucket prefix written into pointer blobs,
    /// e.g. `gs://blink-gitcs`.
    pub uri_prefix: String,
    /// Worker threads for the tree phase.
    pub jobs: usize,
    /// Dry run: classify and count binaries without staging them.
    pub skip_staging: bool,
}
