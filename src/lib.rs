//! Rewrites a linear git history, moving large binary assets under a target
//! subtree out of the object store. Each extracted blob is staged for an
//! external bucket under its own SHA1 and replaced in-tree by a small
//! pointer blob; the subtree root gets an augmented `.gitignore`.

pub use error::{Error, Result};

pub mod config;
pub mod error;
pub mod hash;
pub mod mangle;
pub mod memo;
pub mod objects;
pub mod revlist;
pub mod rewrite;
pub mod tree;
