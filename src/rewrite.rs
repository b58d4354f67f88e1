//! The two rewrite phases.
//!
//! Phase 1 fans the top trees out over a worker pool; order does not
//! matter, results are keyed by hash. Phase 2 walks the commits serially,
//! oldest first: each commit needs the previous one's rewritten hash for
//! its parent line, so there is nothing to parallelize.

use std::{
    io::Write as _,
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    hash::Sha1,
    mangle::Mangler,
    objects::{self, ObjType},
    Error, Result,
};

/// Rolling completion meter. The checkpoint trails roughly five seconds
/// behind, so the printed rate and ETA follow current throughput instead of
/// averaging over the whole run.
struct RateMeter {
    total: usize,
    done: usize,
    started: Instant,
    checkpoint_done: usize,
    checkpoint_time: Instant,
}

impl RateMeter {
    fn new(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            done: 0,
            started: now,
            checkpoint_done: 0,
            checkpoint_time: now,
        }
    }

    /// Records one completion.
    ///
    /// # Returns
    /// - `Some((per_sec, eta))` when the progress line is due for a refresh
    ///   (every `every` completions, and on the last one).
    /// - `None` otherwise.
    fn tick(&mut self, every: usize) -> Option<(f64, Duration)> {
        self.done += 1;
        let now = Instant::now();
        let refresh = self.done == self.total || self.done % every == 1;
        let ret = refresh.then(|| {
            let window = (self.done - self.checkpoint_done) as f64;
            let secs_per_item = (now - self.checkpoint_time).as_secs_f64() / window;
            let eta = Duration::from_secs_f64(secs_per_item * (self.total - self.done) as f64);
            (1.0 / secs_per_item.max(1e-9), eta)
        });
        if now - self.checkpoint_time > Duration::from_secs(5) {
            self.checkpoint_done = self.done;
            self.checkpoint_time = now;
        }
        ret
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn overall_rate(&self) -> f64 {
        self.done as f64 / self.elapsed().as_secs_f64().max(1e-9)
    }
}

/// `HHh:MMm:SSs`, the format the progress lines use.
fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}h:{:02}m:{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Phase 1: rewrites every commit's top tree across a worker pool.
///
/// Results land in the mangler's `root_trees` table. A worker error is
/// reported with its hash and aborts the run once the in-flight tasks
/// drain; the first error wins. There is no retry, the computation is
/// deterministic.
pub fn rewrite_trees(trees: &[Sha1], mangler: &Arc<Mangler>) -> Result<()> {
    if trees.is_empty() {
        return Ok(());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(mangler.opts().jobs)
        .thread_name(|i| format!("mangle-{i}"))
        .build()?;

    let (tx, rx) = mpsc::channel();
    for &top in trees {
        let mangler = Arc::clone(mangler);
        let tx = tx.clone();
        pool.spawn(move || {
            // the receiver never hangs up before the channel drains
            let _ = tx.send((top, mangler.translate_top_tree(top)));
        });
    }
    drop(tx);

    let mut meter = RateMeter::new(trees.len());
    let mut first_err = None;
    for (top, res) in rx {
        if let Err(err) = res {
            eprintln!("\nrewrite of tree {top} failed: {err}");
            first_err.get_or_insert(err);
        }
        if let Some((rate, eta)) = meter.tick(64) {
            print!(
                "\r{} / {} trees rewritten ({rate:.1} trees/sec), ETA: {}      ",
                meter.done,
                meter.total,
                fmt_duration(eta)
            );
            let _ = std::io::stdout().flush();
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    println!(
        "\nTree rewrite completed in {} ({:.1} trees/sec)",
        fmt_duration(meter.elapsed()),
        meter.overall_rate()
    );
    Ok(())
}

/// Phase 2: rebuilds the commit chain serially, oldest first.
///
/// Each commit's tree hash is mapped through the phase-1 results and its
/// parent pointer is relinked to the previously rewritten commit.
///
/// # Returns
/// The rewritten hash of the last commit, i.e. the new branch tip.
pub fn rewrite_commits(revs: &[Sha1], mangler: &Mangler) -> Result<Sha1> {
    let opts = mangler.opts();
    let mut meter = RateMeter::new(revs.len());
    // original and rewritten hash of the previous commit
    let mut prev: Option<(Sha1, Sha1)> = None;

    for &rev in revs {
        let (objtype, payload) = objects::read_obj(&rev, &opts.orig_objects)?;
        if objtype != ObjType::Commit {
            return Err(Error::corrupt(
                &rev,
                format!("expected commit, found {}", objtype.as_str()),
            ));
        }
        let new_payload = relink(rev, &payload, mangler, prev)?;
        let sha1 = objects::write_obj(ObjType::Commit, &new_payload, &opts.new_objects)?;
        debug!(old = %rev, new = %sha1, "rewrote commit");
        prev = Some((rev, sha1));

        if let Some((rate, eta)) = meter.tick(100) {
            print!(
                "\r{} / {} commits rewritten ({rate:.1} commits/sec), ETA: {}      ",
                meter.done,
                meter.total,
                fmt_duration(eta)
            );
            let _ = std::io::stdout().flush();
        }
    }
    println!();

    prev.map(|(_, tip)| tip)
        .ok_or_else(|| Error::InvariantViolated("no revisions to rewrite".to_string()))
}

/// Rebuilds one commit payload around the rewritten tree and parent.
///
/// The prefix layout of a canonical commit is fixed: `tree ` + 40 hex +
/// `\n`, then an optional `parent ` line of the same shape. Every literal
/// is validated before the offsets are trusted. Whatever follows the
/// rewritten prefix (author, committer, message, signature) is preserved
/// byte for byte.
fn relink(
    rev: Sha1,
    payload: &[u8],
    mangler: &Mangler,
    prev: Option<(Sha1, Sha1)>,
) -> Result<Vec<u8>> {
    if payload.len() < 46 || &payload[0..5] != b"tree " || payload[45] != b'\n' {
        return Err(Error::corrupt(&rev, "commit does not begin with a tree line"));
    }
    let orig_tree = hex_field(&payload[5..45])
        .ok_or_else(|| Error::corrupt(&rev, "malformed tree hash"))?;
    let new_tree = mangler.rewritten_root(&orig_tree).ok_or_else(|| {
        Error::InvariantViolated(format!(
            "tree {orig_tree} of commit {rev} was never rewritten"
        ))
    })?;

    let mut out = Vec::with_capacity(payload.len());
    out.extend_from_slice(b"tree ");
    out.extend_from_slice(new_tree.hex().as_bytes());
    out.push(b'\n');

    match prev {
        None => {
            if payload[46..].starts_with(b"parent") {
                return Err(Error::InvariantViolated(format!(
                    "first commit {rev} has a parent"
                )));
            }
            out.extend_from_slice(&payload[46..]);
        }
        Some((expected_parent, rewritten_parent)) => {
            if payload.len() < 94 || &payload[46..53] != b"parent " || payload[93] != b'\n' {
                return Err(Error::corrupt(&rev, "commit is missing its parent line"));
            }
            let parent = hex_field(&payload[53..93])
                .ok_or_else(|| Error::corrupt(&rev, "malformed parent hash"))?;
            if parent != expected_parent {
                return Err(Error::InvariantViolated(format!(
                    "commit {rev} lists parent {parent}, expected {expected_parent}"
                )));
            }
            if payload[94..].starts_with(b"parent ") {
                return Err(Error::InvariantViolated(format!(
                    "commit {rev} is a merge, history is not linear"
                )));
            }
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(rewritten_parent.hex().as_bytes());
            out.push(b'\n');
            out.extend_from_slice(&payload[94..]);
        }
    }
    Ok(out)
}

fn hex_field(bytes: &[u8]) -> Option<Sha1> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| Sha1::from_hex(s).ok())
}
