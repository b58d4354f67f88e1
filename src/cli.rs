use std::{fs, num::NonZeroUsize, path::PathBuf, sync::Arc, thread};

use clap::Parser;

use gitcs::{config::Options, mangle::Mangler, revlist, rewrite, Error, Result};

/// Rewrite a linear git history, moving binary assets under a target
/// subtree out to an external object store.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Pre-recorded rev-list output (`commit <hex>` / `<tree hex>` lines,
    /// oldest first). Without it, the listing is produced by running
    /// `git rev-list` on the current repository.
    revlist: Option<PathBuf>,

    /// Branch to enumerate when no listing file is given.
    #[arg(long, default_value = "master")]
    branch: String,

    /// Directory receiving the rewritten loose objects.
    #[arg(long)]
    new_objects: PathBuf,

    /// Staging directory for extracted binaries, one `<hex>.blob` each.
    #[arg(long)]
    staging: PathBuf,

    /// Subtree name suffix that marks the asset directory, e.g. `Tests`.
    #[arg(long)]
    subtree_suffix: String,

    /// Bucket URI written into pointer blobs, e.g. `gs://blink-gitcs`.
    #[arg(long)]
    uri_prefix: String,

    /// Worker threads for the tree phase.
    #[arg(long, short = 'j', default_value_t = default_jobs())]
    jobs: usize,

    /// Skip writes into the staging directory; binaries are still counted.
    #[arg(long)]
    skip_staging: bool,
}

fn default_jobs() -> usize {
    2 * thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

impl Cli {
    /// Runs the program: enumerate, rewrite trees in parallel, rewrite
    /// commits serially, report the new tip.
    pub fn run(&self) -> Result<()> {
        let opts = Options {
            orig_objects: revlist::origin_objects_dir()?,
            new_objects: self.new_objects.clone(),
            staging: self.staging.clone(),
            subtree_suffix: self.subtree_suffix.clone(),
            uri_prefix: self.uri_prefix.clone(),
            jobs: self.jobs.max(1),
            skip_staging: self.skip_staging,
        };

        println!("New git objects: {}", opts.new_objects.display());
        fs::create_dir_all(&opts.new_objects)?;
        println!("Orig objects: {}", opts.orig_objects.display());
        if opts.skip_staging {
            println!("WARNING: omitting writes into the staging area.");
        } else {
            println!("Staging area: {}", opts.staging.display());
            fs::create_dir_all(&opts.staging)?;
        }
        println!();

        let revs = match &self.revlist {
            Some(path) => {
                println!("Reading cached rev-list + trees from {}", path.display());
                revlist::from_file(path)?
            }
            None => {
                println!(
                    "Running git rev-list on {}, this might take a while",
                    self.branch
                );
                revlist::from_git(&self.branch)?
            }
        };
        if revs.is_empty() {
            return Err(Error::InvariantViolated("no revisions to rewrite".to_string()));
        }
        println!("Got {} revisions to rewrite", revs.len());

        let mangler = Arc::new(Mangler::new(opts));
        let trees: Vec<_> = revs.iter().map(|r| r.tree).collect();
        let commits: Vec<_> = revs.iter().map(|r| r.commit).collect();

        println!("\nStep 1: rewriting trees in parallel");
        rewrite::rewrite_trees(&trees, &mangler)?;
        println!(
            "Extracted {} files into {}",
            mangler.extracted_count(),
            self.staging.display()
        );

        println!("\nStep 2: rewriting commits serially");
        let tip = rewrite::rewrite_commits(&commits, &mangler)?;

        println!(
            "\nYour new HEAD is {tip} (which replaced {})",
            commits[commits.len() - 1]
        );
        println!("You should now run: git fsck {tip}");
        Ok(())
    }
}
