use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use pairkeep_core::fsio::DiskFs;
use pairkeep_core::progress::Progress;
use pairkeep_core::report::Action;
use pairkeep_core::{create, process_pair, repair, verify, Direction, PairReport, SyncContext, SyncSettings};

#[derive(Parser)]
#[command(name = "pairkeep", version, about = "Keep file pairs in sync and repair damaged blocks")]
struct Cli {
    #[command(flatten)]
    opts: SettingsArgs,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct SettingsArgs {
    /// JSON settings file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Never write to the first location
    #[arg(long, global = true)]
    first_read_only: bool,
    /// Test without repairing
    #[arg(long, global = true)]
    no_repair: bool,
    /// Always scan, ignoring the recently-tested markers
    #[arg(long, global = true)]
    force: bool,
    /// Log a progress line every few seconds
    #[arg(long, global = true)]
    progress: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Sync two directory trees pair by pair
    Sync {
        first: PathBuf,
        second: PathBuf,
        /// Let newer files flow in both directions
        #[arg(long)]
        bidirectional: bool,
        /// First always overwrites a differing second
        #[arg(long)]
        overwrite: bool,
        /// Delete files that exist only in the second tree
        #[arg(long)]
        delete_orphans: bool,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long, default_value_t = 1)]
        jobs: usize,
    },
    /// Build the ledger of a file
    Create { file: PathBuf },
    /// Test a file against its ledger
    Test { file: PathBuf },
    /// Test a file and repair it in place
    Repair { file: PathBuf },
    /// Copy a file, patching damaged blocks from its ledger
    Copy {
        source: PathBuf,
        target: PathBuf,
        /// Also write ledger fixes back into the source
        #[arg(long)]
        repair_source: bool,
    },
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init()
        .map_err(|e| anyhow::anyhow!("init logging: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;
    let mut settings = load_settings(&cli.opts)?;
    match &cli.cmd {
        Cmd::Sync { bidirectional, overwrite, delete_orphans, .. } => {
            if *bidirectional {
                settings.direction = Direction::Bidirectional;
            }
            settings.sync_mode &= !*overwrite;
            settings.delete_orphans |= *delete_orphans;
        }
        _ => {}
    }
    settings.validate()?;

    let progress = Progress::new(cli.opts.progress);
    let cx = SyncContext::new(Arc::new(DiskFs), settings).with_progress(progress.clone());
    progress.start();
    let res = run(&cx, cli.cmd);
    progress.stop();
    res
}

fn run(cx: &SyncContext, cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Sync { first, second, include, exclude, jobs, .. } => {
            sync(cx, &first, &second, &include, &exclude, jobs)
        }
        Cmd::Create { file } => {
            let ledger = create::create_saved_info(cx, &file)
                .with_context(|| format!("create ledger for {}", file.display()))?;
            println!("Created ledger for {} ({} blocks)", file.display(), ledger.block_count());
            Ok(())
        }
        Cmd::Test { file } => {
            let r = verify::test_single_file(cx, &file, true)
                .with_context(|| format!("test {}", file.display()))?;
            print_report(&file, &r)
        }
        Cmd::Repair { file } => {
            let r = repair::test_and_repair_single_file(cx, &file)
                .with_context(|| format!("repair {}", file.display()))?;
            print_report(&file, &r)
        }
        Cmd::Copy { source, target, repair_source } => {
            let r = repair::copy_repair_single_file(cx, &source, &target, repair_source)
                .with_context(|| format!("copy {} -> {}", source.display(), target.display()))?;
            print_report(&target, &r)
        }
    }
}

fn load_settings(opts: &SettingsArgs) -> Result<SyncSettings> {
    let mut s = match &opts.config {
        Some(p) => SyncSettings::load(p).with_context(|| format!("load settings {}", p.display()))?,
        None => SyncSettings::default(),
    };
    s.first_read_only |= opts.first_read_only;
    if opts.no_repair {
        s.repair_files = false;
    }
    if opts.force {
        s.skip_recently_tested = false;
    }
    Ok(s)
}

fn print_report(path: &Path, r: &pairkeep_core::Report) -> Result<()> {
    if r.skipped {
        println!("SKIPPED {}", path.display());
        return Ok(());
    }
    println!("{} {}", r.outcome, path.display());
    if r.rebuild_ledger {
        eprintln!("Ledger of {} should be rebuilt", path.display());
    }
    if !r.outcome.is_healthy() {
        bail!("{} is damaged", path.display());
    }
    Ok(())
}

fn build_globset(includes: &[String], excludes: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut incb = GlobSetBuilder::new();
    let mut excb = GlobSetBuilder::new();
    if includes.is_empty() {
        incb.add(Glob::new("**/*")?);
    }
    for g in includes {
        incb.add(Glob::new(g)?);
    }
    for g in excludes {
        excb.add(Glob::new(g)?);
    }
    Ok((incb.build()?, excb.build()?))
}

/// Relative paths of the regular files under `root`, minus ledger
/// directories and staging files.
/// `<name>.tmp` next to an existing `<name>` is an interrupted copy, not user data.
fn is_staging_leftover(path: &Path) -> bool {
    path.extension().is_some_and(|x| x == "tmp") && path.with_extension("").is_file()
}

fn list_relative(root: &Path, ledger_dir: &str, inc: &GlobSet, exc: &GlobSet) -> Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    if !root.exists() {
        return Ok(out);
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ledger_dir));
    for e in walker {
        let e = e.with_context(|| format!("walk {}", root.display()))?;
        if !e.file_type().is_file() || is_staging_leftover(e.path()) {
            continue;
        }
        let rel = pathdiff::diff_paths(e.path(), root).unwrap_or_else(|| e.path().to_path_buf());
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if inc.is_match(&rel_str) && !exc.is_match(&rel_str) {
            out.insert(rel);
        }
    }
    Ok(out)
}

fn sync(cx: &SyncContext, first: &Path, second: &Path, include: &[String], exclude: &[String], jobs: usize) -> Result<()> {
    let (inc, exc) = build_globset(include, exclude)?;
    let ledger_dir = cx.settings.ledger_dir.as_str();
    let mut rels = list_relative(first, ledger_dir, &inc, &exc)?;
    rels.extend(list_relative(second, ledger_dir, &inc, &exc)?);
    let rels: Vec<PathBuf> = rels.into_iter().collect();
    info!(pairs = rels.len(), first = %first.display(), second = %second.display(), "starting sync");

    cx.progress.set_stage("sync");
    let run = |rel: &PathBuf| -> (PathBuf, pairkeep_core::Result<PairReport>) {
        (rel.clone(), process_pair(cx, &first.join(rel), &second.join(rel)))
    };
    let results: Vec<_> = if jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build().context("build thread pool")?;
        pool.install(|| rels.par_iter().map(run).collect())
    } else {
        rels.iter().map(run).collect()
    };

    let (mut copied, mut repaired, mut problems) = (0usize, 0usize, 0usize);
    for (rel, res) in &results {
        match res {
            Ok(r) => {
                if r.contains(|a| matches!(a, Action::Copied { .. })) {
                    copied += 1;
                }
                if r.contains(|a| matches!(a, Action::Repaired { .. })) {
                    repaired += 1;
                }
                if !r.is_healthy() {
                    problems += 1;
                    eprintln!("Problem: {}", rel.display());
                }
            }
            Err(e) => {
                problems += 1;
                eprintln!("Error: {}: {}", rel.display(), e);
            }
        }
    }
    println!("Pairs {}, copied {}, repaired {}, problems {}", results.len(), copied, repaired, problems);
    if problems > 0 {
        bail!("{} pair(s) need attention", problems);
    }
    Ok(())
}
