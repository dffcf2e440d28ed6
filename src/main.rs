use anyhow::Context as _;
use clap::Parser;
use config::{Options, Settings};
use db::TimestampStore;
use destination::{ConflictPolicy, Prepared};
use export::{Format, Statistics, export};
use jiff::Timestamp;
use model::{Candidate, Selection};
use rand::SeedableRng as _;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan, writer::MakeWriterExt},
    layer::SubscriberExt as _,
};

mod config;
mod db;
mod destination;
mod discover;
mod error;
mod export;
mod model;

/// Randomly pick files from a set of folders and copy them into a single
/// destination folder. Picked files are remembered, so repeat runs can skip
/// files that were picked recently.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    /// Folders to pick files from, including all their sub-folders.
    #[arg(
        value_name = "DIR",
        required_unless_present_any = [
            "config",
            "dump_store",
            "dump_configuration",
            "store_statistics",
            "reset_store",
        ]
    )]
    folders: Vec<PathBuf>,

    /// Number of files to pick [default: 10].
    #[arg(short = 'N', long)]
    number: Option<usize>,

    /// Copy the picked files into DIR. Without it, the picked files are only listed.
    #[arg(long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Only consider files with this suffix, e.g. `.jpg`. Case insensitive.
    #[arg(long, value_name = "SUFFIX", num_args = 1.., conflicts_with = "mime_type")]
    suffix: Vec<String>,

    /// Only consider files of this MIME type, e.g. `image/jpeg`.
    #[arg(long, value_name = "TYPE", num_args = 1..)]
    mime_type: Vec<String>,

    /// Delete the files in an existing destination instead of moving them aside.
    #[arg(long, conflicts_with = "append")]
    delete_existing: bool,

    /// Add the picked files to an existing destination.
    #[arg(long)]
    append: bool,

    /// Only list the picked files, don't copy them or record timestamps.
    #[arg(long)]
    dry_run: bool,

    /// Don't pick files that were picked less than DURATION ago, e.g. `3d` or `2w`.
    #[arg(long, value_name = "DURATION")]
    block_selection: Option<String>,

    /// Seed for the random number generator, to reproduce a selection.
    #[arg(long)]
    seed: Option<u64>,

    /// The path to the timestamp database.
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Read options from a YAML configuration file. Command line options win.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the resolved configuration as YAML and exit.
    #[arg(long)]
    dump_configuration: bool,

    /// Write the timestamp database to FILE (`-` for stdout) and exit.
    #[arg(long, value_name = "FILE")]
    dump_store: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    dump_format: Format,

    /// Print the number of records, file size and oldest pick of the timestamp database and exit.
    #[arg(long)]
    store_statistics: bool,

    /// Start over with an empty timestamp database. Exits unless folders are given.
    #[arg(long)]
    reset_store: bool,

    /// Print a line for every copied file.
    #[arg(long)]
    verbose: bool,

    /// Debug output.
    #[arg(long)]
    debug: bool,
}

fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
    (!values.is_empty()).then(|| values.to_vec())
}

impl Args {
    /// The options given on the command line, as a configuration layer.
    fn settings(&self) -> Settings {
        let destination_option = if self.delete_existing {
            Some(ConflictPolicy::Delete)
        } else if self.append {
            Some(ConflictPolicy::Append)
        } else {
            None
        };

        Settings {
            folder: non_empty(&self.folders),
            number: self.number,
            destination: self.destination.clone(),
            destination_option,
            suffix: non_empty(&self.suffix),
            mime_type: non_empty(&self.mime_type),
            block_selection: self.block_selection.clone(),
            database: self.database.clone(),
            seed: self.seed,
        }
    }
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let file_layer = std::env::home_dir()
        .map(|home| home.join(".cache/pick-files/"))
        .and_then(|dir| {
            RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix("log")
                .build(&dir)
                .inspect_err(|err| eprintln!("Not logging to {}: {err}", dir.display()))
                .ok()
        })
        .map(|appender| {
            fmt::Layer::default()
                .with_writer(appender.with_max_level(Level::TRACE))
                .json()
        });

    let default_level = if debug { "debug" } else { "info" };
    let stderr_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_span_events(if debug { FmtSpan::ACTIVE } else { FmtSpan::NONE })
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer),
    )
    .context("Unable to set global tracing subscriber")?;

    Ok(())
}

/// Drops candidates picked less than `window` before `now`.
fn drop_recently_picked(
    candidates: Vec<Candidate>,
    store: &TimestampStore,
    window: Duration,
    now: Timestamp,
) -> anyhow::Result<Vec<Candidate>> {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    let mut kept = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let Some(record) = store.lookup(&candidate.key())? else {
            kept.push(candidate);
            continue;
        };

        match record.timestamp.parse::<Timestamp>() {
            Ok(last_picked) => {
                let ago = now.as_second() - last_picked.as_second();
                if ago < window {
                    tracing::debug!(%candidate, ago, "picked recently, skipping");
                    continue;
                }
            }
            Err(err) => {
                tracing::warn!(%candidate, timestamp = %record.timestamp, %err, "unreadable timestamp");
            }
        }

        kept.push(candidate);
    }

    Ok(kept)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Started pick-files");

    let file_settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let options = Options::resolve(args.settings().over(file_settings))?;

    if args.dump_configuration {
        print!("{}", options.to_yaml()?);
        return Ok(());
    }

    let mut store = TimestampStore::new(options.database.as_ref());

    if args.reset_store {
        store.reset()?;
        println!("reset timestamp store {}", store.path().display());
        if options.folders.is_empty() {
            return Ok(());
        }
    }

    if args.store_statistics {
        store.initialize()?;
        print!("{}", Statistics::gather(&store)?);
        return Ok(());
    }

    if let Some(output) = &args.dump_store {
        tracing::info!(database = ?store.path(), "dumping timestamp store");
        store.initialize()?;
        export(output, &store, args.dump_format)?;
        return Ok(());
    }

    if options.folders.is_empty() {
        anyhow::bail!("No folders were specified");
    }

    tracing::info!(
        number = options.number,
        filter = ?options.filter,
        folders = ?options.folders,
        destination = ?options.destination,
        "will pick files"
    );

    let mut candidates = discover::enumerate(&options.folders, options.filter.as_ref())?;

    if let Some(window) = options.block_selection {
        tracing::info!(?window, "blocking recently picked files");
        store.initialize()?;
        candidates = drop_recently_picked(candidates, &store, window, Timestamp::now())?;
    }

    let seed = options.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, "seeded random number generator");
    let mut rng = wyrand::WyRand::seed_from_u64(seed);

    let picked = match model::sample(candidates, options.number, &mut rng) {
        Selection::NoCandidates => {
            println!("could not find any files to select from");
            return Ok(());
        }
        Selection::Picked(picked) => picked,
    };

    let destination = match &options.destination {
        Some(_) if args.dry_run => {
            tracing::info!("dry-run, skipping copying of files");
            None
        }
        destination => destination.as_deref(),
    };

    let Some(destination) = destination else {
        for candidate in &picked {
            println!("{candidate}");
        }
        return Ok(());
    };

    copy_picked(
        &picked,
        destination,
        options.conflict_policy,
        &mut store,
        args.verbose,
    )
}

/// Copies `picked` into `destination` and records when each file was picked.
///
/// The destination is left alone when there is nothing to copy.
fn copy_picked(
    picked: &[Candidate],
    destination: &Path,
    policy: ConflictPolicy,
    store: &mut TimestampStore,
    verbose: bool,
) -> anyhow::Result<()> {
    let _span = tracing::info_span!("copying", ?destination).entered();

    if picked.is_empty() {
        tracing::info!("nothing picked, leaving destination alone");
        return Ok(());
    }

    store.initialize()?;

    match destination::prepare(destination, policy)? {
        Prepared::MovedAside { backup, moved } => {
            println!("moved {moved} old file(s) to {}", backup.display());
        }
        Prepared::Cleared { removed } => {
            println!("deleted {removed} old file(s) in {}", destination.display());
        }
        Prepared::Created | Prepared::Appending => {}
    }

    for candidate in picked {
        if verbose {
            println!("copying {candidate}");
        }

        let target = destination::copy_into(destination, &candidate.path)
            .with_context(|| format!("Could not copy {candidate}"))?;
        tracing::debug!(?target, kind = ?candidate.kind, "copied");

        store.store(&candidate.key(), &Timestamp::now().to_string())?;
    }

    tracing::info!(count = picked.len(), "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn folders_are_required() {
        assert!(Args::try_parse_from(["pick-files"]).is_err());
    }

    #[test]
    fn parses_folders_and_defaults() {
        let args = Args::try_parse_from(["pick-files", "/images-1", "/images-2"]).unwrap();
        assert_eq!(
            args.folders,
            [PathBuf::from("/images-1"), PathBuf::from("/images-2")]
        );

        let options = Options::resolve(args.settings()).unwrap();
        assert_eq!(options.number, config::DEFAULT_NUMBER);
        assert_eq!(options.destination, None);
        assert_eq!(options.conflict_policy, ConflictPolicy::MoveAside);
    }

    #[test]
    fn parses_grouped_suffixes() {
        let args = Args::try_parse_from([
            "pick-files", "-N", "3", "--suffix", ".jpg", ".GIF", "--suffix", "png", "--",
            "photos",
        ])
        .unwrap();

        let options = Options::resolve(args.settings()).unwrap();
        assert_eq!(options.number, 3);
        assert_eq!(options.folders, [PathBuf::from("photos")]);
        assert_eq!(
            options.filter,
            Some(model::TypeFilter::Suffixes(vec![
                ".jpg".into(),
                ".gif".into(),
                ".png".into()
            ]))
        );
    }

    #[test]
    fn delete_existing_and_append_conflict() {
        assert!(
            Args::try_parse_from(["pick-files", "--delete-existing", "--append", "dir"]).is_err()
        );

        let args = Args::try_parse_from(["pick-files", "--delete-existing", "dir"]).unwrap();
        assert_eq!(
            args.settings().destination_option,
            Some(ConflictPolicy::Delete)
        );
    }

    #[test]
    fn store_maintenance_needs_no_folders() {
        for flag in ["--store-statistics", "--reset-store", "--dump-configuration"] {
            assert!(Args::try_parse_from(["pick-files", flag]).is_ok(), "{flag}");
        }

        let args = Args::try_parse_from(["pick-files", "--dump-store", "-", "--dump-format", "csv"])
            .unwrap();
        assert_eq!(args.dump_format, Format::Csv);
    }

    #[test]
    fn empty_pick_leaves_destination_alone() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out");
        std::fs::create_dir(&destination).unwrap();
        std::fs::write(destination.join("old.jpg"), "old").unwrap();
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));

        copy_picked(&[], &destination, ConflictPolicy::Delete, &mut store, false).unwrap();

        assert_eq!(
            std::fs::read_to_string(destination.join("old.jpg")).unwrap(),
            "old"
        );
        assert!(!dir.path().join("db.json").exists());
    }

    #[test]
    fn copies_and_records_picked_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photos/a.jpg");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, "a").unwrap();
        let destination = dir.path().join("out");
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));
        let picked = [Candidate {
            path: source.clone(),
            kind: None,
        }];

        copy_picked(&picked, &destination, ConflictPolicy::MoveAside, &mut store, false).unwrap();

        assert_eq!(std::fs::read_to_string(destination.join("a.jpg")).unwrap(), "a");
        let record = store.lookup(&picked[0].key()).unwrap().unwrap();
        assert!(record.timestamp.parse::<Timestamp>().is_ok());
    }

    #[test]
    fn overlapping_folders_never_pick_a_file_twice() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("a");
        std::fs::create_dir_all(folder.join("sub")).unwrap();
        std::fs::write(folder.join("sub/only.jpg"), "").unwrap();

        let candidates = discover::enumerate(&[folder.clone(), folder.join("sub")], None).unwrap();
        let Selection::Picked(picked) =
            model::sample(candidates, 10, &mut wyrand::WyRand::seed_from_u64(0))
        else {
            panic!("expected a pick");
        };

        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn recently_picked_files_are_blocked() {
        let dir = TempDir::new().unwrap();
        let mut store = TimestampStore::new(Some(dir.path().join("db.json")));
        store.initialize().unwrap();

        let now = Timestamp::from_second(1_700_000_000).unwrap();
        let hour_ago = Timestamp::from_second(1_700_000_000 - 3600).unwrap();
        let week_ago = Timestamp::from_second(1_700_000_000 - 7 * 86400).unwrap();
        store.store("recent.jpg", &hour_ago.to_string()).unwrap();
        store.store("old.jpg", &week_ago.to_string()).unwrap();
        store.store("garbled.jpg", "yesterday-ish").unwrap();

        let candidates = ["recent.jpg", "old.jpg", "garbled.jpg", "new.jpg"]
            .into_iter()
            .map(|p| Candidate {
                path: p.into(),
                kind: None,
            })
            .collect();

        let kept = drop_recently_picked(candidates, &store, Duration::from_secs(86400), now)
            .unwrap()
            .into_iter()
            .map(|c| c.key())
            .collect::<Vec<_>>();

        assert_eq!(kept, ["old.jpg", "garbled.jpg", "new.jpg"]);
    }
}
