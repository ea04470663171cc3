// src/bin/cli.rs
//
//! `recdl`: index, verify and read TFRecord containers.
//!
//! Examples:
//! ```bash
//! recdl index  data/train-*.tfrecord                 # writes data/train-000.tfrecord.idx ...
//! recdl index  data/train-*.tfrecord --format text --verify
//! recdl verify data/train-000.tfrecord
//! recdl read   data/train-*.tfrecord -f image:bytes -f label:int64 -f bbox:float32:4 \
//!              --batch-size 64 --epochs 2 --shuffle --seed 7 --workers 8
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recdlio::constants::{DEFAULT_BATCH_SIZE, INDEX_FILE_EXTENSION};
use recdlio::index::{write_index_for_container, ContainerScanner};
use recdlio::{
    open_tfrecord_reader, DType, FeatureSpec, FieldSpec, IndexFormat, IndexSource, ReaderOptions,
    ReaderStats,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexFormatArg {
    Binary,
    Text,
}

impl From<IndexFormatArg> for IndexFormat {
    fn from(f: IndexFormatArg) -> Self {
        match f {
            IndexFormatArg::Binary => IndexFormat::Binary,
            IndexFormatArg::Text => IndexFormat::Text,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Write a `<container>.idx` index next to each container.
    Index {
        /// Container files or glob patterns.
        #[arg(required = true)]
        containers: Vec<String>,

        #[arg(long, value_enum, default_value = "binary")]
        format: IndexFormatArg,

        /// Validate record checksums while scanning.
        #[arg(long)]
        verify: bool,
    },

    /// Scan containers with checksum validation and report record counts.
    Verify {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Run the prefetching reader over containers and report throughput.
    Read {
        #[arg(required = true)]
        containers: Vec<String>,

        /// Precomputed index files, one per container in the same order.
        #[arg(long = "index")]
        index_files: Vec<PathBuf>,

        /// Layout of the `--index` files.
        #[arg(long, value_enum, default_value = "binary")]
        index_format: IndexFormatArg,

        /// Feature to decode as `name:dtype[:shape]`; dtype is bytes|int64|float32,
        /// shape is `2,3` (fixed), `*` (variable) or `*N` (variable, at most N).
        #[arg(short = 'f', long = "feature", required = true)]
        features: Vec<String>,

        #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(short = 'e', long, default_value_t = 1)]
        epochs: u64,

        #[arg(long)]
        shuffle: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// Worker threads, 0 for one per CPU.
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Prefetch depth in samples.
        #[arg(long)]
        depth: Option<usize>,

        /// Skip corrupt or unparseable records instead of failing.
        #[arg(long)]
        lenient: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.cmd {
        Command::Index { containers, format, verify } => {
            index_cmd(&expand_paths(&containers)?, format.into(), verify)
        }
        Command::Verify { containers } => verify_cmd(&expand_paths(&containers)?),
        Command::Read {
            containers,
            index_files,
            index_format,
            features,
            batch_size,
            epochs,
            shuffle,
            seed,
            workers,
            depth,
            lenient,
        } => {
            let containers = expand_paths(&containers)?;
            let source = if index_files.is_empty() {
                IndexSource::Scan { containers, verify_checksums: !lenient }
            } else {
                IndexSource::Files { containers, index_files, format: index_format.into() }
            };

            let base = ReaderOptions::from_env().context("reading RECDLIO_* environment")?;
            let opts = apply_read_flags(base, shuffle, seed, workers, depth, lenient);

            let fields = features
                .iter()
                .map(|f| parse_feature(f))
                .collect::<Result<Vec<_>>>()?;
            let spec = FeatureSpec::new(fields)?;
            read_cmd(&source, spec, &opts, batch_size, epochs).await.map(|_| ())
        }
    }
}

/// Expand glob patterns; plain paths pass through unchanged.
fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in patterns {
        if p.contains('*') || p.contains('?') || p.contains('[') {
            let before = out.len();
            for entry in glob::glob(p).with_context(|| format!("bad glob pattern '{}'", p))? {
                match entry {
                    Ok(path) if path.is_file() => out.push(path),
                    Ok(_) => {}
                    Err(e) => warn!("Glob error: {}", e),
                }
            }
            if out.len() == before {
                bail!("pattern '{}' matched no files", p);
            }
        } else {
            out.push(PathBuf::from(p));
        }
    }
    Ok(out)
}

/// Layer the `read` flags over options taken from the environment.
fn apply_read_flags(
    mut opts: ReaderOptions,
    shuffle: bool,
    seed: Option<u64>,
    workers: Option<usize>,
    depth: Option<usize>,
    lenient: bool,
) -> ReaderOptions {
    if shuffle {
        let seed = seed.unwrap_or(opts.shuffle_seed);
        opts = opts.shuffle(true, seed);
    }
    if let Some(n) = workers {
        opts = opts.worker_count(n);
    }
    if let Some(d) = depth {
        opts = opts.prefetch_depth(d);
    }
    if lenient {
        opts = opts.strict_checksums(false);
    }
    opts
}

fn index_path_for(container: &Path) -> PathBuf {
    let mut s = container.as_os_str().to_owned();
    s.push(".");
    s.push(INDEX_FILE_EXTENSION);
    PathBuf::from(s)
}

fn index_cmd(containers: &[PathBuf], format: IndexFormat, verify: bool) -> Result<()> {
    for container in containers {
        let index_path = index_path_for(container);
        let n = write_index_for_container(container, &index_path, format, verify)
            .with_context(|| format!("indexing {}", container.display()))?;
        println!("{}: {} records -> {}", container.display(), n, index_path.display());
    }
    Ok(())
}

fn verify_cmd(containers: &[PathBuf]) -> Result<()> {
    let mut total = 0usize;
    for container in containers {
        let file = File::open(container).with_context(|| format!("opening {}", container.display()))?;
        let spans = ContainerScanner::new(BufReader::new(file), container)
            .verify_checksums(true)
            .scan()
            .with_context(|| format!("verifying {}", container.display()))?;
        let bytes: u64 = spans.iter().map(|s| s.size).sum();
        println!("{}: {} records, {} bytes OK", container.display(), spans.len(), bytes);
        total += spans.len();
    }
    if containers.len() > 1 {
        println!("total: {} records in {} containers", total, containers.len());
    }
    Ok(())
}

/// Parse `name:dtype[:shape]`.
fn parse_feature(arg: &str) -> Result<FieldSpec> {
    let mut parts = arg.splitn(3, ':');
    let name = parts.next().filter(|n| !n.is_empty());
    let dtype = parts.next();
    let (Some(name), Some(dtype)) = (name, dtype) else {
        bail!("feature '{}' must look like name:dtype[:shape]", arg);
    };
    let dtype: DType = dtype.parse().with_context(|| format!("feature '{}'", arg))?;

    let field = match parts.next() {
        None | Some("") => FieldSpec::scalar(name, dtype),
        Some("*") => FieldSpec::var_len(name, dtype),
        Some(s) if s.starts_with('*') => {
            let max: usize = s[1..].parse().with_context(|| format!("bad max length in '{}'", arg))?;
            FieldSpec::var_len(name, dtype).max_len(max)
        }
        Some(s) => {
            let dims = s
                .split(',')
                .map(|d| d.trim().parse::<usize>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("bad shape in '{}'", arg))?;
            FieldSpec::fixed(name, dtype, dims)
        }
    };
    Ok(field)
}

async fn read_cmd(
    source: &IndexSource,
    spec: FeatureSpec,
    opts: &ReaderOptions,
    batch_size: usize,
    epochs: u64,
) -> Result<ReaderStats> {
    if epochs == 0 {
        return Ok(ReaderStats::default());
    }
    let reader = Arc::new(open_tfrecord_reader(source, spec, opts).context("opening reader")?);
    info!(
        "reading with {} workers, prefetch depth {}",
        reader.worker_count(),
        reader.prefetch_depth()
    );
    reader.start()?;

    let mut batches = reader.clone().into_stream(batch_size);
    let mut epoch = 0u64;
    let mut samples = 0u64;
    let mut epoch_start = Instant::now();
    let run_start = epoch_start;

    while let Some(batch) = batches.next().await {
        let batch = batch?;
        samples += batch.len() as u64;
        if batch.epoch_boundary {
            let elapsed = epoch_start.elapsed();
            println!(
                "epoch {}: {} samples in {} ({:.1} samples/s)",
                epoch,
                samples,
                humantime::format_duration(round_ms(elapsed)),
                samples as f64 / elapsed.as_secs_f64().max(1e-9)
            );
            epoch += 1;
            samples = 0;
            epoch_start = Instant::now();
            if epoch == epochs {
                reader.stop()?;
                break;
            }
        }
    }

    let stats = reader.stats();
    println!(
        "done: {} samples, {} epochs in {}; skipped {} corrupt, {} unparseable",
        stats.samples_delivered,
        stats.epochs_completed,
        humantime::format_duration(round_ms(run_start.elapsed())),
        stats.corrupt_skipped,
        stats.unparseable_skipped
    );
    Ok(stats)
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recdlio::parser::ExampleBuilder;
    use recdlio::{RecordWriter, Shape};
    use std::io::BufWriter;

    #[test]
    fn feature_args_parse() {
        let f = parse_feature("label:int64").unwrap();
        assert_eq!(f.dtype, DType::Int64);
        assert_eq!(f.shape, Shape::Scalar);

        let f = parse_feature("bbox:float32:2,4").unwrap();
        assert_eq!(f.shape, Shape::Fixed(vec![2, 4]));

        let f = parse_feature("tokens:int64:*16").unwrap();
        assert_eq!(f.shape, Shape::Variable { max_len: Some(16) });

        assert!(parse_feature("label").is_err());
        assert!(parse_feature("x:complex").is_err());
    }

    #[test]
    fn read_flags_override_environment_options() {
        let base = ReaderOptions::default().shuffle(false, 99);
        let opts = apply_read_flags(base.clone(), true, None, Some(3), Some(8), true);
        assert!(opts.shuffle);
        assert_eq!(opts.shuffle_seed, 99);
        assert_eq!(opts.worker_count, 3);
        assert_eq!(opts.prefetch_depth, 8);
        assert!(!opts.strict_checksums);

        let opts = apply_read_flags(base, true, Some(7), None, None, false);
        assert_eq!(opts.shuffle_seed, 7);
        assert!(opts.strict_checksums);
    }

    #[tokio::test]
    async fn read_stops_after_requested_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-0.tfrecord");
        let mut writer = RecordWriter::new(BufWriter::new(File::create(&path).unwrap()));
        for i in 0..10i64 {
            writer.write_record(&ExampleBuilder::new().int64("id", &[i]).build()).unwrap();
        }
        writer.finish().unwrap();

        let source = IndexSource::Scan { containers: vec![path], verify_checksums: true };
        let spec = FeatureSpec::new(vec![FieldSpec::int64("id")]).unwrap();
        // deep enough that a third epoch is already queued when the second ends
        let opts = ReaderOptions::default().worker_count(2).prefetch_depth(32);
        let stats = read_cmd(&source, spec, &opts, 4, 2).await.unwrap();
        assert_eq!(stats.epochs_completed, 2);
        assert_eq!(stats.samples_delivered, 20);
    }

    #[test]
    fn index_path_appends_extension() {
        assert_eq!(
            index_path_for(Path::new("/data/train-0.tfrecord")),
            PathBuf::from("/data/train-0.tfrecord.idx")
        );
    }
}
