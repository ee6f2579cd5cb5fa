//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{Config, RunConfig, StoreTarget};
use crate::report::RunReport;
use crate::sampler::Sampler;
use crate::store::{InMemoryStore, S3Store, SharedStore};
use crate::upload::Uploader;
use crate::{observability, pool};

/// Synthetic upload load generator for S3-compatible object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c', default = "PathBuf::from(\"loadgen.yaml\")")]
    config: PathBuf,

    /// number of objects to upload
    #[argh(option, short = 'n', default = "1")]
    total: usize,

    /// print the version and exit
    #[argh(switch)]
    version: bool,
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if args.version {
        println!("loadgen {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(Some(&args.config))
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let config = config.validate().context("invalid configuration")?;

    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadgen-rt")
        .enable_all()
        .worker_threads(config.workers.min(threads))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    let report = runtime.block_on(generate(config, args.total))?;
    tracing::info!(
        successes = report.successes(),
        failures = report.failure_count(),
        "run finished"
    );

    Ok(())
}

fn create_store(target: StoreTarget) -> SharedStore {
    match target {
        StoreTarget::S3(credential) => Arc::new(S3Store::new(credential.to_store_config())),
        StoreTarget::InMemory => {
            tracing::warn!("dry run, objects are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    }
}

async fn generate(config: RunConfig, total: usize) -> Result<RunReport> {
    let run_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_secs();

    let mut sampler = Sampler::builder(config.bucket)
        .run_timestamp(run_timestamp)
        .sizes(config.file_sizes)
        .delete_after_days(config.delete_after_days);
    if let Some(seed) = config.seed {
        sampler = sampler.seed(seed);
    }

    let store = create_store(config.store);
    tracing::info!(store = store.name(), run_timestamp, total, "starting run");
    let uploader = Uploader::new(store, config.upload);

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(format!("Uploading {total} objects:"));
    bar.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let outcomes = pool::run(total, config.workers, sampler.build().tasks(total), uploader).await;
    let duration = start.elapsed();
    bar.finish_and_clear();

    let report = RunReport::from_outcomes(&outcomes);
    report.print(duration);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PartCapPolicy;
    use crate::upload::UploadSettings;

    #[test]
    fn parses_arguments() {
        let args = Args::from_args(&["loadgen"], &["-c", "other.yaml", "-n", "100"]).unwrap();
        assert_eq!(args.config, PathBuf::from("other.yaml"));
        assert_eq!(args.total, 100);
        assert!(!args.version);

        let args = Args::from_args(&["loadgen"], &["--version"]).unwrap();
        assert!(args.version);
        assert_eq!(args.config, PathBuf::from("loadgen.yaml"));
        assert_eq!(args.total, 1);
    }

    #[tokio::test]
    async fn dry_run_generates_report() {
        let config = RunConfig {
            store: StoreTarget::InMemory,
            bucket: "bucket".into(),
            file_sizes: vec![1024, 10 * 1024],
            delete_after_days: vec!["0".into(), "7".into()],
            workers: 3,
            seed: Some(7),
            upload: UploadSettings {
                multipart_threshold: Some(4 * 1024),
                part_size: 3 * 1024,
                max_parts: None,
                part_cap_policy: PartCapPolicy::Truncate,
            },
        };

        let report = generate(config, 12).await.unwrap();
        assert_eq!(report.successes(), 12);
        assert_eq!(report.failure_count(), 0);
        assert_eq!(
            report.parts_uploaded,
            report.multipart_uploads * 4,
            "10K objects split into 3K parts"
        );
    }
}
