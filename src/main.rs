use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use censo_escolar::config::PipelineConfig;
use censo_escolar::ingestion::ParsePolicy;
use censo_escolar::observability::{CompositeObserver, FileObserver, LogObserver, PipelineObserver};
use censo_escolar::pipeline::Pipeline;
use censo_escolar::rating::ZeroDenominator;
use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ParsePolicyArg {
    Strict,
    Coerce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ZeroDenominatorArg {
    Zero,
    Skip,
}

/// Normalize a school-census extract into fact tables and rate every active school.
#[derive(Debug, Parser)]
#[command(name = "censo-escolar", version)]
struct Args {
    /// TOML run configuration; flags below override it.
    #[arg(long, short = 'c', value_name = "PATH", env = "CENSO_CONFIG")]
    config: Option<PathBuf>,

    /// Attribute dictionary (catalog) file.
    #[arg(long, value_name = "PATH")]
    dictionary: Option<PathBuf>,

    /// Raw census extract.
    #[arg(long, value_name = "PATH")]
    extract: Option<PathBuf>,

    /// Directory that receives Geral/, Infraestrutura/, Matricula/ and Rating/.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Region code to keep (e.g. AL).
    #[arg(long, value_name = "UF")]
    region: Option<String>,

    /// Census year to rate.
    #[arg(long, value_name = "N")]
    year: Option<i64>,

    #[arg(long, value_enum, value_name = "POLICY")]
    parse_policy: Option<ParsePolicyArg>,

    #[arg(long, value_enum, value_name = "POLICY")]
    zero_denominator: Option<ZeroDenominatorArg>,

    /// Only run the rating stage over previously written tables.
    #[arg(long)]
    skip_ingest: bool,

    /// Write a JSON run report here.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Append stage events to this file.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_path(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(p) = &self.dictionary {
            config.paths.dictionary.clone_from(p);
        }
        if let Some(p) = &self.extract {
            config.paths.extract.clone_from(p);
        }
        if let Some(p) = &self.output_dir {
            config.paths.output_dir.clone_from(p);
        }
        if let Some(r) = &self.region {
            config.filter.region.clone_from(r);
        }
        if let Some(y) = self.year {
            config.rating.census_year = y;
        }
        if let Some(p) = self.parse_policy {
            config.input.parse_policy = match p {
                ParsePolicyArg::Strict => ParsePolicy::Strict,
                ParsePolicyArg::Coerce => ParsePolicy::CoerceToNull,
            };
        }
        if let Some(z) = self.zero_denominator {
            config.rating.zero_denominator = match z {
                ZeroDenominatorArg::Zero => ZeroDenominator::Zero,
                ZeroDenominatorArg::Skip => ZeroDenominator::Skip,
            };
        }
        Ok(config)
    }

    fn observer(&self) -> Arc<dyn PipelineObserver> {
        match &self.log_file {
            Some(path) => Arc::new(CompositeObserver::new(vec![
                Arc::new(LogObserver),
                Arc::new(FileObserver::new(path)),
            ])),
            None => Arc::new(LogObserver),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(verbose > 0)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match args.load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(p) => p.with_observer(args.observer()),
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let result = if args.skip_ingest {
        pipeline.run_rating_only()
    } else {
        pipeline.run()
    };

    match result {
        Ok(report) => {
            info!(
                "done: {} schools rated, {} skipped",
                report.schools_rated,
                report.diagnostics.len()
            );
            if let Some(path) = &args.report {
                if let Err(e) = report.write_json(path) {
                    error!("failed to write run report {}: {e}", path.display());
                    return ExitCode::from(e.exit_code());
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
