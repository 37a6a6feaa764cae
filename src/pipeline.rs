//! Stage sequencing for a full census run.
//!
//! A run is a strict sequence of [`Stage`]s over fully materialized tables:
//!
//! 1. load the attribute dictionary and resolve the ingestion schema
//! 2. ingest, filter and normalize the extract
//! 3. write the registry and the two domain fact tables with their dictionaries
//! 4. re-read those tables and write the rating table
//!
//! Every stage outcome is reported to a [`PipelineObserver`]; a failure is tagged with its stage
//! (see [`CensusError::in_stage`]). An [`AbortHandle`] is checked before each stage starts.

use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::dictionary::{AttributeDictionary, DomainArea};
use crate::error::{CensusError, CensusResult};
use crate::execution::{ExecutionEngine, LogExecutionObserver};
use crate::ingestion;
use crate::observability::{LogObserver, PipelineObserver, Severity, StageContext, StageStats};
use crate::persist;
use crate::processing::{extract_registry, melt, normalize_quantities, write_facts, IdColumns};
use crate::rating::{self, InputPaths, RatingDiagnostic};
use crate::schema::{resolve, ResolvedSchema};
use crate::types::DataSet;

/// A step of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    LoadDictionary,
    ResolveSchema,
    Ingest,
    Normalize,
    Registry,
    ReshapeInfrastructure,
    ReshapeEnrollment,
    Rating,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadDictionary => "load-dictionary",
            Self::ResolveSchema => "resolve-schema",
            Self::Ingest => "ingest",
            Self::Normalize => "normalize",
            Self::Registry => "registry",
            Self::ReshapeInfrastructure => "reshape-infrastructure",
            Self::ReshapeEnrollment => "reshape-enrollment",
            Self::Rating => "rating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: Stage) -> CensusResult<()> {
        if self.is_aborted() {
            Err(CensusError::Aborted { stage })
        } else {
            Ok(())
        }
    }
}

/// Output file locations under the configured output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub registry: PathBuf,
    pub infrastructure_dictionary: PathBuf,
    pub infrastructure_facts: PathBuf,
    pub enrollment_dictionary: PathBuf,
    pub enrollment_facts: PathBuf,
    pub ratings: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            registry: root.join("Geral").join("school_info.csv"),
            infrastructure_dictionary: root.join("Infraestrutura").join("infrastructure_dict.csv"),
            infrastructure_facts: root.join("Infraestrutura").join("infrastructure_values.csv"),
            enrollment_dictionary: root.join("Matricula").join("enroll_dict.csv"),
            enrollment_facts: root.join("Matricula").join("enroll_values.csv"),
            ratings: root.join("Rating").join("school_ratings.csv"),
        }
    }

    /// The tables the rating stage reads.
    pub fn rating_inputs(&self) -> InputPaths<'_> {
        InputPaths {
            infrastructure_dictionary: &self.infrastructure_dictionary,
            infrastructure_facts: &self.infrastructure_facts,
            enrollment_dictionary: &self.enrollment_dictionary,
            enrollment_facts: &self.enrollment_facts,
            registry: &self.registry,
        }
    }
}

/// Row counts of one finished stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub rows: usize,
    pub skipped: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub schools_rated: usize,
    pub diagnostics: Vec<RatingDiagnostic>,
}

impl RunReport {
    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> CensusResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(out, self).map_err(|e| CensusError::Io(e.into()))
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Runs the stages of [`PipelineConfig`] in order.
pub struct Pipeline {
    config: PipelineConfig,
    layout: OutputLayout,
    engine: ExecutionEngine,
    observer: Arc<dyn PipelineObserver>,
    alert_at_or_above: Severity,
    abort: AbortHandle,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}

impl Pipeline {
    /// Validate `config` and build the execution engine.
    pub fn new(config: PipelineConfig) -> CensusResult<Self> {
        config.validate()?;
        let engine =
            ExecutionEngine::new(config.execution.clone())?.with_observer(Arc::new(LogExecutionObserver));
        Ok(Self {
            layout: OutputLayout::new(&config.paths.output_dir),
            config,
            engine,
            observer: Arc::new(LogObserver),
            alert_at_or_above: Severity::Critical,
            abort: AbortHandle::default(),
        })
    }

    /// Replace the default [`LogObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Severity at which failures also trigger [`PipelineObserver::on_alert`].
    pub fn with_alert_threshold(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    /// Handle that stops the run before its next stage.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Run every stage, from the dictionary to the rating table.
    pub fn run(&self) -> CensusResult<RunReport> {
        let mut report = RunReport::default();
        let paths = &self.config.paths;

        let dictionary = self.stage(&mut report, StageContext::with_path(Stage::LoadDictionary, &paths.dictionary), || {
            let dict = AttributeDictionary::from_path(&paths.dictionary, self.config.dictionary_delimiter()?)?;
            let rows = dict.len();
            Ok((dict, StageStats { rows, skipped: 0 }))
        })?;

        let ResolvedSchema { schema, dictionary } =
            self.stage(&mut report, StageContext::new(Stage::ResolveSchema), || {
                let resolved = resolve(&dictionary)?;
                let rows = resolved.schema.fields.len();
                Ok((resolved, StageStats { rows, skipped: 0 }))
            })?;

        let raw = self.stage(&mut report, StageContext::with_path(Stage::Ingest, &paths.extract), || {
            let ds = ingestion::ingest(
                &paths.extract,
                &schema,
                &self.config.extract_options()?,
                &self.config.region_filter(),
                &self.engine,
            )?;
            Ok(with_rows(ds))
        })?;

        let census = self.stage(&mut report, StageContext::new(Stage::Normalize), || {
            Ok(with_rows(normalize_quantities(&raw, &dictionary)))
        })?;
        drop(raw);

        self.stage(&mut report, StageContext::with_path(Stage::Registry, &self.layout.registry), || {
            let registry = extract_registry(&census, &dictionary);
            persist::write_dataset(&registry, &self.layout.registry)?;
            Ok(((), stats_of(&registry)))
        })?;

        let ids = IdColumns::default();
        for (stage, area, dict_path, facts_path) in [
            (
                Stage::ReshapeInfrastructure,
                DomainArea::Infraestrutura,
                &self.layout.infrastructure_dictionary,
                &self.layout.infrastructure_facts,
            ),
            (
                Stage::ReshapeEnrollment,
                DomainArea::Matricula,
                &self.layout.enrollment_dictionary,
                &self.layout.enrollment_facts,
            ),
        ] {
            self.stage(&mut report, StageContext::with_path(stage, facts_path), || {
                let domain = dictionary.domain(&area);
                domain.write_csv(dict_path)?;
                let facts = melt(&census, &ids, &domain)?;
                write_facts(&facts, facts_path)?;
                info!("{area}: {} attributes, {} facts", domain.len(), facts.len());
                Ok(((), StageStats { rows: facts.len(), skipped: 0 }))
            })?;
        }
        drop(census);

        self.rate(&mut report)?;
        Ok(report)
    }

    /// Run only the rating stage, over tables persisted by an earlier [`Self::run`].
    pub fn run_rating_only(&self) -> CensusResult<RunReport> {
        let mut report = RunReport::default();
        self.rate(&mut report)?;
        Ok(report)
    }

    fn rate(&self, report: &mut RunReport) -> CensusResult<()> {
        let outcome = self.stage(report, StageContext::with_path(Stage::Rating, &self.layout.ratings), || {
            let inputs = rating::load_inputs(self.layout.rating_inputs())?;
            let outcome =
                rating::compute_ratings(inputs.as_inputs(), &self.config.rating_options(), &self.engine)?;
            rating::write_ratings(&outcome.ratings, &self.layout.ratings)?;
            let stats = StageStats {
                rows: outcome.ratings.len(),
                skipped: outcome.diagnostics.len(),
            };
            Ok((outcome, stats))
        })?;
        report.schools_rated = outcome.ratings.len();
        report.diagnostics = outcome.diagnostics;
        Ok(())
    }

    fn stage<T>(
        &self,
        report: &mut RunReport,
        ctx: StageContext,
        run: impl FnOnce() -> CensusResult<(T, StageStats)>,
    ) -> CensusResult<T> {
        match self.abort.check(ctx.stage).and_then(|()| run()) {
            Ok((value, stats)) => {
                self.observer.on_success(&ctx, stats);
                report.stages.push(StageReport {
                    stage: ctx.stage,
                    rows: stats.rows,
                    skipped: stats.skipped,
                });
                Ok(value)
            }
            Err(e) => {
                let e = e.in_stage(ctx.stage);
                let severity = Severity::for_error(&e);
                self.observer.on_failure(&ctx, severity, &e);
                if severity >= self.alert_at_or_above {
                    self.observer.on_alert(&ctx, severity, &e);
                }
                Err(e)
            }
        }
    }
}

fn with_rows(ds: DataSet) -> (DataSet, StageStats) {
    let stats = stats_of(&ds);
    (ds, stats)
}

fn stats_of(ds: &DataSet) -> StageStats {
    StageStats {
        rows: ds.row_count(),
        skipped: 0,
    }
}
