//! Stage-level observability.
//!
//! The pipeline reports each stage outcome to a [`PipelineObserver`]. Failures are classified by
//! [`Severity`]; failures at or above the configured alert threshold also trigger
//! [`PipelineObserver::on_alert`].

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::error::CensusError;
use crate::pipeline::Stage;

/// Severity of a stage failure, used for observer callbacks and alerting thresholds.
///
/// Skipped items are not failures; they are reported through [`StageStats::skipped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The stage failed on its input data.
    Error,
    /// Infrastructure failure (I/O) or an aborted run.
    Critical,
}

impl Severity {
    /// Classify a stage failure.
    pub fn for_error(e: &CensusError) -> Self {
        match e.root() {
            CensusError::Io(_) | CensusError::Aborted { .. } => Self::Critical,
            CensusError::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(_) => Self::Critical,
                _ => Self::Error,
            },
            _ => Self::Error,
        }
    }
}

/// Where a stage ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub stage: Stage,
    /// File the stage read or wrote, when there is a single one.
    pub path: Option<PathBuf>,
}

impl StageContext {
    pub fn new(stage: Stage) -> Self {
        Self { stage, path: None }
    }

    pub fn with_path(stage: Stage, path: impl AsRef<Path>) -> Self {
        Self {
            stage,
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    fn path_display(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "-".to_string(), |p| p.display().to_string())
    }
}

/// Minimal stats reported when a stage succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageStats {
    /// Rows produced by the stage.
    pub rows: usize,
    /// Items the stage skipped (e.g. schools without a rating).
    pub skipped: usize,
}

/// Observer interface for stage outcomes.
pub trait PipelineObserver: Send + Sync {
    /// Called when a stage succeeds.
    fn on_success(&self, _ctx: &StageContext, _stats: StageStats) {}

    /// Called when a stage fails.
    fn on_failure(&self, _ctx: &StageContext, _severity: Severity, _error: &CensusError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        self.on_failure(ctx, severity, error);
    }
}

/// Fans callbacks out to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_success(&self, ctx: &StageContext, stats: StageStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Reports stage events through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_success(&self, ctx: &StageContext, stats: StageStats) {
        if stats.skipped > 0 {
            warn!(
                "[{}][ok] path={} rows={} skipped={}",
                ctx.stage,
                ctx.path_display(),
                stats.rows,
                stats.skipped
            );
        } else {
            info!("[{}][ok] path={} rows={}", ctx.stage, ctx.path_display(), stats.rows);
        }
    }

    fn on_failure(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        error!(
            "[{}][{severity:?}] path={} err={error}",
            ctx.stage,
            ctx.path_display()
        );
    }

    fn on_alert(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        error!(
            "[ALERT][{}][{severity:?}] path={} err={error}",
            ctx.stage,
            ctx.path_display()
        );
    }
}

/// Appends stage events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl PipelineObserver for FileObserver {
    fn on_success(&self, ctx: &StageContext, stats: StageStats) {
        self.append_line(&format!(
            "{} ok stage={} path={} rows={} skipped={}",
            unix_ts(),
            ctx.stage,
            ctx.path_display(),
            stats.rows,
            stats.skipped
        ));
    }

    fn on_failure(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        self.append_line(&format!(
            "{} fail severity={severity:?} stage={} path={} err={error}",
            unix_ts(),
            ctx.stage,
            ctx.path_display()
        ));
    }

    fn on_alert(&self, ctx: &StageContext, severity: Severity, error: &CensusError) {
        self.append_line(&format!(
            "{} ALERT severity={severity:?} stage={} path={} err={error}",
            unix_ts(),
            ctx.stage,
            ctx.path_display()
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
