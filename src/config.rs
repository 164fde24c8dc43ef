use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::deadline::ResourceBudgets;

/// Top-level configuration for an analysis job.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Where the input sample lives and which tree to read.
    pub input: InputConfig,

    /// Event counts and batching.
    #[serde(default)]
    pub events: EventsConfig,

    /// Scheduler slot handling for batch jobs.
    #[serde(default)]
    pub deadline: DeadlineConfig,

    /// Output artifact configuration.
    #[serde(default)]
    pub output: OutputConfig,

    /// Column groups materialized for every entry.
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,

    /// Optional calibration table applied while materializing collections.
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,

    /// Scalar column holding the per-entry fill weight. Default: unweighted.
    #[serde(default)]
    pub weight_column: Option<String>,

    /// Plotters booked for the job, in booking order.
    #[serde(default)]
    pub plotters: Vec<PlotterConfig>,
}

/// Input sample location.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Base directory holding all samples.
    pub base_dir: PathBuf,

    /// Sample directory relative to `base_dir`.
    #[serde(default)]
    pub sample_dir: PathBuf,

    /// Slash-separated path of the tree inside each file (e.g. "ntuplizer/Ntuple").
    pub tree_name: String,
}

/// Event counts and batching.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsConfig {
    /// Maximum number of events to process over the whole campaign. Default: all.
    #[serde(default)]
    pub max_events: Option<u64>,

    /// Events per batch job. Unset means interactive processing.
    #[serde(default)]
    pub per_job: Option<u64>,
}

/// Deadline handling for batch jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineConfig {
    /// Scheduler resource class (job flavour) the job runs in. Default: "workday".
    #[serde(default = "default_resource_class")]
    pub resource_class: String,

    /// Stop when less than this is left in the slot. Default: 5m.
    #[serde(default = "default_safety_margin", with = "humantime_serde")]
    pub safety_margin: Duration,

    /// Check the deadline every this many global entries. Default: 100.
    #[serde(default = "default_check_every")]
    pub check_every: u64,

    /// Extra or overridden resource classes (e.g. `espresso: 25m`).
    #[serde(default)]
    pub budgets: BTreeMap<String, humantime_serde::Serde<Duration>>,
}

/// Output artifact configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Output path. `{job}` is replaced by the job index (or "interactive").
    /// A `.gz` suffix enables gzip compression. Default: "histos_{job}.json".
    #[serde(default = "default_output_path")]
    pub path: String,
}

/// A named group of prefixed tree columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub prefix: String,
}

/// Calibration table location and expected version.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    pub path: PathBuf,
    pub version: String,
}

/// One plotter and the collection it reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotterConfig {
    /// Trigger-cell distributions.
    TriggerCells {
        #[serde(default = "default_tc_collection")]
        collection: String,
        #[serde(default = "default_tc_label")]
        label: String,
    },
    /// Generator-level particle spectra.
    GenParticles {
        #[serde(default = "default_gen_collection")]
        collection: String,
        #[serde(default = "default_gen_label")]
        label: String,
    },
    /// Histograms declared entirely in configuration.
    Histograms {
        collection: String,
        histograms: Vec<HistogramConfig>,
    },
    /// Weighted count of processed entries.
    EventCount {
        #[serde(default = "default_event_count_name")]
        name: String,
    },
    /// Target response against matched reference objects.
    Resolution {
        #[serde(default = "default_gen_collection")]
        reference: String,
        target: String,
        label: String,
        #[serde(default = "default_max_dr")]
        max_dr: f64,
    },
    /// Trigger-cell occupancy per layer and radius.
    Geometry {
        #[serde(default = "default_tc_collection")]
        collection: String,
        #[serde(default = "default_tc_label")]
        label: String,
    },
}

impl PlotterConfig {
    /// Collections the plotter reads.
    pub fn collections(&self) -> Vec<&str> {
        match self {
            Self::TriggerCells { collection, .. }
            | Self::GenParticles { collection, .. }
            | Self::Histograms { collection, .. }
            | Self::Geometry { collection, .. } => vec![collection.as_str()],
            Self::Resolution {
                reference, target, ..
            } => vec![reference.as_str(), target.as_str()],
            Self::EventCount { .. } => Vec::new(),
        }
    }
}

/// Histogram booked from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistogramConfig {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub kind: HistogramKind,
    /// Columns filled per object: one per axis, plus the profiled value last.
    pub columns: Vec<String>,
    pub axes: Vec<AxisConfig>,
    /// Only objects passing this cut are filled.
    #[serde(default)]
    pub cut: Option<CutConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramKind {
    H1,
    H2,
    Profile1,
    Profile2,
}

impl HistogramKind {
    pub fn axes(self) -> usize {
        match self {
            Self::H1 | Self::Profile1 => 1,
            Self::H2 | Self::Profile2 => 2,
        }
    }

    pub fn columns(self) -> usize {
        match self {
            Self::H1 => 1,
            Self::H2 | Self::Profile1 => 2,
            Self::Profile2 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AxisConfig {
    pub bins: u32,
    pub min: f64,
    pub max: f64,
}

/// Inclusive range cut on one column.
#[derive(Debug, Clone, Deserialize)]
pub struct CutConfig {
    pub column: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl CutConfig {
    pub fn accepts(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

// --- Default value functions ---

fn default_resource_class() -> String {
    "workday".to_string()
}

fn default_safety_margin() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_check_every() -> u64 {
    100
}

fn default_output_path() -> String {
    "histos_{job}.json".to_string()
}

fn default_tc_collection() -> String {
    "tc".to_string()
}

fn default_tc_label() -> String {
    "TC".to_string()
}

fn default_gen_collection() -> String {
    "gen".to_string()
}

fn default_gen_label() -> String {
    "GEN".to_string()
}

fn default_event_count_name() -> String {
    "n_events".to_string()
}

fn default_max_dr() -> f64 {
    0.3
}

// --- Default trait impls ---

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            resource_class: default_resource_class(),
            safety_margin: default_safety_margin(),
            check_every: default_check_every(),
            budgets: BTreeMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.input.tree_name.trim_matches('/').is_empty() {
            bail!("input.tree_name is required");
        }

        if self.events.per_job == Some(0) {
            bail!("events.per_job must be positive");
        }

        if self.events.max_events == Some(0) {
            bail!("events.max_events must be positive when set");
        }

        if self.deadline.check_every == 0 {
            bail!("deadline.check_every must be positive");
        }

        self.budgets()
            .budget(&self.deadline.resource_class)
            .with_context(|| "deadline.resource_class".to_string())?;

        if self.output.path.is_empty() {
            bail!("output.path is required");
        }

        let mut names = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                bail!("collections: name is required");
            }
            if !names.insert(collection.name.as_str()) {
                bail!("collections: {} declared twice", collection.name);
            }
        }

        if self.plotters.is_empty() {
            bail!("at least one plotter is required");
        }

        for plotter in &self.plotters {
            for collection in plotter.collections() {
                if !names.contains(collection) {
                    bail!(
                        "plotter reads collection {collection:?} which is not declared under collections"
                    );
                }
            }
            if let PlotterConfig::Resolution { max_dr, .. } = plotter {
                if !(max_dr.is_finite() && *max_dr > 0.0) {
                    bail!("resolution plotter: max_dr must be positive, got {max_dr}");
                }
            }
            if let PlotterConfig::Histograms { histograms, .. } = plotter {
                for h in histograms {
                    validate_histogram(h)?;
                }
            }
        }

        Ok(())
    }

    /// Resource budgets: the scheduler defaults plus configured overrides.
    pub fn budgets(&self) -> ResourceBudgets {
        self.deadline
            .budgets
            .iter()
            .fold(ResourceBudgets::default(), |budgets, (name, budget)| {
                budgets.with_class(name.clone(), **budget)
            })
    }

    /// Directory holding the input sample.
    pub fn input_dir(&self) -> PathBuf {
        self.input.base_dir.join(&self.input.sample_dir)
    }

    /// Output path for a job, with `{job}` substituted.
    pub fn output_path(&self, job_index: Option<u64>) -> PathBuf {
        let job = job_index.map_or_else(|| "interactive".to_string(), |i| i.to_string());
        PathBuf::from(self.output.path.replace("{job}", &job))
    }
}

fn validate_histogram(h: &HistogramConfig) -> Result<()> {
    if h.name.is_empty() {
        bail!("histogram name is required");
    }
    if h.columns.len() != h.kind.columns() {
        bail!(
            "histogram {}: {:?} needs {} columns, got {}",
            h.name,
            h.kind,
            h.kind.columns(),
            h.columns.len()
        );
    }
    if h.axes.len() != h.kind.axes() {
        bail!(
            "histogram {}: {:?} needs {} axes, got {}",
            h.name,
            h.kind,
            h.kind.axes(),
            h.axes.len()
        );
    }
    for axis in &h.axes {
        if axis.bins == 0 || !(axis.max > axis.min) {
            bail!(
                "histogram {}: invalid axis {} bins over [{}, {})",
                h.name,
                axis.bins,
                axis.min,
                axis.max
            );
        }
    }
    Ok(())
}
