use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::export::ExportFormat;
use crate::merge::MergeConfig;
use crate::remap::RemapDefault;
use crate::split::{parse_splits, validate_splits, SplitSpec};

/// Config file read when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_SAVE_PATH: &str = "datasets";
pub const DEFAULT_SPLITS: &str = "train:1.0, val:.0, test:.0";

/// Merge CVAT task exports into one dataset, split it and export it.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// YAML config file; command-line flags override its values
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory containing one extracted Datumaro export per task
    #[arg(short = 'd', long = "save_path")]
    pub save_path: Option<PathBuf>,

    /// Tasks to use, e.g. "233,555,222" (default: every task in save_path)
    #[arg(long = "tasks_ids", value_delimiter = ',')]
    pub tasks_ids: Vec<String>,

    /// Output dataset format
    #[arg(long = "export_format", visible_alias = "format", value_enum)]
    pub export_format: Option<ExportFormat>,

    /// Subsets and their fractions, e.g. "train:0.67,test:0.33"
    #[arg(long = "split_dataset")]
    pub split_dataset: Option<String>,

    /// Label mapping entry SOURCE=TARGET, repeatable
    #[arg(long = "map", value_parser = parse_mapping_entry)]
    pub mapping: Vec<(String, String)>,

    /// Keep labels that have no mapping entry instead of deleting them
    #[arg(long = "keep_unmapped")]
    pub keep_unmapped: bool,

    /// Minimum similarity for annotations of different tasks to match
    #[arg(long = "pairwise_dist", value_parser = validate_fraction)]
    pub pairwise_dist: Option<f64>,

    /// Minimum number of tasks that must agree on an annotation
    #[arg(long = "quorum")]
    pub quorum: Option<usize>,

    /// Minimum aggregate confidence of a merged annotation
    #[arg(long = "output_conf_thresh", value_parser = validate_fraction)]
    pub output_conf_thresh: Option<f64>,

    /// Seed for random splitting; unseeded runs differ every time
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

// Validate that the value is between 0.0 and 1.0
fn validate_fraction(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("value must be between 0.0 and 1.0".to_string()),
    }
}

fn parse_mapping_entry(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((source, target)) if !source.trim().is_empty() && !target.trim().is_empty() => {
            Ok((source.trim().to_string(), target.trim().to_string()))
        }
        _ => Err(format!("expected SOURCE=TARGET, got '{}'", s)),
    }
}

/// A task id list written either as "1,2,3" or as a YAML list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskIds {
    Single(u64),
    Joined(String),
    List(Vec<TaskId>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Number(u64),
    Text(String),
}

impl TaskIds {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            TaskIds::Single(id) => vec![id.to_string()],
            TaskIds::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            TaskIds::List(ids) => ids
                .iter()
                .map(|id| match id {
                    TaskId::Number(number) => number.to_string(),
                    TaskId::Text(text) => text.trim().to_string(),
                })
                .collect(),
        }
    }
}

/// Splits written either as "train:0.8,test:0.2" or as a list of pairs
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SplitSetting {
    Joined(String),
    List(Vec<(String, f64)>),
}

impl SplitSetting {
    pub fn to_specs(&self) -> Result<Vec<SplitSpec>, ConfigError> {
        match self {
            SplitSetting::Joined(joined) => parse_splits(joined),
            SplitSetting::List(pairs) => {
                let specs: Vec<SplitSpec> = pairs
                    .iter()
                    .map(|(name, fraction)| SplitSpec::new(name.trim(), *fraction))
                    .collect();
                validate_splits(&specs)?;
                Ok(specs)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeSettings {
    pub pairwise_dist: Option<f64>,
    pub quorum: Option<usize>,
    pub output_conf_thresh: Option<f64>,
}

/// Content of the YAML config file.
///
/// Keys of the task download step (`CVAT_URL`, `LOGIN`, `PASS`,
/// `ONLY_BUILD_DATASET`) are ignored along with any other unknown key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FileConfig {
    pub tasks_ids: Option<TaskIds>,
    pub export_format: Option<String>,
    pub save_path: Option<PathBuf>,
    pub split_dataset: Option<SplitSetting>,
    pub label_mapping: Option<Vec<(String, String)>>,
    pub remap_default: Option<String>,
    pub merge: Option<MergeSettings>,
    pub seed: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub save_path: PathBuf,
    pub export_format: ExportFormat,
    pub splits: Vec<SplitSpec>,
    /// Explicit task selection; empty means every task under `save_path`
    pub task_ids: Vec<String>,
    /// Empty means identity over the merged labels
    pub mapping: Vec<(String, String)>,
    pub remap_default: RemapDefault,
    pub merge: MergeConfig,
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
            export_format: ExportFormat::default(),
            splits: vec![
                SplitSpec::new("train", 1.0),
                SplitSpec::new("val", 0.0),
                SplitSpec::new("test", 0.0),
            ],
            task_ids: Vec::new(),
            mapping: Vec::new(),
            remap_default: RemapDefault::Delete,
            merge: MergeConfig::default(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.merge.validate()?;
        validate_splits(&self.splits)?;
        if self.save_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("SAVE_PATH"));
        }
        Ok(())
    }

    /// Combine the config file (if any) with command-line overrides
    pub fn from_sources(file: &FileConfig, args: &Args) -> Result<Self, ConfigError> {
        let save_path = args
            .save_path
            .clone()
            .or_else(|| file.save_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH));

        let export_format = match (args.export_format, &file.export_format) {
            (Some(format), _) => format,
            (None, Some(name)) => name.parse::<ExportFormat>()?,
            (None, None) => ExportFormat::default(),
        };

        let splits = match (&args.split_dataset, &file.split_dataset) {
            (Some(joined), _) => parse_splits(joined)?,
            (None, Some(setting)) => setting.to_specs()?,
            (None, None) => parse_splits(DEFAULT_SPLITS)?,
        };

        let task_ids = if !args.tasks_ids.is_empty() {
            args.tasks_ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        } else {
            file.tasks_ids.as_ref().map(TaskIds::to_vec).unwrap_or_default()
        };

        let mapping = if !args.mapping.is_empty() {
            args.mapping.clone()
        } else {
            file.label_mapping.clone().unwrap_or_default()
        };

        let remap_default = if args.keep_unmapped {
            RemapDefault::Keep
        } else {
            match &file.remap_default {
                Some(name) => name
                    .parse::<RemapDefault>()
                    .map_err(|_: String| ConfigError::RemapDefault(name.clone()))?,
                None => RemapDefault::Delete,
            }
        };

        let settings = file.merge.clone().unwrap_or_default();
        let defaults = MergeConfig::default();
        let merge = MergeConfig {
            pairwise_dist: args
                .pairwise_dist
                .or(settings.pairwise_dist)
                .unwrap_or(defaults.pairwise_dist),
            quorum: args.quorum.or(settings.quorum).unwrap_or(defaults.quorum),
            output_conf_thresh: args
                .output_conf_thresh
                .or(settings.output_conf_thresh)
                .unwrap_or(defaults.output_conf_thresh),
        };

        let config = Self {
            save_path,
            export_format,
            splits,
            task_ids,
            mapping,
            remap_default,
            merge,
            seed: args.seed.or(file.seed),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Args {
    /// Resolve the run configuration, reading the config file when present
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                log::info!("Using config file {}", DEFAULT_CONFIG_FILE);
                FileConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => FileConfig::default(),
        };
        PipelineConfig::from_sources(&file, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
CVAT_URL: https://cvat.example.com
LOGIN: admin
PASS: secret
TASKS_IDS: "233, 555,222"
EXPORT_FORMAT: yolo
SAVE_PATH: tasks
SPLIT_DATASET: "train:0.8, test:0.2"
ONLY_BUILD_DATASET: true
LABEL_MAPPING:
  - [text, text]
  - [title, text]
MERGE:
  pairwise_dist: 0.7
  quorum: 2
SEED: 13
"#;

    fn parse(yaml: &str) -> FileConfig {
        FileConfig::parse(yaml, Path::new("config.yaml")).unwrap()
    }

    #[test]
    fn test_validate_fraction() {
        assert!(validate_fraction("0.5").is_ok());
        assert!(validate_fraction("1.0").is_ok());
        assert!(validate_fraction("0.0").is_ok());
        assert!(validate_fraction("-0.1").is_err());
        assert!(validate_fraction("1.1").is_err());
        assert!(validate_fraction("abc").is_err());
    }

    #[test]
    fn test_parse_mapping_entry() {
        assert_eq!(
            parse_mapping_entry("folded knife=knife"),
            Ok(("folded knife".to_string(), "knife".to_string()))
        );
        assert!(parse_mapping_entry("knife").is_err());
        assert!(parse_mapping_entry("=knife").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let config = PipelineConfig::from_sources(&parse(YAML), &Args::default()).unwrap();

        assert_eq!(config.save_path, PathBuf::from("tasks"));
        assert_eq!(config.export_format, ExportFormat::Yolo);
        assert_eq!(
            config.splits,
            vec![SplitSpec::new("train", 0.8), SplitSpec::new("test", 0.2)]
        );
        assert_eq!(config.task_ids, vec!["233", "555", "222"]);
        assert_eq!(config.mapping.len(), 2);
        assert_eq!(config.mapping[1], ("title".to_string(), "text".to_string()));
        assert_eq!(config.merge.pairwise_dist, 0.7);
        assert_eq!(config.merge.quorum, 2);
        assert_eq!(config.merge.output_conf_thresh, 0.0);
        assert_eq!(config.seed, Some(13));
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = Args::parse_from([
            "cvat2dataset",
            "--save_path",
            "other",
            "--format",
            "datumaro",
            "--split_dataset",
            "train:0.5,val:0.5",
            "--tasks_ids",
            "1,2",
            "--map",
            "a=b",
            "--quorum",
            "3",
            "--keep_unmapped",
        ]);
        let config = PipelineConfig::from_sources(&parse(YAML), &args).unwrap();

        assert_eq!(config.save_path, PathBuf::from("other"));
        assert_eq!(config.export_format, ExportFormat::Datumaro);
        assert_eq!(config.splits[1], SplitSpec::new("val", 0.5));
        assert_eq!(config.task_ids, vec!["1", "2"]);
        assert_eq!(config.mapping, vec![("a".to_string(), "b".to_string())]);
        assert_eq!(config.remap_default, RemapDefault::Keep);
        assert_eq!(config.merge.quorum, 3);
        assert_eq!(config.merge.pairwise_dist, 0.7);
    }

    #[test]
    fn test_defaults_without_config() {
        let config = PipelineConfig::from_sources(&FileConfig::default(), &Args::default()).unwrap();
        assert_eq!(config.save_path, PathBuf::from(DEFAULT_SAVE_PATH));
        assert_eq!(config.export_format, ExportFormat::Coco);
        assert_eq!(config.splits.len(), 3);
        assert_eq!(config.merge, MergeConfig::default());
        assert!(config.task_ids.is_empty());
    }

    #[test]
    fn test_yaml_lists() {
        let file = parse(
            "TASKS_IDS: [12, \"13\"]\nSPLIT_DATASET:\n  - [train, 0.67]\n  - [test, 0.33]\n",
        );
        let config = PipelineConfig::from_sources(&file, &Args::default()).unwrap();
        assert_eq!(config.task_ids, vec!["12", "13"]);
        assert_eq!(config.splits[0], SplitSpec::new("train", 0.67));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let bad_format = parse("EXPORT_FORMAT: voc\n");
        assert!(matches!(
            PipelineConfig::from_sources(&bad_format, &Args::default()),
            Err(ConfigError::ExportFormat(_))
        ));

        let bad_split = parse("SPLIT_DATASET: \"train:0.9,test:0.9\"\n");
        assert!(matches!(
            PipelineConfig::from_sources(&bad_split, &Args::default()),
            Err(ConfigError::Split(_))
        ));

        let bad_merge = parse("MERGE:\n  output_conf_thresh: 2.0\n");
        assert!(matches!(
            PipelineConfig::from_sources(&bad_merge, &Args::default()),
            Err(ConfigError::MergeParam(_))
        ));

        assert!(matches!(
            FileConfig::parse("SAVE_PATH: [", Path::new("c.yaml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_single_numeric_task_id() {
        let file = parse("TASKS_IDS: 42\n");
        assert_eq!(file.tasks_ids.unwrap().to_vec(), vec!["42"]);
    }
}
