//! Pipeline driver: load → merge → remap → filter → split → export → report.
//!
//! Stages run strictly one after another. Configuration problems and an empty
//! task set abort before anything is written. An I/O error during export or
//! report writing aborts the run and leaves whatever was already written.

use log::info;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::export::{export_dataset, output_dir_for};
use crate::filter::remove_empty;
use crate::io::{discover_task_dirs, load_task};
use crate::merge::IntersectMerge;
use crate::remap::{identity_mapping, remap_labels};
use crate::report::{MergeReport, REPORT_FILE_NAME};
use crate::split::split_items;
use crate::tasks::{collect_task_exports, DirectoryTaskExporter, TaskExporter};
use crate::types::ExportStats;

/// What a pipeline run produced
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub tasks_loaded: usize,
    pub items_loaded: usize,
    pub annotations_loaded: usize,
    pub items_merged: usize,
    pub annotations_merged: usize,
    pub labels: usize,
    pub items_after_filter: usize,
    pub annotations_after_filter: usize,
    /// Item count per subset, in split order
    pub subset_sizes: Vec<(String, usize)>,
    pub merge_errors: usize,
    pub export: ExportStats,
    pub output_dir: PathBuf,
    pub report_path: PathBuf,
}

impl PipelineSummary {
    pub fn print_summary(&self) {
        info!("=== Pipeline Summary ===");
        info!(
            "Tasks loaded: {} ({} items, {} annotations)",
            self.tasks_loaded, self.items_loaded, self.annotations_loaded
        );
        info!(
            "Merged: {} items, {} annotations, {} labels",
            self.items_merged, self.annotations_merged, self.labels
        );
        info!(
            "After remap and filter: {} items, {} annotations",
            self.items_after_filter, self.annotations_after_filter
        );
        for (subset, size) in &self.subset_sizes {
            info!("Subset {}: {} items", subset, size);
        }
        info!("Merge errors: {}", self.merge_errors);
        info!("Dataset: {}", self.output_dir.display());
        info!("Report: {}", self.report_path.display());
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    exporter: Box<dyn TaskExporter>,
}

impl Pipeline {
    /// Pipeline reading task exports from `<save_path>/<task_id>` directories
    pub fn new(config: PipelineConfig) -> Self {
        let exporter = DirectoryTaskExporter::new(config.save_path.clone());
        Self::with_exporter(config, Box::new(exporter))
    }

    /// Pipeline resolving explicit task ids through `exporter`
    pub fn with_exporter(config: PipelineConfig, exporter: Box<dyn TaskExporter>) -> Self {
        Self { config, exporter }
    }

    fn resolve_tasks(&self) -> Result<Vec<PathBuf>> {
        let save_path = &self.config.save_path;
        let task_dirs = if !self.config.task_ids.is_empty() {
            collect_task_exports(self.exporter.as_ref(), &self.config.task_ids)
        } else if save_path.is_dir() {
            discover_task_dirs(save_path)?
        } else {
            Vec::new()
        };

        if task_dirs.is_empty() {
            return Err(PipelineError::NoTasks(save_path.clone()));
        }
        Ok(task_dirs)
    }

    pub fn run(&self) -> Result<PipelineSummary> {
        let config = &self.config;
        config.validate()?;
        let mut summary = PipelineSummary::default();

        let task_dirs = self.resolve_tasks()?;
        info!("Found {} task exports", task_dirs.len());
        let mut sources = Vec::with_capacity(task_dirs.len());
        for task_dir in &task_dirs {
            let collection = load_task(task_dir)?;
            summary.items_loaded += collection.len();
            summary.annotations_loaded += collection.annotation_count();
            sources.push(collection);
        }
        summary.tasks_loaded = sources.len();

        let outcome = IntersectMerge::new(config.merge).merge(&sources)?;
        let merged = outcome.collection;
        summary.items_merged = merged.len();
        summary.annotations_merged = merged.annotation_count();
        summary.merge_errors = outcome.errors.len();

        let mapping = if config.mapping.is_empty() {
            identity_mapping(&merged.categories)
        } else {
            config.mapping.clone()
        };
        let remapped = remap_labels(merged, &mapping, config.remap_default);
        summary.labels = remapped.categories.len();

        let filtered = remove_empty(remapped);
        summary.items_after_filter = filtered.len();
        summary.annotations_after_filter = filtered.annotation_count();

        let (dataset, assignment) = split_items(filtered, &config.splits, config.seed);
        summary.subset_sizes = config
            .splits
            .iter()
            .map(|split| {
                let size = assignment
                    .iter()
                    .filter(|(_, subset)| *subset == split.name)
                    .count();
                (split.name.clone(), size)
            })
            .collect();

        let output_dir = output_dir_for(&config.save_path, config.export_format);
        summary.export = export_dataset(&dataset, config.export_format, &output_dir)?;

        let report_path = output_dir.join(REPORT_FILE_NAME);
        MergeReport::from_errors(&outcome.errors).save(&report_path)?;

        summary.output_dir = output_dir;
        summary.report_path = report_path;
        summary.print_summary();
        Ok(summary)
    }
}
