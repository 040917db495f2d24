//! CVAT task exports to a single split dataset
//!
//! This library merges the annotations of several CVAT tasks covering the same
//! images into one consensus dataset, renames and filters its labels, splits it
//! into subsets and exports it in Datumaro, COCO or YOLO format together with a
//! report of every merge problem.

pub mod coco;
pub mod config;
pub mod datumaro;
pub mod error;
pub mod export;
pub mod filter;
pub mod io;
pub mod merge;
pub mod pipeline;
pub mod remap;
pub mod report;
pub mod split;
pub mod tasks;
pub mod types;
pub mod utils;
pub mod yolo;

// Re-export commonly used types and functions
pub use config::{Args, PipelineConfig};
pub use error::{ConfigError, PipelineError};
pub use export::{export_dataset, ExportFormat};
pub use io::load_task;
pub use merge::{IntersectMerge, MergeConfig, MergeError, Similarity};
pub use pipeline::{Pipeline, PipelineSummary};
pub use remap::{remap_labels, RemapDefault};
pub use report::MergeReport;
pub use split::{split_items, SplitSpec};
pub use tasks::{DirectoryTaskExporter, TaskExporter};
pub use types::{Annotation, AnnotationCollection, AnnotationItem, LabelCategories, Shape};
