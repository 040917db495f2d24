use clap::ValueEnum;
use log::info;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::coco::export_coco_subset;
use crate::datumaro::{DatumaroAnnotation, DatumaroCategories, DatumaroFile, DatumaroImage, DatumaroItem, DatumaroLabelCategories};
use crate::error::{ConfigError, Result};
use crate::io::{ANNOTATIONS_DIR, IMAGES_DIR};
use crate::types::{AnnotationCollection, AnnotationItem, ExportStats, LabelCategories};
use crate::utils::{copy_image, create_output_directory, create_progress_bar, ensure_directory, export_file_name, write_json};
use crate::yolo::{create_dataset_yaml, export_yolo_subset};

/// Target dataset format
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum ExportFormat {
    #[default]
    Coco,
    Datumaro,
    Yolo,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Coco => "coco",
            ExportFormat::Datumaro => "datumaro",
            ExportFormat::Yolo => "yolo",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coco" | "coco 1.0" | "coco_instances" => Ok(ExportFormat::Coco),
            "datumaro" | "datumaro 1.0" => Ok(ExportFormat::Datumaro),
            "yolo" | "yolo 1.1" | "yolo_ultralytics" => Ok(ExportFormat::Yolo),
            _ => Err(ConfigError::ExportFormat(s.to_string())),
        }
    }
}

/// Export directory for a run: `<save_path>_<format>_split`, next to `save_path`
pub fn output_dir_for(save_path: &Path, format: ExportFormat) -> PathBuf {
    // Trailing separators would put the output inside save_path
    let mut name = save_path.components().as_path().as_os_str().to_os_string();
    name.push(format!("_{}_split", format.name()));
    PathBuf::from(name)
}

/// Items grouped by subset, subsets in first-seen order
fn items_by_subset(collection: &AnnotationCollection) -> Vec<(String, Vec<&AnnotationItem>)> {
    collection
        .subsets()
        .into_iter()
        .map(|subset| {
            let items = collection
                .items
                .iter()
                .filter(|item| item.subset.as_deref() == Some(subset.as_str()))
                .collect();
            (subset, items)
        })
        .collect()
}

/// Write `collection` to `output_dir` in `format`.
///
/// The directory is recreated. Items without a subset are not exported.
pub fn export_dataset(
    collection: &AnnotationCollection,
    format: ExportFormat,
    output_dir: &Path,
) -> Result<ExportStats> {
    create_output_directory(output_dir)?;
    info!(
        "Exporting {} items as {} to {}",
        collection.len(),
        format,
        output_dir.display()
    );

    let mut stats = ExportStats {
        skipped_unassigned: collection
            .items
            .iter()
            .filter(|item| item.subset.is_none())
            .count(),
        ..ExportStats::default()
    };

    let subsets = items_by_subset(collection);
    for (subset, items) in &subsets {
        match format {
            ExportFormat::Coco => {
                export_coco_subset(output_dir, subset, items, &collection.categories, &mut stats)?
            }
            ExportFormat::Datumaro => {
                export_datumaro_subset(output_dir, subset, items, &collection.categories, &mut stats)?
            }
            ExportFormat::Yolo => {
                export_yolo_subset(output_dir, subset, items, &collection.categories, &mut stats)?
            }
        }
    }

    if format == ExportFormat::Yolo {
        let names: Vec<String> = subsets.iter().map(|(subset, _)| subset.clone()).collect();
        create_dataset_yaml(output_dir, &names, &collection.categories)?;
    }

    stats.print_summary();
    Ok(stats)
}

/// Write one subset in the Datumaro layout the tasks were loaded from
pub fn export_datumaro_subset(
    output_dir: &Path,
    subset: &str,
    items: &[&AnnotationItem],
    categories: &LabelCategories,
    stats: &mut ExportStats,
) -> Result<()> {
    let annotations_dir = output_dir.join(ANNOTATIONS_DIR);
    let images_dir = output_dir.join(IMAGES_DIR).join(subset);
    ensure_directory(&annotations_dir)?;
    ensure_directory(&images_dir)?;

    let pb = create_progress_bar(items.len() as u64, subset);
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let image_path = item.image.as_ref().map(|image| image.path.as_path());
        let file_name = export_file_name(&item.id, image_path);
        match image_path {
            Some(path) if copy_image(path, &images_dir, &file_name)? => stats.images_copied += 1,
            _ => stats.skipped_missing_image += 1,
        }

        let annotations: Vec<DatumaroAnnotation> = item
            .annotations
            .iter()
            .enumerate()
            .filter_map(|(id, annotation)| {
                DatumaroAnnotation::from_annotation(id as u64, annotation, categories)
            })
            .collect();
        stats.skipped_annotations += item.annotations.len() - annotations.len();
        stats.annotations_exported += annotations.len();
        stats.items_exported += 1;

        records.push(DatumaroItem {
            id: item.id.clone(),
            annotations,
            image: Some(DatumaroImage {
                path: Some(file_name),
                size: item.image.as_ref().and_then(|image| image.size),
            }),
            attr: Default::default(),
        });
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} export complete", subset));

    let file = DatumaroFile {
        info: Default::default(),
        categories: DatumaroCategories {
            label: Some(DatumaroLabelCategories::from_categories(categories)),
        },
        items: records,
    };
    write_json(&annotations_dir.join(format!("{}.json", subset)), &file)
}
