use log::warn;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::{AnnotationItem, ExportStats, LabelCategories, Shape};
use crate::utils::{copy_image, create_progress_bar, ensure_directory, export_file_name};

/// Calculate a normalized YOLO box (x_center, y_center, width, height)
pub fn calculate_bounding_box(shape: &Shape, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
    let (x_min, y_min, x_max, y_max) = shape.bounds();
    let width = image_width as f64;
    let height = image_height as f64;

    let x_center = (x_min + x_max) / 2.0 / width;
    let y_center = (y_min + y_max) / 2.0 / height;
    let box_width = (x_max - x_min) / width;
    let box_height = (y_max - y_min) / height;

    (x_center, y_center, box_width, box_height)
}

/// Convert an item's annotations to YOLO label lines
pub fn convert_to_yolo_format(
    item: &AnnotationItem,
    categories: &LabelCategories,
    image_width: u32,
    image_height: u32,
) -> String {
    let mut yolo_data = String::with_capacity(item.annotations.len() * 64);

    for annotation in &item.annotations {
        let class_id = match categories.index_of(&annotation.label) {
            Some(class_id) => class_id,
            None => continue,
        };

        let (x_center, y_center, width, height) =
            calculate_bounding_box(&annotation.shape, image_width, image_height);
        yolo_data.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            class_id, x_center, y_center, width, height
        ));
    }

    yolo_data
}

/// Write one subset as YOLO label files and copy its images
pub fn export_yolo_subset(
    output_dir: &Path,
    subset: &str,
    items: &[&AnnotationItem],
    categories: &LabelCategories,
    stats: &mut ExportStats,
) -> Result<()> {
    let labels_dir = output_dir.join("labels").join(subset);
    let images_dir = output_dir.join("images").join(subset);
    ensure_directory(&labels_dir)?;
    ensure_directory(&images_dir)?;

    let pb = create_progress_bar(items.len() as u64, subset);
    for item in items {
        let size = item.image.as_ref().and_then(|image| image.size);
        let Some((image_height, image_width)) = size.filter(|(h, w)| *h > 0 && *w > 0) else {
            warn!("No image size for item {}, cannot normalize YOLO boxes", item.id);
            stats.skipped_missing_image += 1;
            pb.inc(1);
            continue;
        };

        let image_path = item.image.as_ref().map(|image| image.path.as_path());
        let file_name = export_file_name(&item.id, image_path);
        match image_path {
            Some(path) if copy_image(path, &images_dir, &file_name)? => stats.images_copied += 1,
            _ => stats.skipped_missing_image += 1,
        }

        let yolo_data = convert_to_yolo_format(item, categories, image_width, image_height);
        let label_path = labels_dir.join(format!("{}.txt", export_file_name(&item.id, None)));
        let mut writer =
            BufWriter::new(File::create(&label_path).map_err(|e| PipelineError::io(&label_path, e))?);
        writer
            .write_all(yolo_data.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| PipelineError::io(&label_path, e))?;

        stats.annotations_exported += yolo_data.lines().count();
        stats.items_exported += 1;
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} export complete", subset));
    Ok(())
}

/// Create the dataset.yaml file for YOLO training
pub fn create_dataset_yaml(
    output_dir: &Path,
    subsets: &[String],
    categories: &LabelCategories,
) -> Result<()> {
    let dataset_yaml_path = output_dir.join("dataset.yaml");
    let absolute_path =
        fs::canonicalize(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    let mut yaml_content = format!("path: {}\n", absolute_path.to_string_lossy());
    for subset in subsets {
        yaml_content.push_str(&format!("{}: images/{}\n", subset, subset));
    }
    yaml_content.push_str("\nnames:\n");
    for (id, label) in categories.names().enumerate() {
        yaml_content.push_str(&format!("    {}: {}\n", id, label));
    }

    fs::write(&dataset_yaml_path, yaml_content)
        .map_err(|e| PipelineError::io(&dataset_yaml_path, e))
}
