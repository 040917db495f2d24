use glob::{glob, Pattern};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::datumaro::{DatumaroFile, DatumaroItem};
use crate::error::{PipelineError, Result};
use crate::report::REPORT_FILE_NAME;
use crate::types::{
    AnnotationCollection, AnnotationItem, ImageInfo, LabelCategories, IMG_FORMATS,
};
use crate::utils::read_json;

/// Directory holding the annotation files of a task export
pub const ANNOTATIONS_DIR: &str = "annotations";
/// Directory holding the images of a task export
pub const IMAGES_DIR: &str = "images";

/// Whether `path` looks like an extracted Datumaro task export.
///
/// A directory holding a merge report is the output of an earlier run, not a
/// task, even when it was exported in the Datumaro layout.
pub fn is_task_export(path: &Path) -> bool {
    path.join(ANNOTATIONS_DIR).is_dir() && !path.join(REPORT_FILE_NAME).exists()
}

/// List every task export directly below `save_path`, sorted by name
pub fn discover_task_dirs(save_path: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(save_path).map_err(|e| PipelineError::io(save_path, e))?;

    let mut task_dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(save_path, e))?.path();
        if path.is_dir() && is_task_export(&path) {
            task_dirs.push(path);
        } else {
            debug!("Skipping {:?}: not a task export", path);
        }
    }
    task_dirs.sort();
    Ok(task_dirs)
}

/// Source name of a task directory (its file name)
pub fn task_name(task_dir: &Path) -> String {
    task_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| task_dir.display().to_string())
}

/// Load one extracted Datumaro task export into a collection.
///
/// All subsets of the task are read in name order and concatenated. Labels of
/// every subset file are unified into the collection's categories.
pub fn load_task(task_dir: &Path) -> Result<AnnotationCollection> {
    let source = task_name(task_dir);
    let annotations_dir = task_dir.join(ANNOTATIONS_DIR);
    let pattern = format!(
        "{}/*.json",
        Pattern::escape(&annotations_dir.to_string_lossy())
    );

    let mut files = Vec::new();
    for entry in glob(&pattern)? {
        let path = entry.map_err(|e| PipelineError::io(e.path().to_path_buf(), e.into_error()))?;
        files.push(path);
    }
    files.sort();

    let mut parsed = Vec::with_capacity(files.len());
    for path in &files {
        let file: DatumaroFile = read_json(path)?;
        let subset = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let categories = file
            .categories
            .label
            .as_ref()
            .map(|labels| labels.to_categories())
            .unwrap_or_default();
        parsed.push((subset, categories, file.items));
    }

    let categories = LabelCategories::unify(parsed.iter().map(|(_, categories, _)| categories))?;

    let mut items = Vec::new();
    let mut skipped = 0usize;
    for (subset, file_categories, records) in parsed {
        for record in records {
            let (item, item_skipped) =
                convert_item(record, &file_categories, &source, task_dir, &subset);
            skipped += item_skipped;
            items.push(item);
        }
    }

    let collection = AnnotationCollection::new(source, Arc::new(categories)).with_items(items);
    info!(
        "Loaded task {}: {} items, {} annotations, {} labels",
        collection.source,
        collection.len(),
        collection.annotation_count(),
        collection.categories.len()
    );
    if skipped > 0 {
        warn!(
            "Task {}: skipped {} unsupported annotations",
            collection.source, skipped
        );
    }
    Ok(collection)
}

fn convert_item(
    record: DatumaroItem,
    categories: &LabelCategories,
    source: &str,
    task_dir: &Path,
    subset: &str,
) -> (AnnotationItem, usize) {
    let mut skipped = 0;
    let mut annotations = Vec::with_capacity(record.annotations.len());
    for annotation in &record.annotations {
        match annotation.to_annotation(categories) {
            Ok(annotation) => annotations.push(annotation),
            Err(reason) => {
                debug!("Task {}, item {}: {}", source, record.id, reason);
                skipped += 1;
            }
        }
    }

    let image_path = record
        .image
        .as_ref()
        .and_then(|image| image.path.as_deref())
        .map(|path| resolve_image_path(task_dir, subset, path))
        .or_else(|| find_image_by_id(task_dir, subset, &record.id));
    let size = record.image.as_ref().and_then(|image| image.size);

    let mut item = AnnotationItem::new(record.id, source).with_annotations(annotations);
    item.image = image_path.map(|path| ImageInfo { path, size });
    (item, skipped)
}

/// Images sit either in `images/<subset>/` or directly in `images/`
fn resolve_image_path(task_dir: &Path, subset: &str, relative: &str) -> PathBuf {
    let images = task_dir.join(IMAGES_DIR);
    let in_subset = images.join(subset).join(relative);
    if in_subset.exists() {
        in_subset
    } else {
        let flat = images.join(relative);
        if flat.exists() {
            flat
        } else {
            in_subset
        }
    }
}

fn find_image_by_id(task_dir: &Path, subset: &str, item_id: &str) -> Option<PathBuf> {
    let images = task_dir.join(IMAGES_DIR);
    [images.join(subset), images]
        .iter()
        .flat_map(|dir| IMG_FORMATS.iter().map(move |ext| dir.join(format!("{}.{}", item_id, ext))))
        .find(|candidate| candidate.is_file())
}
