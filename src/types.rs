use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigError;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

/// Geometry payload of an annotation
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Bbox { x: f64, y: f64, w: f64, h: f64 },
    Polygon { points: Vec<(f64, f64)> },
    Polyline { points: Vec<(f64, f64)> },
    Points { points: Vec<(f64, f64)> },
}

impl Shape {
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Bbox { .. } => "bbox",
            Shape::Polygon { .. } => "polygon",
            Shape::Polyline { .. } => "polyline",
            Shape::Points { .. } => "points",
        }
    }

    /// Axis-aligned bounds as (x_min, y_min, x_max, y_max)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        match self {
            Shape::Bbox { x, y, w, h } => (*x, *y, x + w, y + h),
            Shape::Polygon { points } | Shape::Polyline { points } | Shape::Points { points } => {
                if points.is_empty() {
                    return (0.0, 0.0, 0.0, 0.0);
                }
                points.iter().fold(
                    (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
                    |(x_min, y_min, x_max, y_max), &(x, y)| {
                        (x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y))
                    },
                )
            }
        }
    }

    /// Bounding box as [x, y, width, height]
    pub fn bbox(&self) -> [f64; 4] {
        let (x_min, y_min, x_max, y_max) = self.bounds();
        [x_min, y_min, x_max - x_min, y_max - y_min]
    }
}

/// A single labelled shape produced by one source
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub label: String,
    pub shape: Shape,
    pub confidence: Option<f64>,
}

impl Annotation {
    pub fn new(label: impl Into<String>, shape: Shape) -> Self {
        Self {
            label: label.into(),
            shape,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Location and size of the image behind an item
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub path: PathBuf,
    /// (height, width) in pixels, when the export records it
    pub size: Option<(u32, u32)>,
}

/// One annotated unit (usually one image) of a task
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    pub id: String,
    pub annotations: Vec<Annotation>,
    pub source: String,
    pub image: Option<ImageInfo>,
    pub subset: Option<String>,
}

impl AnnotationItem {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            annotations: Vec::new(),
            source: source.into(),
            image: None,
            subset: None,
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }
}

/// A label definition, compared by value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDef {
    pub name: String,
    #[serde(default)]
    pub parent: String,
}

impl LabelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: String::new(),
        }
    }
}

/// Ordered set of known labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCategories {
    labels: Vec<LabelDef>,
}

impl LabelCategories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut categories = Self::new();
        for name in names {
            categories.insert(LabelDef::new(name));
        }
        categories
    }

    /// Insert a label unless one with the same name is already present.
    /// Returns true when the label was added.
    pub fn insert(&mut self, label: LabelDef) -> bool {
        if self.contains(&label.name) {
            return false;
        }
        self.labels.push(label);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn find(&self, name: &str) -> Option<&LabelDef> {
        self.labels.iter().find(|label| label.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|label| label.name == name)
    }

    pub fn get(&self, index: usize) -> Option<&LabelDef> {
        self.labels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelDef> {
        self.labels.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|label| label.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Union of several category sets, in first-seen order.
    ///
    /// Labels are matched by name; the same name with a different parent
    /// cannot be unified.
    pub fn unify<'a, I>(sets: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a LabelCategories>,
    {
        let mut merged = Self::new();
        for set in sets {
            for label in set.iter() {
                match merged.find(&label.name) {
                    Some(existing) if existing.parent != label.parent => {
                        return Err(ConfigError::CategoryConflict {
                            label: label.name.clone(),
                            first: existing.parent.clone(),
                            second: label.parent.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        merged.labels.push(label.clone());
                    }
                }
            }
        }
        Ok(merged)
    }
}

/// A collection of items sharing one label space
#[derive(Debug, Clone)]
pub struct AnnotationCollection {
    pub source: String,
    pub categories: Arc<LabelCategories>,
    pub items: Vec<AnnotationItem>,
}

impl AnnotationCollection {
    pub fn new(source: impl Into<String>, categories: Arc<LabelCategories>) -> Self {
        Self {
            source: source.into(),
            categories,
            items: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<AnnotationItem>) -> Self {
        self.items = items;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn annotation_count(&self) -> usize {
        self.items.iter().map(|item| item.annotations.len()).sum()
    }

    /// Names of the subsets present on items, in first-seen order
    pub fn subsets(&self) -> Vec<String> {
        let mut subsets: Vec<String> = Vec::new();
        for subset in self.items.iter().filter_map(|item| item.subset.as_ref()) {
            if !subsets.contains(subset) {
                subsets.push(subset.clone());
            }
        }
        subsets
    }
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone)]
pub struct ExportStats {
    pub items_exported: usize,
    pub annotations_exported: usize,
    pub images_copied: usize,
    pub skipped_missing_image: usize,
    pub skipped_unassigned: usize,
    pub skipped_annotations: usize,
}

impl ExportStats {
    pub fn print_summary(&self) {
        log::info!("=== Export Summary ===");
        log::info!("Items exported: {}", self.items_exported);
        log::info!("Annotations exported: {}", self.annotations_exported);
        log::info!("Images copied: {}", self.images_copied);

        if self.skipped_missing_image > 0 {
            log::warn!(
                "Items without an image file on disk: {}",
                self.skipped_missing_image
            );
        }
        if self.skipped_annotations > 0 {
            log::warn!(
                "Annotations the output format cannot represent: {}",
                self.skipped_annotations
            );
        }
        if self.skipped_unassigned > 0 {
            log::warn!(
                "Items left out of every subset and not exported: {}",
                self.skipped_unassigned
            );
        }
    }
}
