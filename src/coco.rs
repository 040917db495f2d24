//! COCO format data structures and writer
//!
//! Each subset becomes one `annotations/instances_<subset>.json` file with
//! its images copied to `images/<subset>/`.

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::types::{AnnotationItem, ExportStats, LabelCategories, Shape};
use crate::utils::{copy_image, create_progress_bar, ensure_directory, export_file_name, write_json};

/// COCO dataset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub year: u32,
    pub version: String,
    pub description: String,
    pub contributor: String,
    pub url: String,
    pub date_created: String,
}

impl Default for Info {
    fn default() -> Self {
        let today = chrono::Utc::now().date_naive();
        Self {
            year: chrono::Datelike::year(&today) as u32,
            version: "1.0".to_string(),
            description: "Merged from CVAT task exports".to_string(),
            contributor: "cvat2dataset".to_string(),
            url: String::new(),
            date_created: today.to_string(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    pub url: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Unknown".to_string(),
            url: String::new(),
        }
    }
}

/// COCO category information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub license: u32,
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [f64; 4], // [x, y, width, height]
    pub area: f64,
    pub iscrowd: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    pub info: Info,
    pub licenses: Vec<License>,
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
}

/// Builds one COCO file from merged items
pub struct CocoWriter<'a> {
    label_categories: &'a LabelCategories,
    categories: Vec<Category>,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    next_image_id: u32,
    next_annotation_id: u32,
    skipped: usize,
}

impl<'a> CocoWriter<'a> {
    pub fn new(label_categories: &'a LabelCategories) -> Self {
        let categories = label_categories
            .iter()
            .enumerate()
            .map(|(index, label)| Category {
                id: (index + 1) as u32, // COCO uses 1-based indexing
                name: label.name.clone(),
                supercategory: if label.parent.is_empty() {
                    "none".to_string()
                } else {
                    label.parent.clone()
                },
            })
            .collect();

        Self {
            label_categories,
            categories,
            images: Vec::new(),
            annotations: Vec::new(),
            next_image_id: 1,
            next_annotation_id: 1,
            skipped: 0,
        }
    }

    /// Add an item as one image with all of its area annotations.
    /// Returns the number of annotations written.
    pub fn add_item(&mut self, item: &AnnotationItem, file_name: String) -> usize {
        let image_id = self.next_image_id;
        self.next_image_id += 1;

        let (height, width) = item
            .image
            .as_ref()
            .and_then(|image| image.size)
            .unwrap_or((0, 0));
        self.images.push(Image {
            id: image_id,
            file_name,
            width,
            height,
            license: 1,
        });

        let mut written = 0;
        for annotation in &item.annotations {
            let Some(index) = self.label_categories.index_of(&annotation.label) else {
                self.skipped += 1;
                continue;
            };

            let (bbox, area, segmentation) = match &annotation.shape {
                Shape::Bbox { x, y, w, h } => ([*x, *y, *w, *h], w * h, None),
                Shape::Polygon { points } => {
                    let polygon: Vec<f64> = points.iter().flat_map(|&(x, y)| [x, y]).collect();
                    (
                        calculate_bbox_from_polygon(&polygon),
                        calculate_polygon_area(&polygon),
                        Some(vec![polygon]),
                    )
                }
                Shape::Polyline { .. } | Shape::Points { .. } => {
                    debug!(
                        "Item {}: {} annotations have no COCO instance form",
                        item.id,
                        annotation.shape.kind()
                    );
                    self.skipped += 1;
                    continue;
                }
            };

            self.annotations.push(Annotation {
                id: self.next_annotation_id,
                image_id,
                category_id: (index + 1) as u32,
                bbox,
                area,
                iscrowd: 0,
                segmentation,
                score: annotation.confidence,
            });
            self.next_annotation_id += 1;
            written += 1;
        }
        written
    }

    /// Annotations that could not be written
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Build the complete COCO dataset structure
    pub fn build(self) -> CocoFile {
        CocoFile {
            info: Info::default(),
            licenses: vec![License::default()],
            categories: self.categories,
            images: self.images,
            annotations: self.annotations,
        }
    }
}

/// Calculate polygon area using the shoelace formula
pub fn calculate_polygon_area(polygon: &[f64]) -> f64 {
    if polygon.len() < 6 || polygon.len() % 2 != 0 {
        return 0.0;
    }

    let n = polygon.len() / 2;
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += polygon[i * 2] * polygon[j * 2 + 1] - polygon[j * 2] * polygon[i * 2 + 1];
    }
    area.abs() / 2.0
}

/// Calculate bounding box from flat polygon coordinates
pub fn calculate_bbox_from_polygon(polygon: &[f64]) -> [f64; 4] {
    if polygon.len() < 2 || polygon.len() % 2 != 0 {
        return [0.0, 0.0, 0.0, 0.0];
    }

    let (min_x, min_y, max_x, max_y) = polygon.chunks_exact(2).fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(min_x, min_y, max_x, max_y), point| {
            (
                min_x.min(point[0]),
                min_y.min(point[1]),
                max_x.max(point[0]),
                max_y.max(point[1]),
            )
        },
    );
    [min_x, min_y, max_x - min_x, max_y - min_y]
}

/// Write one subset as a COCO instances file and copy its images
pub fn export_coco_subset(
    output_dir: &Path,
    subset: &str,
    items: &[&AnnotationItem],
    categories: &LabelCategories,
    stats: &mut ExportStats,
) -> Result<()> {
    let annotations_dir = output_dir.join("annotations");
    let images_dir = output_dir.join("images").join(subset);
    ensure_directory(&annotations_dir)?;
    ensure_directory(&images_dir)?;

    let pb = create_progress_bar(items.len() as u64, subset);
    let mut writer = CocoWriter::new(categories);
    for item in items {
        let image_path = item.image.as_ref().map(|image| image.path.as_path());
        let file_name = export_file_name(&item.id, image_path);

        match image_path {
            Some(path) if copy_image(path, &images_dir, &file_name)? => stats.images_copied += 1,
            _ => stats.skipped_missing_image += 1,
        }

        stats.annotations_exported += writer.add_item(item, file_name);
        stats.items_exported += 1;
        pb.inc(1);
    }
    stats.skipped_annotations += writer.skipped();
    pb.finish_with_message(format!("{} export complete", subset));

    let path = annotations_dir.join(format!("instances_{}.json", subset));
    write_json(&path, &writer.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation as Ann, ImageInfo};

    #[test]
    fn test_calculate_polygon_area() {
        let square = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
        assert_eq!(calculate_polygon_area(&square), 100.0);
        assert_eq!(calculate_polygon_area(&[0.0, 0.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_calculate_bbox_from_polygon() {
        let triangle = [2.0, 3.0, 8.0, 3.0, 5.0, 9.0];
        assert_eq!(calculate_bbox_from_polygon(&triangle), [2.0, 3.0, 6.0, 6.0]);
    }

    #[test]
    fn test_writer_builds_one_based_ids() {
        let categories = LabelCategories::from_names(["car", "person"]);
        let mut item = AnnotationItem::new("img", "1").with_annotations(vec![
            Ann::new(
                "person",
                Shape::Bbox {
                    x: 1.0,
                    y: 2.0,
                    w: 3.0,
                    h: 4.0,
                },
            ),
            Ann::new(
                "car",
                Shape::Polygon {
                    points: vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)],
                },
            )
            .with_confidence(0.5),
            Ann::new("car", Shape::Points { points: vec![(1.0, 1.0)] }),
        ]);
        item.image = Some(ImageInfo {
            path: "img.jpg".into(),
            size: Some((480, 640)),
        });

        let mut writer = CocoWriter::new(&categories);
        assert_eq!(writer.add_item(&item, "img.jpg".to_string()), 2);
        assert_eq!(writer.skipped(), 1);
        let coco = writer.build();

        assert_eq!(coco.categories[0].id, 1);
        assert_eq!(coco.categories[1].name, "person");
        assert_eq!(coco.images[0].width, 640);
        assert_eq!(coco.images[0].height, 480);

        assert_eq!(coco.annotations[0].category_id, 2);
        assert_eq!(coco.annotations[0].area, 12.0);
        assert!(coco.annotations[0].segmentation.is_none());

        assert_eq!(coco.annotations[1].id, 2);
        assert_eq!(coco.annotations[1].category_id, 1);
        assert_eq!(coco.annotations[1].bbox, [0.0, 0.0, 4.0, 4.0]);
        assert_eq!(coco.annotations[1].area, 16.0);
        assert_eq!(coco.annotations[1].score, Some(0.5));
    }
}
