//! Datumaro 1.0 JSON data structures
//!
//! This is the layout CVAT produces for a "Datumaro 1.0" task export. Every
//! subset lives in `annotations/<subset>.json`; images sit next to it under
//! `images/<subset>/`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Annotation, LabelCategories, LabelDef, Shape};

/// Top-level content of one annotation file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatumaroFile {
    #[serde(default)]
    pub info: Map<String, Value>,
    #[serde(default)]
    pub categories: DatumaroCategories,
    #[serde(default)]
    pub items: Vec<DatumaroItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatumaroCategories {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<DatumaroLabelCategories>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatumaroLabelCategories {
    #[serde(default)]
    pub labels: Vec<LabelDef>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumaroItem {
    pub id: String,
    #[serde(default)]
    pub annotations: Vec<DatumaroAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<DatumaroImage>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attr: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumaroImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// [height, width]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumaroAnnotation {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub group: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<usize>,
    #[serde(default)]
    pub z_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
}

impl DatumaroLabelCategories {
    pub fn to_categories(&self) -> LabelCategories {
        let mut categories = LabelCategories::new();
        for label in &self.labels {
            categories.insert(label.clone());
        }
        categories
    }

    pub fn from_categories(categories: &LabelCategories) -> Self {
        Self {
            labels: categories.iter().cloned().collect(),
            attributes: Vec::new(),
        }
    }
}

/// Reason an annotation record could not be turned into an [`Annotation`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Skip {
    #[error("unsupported annotation type '{0}'")]
    UnsupportedType(String),
    #[error("annotation has no label")]
    MissingLabel,
    #[error("label id {0} is not in the categories")]
    UnknownLabel(usize),
    #[error("annotation has no geometry")]
    MissingGeometry,
}

fn pairs(flat: &[f64]) -> Vec<(f64, f64)> {
    flat.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect()
}

fn flatten(points: &[(f64, f64)]) -> Vec<f64> {
    points.iter().flat_map(|&(x, y)| [x, y]).collect()
}

impl DatumaroAnnotation {
    /// Resolve label id and geometry against the file's categories
    pub fn to_annotation(&self, categories: &LabelCategories) -> Result<Annotation, Skip> {
        let shape = match self.kind.as_str() {
            "bbox" => {
                let [x, y, w, h] = self.bbox.ok_or(Skip::MissingGeometry)?;
                Shape::Bbox { x, y, w, h }
            }
            "polygon" | "polyline" | "points" => {
                let points = pairs(self.points.as_deref().ok_or(Skip::MissingGeometry)?);
                match self.kind.as_str() {
                    "polygon" => Shape::Polygon { points },
                    "polyline" => Shape::Polyline { points },
                    _ => Shape::Points { points },
                }
            }
            other => return Err(Skip::UnsupportedType(other.to_string())),
        };

        let label_id = self.label_id.ok_or(Skip::MissingLabel)?;
        let label = categories
            .get(label_id)
            .ok_or(Skip::UnknownLabel(label_id))?;

        Ok(Annotation {
            label: label.name.clone(),
            shape,
            confidence: self.attributes.get("score").and_then(Value::as_f64),
        })
    }

    /// Build a record for export; `None` when the label is not in `categories`
    pub fn from_annotation(
        id: u64,
        annotation: &Annotation,
        categories: &LabelCategories,
    ) -> Option<Self> {
        let label_id = categories.index_of(&annotation.label)?;
        let mut attributes = Map::new();
        if let Some(score) = annotation.confidence {
            attributes.insert("score".to_string(), Value::from(score));
        }

        let (bbox, points) = match &annotation.shape {
            Shape::Bbox { x, y, w, h } => (Some([*x, *y, *w, *h]), None),
            Shape::Polygon { points } | Shape::Polyline { points } | Shape::Points { points } => {
                (None, Some(flatten(points)))
            }
        };

        Some(Self {
            id,
            kind: annotation.shape.kind().to_string(),
            attributes,
            group: 0,
            label_id: Some(label_id),
            z_order: 0,
            bbox,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "info": {},
        "categories": {
            "label": {
                "labels": [
                    {"name": "car", "parent": "", "attributes": []},
                    {"name": "person", "parent": "", "attributes": []}
                ],
                "attributes": ["occluded"]
            },
            "points": {"items": []}
        },
        "items": [
            {
                "id": "frame_000000",
                "annotations": [
                    {"id": 0, "type": "bbox", "attributes": {"occluded": false}, "group": 0,
                     "label_id": 1, "z_order": 0, "bbox": [10.0, 20.0, 30.0, 40.0]},
                    {"id": 1, "type": "polygon", "attributes": {"score": 0.5}, "group": 0,
                     "label_id": 0, "z_order": 0, "points": [0.0, 0.0, 4.0, 0.0, 4.0, 3.0]},
                    {"id": 2, "type": "mask", "attributes": {}, "group": 0,
                     "label_id": 0, "z_order": 0}
                ],
                "attr": {"frame": 0},
                "image": {"path": "frame_000000.jpg", "size": [480, 640]}
            }
        ]
    }"#;

    #[test]
    fn test_parse_cvat_export() {
        let file: DatumaroFile = serde_json::from_str(SAMPLE).unwrap();
        let categories = file.categories.label.as_ref().unwrap().to_categories();
        assert_eq!(categories.names().collect::<Vec<_>>(), vec!["car", "person"]);

        let item = &file.items[0];
        assert_eq!(item.image.as_ref().unwrap().size, Some((480, 640)));

        let bbox = item.annotations[0].to_annotation(&categories).unwrap();
        assert_eq!(bbox.label, "person");
        assert_eq!(
            bbox.shape,
            Shape::Bbox {
                x: 10.0,
                y: 20.0,
                w: 30.0,
                h: 40.0
            }
        );
        assert_eq!(bbox.confidence, None);

        let polygon = item.annotations[1].to_annotation(&categories).unwrap();
        assert_eq!(polygon.label, "car");
        assert_eq!(polygon.confidence, Some(0.5));
        assert_eq!(
            polygon.shape,
            Shape::Polygon {
                points: vec![(0.0, 0.0), (4.0, 0.0), (4.0, 3.0)]
            }
        );

        assert_eq!(
            item.annotations[2].to_annotation(&categories),
            Err(Skip::UnsupportedType("mask".to_string()))
        );
    }

    #[test]
    fn test_unknown_label_id_is_skipped() {
        let categories = LabelCategories::from_names(["car"]);
        let record = DatumaroAnnotation {
            id: 0,
            kind: "bbox".to_string(),
            attributes: Map::new(),
            group: 0,
            label_id: Some(3),
            z_order: 0,
            bbox: Some([0.0, 0.0, 1.0, 1.0]),
            points: None,
        };
        assert_eq!(record.to_annotation(&categories), Err(Skip::UnknownLabel(3)));
        assert_eq!(
            Skip::UnknownLabel(3).to_string(),
            "label id 3 is not in the categories"
        );
    }

    #[test]
    fn test_from_annotation_writes_score() {
        let categories = LabelCategories::from_names(["car", "person"]);
        let annotation = Annotation::new(
            "person",
            Shape::Points {
                points: vec![(1.0, 2.0), (3.0, 4.0)],
            },
        )
        .with_confidence(0.75);

        let record = DatumaroAnnotation::from_annotation(7, &annotation, &categories).unwrap();
        assert_eq!(record.kind, "points");
        assert_eq!(record.label_id, Some(1));
        assert_eq!(record.points, Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(record.attributes.get("score").and_then(Value::as_f64), Some(0.75));

        let unknown = Annotation::new("dog", Shape::Points { points: vec![] });
        assert!(DatumaroAnnotation::from_annotation(0, &unknown, &categories).is_none());
    }
}
