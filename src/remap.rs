use log::{debug, info};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::types::{AnnotationCollection, LabelCategories, LabelDef};

/// What happens to labels that have no entry in the mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemapDefault {
    #[default]
    Delete,
    Keep,
}

impl FromStr for RemapDefault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delete" => Ok(RemapDefault::Delete),
            "keep" => Ok(RemapDefault::Keep),
            other => Err(format!("unknown remap default '{}'", other)),
        }
    }
}

/// Identity mapping over every label of `categories`
pub fn identity_mapping(categories: &LabelCategories) -> Vec<(String, String)> {
    categories
        .names()
        .map(|name| (name.to_string(), name.to_string()))
        .collect()
}

/// Rename labels according to `mapping` (source label, target label).
///
/// Items are never dropped here, only annotations; the filter stage removes
/// items left empty. The resulting categories follow the order of the input
/// categories.
pub fn remap_labels(
    collection: AnnotationCollection,
    mapping: &[(String, String)],
    default: RemapDefault,
) -> AnnotationCollection {
    let table: HashMap<&str, &str> = mapping
        .iter()
        .map(|(source, target)| (source.as_str(), target.as_str()))
        .collect();

    for (source, _) in mapping {
        if !collection.categories.contains(source) {
            debug!("Mapping for unknown label '{}' ignored", source);
        }
    }

    let mut categories = LabelCategories::new();
    let mut resolved: HashMap<String, String> = HashMap::new();
    for label in collection.categories.iter() {
        let target = match (table.get(label.name.as_str()), default) {
            (Some(target), _) => target.to_string(),
            (None, RemapDefault::Keep) => label.name.clone(),
            (None, RemapDefault::Delete) => continue,
        };
        let parent = if target == label.name {
            label.parent.clone()
        } else {
            String::new()
        };
        categories.insert(LabelDef {
            name: target.clone(),
            parent,
        });
        resolved.insert(label.name.clone(), target);
    }

    let mut removed = 0usize;
    let mut items = collection.items;
    for item in &mut items {
        let before = item.annotations.len();
        item.annotations.retain_mut(|annotation| match resolved.get(&annotation.label) {
            Some(target) => {
                if *target != annotation.label {
                    annotation.label = target.clone();
                }
                true
            }
            None => false,
        });
        removed += before - item.annotations.len();
    }

    info!(
        "Remapped labels: {} -> {} categories, {} annotations removed",
        collection.categories.len(),
        categories.len(),
        removed
    );

    AnnotationCollection {
        source: collection.source,
        categories: Arc::new(categories),
        items,
    }
}
