use log::info;

use crate::types::{Annotation, AnnotationCollection, AnnotationItem};

/// Drop annotations rejected by `keep`, then drop items with no annotations left.
///
/// Item order and the order of surviving annotations are preserved.
pub fn filter_annotations<F>(mut collection: AnnotationCollection, keep: F) -> AnnotationCollection
where
    F: Fn(&AnnotationItem, &Annotation) -> bool,
{
    let items_before = collection.items.len();
    let annotations_before = collection.annotation_count();

    collection.items.retain_mut(|item| {
        let annotations = std::mem::take(&mut item.annotations);
        item.annotations = annotations
            .into_iter()
            .filter(|annotation| keep(item, annotation))
            .collect();
        !item.annotations.is_empty()
    });

    info!(
        "Filtered: {} -> {} items, {} -> {} annotations",
        items_before,
        collection.items.len(),
        annotations_before,
        collection.annotation_count()
    );
    collection
}

/// Remove items without annotations
pub fn remove_empty(collection: AnnotationCollection) -> AnnotationCollection {
    filter_annotations(collection, |_, _| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LabelCategories, Shape};
    use std::sync::Arc;

    fn bbox(label: &str, w: f64) -> Annotation {
        Annotation::new(
            label,
            Shape::Bbox {
                x: 0.0,
                y: 0.0,
                w,
                h: 1.0,
            },
        )
    }

    fn collection() -> AnnotationCollection {
        AnnotationCollection::new("merged", Arc::new(LabelCategories::from_names(["text"])))
            .with_items(vec![
                AnnotationItem::new("a", "1").with_annotations(vec![bbox("text", 1.0)]),
                AnnotationItem::new("b", "1"),
                AnnotationItem::new("c", "1")
                    .with_annotations(vec![bbox("text", 5.0), bbox("text", 0.5)]),
            ])
    }

    #[test]
    fn test_remove_empty() {
        let filtered = remove_empty(collection());
        let ids: Vec<_> = filtered.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(filtered.items.iter().all(|i| !i.annotations.is_empty()));
    }

    #[test]
    fn test_remove_empty_is_idempotent() {
        let once = remove_empty(collection());
        let twice = remove_empty(once.clone());
        assert_eq!(once.items, twice.items);
    }

    #[test]
    fn test_predicate_drops_annotations_and_emptied_items() {
        let filtered = filter_annotations(collection(), |_, annotation| {
            annotation.shape.bbox()[2] >= 1.0
        });
        let ids: Vec<_> = filtered.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(filtered.items[1].annotations.len(), 1);

        let none = filter_annotations(collection(), |item, _| item.id == "z");
        assert!(none.is_empty());
    }

    #[test]
    fn test_categories_are_shared() {
        let original = collection();
        let categories = Arc::clone(&original.categories);
        let filtered = remove_empty(original);
        assert!(Arc::ptr_eq(&categories, &filtered.categories));
    }
}
