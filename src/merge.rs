//! Multi-source annotation merging
//!
//! Several tasks annotating the same images are reconciled into one
//! collection. Annotations of one item are grouped into consensus clusters by
//! a pluggable [`Similarity`] measure; each cluster holds at most one
//! annotation per source. A cluster is kept when enough sources agree on it
//! (`quorum`) and its aggregate confidence reaches `output_conf_thresh`.
//! Every problem found on the way is recorded as a [`MergeError`] instead of
//! aborting the merge.

use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::error::ConfigError;
use crate::types::{Annotation, AnnotationCollection, AnnotationItem, LabelCategories, Shape};

/// Source name of the merged collection
pub const MERGED_SOURCE: &str = "merged";

/// Relative keypoint spread used by [`ShapeSimilarity`] for point sets
const KEYPOINT_SIGMA: f64 = 0.1;

/// Measures how likely two annotations describe the same object.
///
/// Scores lie in `[0, 1]`; 1 means identical geometry. Labels are not part of
/// the score, label disagreement is reported separately as a conflict.
pub trait Similarity {
    fn score(&self, a: &Annotation, b: &Annotation) -> f64;
}

impl<F> Similarity for F
where
    F: Fn(&Annotation, &Annotation) -> f64,
{
    fn score(&self, a: &Annotation, b: &Annotation) -> f64 {
        self(a, b)
    }
}

/// Default geometry similarity.
///
/// Boxes, polygons and polylines are compared by the IoU of their bounding
/// boxes. Point sets of equal length use a Gaussian keypoint similarity
/// scaled by the area they span. Different shape kinds never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeSimilarity;

impl Similarity for ShapeSimilarity {
    fn score(&self, a: &Annotation, b: &Annotation) -> f64 {
        match (&a.shape, &b.shape) {
            (Shape::Points { points: pa }, Shape::Points { points: pb }) => {
                keypoint_similarity(pa, pb)
            }
            (sa, sb) if sa.kind() == sb.kind() => bbox_iou(sa.bbox(), sb.bbox()),
            _ => 0.0,
        }
    }
}

/// Intersection over union of two `[x, y, w, h]` boxes
pub fn bbox_iou(a: [f64; 4], b: [f64; 4]) -> f64 {
    let inter_w = ((a[0] + a[2]).min(b[0] + b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = ((a[1] + a[3]).min(b[1] + b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = inter_w * inter_h;
    let union = a[2] * a[3] + b[2] * b[3] - intersection;

    if union <= 0.0 {
        // Degenerate boxes only match themselves
        return if a == b { 1.0 } else { 0.0 };
    }
    intersection / union
}

fn keypoint_similarity(a: &[(f64, f64)], b: &[(f64, f64)]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (x_min, y_min, x_max, y_max) = a.iter().chain(b.iter()).fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(x_min, y_min, x_max, y_max), &(x, y)| {
            (x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y))
        },
    );
    let area = ((x_max - x_min) * (y_max - y_min)).max(1.0);
    let denominator = 2.0 * area * KEYPOINT_SIGMA * KEYPOINT_SIGMA;

    let total: f64 = a
        .iter()
        .zip(b)
        .map(|(&(ax, ay), &(bx, by))| {
            let distance_sq = (ax - bx).powi(2) + (ay - by).powi(2);
            (-distance_sq / denominator).exp()
        })
        .sum();
    total / a.len() as f64
}

/// Merge tuning parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeConfig {
    /// Minimum similarity for two annotations to be the same object
    pub pairwise_dist: f64,
    /// Minimum number of distinct sources per cluster; 0 accepts any cluster
    pub quorum: usize,
    /// Minimum aggregate confidence per cluster; 0 disables the check
    pub output_conf_thresh: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            pairwise_dist: 0.5,
            quorum: 0,
            output_conf_thresh: 0.0,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.pairwise_dist) {
            return Err(ConfigError::MergeParam(format!(
                "pairwise_dist must be between 0.0 and 1.0, got {}",
                self.pairwise_dist
            )));
        }
        if !(0.0..=1.0).contains(&self.output_conf_thresh) {
            return Err(ConfigError::MergeParam(format!(
                "output_conf_thresh must be between 0.0 and 1.0, got {}",
                self.output_conf_thresh
            )));
        }
        Ok(())
    }
}

fn format_sources(sources: &BTreeSet<String>) -> String {
    sources.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// A non-fatal problem found while merging one item
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    /// Too little agreement or confidence behind an annotation
    #[error("Item '{item_id}': {reason}")]
    Quality { item_id: String, reason: String },

    /// Sources disagree about an annotation
    #[error("Item '{item_id}': conflict between sources [{}]: {reason}", format_sources(.sources))]
    Conflict {
        item_id: String,
        sources: BTreeSet<String>,
        reason: String,
    },
}

impl MergeError {
    pub fn item_id(&self) -> &str {
        match self {
            MergeError::Quality { item_id, .. } | MergeError::Conflict { item_id, .. } => item_id,
        }
    }
}

/// Result of a merge: the merged collection and everything that went wrong
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub collection: AnnotationCollection,
    pub errors: Vec<MergeError>,
}

#[derive(Debug, Clone, Copy)]
struct Member<'a> {
    source: usize,
    annotation: &'a Annotation,
}

/// Intersecting merge of several annotation collections
#[derive(Debug, Clone)]
pub struct IntersectMerge<S = ShapeSimilarity> {
    config: MergeConfig,
    similarity: S,
}

impl IntersectMerge<ShapeSimilarity> {
    pub fn new(config: MergeConfig) -> Self {
        Self::with_similarity(config, ShapeSimilarity)
    }
}

impl<S: Similarity> IntersectMerge<S> {
    pub fn with_similarity(config: MergeConfig, similarity: S) -> Self {
        Self { config, similarity }
    }

    /// Merge `sources` into one collection.
    ///
    /// Categories are unified before any item is looked at; a label that
    /// cannot be unified fails the whole merge.
    pub fn merge(&self, sources: &[AnnotationCollection]) -> Result<MergeOutcome, ConfigError> {
        let categories = LabelCategories::unify(sources.iter().map(|s| s.categories.as_ref()))?;
        let categories = Arc::new(categories);
        info!(
            "Merging {} sources with {} labels",
            sources.len(),
            categories.len()
        );

        let mut order: Vec<&str> = Vec::new();
        let mut grouped: HashMap<&str, Vec<(usize, &AnnotationItem)>> = HashMap::new();
        for (index, source) in sources.iter().enumerate() {
            for item in &source.items {
                grouped
                    .entry(item.id.as_str())
                    .or_insert_with(|| {
                        order.push(item.id.as_str());
                        Vec::new()
                    })
                    .push((index, item));
            }
        }

        let mut errors = Vec::new();
        let mut items = Vec::with_capacity(order.len());
        for item_id in order {
            let entries = &grouped[item_id];
            let annotations = self.merge_item(item_id, entries, sources, &mut errors);

            let first = entries[0].1;
            let mut merged = AnnotationItem::new(item_id, first.source.clone())
                .with_annotations(annotations);
            merged.image = entries.iter().find_map(|(_, item)| item.image.clone());
            items.push(merged);
        }

        let collection = AnnotationCollection::new(MERGED_SOURCE, categories).with_items(items);
        info!(
            "Merged into {} items with {} annotations, {} merge errors",
            collection.len(),
            collection.annotation_count(),
            errors.len()
        );
        Ok(MergeOutcome { collection, errors })
    }

    fn merge_item(
        &self,
        item_id: &str,
        entries: &[(usize, &AnnotationItem)],
        sources: &[AnnotationCollection],
        errors: &mut Vec<MergeError>,
    ) -> Vec<Annotation> {
        let clusters = self.cluster(entries);
        debug!(
            "Item '{}': {} annotations in {} clusters",
            item_id,
            entries.iter().map(|(_, item)| item.annotations.len()).sum::<usize>(),
            clusters.len()
        );

        clusters
            .iter()
            .filter_map(|cluster| self.resolve_cluster(item_id, cluster, sources, errors))
            .collect()
    }

    /// Greedy clustering in source order; a cluster never holds two
    /// annotations of the same source.
    fn cluster<'a>(&self, entries: &[(usize, &'a AnnotationItem)]) -> Vec<Vec<Member<'a>>> {
        let mut clusters: Vec<Vec<Member<'a>>> = Vec::new();
        for &(source, item) in entries {
            for annotation in &item.annotations {
                let mut best: Option<(usize, f64)> = None;
                for (index, cluster) in clusters.iter().enumerate() {
                    if cluster.iter().any(|member| member.source == source) {
                        continue;
                    }
                    let score = self.similarity.score(cluster[0].annotation, annotation);
                    if score >= self.config.pairwise_dist
                        && best.map_or(true, |(_, best_score)| score > best_score)
                    {
                        best = Some((index, score));
                    }
                }

                let member = Member { source, annotation };
                match best {
                    Some((index, _)) => clusters[index].push(member),
                    None => clusters.push(vec![member]),
                }
            }
        }
        clusters
    }

    fn resolve_cluster(
        &self,
        item_id: &str,
        cluster: &[Member<'_>],
        sources: &[AnnotationCollection],
        errors: &mut Vec<MergeError>,
    ) -> Option<Annotation> {
        let source_name = |member: &Member<'_>| sources[member.source].source.clone();
        let (label, votes) = vote_label(cluster);

        if cluster.len() < self.config.quorum {
            errors.push(MergeError::Quality {
                item_id: item_id.to_string(),
                reason: format!(
                    "annotation '{}' is supported by {} of {} sources, quorum is {}",
                    label,
                    cluster.len(),
                    sources.len(),
                    self.config.quorum
                ),
            });
            return None;
        }

        let confidence = cluster
            .iter()
            .map(|member| member.annotation.confidence.unwrap_or(1.0))
            .sum::<f64>()
            / sources.len().max(1) as f64;
        if self.config.output_conf_thresh > 0.0 && confidence < self.config.output_conf_thresh {
            errors.push(MergeError::Quality {
                item_id: item_id.to_string(),
                reason: format!(
                    "annotation '{}' has confidence {:.3}, below threshold {:.3}",
                    label, confidence, self.config.output_conf_thresh
                ),
            });
            return None;
        }

        if votes.len() > 1 {
            let summary = votes
                .iter()
                .map(|(label, count)| format!("'{}' x{}", label, count))
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(MergeError::Conflict {
                item_id: item_id.to_string(),
                sources: cluster.iter().map(source_name).collect(),
                reason: format!("label disagreement ({}), kept '{}'", summary, label),
            });
        }

        let mut scores = vec![0.0; cluster.len()];
        let mut disagreeing = BTreeSet::new();
        for i in 0..cluster.len() {
            for j in (i + 1)..cluster.len() {
                let score = self
                    .similarity
                    .score(cluster[i].annotation, cluster[j].annotation);
                scores[i] += score;
                scores[j] += score;
                if score < self.config.pairwise_dist {
                    disagreeing.insert(source_name(&cluster[i]));
                    disagreeing.insert(source_name(&cluster[j]));
                }
            }
        }
        if !disagreeing.is_empty() {
            errors.push(MergeError::Conflict {
                item_id: item_id.to_string(),
                sources: disagreeing,
                reason: format!(
                    "'{}' shapes disagree beyond similarity {:.2}",
                    label, self.config.pairwise_dist
                ),
            });
        }

        let mut medoid = 0;
        for (index, score) in scores.iter().enumerate() {
            if *score > scores[medoid] {
                medoid = index;
            }
        }

        Some(Annotation {
            label,
            shape: cluster[medoid].annotation.shape.clone(),
            confidence: Some(confidence),
        })
    }
}

/// Majority label of a cluster (first seen wins ties) and the vote counts
fn vote_label(cluster: &[Member<'_>]) -> (String, Vec<(String, usize)>) {
    let mut votes: Vec<(String, usize)> = Vec::new();
    for member in cluster {
        match votes
            .iter_mut()
            .find(|(label, _)| *label == member.annotation.label)
        {
            Some((_, count)) => *count += 1,
            None => votes.push((member.annotation.label.clone(), 1)),
        }
    }

    let mut winner = 0;
    for (index, (_, count)) in votes.iter().enumerate() {
        if *count > votes[winner].1 {
            winner = index;
        }
    }
    (votes[winner].0.clone(), votes)
}
