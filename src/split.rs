use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::ConfigError;
use crate::types::AnnotationCollection;

/// Tolerance for fraction sums that are meant to be exactly 1.0
const FRACTION_EPSILON: f64 = 1e-6;

/// A named subset and the share of items it should receive
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSpec {
    pub name: String,
    pub fraction: f64,
}

impl SplitSpec {
    pub fn new(name: impl Into<String>, fraction: f64) -> Self {
        Self {
            name: name.into(),
            fraction,
        }
    }
}

/// Item id to subset name, in shuffled order
pub type SplitAssignment = Vec<(String, String)>;

/// Parse `"train:0.67, test:0.33"` into split specs
pub fn parse_splits(s: &str) -> Result<Vec<SplitSpec>, ConfigError> {
    let mut splits = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, fraction) = part
            .split_once(':')
            .ok_or_else(|| ConfigError::SplitSyntax(s.to_string()))?;
        let fraction: f64 = fraction
            .trim()
            .parse()
            .map_err(|_| ConfigError::SplitSyntax(s.to_string()))?;
        splits.push(SplitSpec::new(name.trim(), fraction));
    }
    validate_splits(&splits)?;
    Ok(splits)
}

/// Check names and fractions of a split description
pub fn validate_splits(splits: &[SplitSpec]) -> Result<(), ConfigError> {
    if splits.is_empty() {
        return Err(ConfigError::Split("at least one subset is required".to_string()));
    }

    let mut total = 0.0;
    for (index, split) in splits.iter().enumerate() {
        if split.name.is_empty() {
            return Err(ConfigError::Split("subset names must not be empty".to_string()));
        }
        if splits[..index].iter().any(|other| other.name == split.name) {
            return Err(ConfigError::Split(format!(
                "subset '{}' is listed twice",
                split.name
            )));
        }
        if !split.fraction.is_finite() || split.fraction < 0.0 {
            return Err(ConfigError::Split(format!(
                "fraction of '{}' must be a non-negative number, got {}",
                split.name, split.fraction
            )));
        }
        total += split.fraction;
    }

    if total > 1.0 + FRACTION_EPSILON {
        return Err(ConfigError::Split(format!(
            "fractions sum to {}, which is more than 1.0",
            total
        )));
    }
    Ok(())
}

/// Number of items per subset for `len` items, by largest remainder
pub fn subset_sizes(len: usize, splits: &[SplitSpec]) -> Vec<usize> {
    let total_fraction: f64 = splits.iter().map(|split| split.fraction).sum();
    let target = if (total_fraction - 1.0).abs() <= FRACTION_EPSILON {
        len
    } else {
        ((len as f64 * total_fraction).round() as usize).min(len)
    };

    let exact: Vec<f64> = splits
        .iter()
        .map(|split| len as f64 * split.fraction)
        .collect();
    let mut sizes: Vec<usize> = exact.iter().map(|value| value.floor() as usize).collect();

    let assigned: usize = sizes.iter().sum();
    let mut order: Vec<usize> = (0..splits.len()).collect();
    // Stable sort keeps earlier subsets first among equal remainders
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    for &index in order.iter().take(target.saturating_sub(assigned)) {
        sizes[index] += 1;
    }
    sizes
}

/// Randomly assign items to subsets.
///
/// The item order is shuffled with `seed` (or OS entropy when `None`) and cut
/// into consecutive runs sized by [`subset_sizes`]. Items past the last run get
/// no subset. The returned collection keeps the original item order.
pub fn split_items(
    mut collection: AnnotationCollection,
    splits: &[SplitSpec],
    seed: Option<u64>,
) -> (AnnotationCollection, SplitAssignment) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut order: Vec<usize> = (0..collection.items.len()).collect();
    order.shuffle(&mut rng);

    let sizes = subset_sizes(order.len(), splits);
    let mut assignment = SplitAssignment::with_capacity(order.len());
    let mut positions = order.into_iter();
    for (split, size) in splits.iter().zip(&sizes) {
        for index in positions.by_ref().take(*size) {
            let item = &mut collection.items[index];
            item.subset = Some(split.name.clone());
            assignment.push((item.id.clone(), split.name.clone()));
        }
    }

    let unassigned = positions.len();
    for index in positions {
        collection.items[index].subset = None;
    }

    let summary = splits
        .iter()
        .zip(&sizes)
        .map(|(split, size)| format!("{}: {}", split.name, size))
        .collect::<Vec<_>>()
        .join(", ");
    info!("Split {} items ({})", collection.items.len(), summary);
    if unassigned > 0 {
        warn!(
            "{} items fall outside the configured fractions and will not be exported",
            unassigned
        );
    }

    (collection, assignment)
}
