//! Merge report: error counts per item and per source plus the raw error log.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::path::Path;

use crate::error::Result;
use crate::merge::MergeError;
use crate::utils::write_json;

/// File name of the report inside the export directory
pub const REPORT_FILE_NAME: &str = "merge_report.json";

/// Counter keyed by string that remembers insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountMap(Vec<(String, usize)>);

impl CountMap {
    pub fn increment(&mut self, key: &str) {
        match self.0.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, count)) => *count += 1,
            None => self.0.push((key.to_string(), 1)),
        }
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, count)| *count)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for CountMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, count) in &self.0 {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

/// Aggregated merge errors, written once per pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    #[serde(rename = "Item errors")]
    pub item_errors: CountMap,
    #[serde(rename = "Source errors")]
    pub source_errors: CountMap,
    #[serde(rename = "All errors")]
    pub all_errors: Vec<String>,
}

impl MergeReport {
    pub fn from_errors(errors: &[MergeError]) -> Self {
        let mut report = MergeReport::default();
        for error in errors {
            report.item_errors.increment(error.item_id());
            if let MergeError::Conflict { sources, .. } = error {
                for source in sources {
                    report.source_errors.increment(source);
                }
            }
            report.all_errors.push(error.to_string());
        }
        report
    }

    /// Write the report as indented JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)?;
        log::info!(
            "Merge report with {} errors saved to {}",
            self.all_errors.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn conflict(item: &str, sources: &[&str]) -> MergeError {
        MergeError::Conflict {
            item_id: item.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            reason: "shapes disagree".to_string(),
        }
    }

    fn sample_errors() -> Vec<MergeError> {
        vec![
            MergeError::Quality {
                item_id: "a".to_string(),
                reason: "quorum not met".to_string(),
            },
            conflict("b", &["s1", "s2"]),
            conflict("b", &["s1"]),
        ]
    }

    #[test]
    fn test_report_counts() {
        let report = MergeReport::from_errors(&sample_errors());

        assert_eq!(report.item_errors.get("a"), Some(1));
        assert_eq!(report.item_errors.get("b"), Some(2));
        assert_eq!(report.item_errors.len(), 2);
        assert_eq!(report.source_errors.get("s1"), Some(2));
        assert_eq!(report.source_errors.get("s2"), Some(1));
        assert_eq!(report.source_errors.len(), 2);
        assert_eq!(report.all_errors.len(), 3);
        assert!(report.all_errors[0].starts_with("Item 'a'"));
        assert!(report.all_errors[1].contains("[s1, s2]"));
        assert!(report.all_errors[2].contains("[s1]"));
    }

    #[test]
    fn test_report_json_shape() {
        let report = MergeReport::from_errors(&sample_errors());
        let json = serde_json::to_string(&report).unwrap();

        let item = json.find("\"Item errors\"").unwrap();
        let source = json.find("\"Source errors\"").unwrap();
        let all = json.find("\"All errors\"").unwrap();
        assert!(item < source && source < all);
        assert!(json.starts_with("{\"Item errors\":{\"a\":1,\"b\":2},\"Source errors\":{\"s1\":2,\"s2\":1}"));
    }

    #[test]
    fn test_empty_report() {
        let report = MergeReport::from_errors(&[]);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            "{\"Item errors\":{},\"Source errors\":{},\"All errors\":[]}"
        );
    }

    #[test]
    fn test_save_report() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(REPORT_FILE_NAME);
        MergeReport::from_errors(&sample_errors()).save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["Item errors"]["b"], 2);
        assert_eq!(value["Source errors"]["s1"], 2);
        assert_eq!(value["All errors"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_save_report_to_missing_dir_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing").join(REPORT_FILE_NAME);
        assert!(MergeReport::default().save(&path).is_err());
    }
}
