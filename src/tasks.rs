//! Resolution of CVAT task ids to extracted task exports on disk.
//!
//! Downloading and unpacking archives from a CVAT server happens outside this
//! crate. Whatever performs it only has to implement [`TaskExporter`]; the
//! pipeline then sees the tasks that were fetched successfully and nothing
//! else.

use log::{error, info};
use std::path::PathBuf;
use thiserror::Error;

use crate::io::is_task_export;

/// Failure to provide one task export
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} was not found at {1}")]
    NotFound(String, PathBuf),

    #[error("task {0} at {1} is not an extracted Datumaro export")]
    NotAnExport(String, PathBuf),

    #[error("task {task_id}: {message}")]
    Failed { task_id: String, message: String },
}

/// Provides an extracted annotation directory for a task id
pub trait TaskExporter {
    fn fetch_task_export(&self, task_id: &str) -> Result<PathBuf, TaskError>;
}

/// Looks tasks up as `<root>/<task_id>` directories that were already extracted
#[derive(Debug, Clone)]
pub struct DirectoryTaskExporter {
    root: PathBuf,
}

impl DirectoryTaskExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TaskExporter for DirectoryTaskExporter {
    fn fetch_task_export(&self, task_id: &str) -> Result<PathBuf, TaskError> {
        let path = self.root.join(task_id);
        if !path.is_dir() {
            return Err(TaskError::NotFound(task_id.to_string(), path));
        }
        if !is_task_export(&path) {
            return Err(TaskError::NotAnExport(task_id.to_string(), path));
        }
        Ok(path)
    }
}

/// Fetch every task, logging and skipping the ones that fail
pub fn collect_task_exports<E: TaskExporter + ?Sized>(
    exporter: &E,
    task_ids: &[String],
) -> Vec<PathBuf> {
    let mut exports = Vec::with_capacity(task_ids.len());
    for task_id in task_ids {
        match exporter.fetch_task_export(task_id) {
            Ok(path) => {
                info!("Using task {} from {:?}", task_id, path);
                exports.push(path);
            }
            Err(e) => error!("Skipping task: {}", e),
        }
    }
    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct FlakyExporter;

    impl TaskExporter for FlakyExporter {
        fn fetch_task_export(&self, task_id: &str) -> Result<PathBuf, TaskError> {
            if task_id == "2" {
                Err(TaskError::Failed {
                    task_id: task_id.to_string(),
                    message: "export timed out".to_string(),
                })
            } else {
                Ok(PathBuf::from(format!("/exports/{}", task_id)))
            }
        }
    }

    #[test]
    fn test_failed_tasks_are_skipped() {
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let exports = collect_task_exports(&FlakyExporter, &ids);
        assert_eq!(
            exports,
            vec![PathBuf::from("/exports/1"), PathBuf::from("/exports/3")]
        );
    }

    #[test]
    fn test_directory_exporter() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("10/annotations")).unwrap();
        fs::create_dir_all(temp_dir.path().join("11")).unwrap();

        let exporter = DirectoryTaskExporter::new(temp_dir.path());
        assert_eq!(
            exporter.fetch_task_export("10").unwrap(),
            temp_dir.path().join("10")
        );
        assert!(matches!(
            exporter.fetch_task_export("11"),
            Err(TaskError::NotAnExport(..))
        ));
        assert!(matches!(
            exporter.fetch_task_export("12"),
            Err(TaskError::NotFound(..))
        ));
    }
}
