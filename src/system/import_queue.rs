// src/system/import_queue.rs

//! Strictly ordered batch import.
//!
//! A producer thread reads the files and hands each one over through a zero-capacity
//! channel. The caller's thread confirms and imports a document before the producer can
//! hand over the next one, so prompts and imports never interleave.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::thread;
use walkdir::WalkDir;

/// File extensions picked up when a directory is queued.
const PROFILE_EXTENSIONS: [&str; 2] = ["mobileconfig", "plist"];

#[derive(Debug)]
pub struct QueuedDocument {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub imported: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl QueueSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ImportQueue;

impl ImportQueue {
    /// Expands directories (recursively, sorted by name) into the profile files they contain.
    /// Plain file arguments are kept whatever their extension.
    pub fn collect_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for input in inputs {
            if !input.is_dir() {
                paths.push(input.clone());
                continue;
            }
            for entry in WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        log::warn!("Skipping unreadable entry: {}", err);
                        None
                    }
                })
            {
                let is_profile = entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| PROFILE_EXTENSIONS.contains(&e));
                if is_profile {
                    paths.push(entry.into_path());
                }
            }
        }
        paths
    }

    /// Runs `confirm` then `import` for each file, in order. Files that cannot be read and
    /// imports that fail are recorded and the queue moves on.
    pub fn run<C, I, E>(paths: Vec<PathBuf>, mut confirm: C, mut import: I) -> QueueSummary
    where
        C: FnMut(&Path) -> bool,
        I: FnMut(&QueuedDocument) -> Result<(), E>,
        E: Display,
    {
        let (sender, receiver) = sync_channel::<Result<QueuedDocument, (PathBuf, String)>>(0);
        let producer = thread::spawn(move || {
            for path in paths {
                let message = fs::read(&path)
                    .map(|bytes| QueuedDocument {
                        path: path.clone(),
                        bytes,
                    })
                    .map_err(|e| (path, e.to_string()));
                if sender.send(message).is_err() {
                    break;
                }
            }
        });

        let mut summary = QueueSummary::default();
        for message in receiver {
            let document = match message {
                Ok(document) => document,
                Err((path, reason)) => {
                    log::warn!("Could not read '{}': {}", path.display(), reason);
                    summary.failed.push((path, reason));
                    continue;
                }
            };
            if !confirm(&document.path) {
                log::info!("Skipped '{}'.", document.path.display());
                summary.skipped.push(document.path);
                continue;
            }
            match import(&document) {
                Ok(()) => summary.imported.push(document.path),
                Err(e) => {
                    log::warn!("Failed to import '{}': {}", document.path.display(), e);
                    summary.failed.push((document.path, e.to_string()));
                }
            }
        }

        if producer.join().is_err() {
            log::error!("The import reader thread panicked.");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[test]
    fn test_collect_paths_walks_directories_in_order() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.mobileconfig"), "b").unwrap();
        fs::write(dir.path().join("a.mobileconfig"), "a").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("sub").join("c.plist"), "c").unwrap();
        let single = dir.path().join("notes.txt");

        let paths = ImportQueue::collect_paths(&[dir.path().to_path_buf(), single.clone()]);
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mobileconfig", "b.mobileconfig", "c.plist", "notes.txt"]);
    }

    #[test]
    fn test_each_import_finishes_before_the_next_is_handed_over() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("{}.mobileconfig", i));
                fs::write(&path, i.to_string()).unwrap();
                path
            })
            .collect();
        let mut missing = paths.clone();
        missing.insert(2, dir.path().join("missing.mobileconfig"));

        let events = Arc::new(Mutex::new(Vec::new()));
        let confirm_events = Arc::clone(&events);
        let summary = ImportQueue::run(
            missing,
            |path| {
                let name = path.file_stem().unwrap().to_string_lossy().into_owned();
                confirm_events.lock().unwrap().push(format!("confirm {}", name));
                name != "1"
            },
            |document| {
                let content = String::from_utf8_lossy(&document.bytes).into_owned();
                events.lock().unwrap().push(format!("import {}", content));
                if content == "3" { Err("bad profile") } else { Ok(()) }
            },
        );

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "confirm 0", "import 0", "confirm 1", "confirm 2", "import 2", "confirm 3", "import 3",
            ]
        );
        assert_eq!(summary.imported, vec![paths[0].clone(), paths[2].clone()]);
        assert_eq!(summary.skipped, vec![paths[1].clone()]);
        assert_eq!(summary.failed.len(), 2);
        assert!(!summary.is_success());
    }
}
