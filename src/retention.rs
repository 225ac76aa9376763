// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Retention cleaner (component C): recursively delete regular files in a
//! subtree older than a cutoff. Directories are left in place (§4.C).

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::persist::PersistError;

/// Delete regular files under `root` whose last-modified time precedes
/// `cutoff_millis` (epoch milliseconds UTC). Returns the count deleted.
///
/// Files with `mtime >= cutoff` are never touched (§8 testable property).
pub fn clean_older_than(root: &Path, cutoff_millis: i64) -> Result<usize, PersistError> {
    if !root.exists() {
        return Ok(0);
    }
    let mut deleted = 0usize;
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified = match meta.modified() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime_millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        if mtime_millis < cutoff_millis {
            std::fs::remove_file(entry.path())?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Cutoff for a retention window of `hours` before `now`.
pub fn cutoff_hours_ago(now: SystemTime, hours: i64) -> i64 {
    let now_millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    now_millis - hours * 3_600_000
}

/// Cutoff for a retention window of `days` before `now`.
pub fn cutoff_days_ago(now: SystemTime, days: i64) -> i64 {
    cutoff_hours_ago(now, days * 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_mtime(path: &Path, millis: i64) {
        let t = UNIX_EPOCH + Duration::from_millis(millis as u64);
        filetime_set(path, t);
    }

    // Minimal mtime setter; avoids pulling in the `filetime` crate for one
    // call by round-tripping through `std::fs::File::set_modified`.
    fn filetime_set(path: &Path, t: SystemTime) {
        let f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        f.set_modified(t).unwrap();
    }

    #[test]
    fn deletes_only_files_older_than_cutoff() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&new, b"x").unwrap();
        set_mtime(&old, 1_000);
        set_mtime(&new, 10_000_000);

        let deleted = clean_older_than(dir.path(), 5_000).unwrap();
        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(new.exists());
    }

    #[test]
    fn directories_are_never_deleted() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        clean_older_than(dir.path(), i64::MAX).unwrap();
        assert!(sub.exists());
    }

    #[test]
    fn missing_root_is_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(clean_older_than(&missing, 0).unwrap(), 0);
    }
}
