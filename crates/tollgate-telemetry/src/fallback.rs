//! Local spool for audit entries that could not reach storage
//!
//! One JSON entry per line, appended and synced one at a time. The file is
//! only ever rewritten by recovery, which removes exactly the entries it
//! replayed and leaves anything appended in the meantime in place.

use crate::audit::AuditEntry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tollgate_core::Result;
use tracing::{debug, warn};

/// Entries read back from the spool
#[derive(Debug, Default)]
pub struct FallbackContents {
    /// Entries whose checksum verified, in file order
    pub entries: Vec<AuditEntry>,
    /// Lines that failed to parse or verify
    pub corrupt: usize,
}

/// Append-only JSONL spool with a single writer per process
#[derive(Debug)]
pub struct FallbackLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FallbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where unreadable lines are moved when recovery rewrites the spool
    pub fn rejected_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".rejected");
        PathBuf::from(name)
    }

    /// Append one entry and sync it to disk
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;

        debug!(entry_id = %entry.id, path = %self.path.display(), "Audit entry spooled");
        Ok(())
    }

    /// Read every entry currently in the spool
    pub fn read(&self) -> Result<FallbackContents> {
        let _guard = self.lock.lock();
        let mut contents = FallbackContents::default();

        for line in self.read_lines()? {
            match parse_line(&line) {
                Some(entry) => contents.entries.push(entry),
                None => contents.corrupt += 1,
            }
        }
        Ok(contents)
    }

    /// Number of lines waiting in the spool
    pub fn pending(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        Ok(self.read_lines()?.len())
    }

    /// Drop the given entries and any unreadable lines from the spool.
    ///
    /// Unreadable lines are appended to [`rejected_path`](Self::rejected_path)
    /// rather than discarded. Returns the number of entries left behind.
    pub fn remove(&self, replayed: &HashSet<String>) -> Result<usize> {
        let _guard = self.lock.lock();

        let mut keep = Vec::new();
        let mut rejected = Vec::new();
        for line in self.read_lines()? {
            match parse_line(&line) {
                Some(entry) if replayed.contains(&entry.id) => {}
                Some(_) => keep.push(line),
                None => rejected.push(line),
            }
        }

        if !rejected.is_empty() {
            warn!(
                count = rejected.len(),
                path = %self.rejected_path().display(),
                "Moving unreadable audit lines out of the fallback file"
            );
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.rejected_path())?;
            for line in &rejected {
                writeln!(file, "{}", line)?;
            }
            file.sync_data()?;
        }

        if keep.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(0);
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        {
            let mut file = File::create(&tmp_path)?;
            for line in &keep {
                writeln!(file, "{}", line)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Ok(keep.len())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

fn parse_line(line: &str) -> Option<AuditEntry> {
    serde_json::from_str::<AuditEntry>(line)
        .ok()
        .filter(AuditEntry::verify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditRecord, PolicyHit};
    use tempfile::TempDir;

    fn entry(policy: &str) -> AuditEntry {
        AuditEntry::new(AuditRecord::PolicyHit(PolicyHit {
            policy_id: policy.to_string(),
            policy_type: "static".to_string(),
            blocked: false,
        }))
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = FallbackLog::new(dir.path().join("nested/audit_fallback.jsonl"));

        log.append(&entry("a")).unwrap();
        log.append(&entry("b")).unwrap();

        let contents = log.read().unwrap();
        assert_eq!(contents.entries.len(), 2);
        assert_eq!(contents.corrupt, 0);
        assert_eq!(log.pending().unwrap(), 2);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = FallbackLog::new(dir.path().join("absent.jsonl"));

        let contents = log.read().unwrap();
        assert!(contents.entries.is_empty());
        assert_eq!(log.remove(&HashSet::new()).unwrap(), 0);
    }

    #[test]
    fn test_remove_keeps_unreplayed_entries() {
        let dir = TempDir::new().unwrap();
        let log = FallbackLog::new(dir.path().join("audit.jsonl"));

        let first = entry("a");
        let second = entry("b");
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let replayed: HashSet<String> = [first.id.clone()].into_iter().collect();
        assert_eq!(log.remove(&replayed).unwrap(), 1);

        let contents = log.read().unwrap();
        assert_eq!(contents.entries, vec![second]);
    }

    #[test]
    fn test_remove_everything_deletes_file() {
        let dir = TempDir::new().unwrap();
        let log = FallbackLog::new(dir.path().join("audit.jsonl"));

        let only = entry("a");
        log.append(&only).unwrap();

        let replayed: HashSet<String> = [only.id.clone()].into_iter().collect();
        assert_eq!(log.remove(&replayed).unwrap(), 0);
        assert!(!log.path().exists());
    }

    #[test]
    fn test_corrupt_lines_are_counted_and_moved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = FallbackLog::new(&path);

        log.append(&entry("a")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"id\": \"truncated").unwrap();

        let mut tampered = entry("b");
        tampered.checksum = "0".repeat(64);
        writeln!(file, "{}", serde_json::to_string(&tampered).unwrap()).unwrap();

        let contents = log.read().unwrap();
        assert_eq!(contents.entries.len(), 1);
        assert_eq!(contents.corrupt, 2);

        assert_eq!(log.remove(&HashSet::new()).unwrap(), 1);
        let rejected = fs::read_to_string(log.rejected_path()).unwrap();
        assert_eq!(rejected.lines().count(), 2);
    }
}
