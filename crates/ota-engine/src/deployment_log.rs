use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_ROTATED_FILES: u32 = 5;

/// Append-only per-deployment log, rotated on every new deployment so a
/// device never accumulates unbounded log history, while keeping every
/// deployment's engine-side log retrievable for post-mortem. Not part of the
/// state-data journal — this is diagnostic output, not resume state.
pub struct DeploymentLog {
    file: File,
}

impl DeploymentLog {
    /// Rotates `<dir>/deployment.log` → `.1` → `.2` … up to
    /// `MAX_ROTATED_FILES`, dropping the oldest, then opens a fresh log for
    /// the deployment about to start.
    pub fn start(dir: &Path, deployment_id: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        rotate(dir)?;
        let path = current_log_path(dir);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "=== deployment {deployment_id} ===")?;
        Ok(DeploymentLog { file })
    }

    pub fn line(&mut self, state: &str, message: &str) -> std::io::Result<()> {
        writeln!(self.file, "[{state}] {message}")
    }
}

fn current_log_path(dir: &Path) -> PathBuf {
    dir.join("deployment.log")
}

fn rotated_path(dir: &Path, n: u32) -> PathBuf {
    dir.join(format!("deployment.log.{n}"))
}

fn rotate(dir: &Path) -> std::io::Result<()> {
    let oldest = rotated_path(dir, MAX_ROTATED_FILES);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..MAX_ROTATED_FILES).rev() {
        let from = rotated_path(dir, n);
        if from.exists() {
            fs::rename(&from, rotated_path(dir, n + 1))?;
        }
    }
    let current = current_log_path(dir);
    if current.exists() {
        fs::rename(&current, rotated_path(dir, 1))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn start_creates_fresh_log_with_header() {
        let dir = TempDir::new().unwrap();
        let mut log = DeploymentLog::start(dir.path(), "dep-1").unwrap();
        log.line("UpdateFetch", "starting download").unwrap();
        let contents = fs::read_to_string(current_log_path(dir.path())).unwrap();
        assert!(contents.contains("dep-1"));
        assert!(contents.contains("UpdateFetch"));
    }

    #[test]
    fn rotation_keeps_at_most_five_backups() {
        let dir = TempDir::new().unwrap();
        for i in 0..8 {
            DeploymentLog::start(dir.path(), &format!("dep-{i}")).unwrap();
        }
        assert!(!rotated_path(dir.path(), 6).exists());
        assert!(rotated_path(dir.path(), 5).exists());
    }
}
