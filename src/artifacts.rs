//! Hierarchical file store for pipelines, and the staging/promotion protocol
//! for artifacts.
//!
//! Layout under the base path:
//!
//! ```text
//! {pipeline_id}/
//!   runs/
//!     latest -> v{n}
//!     v{n}/
//!       run_info.json
//!       checkpoint_{pos}_{name}/outputs/{artifact}_{artifact_id}_v{n}.{ext}
//!   .temp/exec_{execution_id}/
//!     workspace/
//!     artifacts_staging/{artifact}_{artifact_id}.{ext}
//!   .archived/rollback_{rollback_id}_{YYYYmmdd_HHMMSS}/archived_data/
//! ```
//!
//! Staging paths are scoped to the execution id; permanent names embed the
//! run version so one logical artifact can exist at several versions.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::context::PipelineContext;
use crate::db;
use crate::definitions::CheckpointDefinition;
use crate::errors::PipelineError;
use crate::models::{
    Artifact, ArtifactFormat, ArtifactPreview, ArtifactView, CheckpointExecution, MissingArtifact,
};

pub const RUN_INFO_FILE: &str = "run_info.json";
const LATEST_LINK: &str = "latest";

/// Size and SHA-256 of a file written or copied by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_path: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn pipeline_dir(&self, pipeline_id: &str) -> PathBuf {
        self.base_path.join(pipeline_id)
    }

    pub fn runs_dir(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join("runs")
    }

    pub fn run_dir(&self, pipeline_id: &str, run_version: i64) -> PathBuf {
        self.runs_dir(pipeline_id).join(format!("v{}", run_version))
    }

    /// Permanent output path for one checkpoint slot of a run.
    pub fn checkpoint_dir(
        &self,
        pipeline_id: &str,
        run_version: i64,
        position: i64,
        checkpoint_name: &str,
    ) -> PathBuf {
        self.run_dir(pipeline_id, run_version).join(format!(
            "checkpoint_{}_{}",
            position,
            sanitize_name(checkpoint_name)
        ))
    }

    pub fn temp_dir(&self, pipeline_id: &str, execution_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id)
            .join(".temp")
            .join(format!("exec_{}", execution_id))
    }

    pub fn archive_root(&self, pipeline_id: &str) -> PathBuf {
        self.pipeline_dir(pipeline_id).join(".archived")
    }

    /// Archive directory for one rollback attempt, unique per id and second.
    pub fn archive_dir(&self, pipeline_id: &str, rollback_id: &str, at: DateTime<Utc>) -> PathBuf {
        self.archive_root(pipeline_id).join(format!(
            "rollback_{}_{}",
            rollback_id,
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Create the temp workspace, the staging area and the (empty) permanent
    /// output directory of a new execution.
    pub fn prepare_execution(&self, temp_dir: &Path, permanent_dir: &Path) -> Result<()> {
        for dir in [
            workspace_dir(temp_dir),
            staging_dir(temp_dir),
            outputs_dir(permanent_dir),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Point `runs/latest` at `v{run_version}`.
    pub fn update_latest_pointer(&self, pipeline_id: &str, run_version: i64) -> Result<()> {
        let runs_dir = self.runs_dir(pipeline_id);
        fs::create_dir_all(&runs_dir)
            .with_context(|| format!("Failed to create runs directory: {}", runs_dir.display()))?;
        let latest = runs_dir.join(LATEST_LINK);
        if let Ok(meta) = fs::symlink_metadata(&latest) {
            if meta.file_type().is_dir() {
                fs::remove_dir_all(&latest).context("Failed to remove latest marker directory")?;
            } else {
                fs::remove_file(&latest).context("Failed to remove latest link")?;
            }
        }
        let target = format!("v{}", run_version);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &latest)
                .with_context(|| format!("Failed to link latest -> {}", target))?;
        }
        #[cfg(not(unix))]
        {
            let marker = latest.join(format!("points_to_{}", target));
            fs::create_dir_all(&marker).context("Failed to create latest marker")?;
        }
        debug!(pipeline_id, run_version, "Updated latest run pointer");
        Ok(())
    }

    /// Version currently referenced by `runs/latest`, if any.
    pub fn read_latest_pointer(&self, pipeline_id: &str) -> Result<Option<i64>> {
        let latest = self.runs_dir(pipeline_id).join(LATEST_LINK);
        let name = match fs::read_link(&latest) {
            Ok(target) => target.to_string_lossy().into_owned(),
            Err(_) if latest.is_dir() => {
                let marker = fs::read_dir(&latest)
                    .context("Failed to read latest marker directory")?
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .find(|n| n.starts_with("points_to_"));
                match marker {
                    Some(m) => m.trim_start_matches("points_to_").to_string(),
                    None => return Ok(None),
                }
            }
            Err(_) => return Ok(None),
        };
        Ok(name.strip_prefix('v').and_then(|v| v.parse().ok()))
    }
}

pub fn workspace_dir(temp_dir: &Path) -> PathBuf {
    temp_dir.join("workspace")
}

pub fn staging_dir(temp_dir: &Path) -> PathBuf {
    temp_dir.join("artifacts_staging")
}

pub fn outputs_dir(permanent_dir: &Path) -> PathBuf {
    permanent_dir.join("outputs")
}

pub fn staged_file_name(name: &str, artifact_id: &str, format: ArtifactFormat) -> String {
    format!("{}_{}.{}", name, artifact_id, format.extension())
}

pub fn versioned_file_name(
    name: &str,
    artifact_id: &str,
    run_version: i64,
    format: ArtifactFormat,
) -> String {
    format!(
        "{}_{}_v{}.{}",
        name,
        artifact_id,
        run_version,
        format.extension()
    )
}

/// Lowercase a display name into a single path segment.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "checkpoint".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn stat_file(path: &Path) -> Result<FileStat> {
    let size_bytes = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    Ok(FileStat {
        size_bytes,
        checksum: checksum_file(path)?,
    })
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<FileStat> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(FileStat {
        size_bytes: bytes.len() as u64,
        checksum: checksum_bytes(bytes),
    })
}

pub fn write_json(path: &Path, value: &serde_json::Value) -> Result<FileStat> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize JSON document")?;
    write_file(path, content.as_bytes())
}

pub fn copy_file(src: &Path, dest: &Path) -> Result<FileStat> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    stat_file(dest)
}

/// Move a file, falling back to copy-and-delete across filesystems.
/// Returns `None` when the source does not exist.
pub fn move_file(src: &Path, dest: &Path) -> Result<Option<FileStat>> {
    if !src.is_file() {
        return Ok(None);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    if fs::rename(src, dest).is_err() {
        fs::copy(src, dest)
            .with_context(|| format!("Failed to move {} to {}", src.display(), dest.display()))?;
        fs::remove_file(src)
            .with_context(|| format!("Failed to remove moved file {}", src.display()))?;
    }
    Ok(Some(stat_file(dest)?))
}

/// Delete a directory tree or file. Missing paths are not an error.
pub fn remove_tree(path: &Path) -> Result<bool> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Recursively copy `src` into `dest`, returning the number of bytes copied.
/// Symlinks are recreated as symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut total = 0;
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("Walked entry outside source tree")?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("Failed to recreate link {}", target.display()))?;
            #[cfg(not(unix))]
            let _ = link;
        } else {
            total += fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(total)
}

/// Total size in bytes of the regular files under `path`.
pub fn tree_size(path: &Path) -> Result<u64> {
    if path.is_file() {
        return Ok(fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len());
    }
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            total += entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .len();
        }
    }
    Ok(total)
}

/// Filesystem side effects of one transaction.
///
/// Changes made before commit are recorded so they can be reversed if the
/// transaction does not commit; reversal runs on drop. Removals that must
/// only happen once the new state is durable are deferred to [`FsJournal::commit`].
#[derive(Debug, Default)]
pub struct FsJournal {
    undo: Vec<UndoAction>,
    deferred_removals: Vec<PathBuf>,
    committed: bool,
}

#[derive(Debug)]
enum UndoAction {
    MoveBack { from: PathBuf, to: PathBuf },
    Remove(PathBuf),
}

impl FsJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file was moved from `original` to `moved_to`.
    pub fn moved(&mut self, original: &Path, moved_to: &Path) {
        self.undo.push(UndoAction::MoveBack {
            from: moved_to.to_path_buf(),
            to: original.to_path_buf(),
        });
    }

    /// A file or directory tree was created and did not exist before.
    pub fn created(&mut self, path: &Path) {
        self.undo.push(UndoAction::Remove(path.to_path_buf()));
    }

    /// Move an existing file at `path` to a sibling backup. The backup is put
    /// back if the transaction does not commit and deleted once it does.
    pub fn set_aside(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Ok(());
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let backup = path.with_file_name(format!(".{}.{}.bak", file_name, Uuid::new_v4()));
        move_file(path, &backup)?;
        self.moved(path, &backup);
        self.remove_after_commit(&backup);
        Ok(())
    }

    /// Write `path`, replacing any previous content only if the transaction
    /// commits.
    pub fn write_file(&mut self, path: &Path, bytes: &[u8]) -> Result<FileStat> {
        self.set_aside(path)?;
        self.created(path);
        write_file(path, bytes)
    }

    pub fn write_json(&mut self, path: &Path, value: &serde_json::Value) -> Result<FileStat> {
        let content =
            serde_json::to_string_pretty(value).context("Failed to serialize JSON document")?;
        self.write_file(path, content.as_bytes())
    }

    /// Delete `path` once the transaction has committed.
    pub fn remove_after_commit(&mut self, path: &Path) {
        self.deferred_removals.push(path.to_path_buf());
    }

    /// The transaction committed: keep every recorded change and perform the
    /// deferred removals. Removal failures leave orphaned files and are logged.
    pub fn commit(mut self) {
        self.committed = true;
        for path in self.deferred_removals.drain(..) {
            match remove_tree(&path) {
                Ok(true) => debug!(path = %path.display(), "Removed after commit"),
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove after commit"),
            }
        }
    }
}

impl Drop for FsJournal {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for action in self.undo.drain(..).rev() {
            let result = match &action {
                UndoAction::MoveBack { from, to } => move_file(from, to).map(|_| ()),
                UndoAction::Remove(path) => remove_tree(path).map(|_| ()),
            };
            match result {
                Ok(()) => debug!(?action, "Reverted filesystem change"),
                Err(e) => warn!(?action, error = %e, "Failed to revert filesystem change"),
            }
        }
    }
}

// ── Staging and promotion inside a transaction ───────────────────────

/// Stage `bytes` as artifact `name` of `execution`. An existing artifact with
/// the same name is overwritten in place and keeps its `artifact_id`.
pub(crate) fn stage_bytes(
    conn: &Connection,
    execution: &CheckpointExecution,
    name: &str,
    format: ArtifactFormat,
    bytes: &[u8],
    journal: &mut FsJournal,
) -> Result<Artifact> {
    let now = Utc::now();
    let staging = staging_dir(&execution.temp_workspace_path);
    match db::artifacts::find_artifact_by_name(conn, &execution.id, name)? {
        Some(mut existing) => {
            let path = staging.join(staged_file_name(name, &existing.artifact_id, format));
            if existing.file_path != path {
                journal.set_aside(&existing.file_path)?;
            }
            let stat = journal.write_file(&path, bytes)?;
            existing.format = format;
            existing.file_path = path;
            existing.size_bytes = stat.size_bytes;
            existing.checksum = stat.checksum;
            existing.promoted_to_permanent_at = None;
            existing.updated_at = now;
            db::artifacts::update_artifact(conn, &existing)?;
            debug!(artifact_id = %existing.artifact_id, name, "Overwrote staged artifact");
            Ok(existing)
        }
        None => {
            let artifact_id = Uuid::new_v4().to_string();
            let path = staging.join(staged_file_name(name, &artifact_id, format));
            let stat = journal.write_file(&path, bytes)?;
            let artifact = Artifact {
                id: Uuid::new_v4().to_string(),
                execution_id: execution.id.clone(),
                artifact_id,
                name: name.to_string(),
                format,
                file_path: path,
                size_bytes: stat.size_bytes,
                checksum: stat.checksum,
                promoted_to_permanent_at: None,
                created_at: now,
                updated_at: now,
            };
            db::artifacts::insert_artifact(conn, &artifact)?;
            debug!(artifact_id = %artifact.artifact_id, name, "Staged new artifact");
            Ok(artifact)
        }
    }
}

/// Move every staged artifact of `execution` into permanent storage.
///
/// Staged files that no longer exist are skipped and reported, as are
/// declared outputs that were never produced.
pub(crate) fn promote_staged(
    conn: &Connection,
    execution: &CheckpointExecution,
    checkpoint: &CheckpointDefinition,
    run_version: i64,
    journal: &mut FsJournal,
) -> Result<(Vec<Artifact>, Vec<MissingArtifact>)> {
    let outputs = outputs_dir(&execution.permanent_output_path);
    let artifacts = db::artifacts::list_artifacts(conn, &execution.id)?;
    let mut promoted = Vec::new();
    let mut missing = Vec::new();

    for mut artifact in artifacts {
        if artifact.is_promoted() {
            continue;
        }
        let dest = outputs.join(versioned_file_name(
            &artifact.name,
            &artifact.artifact_id,
            run_version,
            artifact.format,
        ));
        let source = artifact.file_path.clone();
        match move_file(&source, &dest)? {
            Some(stat) => {
                journal.moved(&source, &dest);
                artifact.file_path = dest;
                artifact.size_bytes = stat.size_bytes;
                artifact.checksum = stat.checksum;
                artifact.promoted_to_permanent_at = Some(Utc::now());
                artifact.updated_at = Utc::now();
                db::artifacts::update_artifact(conn, &artifact)?;
                info!(
                    execution_id = %execution.id,
                    artifact_id = %artifact.artifact_id,
                    "Promoted artifact to permanent storage"
                );
                promoted.push(artifact);
            }
            None => {
                warn!(
                    execution_id = %execution.id,
                    artifact_id = %artifact.artifact_id,
                    path = %source.display(),
                    "Staged artifact file missing, skipping promotion"
                );
                missing.push(MissingArtifact {
                    name: artifact.name.clone(),
                    reason: format!("staged file not found at {}", source.display()),
                });
            }
        }
    }

    let produced = db::artifacts::list_artifacts(conn, &execution.id)?;
    for declared in &checkpoint.outputs {
        if !produced.iter().any(|a| a.name == declared.name) {
            debug!(execution_id = %execution.id, name = %declared.name, "Declared output not produced");
            missing.push(MissingArtifact {
                name: declared.name.clone(),
                reason: "declared output was not produced".to_string(),
            });
        }
    }

    Ok((promoted, missing))
}

pub(crate) fn view(artifact: Artifact) -> ArtifactView {
    let file_exists = artifact.file_path.is_file();
    ArtifactView {
        artifact,
        file_exists,
    }
}

/// Read at most `limit` bytes of a text file.
pub(crate) fn read_text_prefix(path: &Path, limit: u64) -> Result<(String, bool)> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let mut buf = Vec::new();
    file.take(limit)
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((String::from_utf8_lossy(&buf).into_owned(), size > limit))
}

impl PipelineContext {
    /// Artifacts of an execution with on-disk presence.
    pub fn list_artifacts(&self, execution_id: &str) -> Result<Vec<ArtifactView>, PipelineError> {
        let conn = self.store().conn();
        db::executions::get_execution(conn, execution_id)?
            .ok_or_else(|| PipelineError::not_found("Execution", execution_id))?;
        Ok(db::artifacts::list_artifacts(conn, execution_id)?
            .into_iter()
            .map(view)
            .collect())
    }

    /// Text content of an artifact, capped at the configured preview size.
    pub fn get_artifact_preview(
        &self,
        artifact_record_id: &str,
    ) -> Result<ArtifactPreview, PipelineError> {
        let artifact = db::artifacts::get_artifact(self.store().conn(), artifact_record_id)?
            .ok_or_else(|| PipelineError::not_found("Artifact", artifact_record_id))?;
        let file_exists = artifact.file_path.is_file();
        let (content, truncated) = if file_exists {
            let (text, truncated) =
                read_text_prefix(&artifact.file_path, self.limits().preview_max_bytes)?;
            (Some(text), truncated)
        } else {
            (None, false)
        };
        Ok(ArtifactPreview {
            artifact_record_id: artifact.id,
            name: artifact.name,
            format: artifact.format,
            size_bytes: artifact.size_bytes,
            file_exists,
            content,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let store = ArtifactStore::new("/data");
        assert_eq!(
            store.checkpoint_dir("p1", 3, 1, "Review Draft"),
            PathBuf::from("/data/p1/runs/v3/checkpoint_1_review_draft")
        );
        assert_eq!(
            store.temp_dir("p1", "e9"),
            PathBuf::from("/data/p1/.temp/exec_e9")
        );
        let at = DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            store.archive_dir("p1", "rb", at),
            PathBuf::from("/data/p1/.archived/rollback_rb_20240506_070809")
        );
    }

    #[test]
    fn test_file_names_embed_identity() {
        assert_eq!(
            staged_file_name("form_data", "a1", ArtifactFormat::Json),
            "form_data_a1.json"
        );
        assert_eq!(
            versioned_file_name("form_data", "a1", 2, ArtifactFormat::Md),
            "form_data_a1_v2.md"
        );
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Gather Requirements!  "), "gather_requirements");
        assert_eq!(sanitize_name("a//b"), "a_b");
        assert_eq!(sanitize_name("???"), "checkpoint");
    }

    #[test]
    fn test_checksum_matches_for_bytes_and_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("f.txt");
        let stat = write_file(&path, b"hello")?;
        assert_eq!(stat.size_bytes, 5);
        assert_eq!(stat.checksum, checksum_file(&path)?);
        assert_eq!(
            stat.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        Ok(())
    }

    #[test]
    fn test_move_file_skips_missing_source() -> Result<()> {
        let dir = tempdir()?;
        let moved = move_file(&dir.path().join("absent"), &dir.path().join("dest"))?;
        assert!(moved.is_none());
        assert!(!dir.path().join("dest").exists());
        Ok(())
    }

    #[test]
    fn test_move_file_creates_parent() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("a.txt");
        write_file(&src, b"data")?;
        let dest = dir.path().join("deep/er/b.txt");
        let stat = move_file(&src, &dest)?.expect("source exists");
        assert_eq!(stat.size_bytes, 4);
        assert!(!src.exists());
        assert!(dest.exists());
        Ok(())
    }

    #[test]
    fn test_copy_tree_and_size() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        write_file(&src.join("a.txt"), b"123")?;
        write_file(&src.join("nested/b.txt"), b"4567")?;
        let dest = dir.path().join("dest");
        let copied = copy_tree(&src, &dest)?;
        assert_eq!(copied, 7);
        assert_eq!(tree_size(&dest)?, 7);
        assert!(src.join("a.txt").exists(), "copy must not move");
        assert_eq!(fs::read_to_string(dest.join("nested/b.txt"))?, "4567");
        Ok(())
    }

    #[test]
    fn test_remove_tree_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("t");
        write_file(&target.join("x"), b"x")?;
        assert!(remove_tree(&target)?);
        assert!(!remove_tree(&target)?);
        Ok(())
    }

    #[test]
    fn test_latest_pointer_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.read_latest_pointer("p")?, None);
        store.update_latest_pointer("p", 1)?;
        store.update_latest_pointer("p", 4)?;
        assert_eq!(store.read_latest_pointer("p")?, Some(4));
        Ok(())
    }

    #[test]
    fn test_journal_reverts_unless_committed() -> Result<()> {
        let dir = tempdir()?;
        let original = dir.path().join("staged.txt");
        let moved = dir.path().join("out/final.txt");
        let created = dir.path().join("archive");
        let doomed = dir.path().join("temp");
        write_file(&original, b"payload")?;
        write_file(&doomed.join("scratch"), b"x")?;
        {
            let mut journal = FsJournal::new();
            move_file(&original, &moved)?;
            journal.moved(&original, &moved);
            fs::create_dir_all(&created)?;
            journal.created(&created);
            journal.remove_after_commit(&doomed);
        }
        assert!(original.exists());
        assert!(!moved.exists());
        assert!(!created.exists());
        assert!(doomed.exists(), "deferred removals only run on commit");

        let mut journal = FsJournal::new();
        move_file(&original, &moved)?;
        journal.moved(&original, &moved);
        journal.remove_after_commit(&doomed);
        journal.commit();
        assert!(moved.exists());
        assert!(!doomed.exists());
        Ok(())
    }

    #[test]
    fn test_journaled_overwrite_restores_previous_content() -> Result<()> {
        let dir = tempdir()?;
        let staged = dir.path().join("staging/form.json");
        let renamed = dir.path().join("staging/form.md");
        write_file(&staged, b"first")?;
        {
            let mut journal = FsJournal::new();
            journal.write_file(&staged, b"second")?;
            journal.set_aside(&staged)?;
            journal.write_file(&renamed, b"third")?;
        }
        assert_eq!(fs::read(&staged)?, b"first");
        assert!(!renamed.exists());
        assert_eq!(fs::read_dir(dir.path().join("staging"))?.count(), 1);

        let mut journal = FsJournal::new();
        journal.write_file(&staged, b"second")?;
        journal.commit();
        assert_eq!(fs::read(&staged)?, b"second");
        assert_eq!(
            fs::read_dir(dir.path().join("staging"))?.count(),
            1,
            "backup is removed on commit"
        );
        Ok(())
    }

    #[test]
    fn test_read_text_prefix_truncates() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("big.txt");
        write_file(&path, b"abcdefghij")?;
        let (text, truncated) = read_text_prefix(&path, 4)?;
        assert_eq!(text, "abcd");
        assert!(truncated);
        let (text, truncated) = read_text_prefix(&path, 100)?;
        assert_eq!(text, "abcdefghij");
        assert!(!truncated);
        Ok(())
    }
}
