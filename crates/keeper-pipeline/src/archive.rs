//! Archive expansion: walk the uploaded zip, upload accepted media to the
//! blob store, and create `MediaFile` records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use keeper_models::{
    is_junk_entry, media_type_for_filename, mime_type_for_filename, sanitize_filename, JobStatus,
    MediaFile,
};
use keeper_storage::original_key;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};

/// One accepted archive entry, located by its index in the central
/// directory.
#[derive(Debug, Clone)]
struct ArchiveEntry {
    index: usize,
    path: String,
}

/// Expand the job's scratch archive. Deletes the scratch file on success.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    let archive_path = ctx.config().scratch_path(&ctx.job_id);
    if !tokio::fs::try_exists(&archive_path).await.unwrap_or(false) {
        return Err(PipelineError::job_failed("scratch archive missing"));
    }

    let entries = list_entries(archive_path.clone()).await?;
    let accepted: Vec<ArchiveEntry> = entries
        .into_iter()
        .filter(|entry| {
            if is_junk_entry(&entry.path) {
                debug!("Skipping junk entry {}", entry.path);
                return false;
            }
            media_type_for_filename(&entry.path).is_some()
        })
        .collect();

    if accepted.is_empty() {
        tokio::fs::remove_file(&archive_path).await.ok();
        return Err(PipelineError::job_failed("no media files found in archive"));
    }

    let total = accepted.len() as u64;
    ctx.records().set_job_totals(&ctx.job_id, total as i64).await?;
    info!("Expanding {} media entries for job {}", total, ctx.job_id);

    // A re-run after an interruption picks up where it stopped
    let existing = ctx.records().list_media_files(&ctx.job_id).await?;
    let known_paths: HashSet<String> = existing.iter().map(|f| f.original_path.clone()).collect();
    let mut used_names: HashSet<String> = existing.iter().map(|f| f.filename.clone()).collect();
    ctx.records()
        .set_job_progress(&ctx.job_id, known_paths.len() as i64)
        .await?;

    for entry in &accepted {
        ctx.check_cancelled()?;

        if known_paths.contains(&entry.path) {
            continue;
        }

        let bytes = read_entry(archive_path.clone(), entry.index).await?;
        let size_bytes = bytes.len() as i64;

        let basename = entry.path.rsplit('/').next().unwrap_or(&entry.path);
        let mut filename = sanitize_filename(basename);
        if !used_names.insert(filename.clone()) {
            filename = format!("{}_{}", entry.index, filename);
            used_names.insert(filename.clone());
        }

        let media_type = media_type_for_filename(&entry.path)
            .expect("accepted entries have a supported extension");
        let mime_type = mime_type_for_filename(&entry.path);

        let blob_key = original_key(&ctx.job_id, &filename);
        ctx.blobs().put_bytes(&blob_key, bytes, mime_type).await?;
        let blob_url = ctx.blobs().url_for(&blob_key).await?;

        let file = MediaFile::new(
            ctx.job_id.clone(),
            filename,
            entry.path.clone(),
            blob_key,
            blob_url,
            media_type,
            mime_type,
            size_bytes,
        );
        ctx.records().create_media_file(&file).await?;
        ctx.bump_progress(JobStatus::Extracting, total).await?;
    }

    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        warn!("Failed to delete scratch archive {:?}: {}", archive_path, e);
    }

    Ok(())
}

/// Enumerate the archive's file entries (names only).
async fn list_entries(path: PathBuf) -> PipelineResult<Vec<ArchiveEntry>> {
    tokio::task::spawn_blocking(move || -> PipelineResult<Vec<ArchiveEntry>> {
        let mut archive = open_archive(&path)?;
        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let file = archive
                .by_index(index)
                .map_err(|e| PipelineError::archive(format!("unreadable entry {index}: {e}")))?;
            if file.is_dir() {
                continue;
            }
            entries.push(ArchiveEntry {
                index,
                path: file.name().to_string(),
            });
        }
        Ok(entries)
    })
    .await
    .map_err(|e| PipelineError::archive(e.to_string()))?
}

/// Read one entry's bytes. The archive is reopened per call so expansion
/// never holds file handles across suspension points.
async fn read_entry(path: PathBuf, index: usize) -> PipelineResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> PipelineResult<Vec<u8>> {
        use std::io::Read;

        let mut archive = open_archive(&path)?;
        let mut file = archive
            .by_index(index)
            .map_err(|e| PipelineError::archive(format!("unreadable entry {index}: {e}")))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| PipelineError::archive(format!("failed to extract entry {index}: {e}")))?;
        Ok(bytes)
    })
    .await
    .map_err(|e| PipelineError::archive(e.to_string()))?
}

fn open_archive(path: &Path) -> PipelineResult<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)
        .map_err(|e| PipelineError::archive(format!("cannot open archive: {e}")))?;
    zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::archive(format!("archive unreadable: {e}")))
}
