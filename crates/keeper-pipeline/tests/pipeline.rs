//! End-to-end pipeline scenarios over an in-memory blob store and a
//! scripted model adapter.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use keeper_models::{Job, JobId, JobStatus, MediaFile, MediaType};
use keeper_pipeline::{
    recover_jobs, Orchestrator, PipelineConfig, PipelineServices, ProgressChannel,
};
use keeper_records::RecordStore;
use keeper_storage::{original_key, BlobStore, StorageError, StorageResult};
use keeper_vision::{MediaPayload, ModelAdapter, ModelError, ModelResult, QualityVerdict};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let mut objects = self.objects.lock().unwrap();
        let keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            objects.remove(key);
        }
        Ok(keys.len() as u32)
    }

    async fn url_for(&self, key: &str) -> StorageResult<String> {
        Ok(format!("memory://{key}"))
    }
}

/// Scripted model: same-take verdicts come from an optional queue, then
/// fall back to "same first byte means same take"; quality verdicts favor
/// the lexicographically larger payload.
struct ScriptedModel {
    describe_calls: AtomicUsize,
    same_take_calls: AtomicUsize,
    compare_calls: AtomicUsize,
    enhance_calls: AtomicUsize,
    same_take_script: Mutex<VecDeque<bool>>,
    fail_naming: bool,
    /// Allow this many compare calls, then block until the token fires.
    compare_gate: Option<(usize, CancellationToken)>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            describe_calls: AtomicUsize::new(0),
            same_take_calls: AtomicUsize::new(0),
            compare_calls: AtomicUsize::new(0),
            enhance_calls: AtomicUsize::new(0),
            same_take_script: Mutex::new(VecDeque::new()),
            fail_naming: false,
            compare_gate: None,
        }
    }

    fn with_same_take_script(self, script: impl IntoIterator<Item = bool>) -> Self {
        *self.same_take_script.lock().unwrap() = script.into_iter().collect();
        self
    }

    fn with_failing_naming(mut self) -> Self {
        self.fail_naming = true;
        self
    }

    fn with_compare_gate(mut self, allow: usize, token: CancellationToken) -> Self {
        self.compare_gate = Some((allow, token));
        self
    }
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    async fn describe(&self, media: &MediaPayload) -> ModelResult<String> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("photo {}", String::from_utf8_lossy(&media.bytes)))
    }

    async fn same_take(&self, a: &MediaPayload, b: &MediaPayload) -> ModelResult<bool> {
        self.same_take_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.same_take_script.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(a.bytes.first() == b.bytes.first())
    }

    async fn compare_quality(
        &self,
        a: &MediaPayload,
        b: &MediaPayload,
        _media_type: MediaType,
    ) -> ModelResult<QualityVerdict> {
        let call = self.compare_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((allow, token)) = &self.compare_gate {
            if call > *allow {
                token.cancelled().await;
                return Err(ModelError::request_failed("aborted by test gate"));
            }
        }

        Ok(QualityVerdict {
            winner: if a.bytes > b.bytes { 1 } else { 2 },
            reasoning: "cleaner frame".to_string(),
            confidence: 1.0,
        })
    }

    async fn enhance(&self, media: &MediaPayload) -> ModelResult<Option<MediaPayload>> {
        self.enhance_calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = b"enhanced:".to_vec();
        bytes.extend_from_slice(&media.bytes);
        Ok(Some(MediaPayload::new(bytes, "image/png")))
    }

    async fn name_bucket(&self, labels: &[String]) -> ModelResult<String> {
        if self.fail_naming {
            return Err(ModelError::invalid_response("naming disabled"));
        }
        Ok(format!("Scene of {}", labels.len()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    services: Arc<PipelineServices>,
    records: RecordStore,
    blobs: Arc<MemoryBlobStore>,
    model: Arc<ScriptedModel>,
    orchestrator: Arc<Orchestrator>,
    _scratch: tempfile::TempDir,
}

async fn harness(model: ScriptedModel) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let records = RecordStore::in_memory().await.unwrap();
    let blobs = Arc::new(MemoryBlobStore::default());
    let model = Arc::new(model);

    let config = PipelineConfig {
        scratch_dir: scratch.path().to_path_buf(),
        ..PipelineConfig::default()
    };

    let services = Arc::new(PipelineServices::new(
        records.clone(),
        Arc::clone(&blobs) as Arc<dyn BlobStore>,
        Arc::clone(&model) as Arc<dyn ModelAdapter>,
        Arc::new(ProgressChannel::new()),
        config,
    ));
    let orchestrator = Orchestrator::start(Arc::clone(&services));

    Harness {
        services,
        records,
        blobs,
        model,
        orchestrator,
        _scratch: scratch,
    }
}

fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Create a job whose scratch archive is already assembled, ready for the
/// pipeline at `extracting`.
async fn seed_uploaded_job(h: &Harness, archive: &[u8]) -> JobId {
    let job = Job::new(None);
    h.records.create_job(&job).await.unwrap();
    let path = h.services.config.scratch_path(&job.id);
    tokio::fs::write(&path, archive).await.unwrap();
    h.records
        .advance_job_status(&job.id, JobStatus::Extracting)
        .await
        .unwrap();
    job.id.clone()
}

async fn wait_for_terminal(h: &Harness, job_id: &JobId) -> Job {
    for _ in 0..200 {
        let job = h.records.require_job(job_id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not reach a terminal status");
}

async fn media_by_filename(h: &Harness, job_id: &JobId) -> HashMap<String, MediaFile> {
    h.records
        .list_media_files(job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| (f.filename.clone(), f))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_take_three_images() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[
        ("A1.jpg", b"A1"),
        ("A2.jpg", b"A2"),
        ("A3.jpg", b"A3"),
    ]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.total_files, 3);

    let buckets = h.records.list_buckets(&job_id).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(h.records.count_matches_for_job(&job_id).await.unwrap(), 3);

    let files = h.records.list_media_files(&job_id).await.unwrap();
    assert_eq!(files.len(), 3);
    for file in &files {
        // every completed file is labeled and bucketed
        assert!(file.label.is_some());
        assert_eq!(file.bucket_id.as_ref(), Some(&buckets[0].id));
        // min(3, 3) members are picks
        assert!(file.is_top_pick);
        assert!(file.enhanced_blob_key.is_some());
        assert!(file.enhanced_blob_url.is_some());
    }

    // enhanced blobs landed under the job's enhanced prefix
    let enhanced = h
        .blobs
        .keys_with_prefix(&format!("jobs/{job_id}/enhanced/"));
    assert_eq!(enhanced.len(), 3);
    assert!(enhanced.iter().all(|k| k.contains("/enhanced_")));

    // matches are zero-sum and winners are contestants
    for m in h.records.list_matches(&buckets[0].id).await.unwrap() {
        assert!(m.winner_id == m.media1_id || m.winner_id == m.media2_id);
        assert!((m.change1 + m.change2).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_two_distinct_takes() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[("A1.jpg", b"A1"), ("A2.jpg", b"A2"), ("B1.jpg", b"B1")]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let buckets = h.records.list_buckets(&job_id).await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(h.records.count_matches_for_job(&job_id).await.unwrap(), 1);

    let files = media_by_filename(&h, &job_id).await;
    assert!(files["A1.jpg"].is_top_pick);
    assert!(files["A2.jpg"].is_top_pick);
    // single-member buckets skip ranking and are never picks
    assert!(!files["B1.jpg"].is_top_pick);
    assert!(files["B1.jpg"].enhanced_blob_key.is_none());
    assert_eq!(files["B1.jpg"].rating_score, 1000.0);
}

#[tokio::test]
async fn test_merge_reconciles_fragmented_buckets() {
    // Phase A verdicts all come back "different" (as if the probes raced
    // badly); Phase B then finds the representatives identical.
    let model = ScriptedModel::new()
        .with_same_take_script([false, false, false])
        .with_failing_naming();
    let h = harness(model).await;
    let archive = make_zip(&[("A1.jpg", b"A1"), ("A2.jpg", b"A2"), ("A3.jpg", b"A3")]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let buckets = h.records.list_buckets(&job_id).await.unwrap();
    assert_eq!(buckets.len(), 1, "merge should collapse the fragmentation");
    // naming fell back after the model refused
    assert!(buckets[0].name.starts_with("Bucket "));

    let members = h
        .records
        .media_files_in_bucket(&buckets[0].id)
        .await
        .unwrap();
    assert_eq!(members.len(), 3);
}

#[tokio::test]
async fn test_mixed_media() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[
        ("A1.jpg", b"A1"),
        ("A2.jpg", b"A2"),
        ("v1.mp4", b"V1"),
        ("v2.mp4", b"V2"),
    ]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let buckets = h.records.list_buckets(&job_id).await.unwrap();
    assert_eq!(buckets.len(), 2);
    // one image match plus one video match
    assert_eq!(h.records.count_matches_for_job(&job_id).await.unwrap(), 2);

    let mut match_types = Vec::new();
    for bucket in &buckets {
        for m in h.records.list_matches(&bucket.id).await.unwrap() {
            match_types.push(m.media_type);
        }
    }
    match_types.sort_by_key(|t| t.as_str());
    assert_eq!(match_types, vec![MediaType::Image, MediaType::Video]);

    let files = media_by_filename(&h, &job_id).await;
    // video picks exist but are never enhanced
    assert!(files["v1.mp4"].is_top_pick);
    assert!(files["v2.mp4"].is_top_pick);
    assert!(files["v1.mp4"].enhanced_blob_key.is_none());
    assert!(files["v2.mp4"].enhanced_blob_key.is_none());
    assert!(files["A1.jpg"].enhanced_blob_key.is_some());
    assert_eq!(h.model.enhance_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_media_files_fails_job() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[("notes.txt", b"not a photo"), ("data.csv", b"1,2,3")]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("no media files found in archive"));
}

#[tokio::test]
async fn test_single_media_file() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[("only.jpg", b"A1")]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let buckets = h.records.list_buckets(&job_id).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(h.records.count_matches_for_job(&job_id).await.unwrap(), 0);

    let files = h.records.list_media_files(&job_id).await.unwrap();
    assert!(!files[0].is_top_pick);
    assert!(files[0].enhanced_blob_key.is_none());
    assert_eq!(h.model.enhance_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.model.compare_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expander_filters_junk_entries() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[
        ("photos/keep me.jpg", b"A1"),
        ("photos/.DS_Store", b"junk"),
        ("photos/._keep me.jpg", b"fork"),
        ("__MACOSX/photos/keep me.jpg", b"fork"),
        ("photos/Thumbs.db", b"junk"),
    ]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    h.orchestrator.process_job(job_id.clone()).await;

    let files = h.records.list_media_files(&job_id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "keep_me.jpg");
    assert_eq!(files[0].original_path, "photos/keep me.jpg");
    assert_eq!(files[0].blob_key, original_key(&job_id, "keep_me.jpg"));

    // scratch archive is deleted after expansion
    assert!(!h.services.config.scratch_path(&job_id).exists());
}

#[tokio::test]
async fn test_cancellation_mid_ranking() {
    let token = CancellationToken::new();
    let model = ScriptedModel::new().with_compare_gate(3, token.clone());
    let h = harness(model).await;

    let archive = make_zip(&[
        ("A1.jpg", b"A1"),
        ("A2.jpg", b"A2"),
        ("A3.jpg", b"A3"),
        ("A4.jpg", b"A4"),
        ("A5.jpg", b"A5"),
        ("A6.jpg", b"A6"),
    ]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    // the adapter gate and the job share the same token, so cancelling the
    // job also releases the blocked compare calls
    let orchestrator = Arc::clone(&h.orchestrator);
    let job_token = orchestrator.cancellation_for(&job_id);
    let gate = token.clone();
    tokio::spawn(async move {
        job_token.cancelled().await;
        gate.cancel();
    });

    let runner = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.process_job(job_id).await })
    };

    // wait until exactly three matches are recorded, then cancel
    for _ in 0..200 {
        if h.records.count_matches_for_job(&job_id).await.unwrap() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.orchestrator.cancel(&job_id);
    runner.await.unwrap();

    let job = h.records.require_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Ranking, "cancel must not fail the job");
    assert!(job.error.is_none());

    assert_eq!(h.records.count_matches_for_job(&job_id).await.unwrap(), 3);

    // the persisted ratings reflect exactly the recorded matches
    let files = h.records.list_media_files(&job_id).await.unwrap();
    let total: f64 = files.iter().map(|f| f.rating_score).sum();
    assert!((total - 6000.0).abs() < 1e-6, "Elo updates are zero-sum");
    let moved = files.iter().filter(|f| f.rating_score != 1000.0).count();
    assert!(moved >= 2);
    assert!(files.iter().all(|f| !f.is_top_pick));
}

#[tokio::test]
async fn test_recovery_resumes_half_labeled_job() {
    let h = harness(ScriptedModel::new()).await;

    let job = Job::new(None);
    h.records.create_job(&job).await.unwrap();
    for (name, bytes, labeled) in [
        ("A1.jpg", b"A1".as_slice(), true),
        ("A2.jpg", b"A2".as_slice(), true),
        ("B1.jpg", b"B1".as_slice(), false),
        ("B2.jpg", b"B2".as_slice(), false),
    ] {
        let key = original_key(&job.id, name);
        h.blobs
            .put_bytes(&key, bytes.to_vec(), "image/jpeg")
            .await
            .unwrap();
        let mut file = MediaFile::new(
            job.id.clone(),
            name,
            format!("photos/{name}"),
            key.clone(),
            format!("memory://{key}"),
            MediaType::Image,
            "image/jpeg",
            bytes.len() as i64,
        );
        if labeled {
            file.label = Some(format!("photo {name}"));
        }
        h.records.create_media_file(&file).await.unwrap();
    }
    h.records.set_job_totals(&job.id, 4).await.unwrap();
    h.records
        .advance_job_status(&job.id, JobStatus::Labeling)
        .await
        .unwrap();

    let recovered = recover_jobs(&h.orchestrator).await.unwrap();
    assert_eq!(recovered, 1);

    let finished = wait_for_terminal(&h, &job.id).await;
    assert_eq!(finished.status, JobStatus::Completed);

    // describe ran only for the unlabeled half
    assert_eq!(h.model.describe_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_recovery_fails_interrupted_uploads() {
    let h = harness(ScriptedModel::new()).await;

    let job = Job::new(Some("never finished".to_string()));
    h.records.create_job(&job).await.unwrap();
    tokio::fs::write(h.services.config.scratch_path(&job.id), b"partial")
        .await
        .unwrap();

    let recovered = recover_jobs(&h.orchestrator).await.unwrap();
    assert_eq!(recovered, 0);

    let failed = h.records.require_job(&job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("upload interrupted by restart"));
    assert!(!h.services.config.scratch_path(&job.id).exists());
}

#[tokio::test]
async fn test_reentering_clustering_skips_phase_a() {
    let h = harness(ScriptedModel::new()).await;

    let job = Job::new(None);
    h.records.create_job(&job).await.unwrap();

    let mut seeded_buckets = Vec::new();
    for (name, bytes) in [("A1.jpg", b"A1".as_slice()), ("B1.jpg", b"B1".as_slice())] {
        let key = original_key(&job.id, name);
        h.blobs
            .put_bytes(&key, bytes.to_vec(), "image/jpeg")
            .await
            .unwrap();
        let mut file = MediaFile::new(
            job.id.clone(),
            name,
            format!("photos/{name}"),
            key.clone(),
            format!("memory://{key}"),
            MediaType::Image,
            "image/jpeg",
            bytes.len() as i64,
        );
        file.label = Some(format!("photo {name}"));
        h.records.create_media_file(&file).await.unwrap();

        let bucket = keeper_models::Bucket::new(job.id.clone(), format!("Take {name}"));
        seeded_buckets.push((bucket, vec![file.id.clone()]));
    }
    h.records
        .create_buckets_with_members(&seeded_buckets)
        .await
        .unwrap();
    h.records.set_job_totals(&job.id, 2).await.unwrap();
    h.records
        .advance_job_status(&job.id, JobStatus::Clustering)
        .await
        .unwrap();

    h.orchestrator.process_job(job.id.clone()).await;

    let finished = h.records.require_job(&job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Completed);

    // Phase A was skipped: the only same-take probe is the merge sweep's
    // single representative pair
    assert_eq!(h.model.same_take_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.records.list_buckets(&job.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_status_transitions_are_monotone() {
    let h = harness(ScriptedModel::new()).await;
    let archive = make_zip(&[("A1.jpg", b"A1"), ("A2.jpg", b"A2")]);
    let job_id = seed_uploaded_job(&h, &archive).await;

    let mut events = h.services.progress.subscribe(&job_id);
    h.orchestrator.process_job(job_id.clone()).await;

    let mut last_index = JobStatus::Extracting.stage_index().unwrap();
    while let Ok(event) = events.try_recv() {
        if let keeper_pipeline::ProgressEvent::Status { status, .. } = event {
            let index = status
                .stage_index()
                .expect("no failure events in a clean run");
            assert!(index >= last_index, "status went backwards");
            last_index = index;
        }
    }
    assert_eq!(
        h.records.require_job(&job_id).await.unwrap().status,
        JobStatus::Completed
    );
}
