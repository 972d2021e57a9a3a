use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use vidingest::adapters::{StaticCredentials, StubVideo, StubVideoSourceFactory};
use vidingest::config::Settings;
use vidingest::domain::errors::IngestError;
use vidingest::domain::model::ProgressInfo;
use vidingest::engine::{ProgressCallback, ProgressTracker, UploadProcessor};
use vidingest::remote::RecordingSleeper;
use vidingest::storage::QuarantineManager;
use vidingest::ProcessingStatus;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test utilities for the ingestion pipeline
mod test_utils {
    use super::*;

    /// ISO media header followed by padding, sniffed as video/mp4
    pub fn mp4_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x00, 0x18];
        data.extend_from_slice(b"ftypisom");
        data.resize(len.max(12), 0);
        data
    }

    pub struct Harness {
        pub dir: TempDir,
        pub settings: Settings,
    }

    impl Harness {
        pub fn new(api_url: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let mut settings = Settings::default();
            settings.storage.base_dir = dir.path().join("base");
            settings.remote.base_url = api_url.to_string();
            settings.remote.poll_interval_ms = 10;
            settings.remote.initial_backoff_ms = 10;
            settings.remote.max_backoff_ms = 20;
            settings.processing.index_name = "videos".to_string();
            settings
                .processing
                .task_options
                .insert("threshold".to_string(), json!(0.3));
            Self { dir, settings }
        }

        pub fn base(&self) -> &Path {
            &self.settings.storage.base_dir
        }

        pub fn processor(&self) -> Arc<UploadProcessor> {
            self.processor_with(StubVideoSourceFactory::default())
        }

        pub fn processor_with(&self, sources: StubVideoSourceFactory) -> Arc<UploadProcessor> {
            let processor = UploadProcessor::from_settings(
                &self.settings,
                &StaticCredentials::new().with_key("analysis", "secret"),
                Arc::new(sources),
                Arc::new(RecordingSleeper::new()),
            )
            .unwrap();
            processor.directories().initialize().unwrap();
            Arc::new(processor)
        }

        pub fn upload(&self, name: &str, data: &[u8]) -> PathBuf {
            let uploads = self.base().join("uploads");
            fs::create_dir_all(&uploads).unwrap();
            let path = uploads.join(name);
            fs::write(&path, data).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
            path
        }

        pub fn entries(&self, subdir: &str) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.base().join(subdir))
                .map(|dir| {
                    dir.filter_map(Result::ok)
                        .map(|e| e.file_name().to_string_lossy().to_string())
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
        }
    }

    /// Upload task `up-1` completes with `vid-1`; analysis task `an-1` ends with `analysis`
    pub async fn mount_service(server: &MockServer, analysis: Value) {
        Mock::given(method("POST"))
            .and(path("/tasks/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "up-1"})))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tasks/up-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/up-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "up-1",
                "status": "completed",
                "video_id": "vid-1"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "an-1"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/an-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"task_id": "an-1", "status": "processing"})),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/an-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(analysis))
            .mount(server)
            .await;
    }
}

use test_utils::*;

#[tokio::test]
async fn test_upload_completes_and_persists_result() {
    let server = MockServer::start().await;
    mount_service(
        &server,
        json!({"task_id": "an-1", "status": "completed", "result": {"scenes": 4}}),
    )
    .await;

    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let source = harness.upload("match.mp4", &mp4_bytes(4096));

    let tracker = ProgressTracker::new("video-1");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    tracker.add_callback(Arc::new(move |_: &str, info: &ProgressInfo| {
        sink.lock().unwrap().push(info.stage);
        Ok::<(), anyhow::Error>(())
    }));

    let video = processor
        .process_upload_with_tracker(&source, "video-1".to_string(), tracker.clone())
        .await
        .unwrap();

    assert_eq!(video.status, ProcessingStatus::Completed);
    assert_eq!(video.remote_video_id.as_deref(), Some("vid-1"));
    assert_eq!(video.result, Some(json!({"scenes": 4})));
    assert_eq!(video.metadata.as_ref().map(|m| m.width), Some(1920));
    assert_eq!(video.file.path, harness.base().join("processed/video-1.mp4"));
    assert!(!source.exists());
    assert_eq!(
        harness.entries("processed"),
        vec!["video-1.mp4".to_string(), "video-1.result.json".to_string()]
    );
    assert!(harness.entries("temp").is_empty());

    let record: Value = serde_json::from_str(
        &fs::read_to_string(harness.base().join("processed/video-1.result.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["task_id"], "an-1");
    assert_eq!(record["remote_video_id"], "vid-1");
    assert_eq!(record["result"]["scenes"], 4);

    assert_eq!(tracker.current_stage(), Some(ProcessingStatus::Completed));
    assert_eq!(tracker.get_overall_progress(), 100.0);
    let stages = seen.lock().unwrap().clone();
    assert_eq!(stages.first(), Some(&ProcessingStatus::Validating));
    assert_eq!(stages.last(), Some(&ProcessingStatus::Completed));
    assert!(stages.contains(&ProcessingStatus::Uploading));
    assert!(stages.contains(&ProcessingStatus::Processing));
}

#[tokio::test]
async fn test_empty_file_is_quarantined() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let source = harness.upload("empty.mp4", b"");

    let video = processor.process_upload(&source, None).await.unwrap();

    assert_eq!(video.status, ProcessingStatus::Quarantined);
    assert!(video.error.as_deref().unwrap().contains("File is empty"));
    let quarantined = video.quarantine_path.clone().unwrap();
    assert!(quarantined.exists());
    assert!(!source.exists());

    let record = processor
        .quarantine()
        .get_quarantine_info(&quarantined)
        .unwrap()
        .unwrap();
    assert_eq!(record.reason, video.error.clone().unwrap());
    assert_eq!(record.file_info.size, 0);
    assert_eq!(record.extra["video_id"], json!(video.id));
    assert_eq!(record.extra["error_type"], json!("SecurityError"));

    // The remote service is never contacted
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_path_outside_base_is_quarantined_not_stored() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();

    let outside = harness.dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("clip.mp4"), mp4_bytes(2048)).unwrap();
    fs::create_dir_all(harness.base().join("uploads")).unwrap();
    let escaping = harness.base().join("uploads/../../outside/clip.mp4");

    let video = processor.process_upload(&escaping, None).await.unwrap();

    assert_eq!(video.status, ProcessingStatus::Quarantined);
    assert!(video.error.as_deref().unwrap().contains("traversal"));
    assert!(harness.entries("processing").is_empty());
    assert!(harness.entries("processed").is_empty());
    assert_eq!(harness.entries("quarantine").len(), 2);
}

#[tokio::test]
async fn test_world_writable_upload_is_quarantined() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let source = harness.upload("open.mp4", &mp4_bytes(2048));
    fs::set_permissions(&source, fs::Permissions::from_mode(0o666)).unwrap();

    let video = processor.process_upload(&source, None).await.unwrap();

    assert_eq!(video.status, ProcessingStatus::Quarantined);
    assert!(video.error.as_deref().unwrap().contains("world-writable"));
    let quarantined = video.quarantine_path.unwrap();
    let mode = fs::metadata(&quarantined).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
    let sidecar = QuarantineManager::sidecar_path(&quarantined);
    let sidecar_mode = fs::metadata(&sidecar).unwrap().permissions().mode() & 0o777;
    assert_eq!(sidecar_mode, 0o600);
}

#[tokio::test]
async fn test_integrity_failure_is_quarantined() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let sources = StubVideoSourceFactory::default()
        .with_video_for("still.mp4", StubVideo::default().with_timing(30.0, 15));
    let processor = harness.processor_with(sources);
    let source = harness.upload("still.mp4", &mp4_bytes(2048));

    let video = processor.process_upload(&source, None).await.unwrap();

    assert_eq!(video.status, ProcessingStatus::Quarantined);
    assert!(video.error.as_deref().unwrap().contains("shorter than minimum"));
}

#[tokio::test]
async fn test_failed_task_fails_the_upload() {
    let server = MockServer::start().await;
    mount_service(
        &server,
        json!({"task_id": "an-1", "status": "failed", "error": "bad codec"}),
    )
    .await;

    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let source = harness.upload("broken.mp4", &mp4_bytes(4096));
    let tracker = ProgressTracker::new("video-2");

    let err = processor
        .process_upload_with_tracker(&source, "video-2".to_string(), tracker.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Task { .. }));
    let processing = tracker.get_progress(ProcessingStatus::Processing).unwrap();
    assert_eq!(processing.error.as_deref(), Some("TaskError: bad codec"));
    // The stored copy stays in processing for inspection
    assert_eq!(harness.entries("processing"), vec!["video-2.mp4".to_string()]);
    assert!(harness.entries("temp").is_empty());
}

#[tokio::test]
async fn test_process_many_keeps_input_order() {
    let server = MockServer::start().await;
    mount_service(
        &server,
        json!({"task_id": "an-1", "status": "completed", "result": {}}),
    )
    .await;

    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let good = harness.upload("good.mp4", &mp4_bytes(2048));
    let empty = harness.upload("empty.mp4", b"");
    let missing = harness.base().join("uploads/missing.mp4");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callbacks: Vec<Arc<dyn ProgressCallback>> =
        vec![Arc::new(move |video_id: &str, info: &ProgressInfo| {
            sink.lock().unwrap().push((video_id.to_string(), info.stage));
            Ok::<(), anyhow::Error>(())
        })];

    let results = processor
        .process_many(vec![good.clone(), empty.clone(), missing.clone()], 2, &callbacks)
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, good);
    assert_eq!(results[1].0, empty);
    assert_eq!(results[2].0, missing);
    assert_eq!(
        results[0].1.as_ref().unwrap().status,
        ProcessingStatus::Completed
    );
    assert_eq!(
        results[1].1.as_ref().unwrap().status,
        ProcessingStatus::Quarantined
    );
    assert!(matches!(results[2].1, Err(IngestError::FileValidation(_))));

    // Each upload reports through the shared callbacks under its own id
    let seen = seen.lock().unwrap().clone();
    let ids: HashSet<&str> = seen.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids.len(), 3);
    let completed = &results[0].1.as_ref().unwrap().id;
    assert!(seen.contains(&(completed.clone(), ProcessingStatus::Completed)));
    let quarantined = &results[1].1.as_ref().unwrap().id;
    assert!(seen.contains(&(quarantined.clone(), ProcessingStatus::Quarantined)));
}

#[tokio::test]
async fn test_symlink_upload_leaves_target_untouched() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();

    let victim = harness.dir.path().join("victim.txt");
    fs::write(&victim, b"not yours").unwrap();
    fs::set_permissions(&victim, fs::Permissions::from_mode(0o640)).unwrap();
    let processed = harness.base().join("processed");
    let processed_mode = fs::metadata(&processed).unwrap().permissions().mode() & 0o777;

    let uploads = harness.base().join("uploads");
    fs::create_dir_all(&uploads).unwrap();
    let to_file = uploads.join("evil.mp4");
    let to_dir = uploads.join("evil2.mp4");
    std::os::unix::fs::symlink(&victim, &to_file).unwrap();
    std::os::unix::fs::symlink(&processed, &to_dir).unwrap();

    for link in [&to_file, &to_dir] {
        let video = processor.process_upload(link, None).await.unwrap();
        assert_eq!(video.status, ProcessingStatus::Quarantined);
        let quarantined = video.quarantine_path.unwrap();
        assert!(fs::symlink_metadata(&quarantined)
            .unwrap()
            .file_type()
            .is_symlink());
    }

    let victim_mode = fs::metadata(&victim).unwrap().permissions().mode() & 0o777;
    assert_eq!(victim_mode, 0o640);
    let after = fs::metadata(&processed).unwrap().permissions().mode() & 0o777;
    assert_eq!(after, processed_mode);
    assert_eq!(fs::read(&victim).unwrap(), b"not yours");
    assert_eq!(
        processor
            .quarantine()
            .list_quarantined_files(false)
            .unwrap()
            .len(),
        2
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_meta_named_upload_stays_visible_in_quarantine() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let source = harness.upload("payload.meta", &mp4_bytes(2048));

    let video = processor.process_upload(&source, None).await.unwrap();

    assert_eq!(video.status, ProcessingStatus::Quarantined);
    let quarantined = video.quarantine_path.unwrap();
    let listed = processor.quarantine().list_quarantined_files(true).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, quarantined);
    assert_eq!(
        listed[0].metadata.as_ref().unwrap().extra["error_type"],
        json!("FileValidationError")
    );
}

#[tokio::test]
async fn test_directory_upload_fails_without_quarantine() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let upload = harness.base().join("uploads/x.mp4");
    fs::create_dir_all(&upload).unwrap();

    let err = processor.process_upload(&upload, None).await.unwrap_err();

    assert!(matches!(err, IngestError::Security(_)));
    assert!(upload.is_dir());
    assert!(harness.entries("quarantine").is_empty());
}

#[tokio::test]
async fn test_quarantine_restore_round_trip() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server.uri());
    let processor = harness.processor();
    let original = mp4_bytes(2048);
    let source = harness.upload("suspect.mp4", &original);
    fs::set_permissions(&source, fs::Permissions::from_mode(0o666)).unwrap();

    let video = processor.process_upload(&source, None).await.unwrap();
    let quarantined = video.quarantine_path.unwrap();

    let listed = processor.quarantine().list_quarantined_files(true).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, quarantined);
    assert!(listed[0].metadata.is_some());

    let destination = harness.dir.path().join("restored/suspect.mp4");
    let restored = processor
        .quarantine()
        .restore_file(&quarantined, &destination)
        .unwrap();

    assert_eq!(restored, destination);
    assert_eq!(fs::read(&destination).unwrap(), original);
    assert!(!QuarantineManager::sidecar_path(&quarantined).exists());
    assert!(processor
        .quarantine()
        .list_quarantined_files(false)
        .unwrap()
        .is_empty());
}
