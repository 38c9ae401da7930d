//! Download and upload steps against in-memory fakes.

use hodei_steps_core::steps::text::MAX_EMITTED_ERROR_BYTES;
use hodei_steps_core::{
    Canceller, ChecksumInfo, DownloadAction, DownloadStep, RateLimiter, Step, StepError,
    UploadAction, UploadStep,
};
use hodei_steps_core::steps::{ERR_ESTABLISH_STREAM, ERR_READ_STREAM, ERR_READ_TAR};
use hodei_steps_testing::{
    FakeContainer, FakeFetcher, FakeUploader, RecordingStreamer, eventually, tar_archive,
    tar_entries,
};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

const DOWNLOAD_URL: &str = "https://blobstore.example.com/droplet.tgz";
const UPLOAD_URL: &str = "https://cc.example.com/staging/droplet";

fn download_step(
    container: &Arc<FakeContainer>,
    action: DownloadAction,
    fetcher: &Arc<FakeFetcher>,
    limiter: &RateLimiter,
    streamer: &Arc<RecordingStreamer>,
) -> Arc<DownloadStep> {
    Arc::new(DownloadStep::new(
        container.clone(),
        action,
        fetcher.clone(),
        limiter.clone(),
        streamer.clone(),
    ))
}

fn spawn_perform<S: Step + 'static>(
    step: &Arc<S>,
) -> tokio::task::JoinHandle<Result<(), StepError>> {
    let step = step.clone();
    tokio::spawn(async move { step.perform().await })
}

mod download {
    use super::*;

    fn action() -> DownloadAction {
        DownloadAction::new(DOWNLOAD_URL, "/tmp/app")
            .with_cache_key("droplet-abc")
            .with_user("vcap")
            .with_checksum(ChecksumInfo::new("sha256", "deadbeef"))
    }

    #[tokio::test]
    async fn test_streams_fetched_content_into_container() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().with_content("droplet bits"));
        let streamer = RecordingStreamer::new();
        let limiter = RateLimiter::new(5);

        let step = download_step(&container, action(), &fetcher, &limiter, &streamer);
        step.perform().await.unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url.as_str(), DOWNLOAD_URL);
        assert_eq!(calls[0].cache_key, "droplet-abc");
        assert_eq!(calls[0].checksum, ChecksumInfo::new("sha256", "deadbeef"));

        let streamed = container.streamed_in();
        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].path, "/tmp/app");
        assert_eq!(streamed[0].user.as_deref(), Some("vcap"));
        assert_eq!(streamed[0].content, b"droplet bits");

        assert_eq!(streamer.stdout_text(), "");
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test]
    async fn test_fetched_tar_is_streamed_in_unchanged() {
        let container = FakeContainer::new();
        let archive = tar_archive(&[("file1", b"droplet bits")]);
        let fetcher = Arc::new(FakeFetcher::new().with_content(archive));
        let streamer = RecordingStreamer::new();
        let limiter = RateLimiter::new(5);

        let step = download_step(&container, action(), &fetcher, &limiter, &streamer);
        step.perform().await.unwrap();

        let streamed = container.streamed_in();
        assert_eq!(
            tar_entries(&streamed[0].content),
            vec![("file1".to_string(), b"droplet bits".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_artifact_progress_is_emitted() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().with_content(vec![7u8; 42]));
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            action().with_artifact("app package"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        step.perform().await.unwrap();

        assert_eq!(
            streamer.stdout_text(),
            "Downloading app package...\nDownloaded app package (42B)\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_size_omits_size() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().with_content("x").with_reported_size(0));
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            action().with_artifact("buildpack"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        step.perform().await.unwrap();

        assert_eq!(
            streamer.stdout_text(),
            "Downloading buildpack...\nDownloaded buildpack\n"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_is_emittable() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().failing("connection refused"));
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            action().with_artifact("app package"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        let err = step.perform().await.unwrap_err();

        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), "Downloading failed");
        assert_eq!(
            emittable.wrapped_error().map(|e| e.to_string()).as_deref(),
            Some("connection refused")
        );
        assert_eq!(streamer.stderr_text(), "Downloading failed\n");
        assert!(!streamer.stderr_text().contains(DOWNLOAD_URL));
        assert!(container.streamed_in().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_without_artifact_is_silent() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().failing("connection refused"));
        let streamer = RecordingStreamer::new();

        let step = download_step(&container, action(), &fetcher, &RateLimiter::new(1), &streamer);
        let err = step.perform().await.unwrap_err();

        assert_eq!(err.to_string(), "Downloading failed");
        assert_eq!(streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_stream_in_failure_is_emittable() {
        let container = FakeContainer::new();
        container.fail_stream_in("disk quota exceeded");
        let fetcher = Arc::new(FakeFetcher::new().with_content("bits"));
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            action().with_artifact("app package"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        let err = step.perform().await.unwrap_err();

        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), "Copying into the container failed");
        assert_eq!(
            streamer.stderr_text(),
            "Copying into the container failed: disk quota exceeded\n"
        );
        assert_eq!(streamer.stdout_text(), "Downloading app package...\n");
    }

    #[tokio::test]
    async fn test_long_stream_in_error_is_truncated() {
        let container = FakeContainer::new();
        container.fail_stream_in("x".repeat(4 * MAX_EMITTED_ERROR_BYTES));
        let fetcher = Arc::new(FakeFetcher::new().with_content("bits"));
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            action().with_artifact("app package"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        step.perform().await.unwrap_err();

        assert_eq!(streamer.stderr_len(), MAX_EMITTED_ERROR_BYTES);
        let stderr = streamer.stderr_text();
        assert!(stderr.starts_with("Copying into the container failed: xxx"));
        assert!(stderr.ends_with("(error truncated)"));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_fetching() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new());
        let streamer = RecordingStreamer::new();

        let step = download_step(
            &container,
            DownloadAction::new("not a url", "/tmp/app").with_artifact("app package"),
            &fetcher,
            &RateLimiter::new(1),
            &streamer,
        );
        let err = step.perform().await.unwrap_err();

        assert!(matches!(err, StepError::Other(_)));
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(streamer.stdout_text(), "");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_limiter() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new());
        let streamer = RecordingStreamer::new();
        let limiter = RateLimiter::new(1);
        let held = limiter.acquire(&Canceller::new()).await.unwrap();

        let step = download_step(&container, action(), &fetcher, &limiter, &streamer);
        let task = spawn_perform(&step);
        tokio::time::sleep(Duration::from_millis(10)).await;
        step.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(limiter.available(), 0);

        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_perform() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new());
        let step = download_step(
            &container,
            action(),
            &fetcher,
            &RateLimiter::new(1),
            &RecordingStreamer::new(),
        );
        step.cancel();

        assert!(matches!(step.perform().await, Err(StepError::Cancelled)));
        assert_eq!(fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_fetch() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().held());
        let streamer = RecordingStreamer::new();
        let limiter = RateLimiter::new(1);

        let step = download_step(
            &container,
            action().with_artifact("app package"),
            &fetcher,
            &limiter,
            &streamer,
        );
        let task = spawn_perform(&step);
        eventually("fetch to start", || fetcher.in_flight() == 1).await;
        step.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
        assert_eq!(streamer.stderr_text(), "");
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_stream_in() {
        let container = FakeContainer::new();
        container.hang_on_stream_in();
        let fetcher = Arc::new(FakeFetcher::new().with_content("bits"));
        let streamer = RecordingStreamer::new();

        let step = download_step(&container, action(), &fetcher, &RateLimiter::new(1), &streamer);
        let task = spawn_perform(&step);
        container.wait_for_stream_in().await;
        step.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("download should stop")
            .unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn test_limiter_caps_concurrent_fetches() {
        let container = FakeContainer::new();
        let fetcher = Arc::new(FakeFetcher::new().with_content("bits").held());
        let streamer = RecordingStreamer::new();
        let limiter = RateLimiter::new(2);

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let step = download_step(&container, action(), &fetcher, &limiter, &streamer);
                spawn_perform(&step)
            })
            .collect();

        eventually("two fetches", || fetcher.in_flight() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(limiter.available(), 0);

        fetcher.release(1);
        eventually("third fetch", || fetcher.fetch_count() == 3).await;
        fetcher.release(2);

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(container.streamed_in().len(), 3);
        assert_eq!(limiter.available(), 2);
    }
}

mod upload {
    use super::*;

    struct Fixture {
        container: Arc<FakeContainer>,
        uploader: Arc<FakeUploader>,
        streamer: Arc<RecordingStreamer>,
        limiter: RateLimiter,
        temp_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(uploader: FakeUploader) -> Self {
            Self {
                container: FakeContainer::new(),
                uploader: Arc::new(uploader),
                streamer: RecordingStreamer::new(),
                limiter: RateLimiter::new(1),
                temp_dir: tempfile::tempdir().unwrap(),
            }
        }

        fn step(&self, action: UploadAction) -> Arc<UploadStep> {
            Arc::new(UploadStep::new(
                self.container.clone(),
                action,
                self.uploader.clone(),
                self.limiter.clone(),
                self.streamer.clone(),
                self.temp_dir.path(),
            ))
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.temp_dir.path()).unwrap().count()
        }
    }

    fn action() -> UploadAction {
        UploadAction::new("/tmp/droplet", UPLOAD_URL).with_user("vcap")
    }

    #[tokio::test]
    async fn test_uploads_streamed_out_content() {
        let fixture = Fixture::new(FakeUploader::new());
        fixture
            .container
            .set_stream_out(tar_archive(&[("droplet", &[1u8; 1024])]));

        fixture
            .step(action().with_artifact("droplet"))
            .perform()
            .await
            .unwrap();

        let specs = fixture.container.stream_out_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].path, "/tmp/droplet");
        assert_eq!(specs[0].user.as_deref(), Some("vcap"));

        let calls = fixture.uploader.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url.as_str(), UPLOAD_URL);
        assert_eq!(calls[0].content, vec![1u8; 1024]);

        assert_eq!(
            fixture.streamer.stdout_text(),
            "Uploading droplet...\nUploaded droplet (1K)\n"
        );
        assert_eq!(fixture.staged_files(), 0);
        assert_eq!(fixture.limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_compresses_multi_entry_archives() {
        let fixture = Fixture::new(FakeUploader::new());
        let archive = tar_archive(&[("cache/a", b"a"), ("cache/b", b"b")]);
        fixture.container.set_stream_out(archive.clone());

        fixture.step(action()).perform().await.unwrap();

        let calls = fixture.uploader.calls();
        assert_eq!(calls.len(), 1);
        let mut inflated = Vec::new();
        flate2::read::GzDecoder::new(calls[0].content.as_slice())
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, archive);
        assert_eq!(fixture.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_non_tar_stream_is_emittable() {
        let fixture = Fixture::new(FakeUploader::new());
        fixture.container.set_stream_out("bits");

        let err = fixture.step(action()).perform().await.unwrap_err();

        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), ERR_READ_TAR);
        assert_eq!(fixture.uploader.upload_count(), 0);
        assert_eq!(fixture.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_empty_stream_is_emittable() {
        let fixture = Fixture::new(FakeUploader::new());
        fixture.container.set_stream_out(Vec::new());

        let err = fixture.step(action()).perform().await.unwrap_err();

        assert_eq!(err.to_string(), ERR_READ_TAR);
        assert_eq!(fixture.uploader.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_out_failure() {
        let fixture = Fixture::new(FakeUploader::new());
        fixture.container.fail_stream_out("no such file");

        let err = fixture.step(action()).perform().await.unwrap_err();

        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), ERR_ESTABLISH_STREAM);
        assert_eq!(fixture.uploader.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_read_failure() {
        let fixture = Fixture::new(FakeUploader::new());
        fixture.container.fail_stream_out_read("unexpected EOF");

        let err = fixture.step(action()).perform().await.unwrap_err();

        assert_eq!(err.to_string(), ERR_READ_STREAM);
        assert_eq!(fixture.uploader.upload_count(), 0);
        assert_eq!(fixture.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_returned_raw() {
        let fixture = Fixture::new(FakeUploader::new().failing("502 bad gateway"));
        fixture.container.set_stream_out(tar_archive(&[("droplet", b"bits")]));

        let err = fixture
            .step(action().with_artifact("droplet"))
            .perform()
            .await
            .unwrap_err();

        assert!(err.as_emittable().is_none());
        assert_eq!(err.to_string(), "502 bad gateway");
        assert_eq!(
            fixture.streamer.stderr_text(),
            "Failed to upload payload for droplet\n"
        );
        assert_eq!(fixture.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let fixture = Fixture::new(FakeUploader::new());

        let err = fixture
            .step(UploadAction::new("/tmp/droplet", "::not a url::"))
            .perform()
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Other(_)));
        assert!(fixture.container.stream_out_specs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_limiter() {
        let fixture = Fixture::new(FakeUploader::new());
        let held = fixture.limiter.acquire(&Canceller::new()).await.unwrap();

        let step = fixture.step(action());
        let task = spawn_perform(&step);
        tokio::time::sleep(Duration::from_millis(10)).await;
        step.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
        assert!(fixture.container.stream_out_specs().is_empty());
        drop(held);
    }

    #[tokio::test]
    async fn test_cancel_during_upload() {
        let fixture = Fixture::new(FakeUploader::new().held());
        fixture.container.set_stream_out(tar_archive(&[("droplet", b"bits")]));

        let step = fixture.step(action().with_artifact("droplet"));
        let task = spawn_perform(&step);
        eventually("upload to start", || fixture.uploader.in_flight() == 1).await;
        step.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
        assert_eq!(fixture.streamer.stderr_text(), "");
        assert_eq!(fixture.staged_files(), 0);
    }
}
