//! End-to-end tests of the cache client against the in-memory gateway.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildcache_common::{Digest, DigestUtil};
use buildcache_remote::{
    wait_for_bulk_transfer, ActionResult, CacheError, CacheOptions, FileOutErr, InMemoryGateway,
    OutputFile, RemoteCache, RequestContext, StorageGateway, TransferCoordinator, UploadSource,
};

fn ctx() -> RequestContext {
    RequestContext::new("action-id", "trace-id")
}

fn new_cache(gateway: Arc<InMemoryGateway>) -> Arc<RemoteCache<InMemoryGateway>> {
    Arc::new(RemoteCache::new(gateway, CacheOptions::default()))
}

#[tokio::test]
async fn download_empty_blob_and_file_performs_no_download() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = new_cache(Arc::clone(&gateway));
    let empty: Digest = util.empty_digest().clone();

    let data: Vec<u8> = cache.download_blob(&ctx(), &empty).await.unwrap();
    assert!(data.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let file: PathBuf = dir.path().join("file");
    cache.download_file(&ctx(), &file, &empty).await.unwrap();

    assert!(file.exists());
    assert_eq!(std::fs::metadata(&file).unwrap().len(), 0);
    assert_eq!(gateway.read_calls(), 0);
    assert_eq!(cache.metrics().successful_downloads(), 0);
    assert_eq!(cache.metrics().failed_downloads(), 0);
}

#[tokio::test]
async fn download_out_err_empty_performs_no_download() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = new_cache(Arc::clone(&gateway));

    let result = ActionResult {
        stdout_digest: Some(util.empty_digest().clone()),
        stderr_digest: Some(util.empty_digest().clone()),
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let out_err = FileOutErr::new(dir.path().join("stdout"), dir.path().join("stderr"));

    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    let handles = coordinator.download_out_err(&ctx(), &result, &out_err);
    wait_for_bulk_transfer(handles, true).await.unwrap();

    assert_eq!(cache.metrics().successful_downloads(), 0);
    assert_eq!(cache.metrics().failed_downloads(), 0);
    assert_eq!(gateway.read_calls(), 0);
}

#[tokio::test]
async fn download_out_err_writes_both_streams() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let out_digest: Digest = util.compute(b"compiling...\n");
    let err_digest: Digest = util.compute(b"warning: unused\n");
    gateway.insert(out_digest.clone(), b"compiling...\n".to_vec());
    gateway.insert(err_digest.clone(), b"warning: unused\n".to_vec());
    let cache = new_cache(Arc::clone(&gateway));

    let result = ActionResult {
        stdout_digest: Some(out_digest),
        stderr_digest: Some(err_digest),
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let out_err = FileOutErr::new(dir.path().join("stdout"), dir.path().join("stderr"));

    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    let handles = coordinator.download_out_err(&ctx(), &result, &out_err);
    assert_eq!(handles.len(), 2);
    wait_for_bulk_transfer(handles, false).await.unwrap();

    assert_eq!(std::fs::read(&out_err.stdout).unwrap(), b"compiling...\n");
    assert_eq!(std::fs::read(&out_err.stderr).unwrap(), b"warning: unused\n");
    assert_eq!(cache.metrics().successful_downloads(), 2);
}

#[tokio::test]
async fn download_file_with_symlink_template_copies_no_bytes() {
    // With a symlink template the destination becomes a link into a
    // location where the content can be found (e.g. a FUSE view of the
    // CAS); nothing is fetched.
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let hello: Digest = util.compute(b"hello-contents");
    gateway.insert(hello.clone(), b"hello-contents".to_vec());

    let options = CacheOptions::new().with_symlink_template("/home/alice/cas/{hash}-{size_bytes}");
    let cache = Arc::new(RemoteCache::new(Arc::clone(&gateway), options));

    let dir = tempfile::tempdir().unwrap();
    let file: PathBuf = dir.path().join("symlink-to-file");
    cache.download_file(&ctx(), &file, &hello).await.unwrap();

    let target: PathBuf = std::fs::read_link(&file).unwrap();
    assert_eq!(
        target,
        PathBuf::from(
            "/home/alice/cas/a378b939ad2e1d470a9a28b34b0e256b189e85cb236766edc1d46ec3b6ca82e5-14"
        )
    );
    assert_eq!(gateway.read_calls(), 0);
    assert_eq!(cache.metrics().successful_downloads(), 0);
}

#[tokio::test]
async fn upload_empty_blob_and_file_performs_no_upload() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = new_cache(Arc::clone(&gateway));
    let empty: Digest = util.empty_digest().clone();

    cache.upload_blob(&ctx(), &empty, b"").await.unwrap();
    assert_eq!(gateway.write_calls(), 0);

    let dir = tempfile::tempdir().unwrap();
    let file: PathBuf = dir.path().join("file");
    std::fs::write(&file, b"").unwrap();
    cache.upload_file(&ctx(), &empty, &file).await.unwrap();
    assert_eq!(gateway.write_calls(), 0);

    // Empty digests require no storage: the query resolves locally.
    let query: HashSet<Digest> = [empty].into_iter().collect();
    let missing: HashSet<Digest> = cache.find_missing_digests(&ctx(), &query).await.unwrap();
    assert!(missing.is_empty());
    assert_eq!(gateway.find_missing_calls(), 0);

    assert_eq!(cache.metrics().successful_uploads(), 0);
    assert_eq!(cache.metrics().failed_uploads(), 0);
}

#[tokio::test]
async fn find_missing_digests_returns_exactly_the_absent() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let d1: Digest = util.compute(b"stored");
    let d2: Digest = util.compute(b"not stored");
    gateway.insert(d1.clone(), b"stored".to_vec());
    let cache = new_cache(Arc::clone(&gateway));

    let query: HashSet<Digest> = [d1, d2.clone()].into_iter().collect();
    let missing: HashSet<Digest> = cache.find_missing_digests(&ctx(), &query).await.unwrap();

    assert_eq!(missing.len(), 1);
    assert!(missing.contains(&d2));
    assert_eq!(gateway.find_missing_calls(), 1);
}

#[tokio::test]
async fn download_action_outputs_materializes_files() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let lib: Digest = util.compute(b"object code");
    let tool: Digest = util.compute(b"#!/bin/sh\n");
    gateway.insert(lib.clone(), b"object code".to_vec());
    gateway.insert(tool.clone(), b"#!/bin/sh\n".to_vec());
    let cache = new_cache(Arc::clone(&gateway));

    let result = ActionResult {
        output_files: vec![
            OutputFile::new("outputs/lib.o", lib),
            OutputFile::new("outputs/run.sh", tool).executable(),
        ],
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    let handles = coordinator.download_action_outputs(&ctx(), &result, dir.path());
    wait_for_bulk_transfer(handles, false).await.unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("outputs/lib.o")).unwrap(),
        b"object code"
    );
    assert_eq!(
        std::fs::read(dir.path().join("outputs/run.sh")).unwrap(),
        b"#!/bin/sh\n"
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode: u32 = std::fs::metadata(dir.path().join("outputs/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0);
    }
    assert_eq!(cache.metrics().successful_downloads(), 2);
}

#[tokio::test]
async fn bulk_wait_collects_every_failure() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = new_cache(Arc::clone(&gateway));

    let mut outputs: Vec<OutputFile> = Vec::new();
    for i in 1..=5 {
        let content: String = format!("content-{i}");
        let digest: Digest = util.compute(content.as_bytes());
        // Item 3 is never stored, so its download fails with NotFound.
        if i != 3 {
            gateway.insert(digest.clone(), content.into_bytes());
        }
        outputs.push(OutputFile::new(format!("out{i}"), digest));
    }
    let result = ActionResult {
        output_files: outputs,
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    let handles = coordinator.download_action_outputs(&ctx(), &result, dir.path());
    let err = wait_for_bulk_transfer(handles, false).await.unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].name, "out3");
    assert!(matches!(err.failures[0].error, CacheError::NotFound { .. }));

    // Collect-all mode waits for every item to reach a terminal state.
    assert_eq!(cache.metrics().successful_downloads(), 4);
    assert_eq!(cache.metrics().failed_downloads(), 1);
}

#[tokio::test]
async fn bulk_wait_with_no_transfers_succeeds_immediately() {
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = new_cache(gateway);

    wait_for_bulk_transfer(Vec::new(), false).await.unwrap();
    wait_for_bulk_transfer(Vec::new(), true).await.unwrap();

    assert_eq!(cache.metrics().successful_downloads(), 0);
    assert_eq!(cache.metrics().failed_downloads(), 0);
}

/// Gateway that delays reads, for observing fail-fast and background
/// drain behavior.
struct SlowGateway {
    inner: InMemoryGateway,
    delay: Duration,
}

#[async_trait]
impl StorageGateway for SlowGateway {
    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &HashSet<Digest>,
    ) -> Result<HashSet<Digest>, CacheError> {
        self.inner.find_missing_blobs(ctx, digests).await
    }

    async fn read_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
    ) -> Result<Vec<u8>, CacheError> {
        if self.inner.contains(digest) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.read_blob(ctx, digest).await
    }

    async fn write_blob(
        &self,
        ctx: &RequestContext,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), CacheError> {
        self.inner.write_blob(ctx, digest, data).await
    }
}

#[tokio::test]
async fn bulk_wait_fail_fast_returns_on_first_failure_and_drains_in_background() {
    let util = DigestUtil::default();
    let inner = InMemoryGateway::new();
    let mut outputs: Vec<OutputFile> = Vec::new();
    for i in 1..=5 {
        let content: String = format!("content-{i}");
        let digest: Digest = util.compute(content.as_bytes());
        // Item 1 fails immediately; the others succeed slowly.
        if i != 1 {
            inner.insert(digest.clone(), content.into_bytes());
        }
        outputs.push(OutputFile::new(format!("out{i}"), digest));
    }
    let gateway = Arc::new(SlowGateway {
        inner,
        delay: Duration::from_millis(50),
    });
    let cache = Arc::new(RemoteCache::new(gateway, CacheOptions::default()));

    let result = ActionResult {
        output_files: outputs,
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    let handles = coordinator.download_action_outputs(&ctx(), &result, dir.path());
    let err = wait_for_bulk_transfer(handles, true).await.unwrap_err();

    // Only the first failure is reported; the others were not awaited.
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].name, "out1");

    // The dropped handles detached their transfers rather than cancelling
    // them: the remaining downloads finish and still count.
    let mut waited = Duration::ZERO;
    while cache.metrics().successful_downloads() < 4 {
        assert!(waited < Duration::from_secs(5), "background transfers never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(cache.metrics().successful_downloads(), 4);
    assert_eq!(cache.metrics().failed_downloads(), 1);
}

#[tokio::test]
async fn upload_missing_skips_content_the_store_already_has() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let present: Digest = util.compute(b"already there");
    let absent: Digest = util.compute(b"new content");
    let empty: Digest = util.empty_digest().clone();
    gateway.insert(present.clone(), b"already there".to_vec());
    let cache = new_cache(Arc::clone(&gateway));

    let dir = tempfile::tempdir().unwrap();
    let file: PathBuf = dir.path().join("new-content");
    std::fs::write(&file, b"new content").unwrap();

    let coordinator = TransferCoordinator::new(Arc::clone(&cache));
    coordinator
        .upload_missing(
            &ctx(),
            vec![
                (present, UploadSource::Bytes(b"already there".to_vec())),
                (absent.clone(), UploadSource::File(file)),
                (empty, UploadSource::Bytes(Vec::new())),
            ],
        )
        .await
        .unwrap();

    // Exactly one blob crossed the network.
    assert_eq!(gateway.write_calls(), 1);
    assert!(gateway.contains(&absent));
    assert_eq!(cache.metrics().successful_uploads(), 1);
}

#[tokio::test]
async fn download_file_to_incompatible_destination_is_local_io_error() {
    let util = DigestUtil::default();
    let gateway = Arc::new(InMemoryGateway::new());
    let digest: Digest = util.compute(b"bytes");
    gateway.insert(digest.clone(), b"bytes".to_vec());
    let cache = new_cache(Arc::clone(&gateway));

    let dir = tempfile::tempdir().unwrap();
    let clash: PathBuf = dir.path().join("clash");
    std::fs::create_dir_all(clash.join("occupant")).unwrap();

    let err = cache.download_file(&ctx(), &clash, &digest).await.unwrap_err();
    assert!(matches!(err, CacheError::LocalIo { .. }));
}

#[test]
fn cache_options_deserialize_from_json() {
    let options: CacheOptions = serde_json::from_str(
        r#"{"symlink_template": "/mnt/cas/{hash}-{size_bytes}", "cas_concurrency": 4}"#,
    )
    .unwrap();
    assert_eq!(
        options.symlink_template.as_deref(),
        Some("/mnt/cas/{hash}-{size_bytes}")
    );
    assert_eq!(options.cas_concurrency, 4);
}
