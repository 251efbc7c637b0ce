//! End-to-end engine tests against an in-memory object store

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use jiff::Timestamp;
use objsync_core::{
    ByteRange, ByteStream, CompletedPart, ComparisonMode, Error, FilterRule, ListOptions,
    ListResult, Location, ObjectAttributes, ObjectInfo, Operation, OutcomeHook, OutcomeStatus,
    PlanItem,
    RemotePath, Result, RetryConfig, StorageClient, SyncEngine, SyncOptions, TransferConfig,
    TransferOutcome,
};
use tempfile::TempDir;
use tokio::sync::{Semaphore, mpsc};

const MIB: usize = 1024 * 1024;

#[derive(Clone)]
struct Stored {
    data: Bytes,
    modified: Timestamp,
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
enum Fault {
    /// Fail upload of `part` with a transient error `remaining` more times
    FlakyPart { part: u32, remaining: u32 },
    /// Body stream of a download fails as if the local disk were full
    DiskFull,
    Panic,
}

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Stored>>,
    uploads: Mutex<HashMap<String, Upload>>,
    faults: Mutex<HashMap<String, Fault>>,
    calls: Mutex<Vec<String>>,
    /// When set, data-moving calls wait for a permit
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    next_upload: AtomicUsize,
}

#[derive(Default)]
struct Upload {
    content_type: Option<String>,
    parts: BTreeMap<u32, Bytes>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(store), gate)
    }

    fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>, modified: Timestamp) {
        self.store(bucket, key, data.into(), modified, None);
    }

    fn store(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        modified: Timestamp,
        content_type: Option<String>,
    ) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            Stored {
                data,
                modified,
                content_type,
            },
        );
    }

    fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|s| s.content_type.clone())
    }

    fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|s| s.data.clone())
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn fault(&self, key: &str, fault: Fault) {
        self.faults.lock().unwrap().insert(key.to_string(), fault);
    }

    fn calls(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn check_panic(&self, key: &str) {
        if matches!(self.faults.lock().unwrap().get(key), Some(Fault::Panic)) {
            panic!("injected panic for {key}");
        }
    }

    fn lookup(&self, path: &RemotePath) -> Result<Stored> {
        self.objects
            .lock()
            .unwrap()
            .get(&(path.bucket.clone(), path.key.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

async fn collect(mut body: ByteStream) -> Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        let max = options.max_keys.unwrap_or(1000) as usize;
        let objects = self.objects.lock().unwrap();
        let mut items: Vec<ObjectInfo> = objects
            .iter()
            .filter(|((bucket, key), _)| bucket == &path.bucket && key.starts_with(&path.key))
            .filter(|((_, key), _)| {
                options
                    .continuation_token
                    .as_deref()
                    .is_none_or(|after| key.as_str() > after)
            })
            .map(|((_, key), stored)| ObjectInfo {
                last_modified: Some(stored.modified),
                etag: Some(format!("\"{}\"", stored.data.len())),
                ..ObjectInfo::new(key.clone(), stored.data.len() as u64)
            })
            .take(max + 1)
            .collect();
        let truncated = items.len() > max;
        items.truncate(max);
        let continuation_token = truncated
            .then(|| items.last().map(|i| i.key.clone()))
            .flatten();
        Ok(ListResult {
            items,
            truncated,
            continuation_token,
        })
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        let stored = self.lookup(path)?;
        Ok(ObjectInfo {
            last_modified: Some(stored.modified),
            content_type: stored.content_type,
            ..ObjectInfo::new(path.key.clone(), stored.data.len() as u64)
        })
    }

    async fn get_object(&self, path: &RemotePath, range: Option<ByteRange>) -> Result<ByteStream> {
        self.log(format!("get {}", path.key));
        let stored = self.lookup(path)?;

        // Disk-full downloads fail without waiting at the gate
        if matches!(self.faults.lock().unwrap().get(&path.key), Some(Fault::DiskFull)) {
            let display = path.to_string();
            return Ok(futures::stream::iter(vec![
                // Shorter than any object, so only the disk error can end the body
                Ok(Bytes::from_static(b"p")),
                Err(Error::from_io(
                    display,
                    std::io::Error::from(std::io::ErrorKind::StorageFull),
                )),
            ])
            .boxed());
        }

        self.pass_gate().await;
        let data = match range {
            Some(range) => stored.data.slice(range.start as usize..range.end as usize),
            None => stored.data,
        };
        Ok(futures::stream::once(async move { Ok(data) }).boxed())
    }

    async fn put_object(
        &self,
        path: &RemotePath,
        body: ByteStream,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> Result<()> {
        self.log(format!("put {}", path.key));
        self.pass_gate().await;
        let data = collect(body).await?;
        assert_eq!(data.len() as u64, size);
        let content_type = attributes.content_type.clone();
        self.store(&path.bucket, &path.key, data, Timestamp::now(), content_type);
        Ok(())
    }

    async fn copy_object(
        &self,
        src: &RemotePath,
        dst: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<()> {
        self.log(format!("copy {}", src.key));
        let stored = self.lookup(src)?;
        let content_type = if attributes.replaces_metadata() {
            attributes.content_type.clone()
        } else {
            stored.content_type
        };
        self.store(&dst.bucket, &dst.key, stored.data, Timestamp::now(), content_type);
        Ok(())
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        self.log(format!("delete {}", path.key));
        self.check_panic(&path.key);
        self.objects
            .lock()
            .unwrap()
            .remove(&(path.bucket.clone(), path.key.clone()));
        Ok(())
    }

    async fn create_multipart(
        &self,
        path: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        self.log(format!("create {}", path.key));
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        let upload = Upload {
            content_type: attributes.content_type.clone(),
            ..Upload::default()
        };
        self.uploads.lock().unwrap().insert(id.clone(), upload);
        Ok(id)
    }

    async fn upload_part(
        &self,
        path: &RemotePath,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        size: u64,
    ) -> Result<String> {
        self.log(format!("part {} {part_number}", path.key));
        {
            let mut faults = self.faults.lock().unwrap();
            if let Some(Fault::FlakyPart { part, remaining }) = faults.get_mut(&path.key)
                && *part == part_number
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::Transport("connection reset by peer".to_string()));
            }
        }
        self.pass_gate().await;
        let data = collect(body).await?;
        assert_eq!(data.len() as u64, size);
        self.uploads
            .lock()
            .unwrap()
            .get_mut(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?
            .parts
            .insert(part_number, data);
        Ok(format!("etag-{part_number}"))
    }

    async fn upload_part_copy(
        &self,
        src: &RemotePath,
        _dst: &RemotePath,
        upload_id: &str,
        part_number: u32,
        range: ByteRange,
    ) -> Result<String> {
        let stored = self.lookup(src)?;
        let data = stored.data.slice(range.start as usize..range.end as usize);
        self.uploads
            .lock()
            .unwrap()
            .get_mut(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?
            .parts
            .insert(part_number, data);
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart(
        &self,
        path: &RemotePath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        self.log(format!("complete {}", path.key));
        let uploaded = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;

        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        let expected: Vec<u32> = (1..=uploaded.parts.len() as u32).collect();
        if numbers != expected {
            return Err(Error::Request(format!("parts out of order: {numbers:?}")));
        }

        let mut data = Vec::new();
        for chunk in uploaded.parts.values() {
            data.extend_from_slice(chunk);
        }
        let data = Bytes::from(data);
        self.store(&path.bucket, &path.key, data, Timestamp::now(), uploaded.content_type);
        Ok(())
    }

    async fn abort_multipart(&self, path: &RemotePath, upload_id: &str) -> Result<()> {
        self.log(format!("abort {}", path.key));
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

fn fast_config() -> TransferConfig {
    TransferConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..TransferConfig::default()
    }
}

fn bucket(key: &str) -> Location {
    Location::Remote(RemotePath::new("bucket", key))
}

fn local(dir: &TempDir) -> Location {
    Location::Local(dir.path().to_path_buf())
}

/// Backdate a local file so a fresh upload is never older than it
fn age(path: &std::path::Path) {
    let day_ago = SystemTime::now() - Duration::from_secs(86_400);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(day_ago)
        .unwrap();
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_excluded_file_is_never_planned() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
    std::fs::write(dir.path().join("b.log"), b"log line").unwrap();

    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        rules: vec![FilterRule::exclude("*.log")],
        ..SyncOptions::default()
    };

    let items: Vec<PlanItem> = engine
        .plan(&local(&dir), &bucket("backup/"), &options)
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    let put = items[0].instruction().unwrap();
    assert_eq!(put.operation, Operation::Put);
    assert_eq!(put.path, "a.txt");
    assert_eq!(put.size, 10);
    assert!(items.iter().all(|item| item.path() != "b.log"));

    let report = engine.sync(&local(&dir), &bucket("backup/"), &options).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(store.keys("bucket"), vec!["backup/a.txt"]);
    assert_eq!(store.get("bucket", "backup/a.txt").unwrap(), "0123456789");
}

#[tokio::test]
async fn test_size_only_skips_equal_sizes_with_different_mtime() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("x"), vec![b'x'; 100]).unwrap();

    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "x", vec![b'y'; 100], Timestamp::from_second(0).unwrap());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        comparison_mode: ComparisonMode::SizeOnly,
        ..SyncOptions::default()
    };
    let report = engine.sync(&local(&dir), &bucket(""), &options).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 0);
    assert!(store.calls("put").is_empty());
    assert_eq!(store.get("bucket", "x").unwrap(), vec![b'y'; 100]);
}

#[tokio::test]
async fn test_flaky_part_is_retried_to_success() {
    let dir = TempDir::new().unwrap();
    let content: Vec<u8> = (0..10 * MIB).map(|i| (i % 253) as u8).collect();
    std::fs::write(dir.path().join("big.bin"), &content).unwrap();

    let store = Arc::new(MemoryStore::default());
    store.fault(
        "big.bin",
        Fault::FlakyPart {
            part: 1,
            remaining: 2,
        },
    );

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .sync(&local(&dir), &bucket(""), &SyncOptions::default())
        .await
        .unwrap();

    let outcome = report.outcome("big.bin").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.failed_attempts, 2);
    assert!(outcome.instruction.as_ref().unwrap().multipart_required);
    assert_eq!(store.calls("part big.bin 1").len(), 3);
    assert_eq!(store.calls("part big.bin 2").len(), 1);
    assert_eq!(store.calls("complete").len(), 1);
    assert_eq!(store.get("bucket", "big.bin").unwrap(), content);
}

#[tokio::test]
async fn test_disk_full_halts_dispatch_and_lets_in_flight_finish() {
    let dir = TempDir::new().unwrap();
    let (store, gate) = MemoryStore::gated();
    for key in ["a", "b", "c", "d", "e"] {
        store.insert("bucket", &format!("src/{key}"), key.repeat(4), Timestamp::now());
    }
    store.fault("src/c", Fault::DiskFull);

    let (tx, mut rx) = mpsc::unbounded_channel::<TransferOutcome>();
    let hook: OutcomeHook = Arc::new(move |outcome: &TransferOutcome| {
        let _ = tx.send(outcome.clone());
    });
    let engine = Arc::new(
        SyncEngine::new(store.clone(), fast_config())
            .unwrap()
            .with_progress(hook),
    );

    let run = {
        let engine = engine.clone();
        let dest = local(&dir);
        let options = SyncOptions {
            concurrency: Some(3),
            ..SyncOptions::default()
        };
        tokio::spawn(async move { engine.sync(&bucket("src/"), &dest, &options).await })
    };

    // a and b are held at the gate while c runs out of disk
    let failed = rx.recv().await.unwrap();
    assert_eq!(failed.path, "c");
    assert_eq!(failed.error.as_ref().unwrap().class, "resource-exhaustion");
    wait_until(|| store.in_flight() == 2).await;
    gate.add_permits(10);

    let report = run.await.unwrap().unwrap();
    let statuses: Vec<_> = report.outcomes.iter().map(|o| (o.path.as_str(), o.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("a", OutcomeStatus::Succeeded),
            ("b", OutcomeStatus::Succeeded),
            ("c", OutcomeStatus::Failed),
            ("d", OutcomeStatus::NotAttempted),
            ("e", OutcomeStatus::NotAttempted),
        ]
    );
    assert_eq!(report.fatal.as_ref().unwrap().class, "resource-exhaustion");
    assert!(report.has_failures());
    assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"aaaa");
    assert!(!dir.path().join("c").exists());
    assert!(store.calls("get src/d").is_empty());
}

#[tokio::test]
async fn test_disk_full_with_single_slot_reports_rest_not_attempted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    for key in ["a", "b", "c", "d", "e"] {
        store.insert("bucket", key, key.repeat(3), Timestamp::now());
    }
    store.fault("c", Fault::DiskFull);

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        concurrency: Some(1),
        ..SyncOptions::default()
    };
    let report = engine.sync(&bucket(""), &local(&dir), &options).await.unwrap();

    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Succeeded,
            OutcomeStatus::Succeeded,
            OutcomeStatus::Failed,
            OutcomeStatus::NotAttempted,
            OutcomeStatus::NotAttempted,
        ]
    );
    assert_eq!(store.calls("get"), vec!["get a", "get b", "get c"]);
    assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"aaa");
    assert!(!dir.path().join("c").exists());
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_cancel_with_three_in_flight() {
    let dir = TempDir::new().unwrap();
    // a is large enough for a multipart upload; the rest are single puts
    std::fs::write(dir.path().join("a"), vec![1u8; 6 * 1024]).unwrap();
    for name in ["b", "c", "d", "e"] {
        std::fs::write(dir.path().join(name), name).unwrap();
    }

    let (store, gate) = MemoryStore::gated();
    let config = TransferConfig {
        multipart_threshold: 1024,
        ..fast_config()
    };
    let engine = Arc::new(SyncEngine::new(store.clone(), config).unwrap());
    let options = SyncOptions {
        concurrency: Some(3),
        ..SyncOptions::default()
    };

    let run = {
        let engine = engine.clone();
        let source = local(&dir);
        tokio::spawn(async move { engine.sync(&source, &bucket(""), &options).await })
    };

    wait_until(|| store.in_flight() == 3).await;
    engine.cancel();
    // Give the multipart session time to observe the cancellation before
    // the single-part uploads are released
    wait_until(|| !store.calls("abort").is_empty()).await;
    gate.add_permits(10);

    let report = run.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.not_attempted, 2);
    assert_eq!(report.outcome("d").unwrap().status, OutcomeStatus::NotAttempted);
    assert_eq!(report.outcome("e").unwrap().status, OutcomeStatus::NotAttempted);

    let a = report.outcome("a").unwrap();
    assert_eq!(a.status, OutcomeStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().class, "cancelled");
    assert_eq!(store.calls("abort a").len(), 1);
    assert!(store.calls("complete").is_empty());

    assert_eq!(report.outcome("b").unwrap().status, OutcomeStatus::Succeeded);
    assert_eq!(report.outcome("c").unwrap().status, OutcomeStatus::Succeeded);
    assert_eq!(store.keys("bucket"), vec!["b", "c"]);
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/readme.md"), b"# hi").unwrap();
    std::fs::write(dir.path().join("top.txt"), b"top").unwrap();
    age(&dir.path().join("docs/readme.md"));
    age(&dir.path().join("top.txt"));

    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions::default();

    let first = engine.sync(&local(&dir), &bucket("site"), &options).await.unwrap();
    assert_eq!(first.succeeded, 2);

    let second = engine.sync(&local(&dir), &bucket("site"), &options).await.unwrap();
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(store.calls("put").len(), 2);

    let replan: Vec<_> = engine
        .plan(&local(&dir), &bucket("site"), &options)
        .unwrap()
        .collect()
        .await;
    assert!(replan.iter().all(|item| item.instruction().is_none()));
    assert_eq!(replan.len(), 2);
}

#[tokio::test]
async fn test_download_round_trip_preserves_mtime() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let modified = Timestamp::from_second(1_700_000_000).unwrap();
    store.insert("bucket", "photos/2024/cat.jpg", "meow", modified);
    store.insert("bucket", "photos/dog.jpg", "woof", modified);

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions::default();
    let report = engine.sync(&bucket("photos"), &local(&dir), &options).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.total_bytes, 8);
    assert_eq!(std::fs::read(dir.path().join("2024/cat.jpg")).unwrap(), b"meow");

    let replan: Vec<_> = engine
        .plan(&bucket("photos"), &local(&dir), &options)
        .unwrap()
        .collect()
        .await;
    assert!(replan.iter().all(|item| item.instruction().is_none()));
}

#[tokio::test]
async fn test_delete_removes_only_unfiltered_orphans() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();

    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "orphan.txt", "o", Timestamp::now());
    store.insert("bucket", "cache/blob", "c", Timestamp::now());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        delete_extraneous: true,
        rules: vec![FilterRule::exclude("/cache/**")],
        ..SyncOptions::default()
    };
    let report = engine.sync(&local(&dir), &bucket(""), &options).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(store.keys("bucket"), vec!["cache/blob", "keep.txt"]);
}

#[tokio::test]
async fn test_large_copy_between_buckets() {
    let store = Arc::new(MemoryStore::default());
    let content: Vec<u8> = (0..9 * MIB).map(|i| (i % 7) as u8).collect();
    store.insert("bucket", "src/blob", content.clone(), Timestamp::now());
    store.insert("bucket", "src/small", "s", Timestamp::now());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .sync(
            &bucket("src/"),
            &Location::Remote(RemotePath::new("other", "dst/")),
            &SyncOptions::copy(true),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(store.get("other", "dst/blob").unwrap(), content);
    assert_eq!(store.calls("copy src/small").len(), 1);
    assert_eq!(store.calls("complete dst/blob").len(), 1);
}

#[tokio::test]
async fn test_panicking_worker_is_reported_as_failed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "boom", "x", Timestamp::now());
    store.insert("bucket", "fine", "y", Timestamp::now());
    store.fault("boom", Fault::Panic);

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        delete_extraneous: true,
        ..SyncOptions::default()
    };
    let report = engine.sync(&local(&dir), &bucket(""), &options).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.failures[0].error.message.contains("injected panic"));
    assert_eq!(store.keys("bucket"), vec!["boom"]);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("new.txt"), b"n").unwrap();
    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "old.txt", "o", Timestamp::now());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        delete_extraneous: true,
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = engine.sync(&local(&dir), &bucket(""), &options).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.succeeded, 2);
    assert_eq!(store.keys("bucket"), vec!["old.txt"]);
    assert!(store.calls("put").is_empty());
}

#[tokio::test]
async fn test_move_upload_removes_local_sources() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .sync(&local(&dir), &bucket("moved/"), &SyncOptions::moving(true))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(store.keys("bucket"), vec!["moved/a.txt", "moved/sub/b.txt"]);
    assert!(!dir.path().join("a.txt").exists());
    assert!(!dir.path().join("sub/b.txt").exists());
}

#[tokio::test]
async fn test_move_between_buckets_deletes_source_objects() {
    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "in/x", "x", Timestamp::now());
    store.insert("bucket", "in/y", "y", Timestamp::now());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .sync(
            &bucket("in/"),
            &Location::Remote(RemotePath::new("other", "out/")),
            &SyncOptions::moving(true),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert!(store.keys("bucket").is_empty());
    assert_eq!(store.keys("other"), vec!["out/x", "out/y"]);
}

#[tokio::test]
async fn test_recursive_remove_honours_filters() {
    let store = Arc::new(MemoryStore::default());
    for key in ["logs/a.log", "logs/b.log", "logs/keep.txt", "other/c.log"] {
        store.insert("bucket", key, "l", Timestamp::now());
    }

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        rules: vec![FilterRule::exclude("*.txt")],
        ..SyncOptions::default()
    };
    let report = engine.remove(&bucket("logs/"), &options).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(store.keys("bucket"), vec!["logs/keep.txt", "other/c.log"]);
}

#[tokio::test]
async fn test_single_object_remove() {
    let store = Arc::new(MemoryStore::default());
    store.insert("bucket", "a/b", "x", Timestamp::now());
    store.insert("bucket", "a/bc", "y", Timestamp::now());

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .remove(&bucket("a/b"), &SyncOptions::copy(false))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(store.keys("bucket"), vec!["a/bc"]);
}

#[tokio::test]
async fn test_copies_keep_source_content_type() {
    let store = Arc::new(MemoryStore::default());
    let big: Bytes = vec![3u8; 9 * MIB].into();
    let png = Some("image/png".to_string());
    store.store("bucket", "src/big.bin", big, Timestamp::now(), png.clone());
    store.store("bucket", "src/small.bin", Bytes::from("s"), Timestamp::now(), png);

    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let report = engine
        .sync(&bucket("src/"), &bucket("dst/"), &SyncOptions::copy(true))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(store.calls("complete dst/big.bin").len(), 1);
    assert_eq!(store.content_type("bucket", "dst/big.bin").as_deref(), Some("image/png"));
    assert_eq!(store.content_type("bucket", "dst/small.bin").as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_explicit_content_type_applies_to_uploads() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("page.html"), b"<p>").unwrap();

    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::new(store.clone(), fast_config()).unwrap();
    let options = SyncOptions {
        attributes: ObjectAttributes {
            content_type: Some("text/plain".to_string()),
            ..ObjectAttributes::default()
        },
        ..SyncOptions::default()
    };
    engine.sync(&local(&dir), &bucket(""), &options).await.unwrap();
    assert_eq!(store.content_type("bucket", "page.html").as_deref(), Some("text/plain"));

    let guessed = Arc::new(MemoryStore::default());
    let engine = SyncEngine::new(guessed.clone(), fast_config()).unwrap();
    engine
        .sync(&local(&dir), &bucket(""), &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(guessed.content_type("bucket", "page.html").as_deref(), Some("text/html"));
}
