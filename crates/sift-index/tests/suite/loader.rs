use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sift_index::{
    encode_shard, IndexEntry, LoaderConfig, LoaderStats, MemoryShardSource, Shard, ShardError,
    ShardFormat, ShardKey, ShardLoader, ShardSource, ShardStatus, ShardStore, SourceError, Target,
    TokenBucket,
};

/// Memory source with an adjustable fetch latency and a fetch counter.
struct SlowSource {
    inner: MemoryShardSource,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl SlowSource {
    fn new(inner: MemoryShardSource, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            delay: Mutex::new(delay),
            fetches: AtomicUsize::new(0),
        })
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardSource for SlowSource {
    fn keys(&self) -> Vec<ShardKey> {
        self.inner.keys()
    }

    fn format(&self) -> ShardFormat {
        ShardFormat::Json
    }

    async fn fetch(&self, key: ShardKey) -> Result<Vec<u8>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;
        self.inner.fetch(key).await
    }
}

fn key(ch: char) -> ShardKey {
    ShardKey::from_char(ch)
}

fn init_shard_bytes() -> Vec<u8> {
    let shard = Shard::new(
        key('i'),
        vec![TokenBucket::new(
            "init",
            vec![IndexEntry::new(
                "isAllowed",
                ["hermes", "SkymapMask"],
                Target::parse("skymapmask.html#a1").unwrap(),
            )],
        )],
    )
    .unwrap();
    encode_shard(&shard).unwrap()
}

const DUPLICATE_TOKENS: &[u8] =
    br#"{"format_version": 1, "key": "m", "buckets": [["map", []], ["map", []]]}"#;

fn loader(source: Arc<dyn ShardSource>, timeout: Duration) -> ShardLoader {
    ShardLoader::new(
        Arc::new(ShardStore::new()),
        source,
        LoaderConfig {
            timeout,
            ..LoaderConfig::default()
        },
    )
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn concurrent_requests_share_one_fetch() {
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('i'), init_shard_bytes()),
        Duration::from_millis(100),
    );
    let loader = loader(source.clone(), Duration::from_secs(2));

    let (a, b, c) = tokio::join!(
        loader.ensure_loaded(key('i')),
        loader.ensure_loaded(key('i')),
        loader.ensure_loaded(key('i')),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
    assert_eq!(source.fetches(), 1);
    assert_eq!(
        loader.stats(),
        LoaderStats {
            fetches: 1,
            coalesced: 2,
            failures: 0
        }
    );

    // Cached: no further I/O.
    let again = loader.ensure_loaded(key('i')).await.unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    assert_eq!(source.fetches(), 1);
    assert!(loader.store().get_shard(key('i')).is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeouts_are_retried_by_the_next_request() {
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('i'), init_shard_bytes()),
        Duration::from_secs(60),
    );
    let loader = loader(source.clone(), Duration::from_millis(100));

    let err = loader.ensure_loaded(key('i')).await.unwrap_err();
    assert_eq!(
        err,
        ShardError::Timeout {
            key: key('i'),
            after: Duration::from_millis(100)
        }
    );
    assert!(matches!(loader.status(key('i')), ShardStatus::Failed(_)));

    source.set_delay(Duration::from_millis(10));
    let shard = loader.ensure_loaded(key('i')).await.unwrap();
    assert_eq!(shard.token_count(), 1);
    assert_eq!(source.fetches(), 2);
    assert_eq!(loader.stats().failures, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_shards_stay_failed_until_reload() {
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('m'), DUPLICATE_TOKENS),
        Duration::ZERO,
    );
    let loader = loader(source.clone(), Duration::from_secs(2));

    let first = loader.ensure_loaded(key('m')).await.unwrap_err();
    assert!(matches!(&first, ShardError::Malformed { reason, .. } if reason == "duplicate token `map`"));

    // Fixing the data is not enough; the failure is sticky.
    source.inner.insert(
        key('m'),
        br#"{"format_version": 1, "key": "m", "buckets": [["map", []]]}"#.to_vec(),
    );
    let second = loader.ensure_loaded(key('m')).await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(source.fetches(), 1);

    let reloaded = loader.reload(key('m')).await.unwrap();
    assert_eq!(reloaded.token_count(), 1);
    assert_eq!(source.fetches(), 2);
    assert!(loader.store().failed().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn oversized_payloads_are_rejected_before_decoding() {
    let source = Arc::new(MemoryShardSource::default().with_shard(key('i'), init_shard_bytes()));
    let loader = ShardLoader::new(
        Arc::new(ShardStore::new()),
        source,
        LoaderConfig {
            timeout: Duration::from_secs(2),
            max_shard_bytes: 16,
        },
    );

    let err = loader.ensure_loaded(key('i')).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("limit 16 bytes"), "{err}");
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_keys_fail_as_fetch_errors() {
    let loader = loader(Arc::new(MemoryShardSource::default()), Duration::from_secs(2));
    assert!(!loader.has_shard(key('q')));

    let err = loader.ensure_loaded(key('q')).await.unwrap_err();
    assert!(matches!(err, ShardError::Fetch { .. }));
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_abandons_fetches() {
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('i'), init_shard_bytes()),
        Duration::from_secs(1),
    );
    let loader = loader(source, Duration::from_secs(2));
    loader.shutdown();

    let err = loader.ensure_loaded(key('i')).await.unwrap_err();
    assert_eq!(
        err,
        ShardError::Fetch {
            key: key('i'),
            message: "loader shut down".to_owned()
        }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn shards_can_be_preloaded_without_a_source() {
    let store = Arc::new(ShardStore::new());
    let shard = Shard::new(key('i'), vec![TokenBucket::new("init", Vec::new())]).unwrap();
    store.preload(shard);

    let loader = ShardLoader::new(
        Arc::clone(&store),
        Arc::new(MemoryShardSource::default()),
        LoaderConfig::default(),
    );
    let loaded = loader.ensure_loaded(key('i')).await.unwrap();
    assert_eq!(loaded.token_count(), 1);
    assert_eq!(loader.stats().fetches, 0);
    assert_eq!(store.loaded_keys(), vec![key('i')]);
}

#[tokio::test(flavor = "current_thread")]
async fn large_shards_decode_off_the_runtime_thread() {
    let buckets = (0..20_000)
        .map(|n| {
            let token = format!("i{n:05}");
            let target = Target::parse(&format!("page{n}.html#a{n}")).unwrap();
            TokenBucket::new(token.clone(), vec![IndexEntry::new(token, ["hermes"], target)])
        })
        .collect();
    let bytes = encode_shard(&Shard::new(key('i'), buckets).unwrap()).unwrap();
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('i'), bytes),
        Duration::ZERO,
    );
    let loader = Arc::new(loader(source, Duration::from_secs(2)));

    let load = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move { loader.ensure_loaded(key('i')).await }
    });
    let shard = load.await.unwrap().unwrap();
    assert_eq!(shard.token_count(), 20_000);
    assert_eq!(shard.prefix_buckets("i1999").count(), 10);
    assert!(matches!(loader.status(key('i')), ShardStatus::Loaded(loaded) if Arc::ptr_eq(&loaded, &shard)));
}
