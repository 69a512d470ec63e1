use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{ShardFormat, ShardKey, SourceError};

/// Where shard bytes come from.
///
/// Implementations only transport bytes; decoding and validation happen in
/// the [`ShardLoader`](crate::ShardLoader).
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Keys this source can provide (the manifest), in ascending order.
    fn keys(&self) -> Vec<ShardKey>;

    fn contains(&self, key: ShardKey) -> bool {
        self.keys().contains(&key)
    }

    /// Encoding of the bytes returned by [`ShardSource::fetch`].
    fn format(&self) -> ShardFormat;

    async fn fetch(&self, key: ShardKey) -> Result<Vec<u8>, SourceError>;
}

/// In-process source, mainly for tests and embedding prebuilt shards.
#[derive(Debug)]
pub struct MemoryShardSource {
    format: ShardFormat,
    shards: RwLock<BTreeMap<ShardKey, Vec<u8>>>,
}

impl MemoryShardSource {
    pub fn new(format: ShardFormat) -> Self {
        Self {
            format,
            shards: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_shard(self, key: ShardKey, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, bytes);
        self
    }

    /// Adds or replaces the bytes for `key`. Already loaded shards are not
    /// affected until they are reloaded.
    pub fn insert(&self, key: ShardKey, bytes: impl Into<Vec<u8>>) {
        self.shards.write().insert(key, bytes.into());
    }

    pub fn remove(&self, key: ShardKey) -> Option<Vec<u8>> {
        self.shards.write().remove(&key)
    }
}

impl Default for MemoryShardSource {
    fn default() -> Self {
        Self::new(ShardFormat::Json)
    }
}

#[async_trait]
impl ShardSource for MemoryShardSource {
    fn keys(&self) -> Vec<ShardKey> {
        self.shards.read().keys().copied().collect()
    }

    fn contains(&self, key: ShardKey) -> bool {
        self.shards.read().contains_key(&key)
    }

    fn format(&self) -> ShardFormat {
        self.format
    }

    async fn fetch(&self, key: ShardKey) -> Result<Vec<u8>, SourceError> {
        self.shards
            .read()
            .get(&key)
            .cloned()
            .ok_or(SourceError::UnknownShard(key))
    }
}

/// Shards stored as files under one directory.
///
/// In JSON mode each shard is `<root>/<key>.json`. In Doxygen mode the
/// directory is Doxygen's `html/search`: every `<section>_<n>.js` file (and
/// any `<key>.js`) is assigned to the shard of its first token, and a shard
/// is the concatenation of all files assigned to it.
///
/// The manifest is taken from a directory listing when the source is opened;
/// files added later are not picked up.
#[derive(Debug, Clone)]
pub struct DirShardSource {
    root: PathBuf,
    format: ShardFormat,
    files: BTreeMap<ShardKey, Vec<PathBuf>>,
}

impl DirShardSource {
    pub async fn open(root: impl Into<PathBuf>, format: ShardFormat) -> Result<Self, SourceError> {
        let root = root.into();
        let mut files: BTreeMap<ShardKey, Vec<PathBuf>> = BTreeMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let key = match classify_file(&path, format) {
                Some(ShardFile::Keyed(key)) => Some(key),
                Some(ShardFile::Section) => section_key(&path).await,
                None => None,
            };
            match key {
                Some(key) => files.entry(key).or_default().push(path),
                None => tracing::trace!(
                    target: "sift.index",
                    path = %path.display(),
                    "ignoring non-shard file"
                ),
            }
        }
        for paths in files.values_mut() {
            paths.sort();
        }

        tracing::debug!(
            target: "sift.index",
            root = %root.display(),
            shards = files.len(),
            ?format,
            "opened shard directory"
        );

        Ok(Self { root, format, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files that make up shard `key`, in name order; empty if the shard is
    /// not in the manifest.
    pub fn shard_paths(&self, key: ShardKey) -> &[PathBuf] {
        self.files.get(&key).map(Vec::as_slice).unwrap_or_default()
    }
}

enum ShardFile {
    /// Named after its key: `i.json`, `i.js`.
    Keyed(ShardKey),
    /// Doxygen section file such as `functions_9.js`; the key comes from its
    /// content.
    Section,
}

fn classify_file(path: &Path, format: ShardFormat) -> Option<ShardFile> {
    if path.extension()?.to_str()? != format.file_extension() {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if let Ok(key) = stem.parse() {
        return Some(ShardFile::Keyed(key));
    }
    if format != ShardFormat::Doxygen {
        return None;
    }
    let (section, index) = stem.rsplit_once('_')?;
    let is_section = !section.is_empty()
        && section.bytes().all(|b| b.is_ascii_lowercase())
        && !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_alphanumeric());
    is_section.then_some(ShardFile::Section)
}

/// Reads a Doxygen section file and returns the shard of its first token.
///
/// Unreadable or unparseable files are skipped; empty sections have no key.
async fn section_key(path: &Path) -> Option<ShardKey> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(
                target: "sift.index",
                path = %path.display(),
                error = %err,
                "unreadable search data"
            );
            return None;
        }
    };
    match crate::doxygen::parse_search_data(&text) {
        Ok(buckets) => buckets.first().and_then(|bucket| ShardKey::for_token(&bucket.token)),
        Err(err) => {
            tracing::warn!(
                target: "sift.index",
                path = %path.display(),
                error = %err,
                "skipping invalid search data"
            );
            None
        }
    }
}

#[async_trait]
impl ShardSource for DirShardSource {
    fn keys(&self) -> Vec<ShardKey> {
        self.files.keys().copied().collect()
    }

    fn contains(&self, key: ShardKey) -> bool {
        self.files.contains_key(&key)
    }

    fn format(&self) -> ShardFormat {
        self.format
    }

    async fn fetch(&self, key: ShardKey) -> Result<Vec<u8>, SourceError> {
        let paths = self.shard_paths(key);
        if paths.is_empty() {
            return Err(SourceError::UnknownShard(key));
        }
        let mut bytes = Vec::new();
        for path in paths {
            if !bytes.is_empty() {
                bytes.push(b'\n');
            }
            bytes.extend(tokio::fs::read(path).await?);
        }
        Ok(bytes)
    }
}
