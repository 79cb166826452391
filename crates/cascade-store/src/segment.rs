//! Persisted store segments.
//!
//! A segment is a `[start, end)` slice of a store's state dumped to the
//! object store under `{module_hash}/{start}-{end}.kv`. Ranges are
//! exclusive-end everywhere. The dump is self-describing: the store's
//! value type, update policy, start block, hash, name, and deleted
//! prefixes ride along under reserved `__!__` keys and are stripped again
//! on load, so user-visible iteration never sees them.
//!
//! The wire framing is a length-prefixed map dump: a `u32` entry count,
//! then `u32`-length-prefixed key and value bytes per entry, keys sorted.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use cascade_core::ObjectStore;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::value::{UpdatePolicy, ValueType};

const META_NAME: &str = "__!__name";
const META_HASH: &str = "__!__hash";
const META_START_BLOCK: &str = "__!__start_block";
const META_VALUE_TYPE: &str = "__!__vtype";
const META_UPDATE_POLICY: &str = "__!__policy";
const META_DELETED_PREFIXES: &str = "__!__deleted_prefixes";

const PREFIX_SEPARATOR: char = '\u{0}';

/// An exclusive-end block range covered by a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentRange {
    /// First block covered.
    pub start: u64,
    /// First block not covered.
    pub end: u64,
}

impl SegmentRange {
    /// Creates a new range.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Object path for a segment of the given module and range.
#[must_use]
pub fn segment_path(module_hash: &str, range: SegmentRange) -> String {
    format!("{module_hash}/{}-{}.kv", range.start, range.end)
}

/// Parses the range out of a segment object path.
///
/// Returns `None` for paths that are not segment objects (scratch files,
/// foreign blobs).
#[must_use]
pub fn parse_segment_path(path: &str) -> Option<SegmentRange> {
    let file = path.rsplit('/').next()?;
    let stem = file.strip_suffix(".kv")?;
    let (start, end) = stem.split_once('-')?;
    Some(SegmentRange::new(start.parse().ok()?, end.parse().ok()?))
}

/// Serializes a store into segment bytes, metadata keys included.
#[must_use]
pub fn encode_segment(store: &Store) -> Bytes {
    let mut entries: Vec<(&str, Bytes)> = store.iter().map(|(k, v)| (k, v.clone())).collect();

    let name = Bytes::copy_from_slice(store.name().as_bytes());
    let hash = Bytes::copy_from_slice(store.module_hash().as_bytes());
    let start_block = Bytes::from(store.module_start_block().to_string());
    let value_type = Bytes::from_static(store.value_type().as_tag().as_bytes());
    let policy = Bytes::from_static(store.update_policy().as_tag().as_bytes());
    let prefixes = Bytes::from(
        store
            .deleted_prefixes()
            .join(&PREFIX_SEPARATOR.to_string()),
    );

    entries.push((META_NAME, name));
    entries.push((META_HASH, hash));
    entries.push((META_START_BLOCK, start_block));
    entries.push((META_VALUE_TYPE, value_type));
    entries.push((META_UPDATE_POLICY, policy));
    entries.push((META_DELETED_PREFIXES, prefixes));

    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut buf = BytesMut::new();
    buf.put_u32_le(u32::try_from(entries.len()).unwrap_or(u32::MAX));
    for (key, value) in entries {
        buf.put_u32_le(u32::try_from(key.len()).unwrap_or(u32::MAX));
        buf.put_slice(key.as_bytes());
        buf.put_u32_le(u32::try_from(value.len()).unwrap_or(u32::MAX));
        buf.put_slice(&value);
    }
    buf.freeze()
}

/// Deserializes segment bytes back into a store, stripping metadata keys.
///
/// # Errors
///
/// Fails when framing is truncated or a metadata key is missing or
/// carries an unknown tag.
pub fn decode_segment(path: &str, data: &[u8]) -> Result<Store> {
    let malformed = |message: &str| Error::MalformedSegment {
        path: path.to_string(),
        message: message.to_string(),
    };

    let mut buf = data;
    if buf.remaining() < 4 {
        return Err(malformed("missing entry count"));
    }
    let count = buf.get_u32_le();

    let mut kv: HashMap<String, Bytes> = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(malformed("truncated key length"));
        }
        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len {
            return Err(malformed("truncated key"));
        }
        let key = String::from_utf8(buf.copy_to_bytes(key_len).to_vec())
            .map_err(|_| malformed("key is not UTF-8"))?;

        if buf.remaining() < 4 {
            return Err(malformed("truncated value length"));
        }
        let value_len = buf.get_u32_le() as usize;
        if buf.remaining() < value_len {
            return Err(malformed("truncated value"));
        }
        kv.insert(key, buf.copy_to_bytes(value_len));
    }
    if buf.has_remaining() {
        return Err(malformed("trailing bytes after last entry"));
    }

    let mut take_meta = |key: &str| -> Result<String> {
        let raw = kv
            .remove(key)
            .ok_or_else(|| malformed(&format!("missing metadata key {key}")))?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| malformed(&format!("metadata key {key} is not UTF-8")))
    };

    let name = take_meta(META_NAME)?;
    let module_hash = take_meta(META_HASH)?;
    let start_block: u64 = take_meta(META_START_BLOCK)?
        .parse()
        .map_err(|_| malformed("non-numeric start block"))?;
    let value_type_tag = take_meta(META_VALUE_TYPE)?;
    let value_type = ValueType::from_tag(&value_type_tag)
        .ok_or_else(|| malformed(&format!("unknown value type {value_type_tag:?}")))?;
    let policy_tag = take_meta(META_UPDATE_POLICY)?;
    let update_policy = UpdatePolicy::from_tag(&policy_tag)
        .ok_or_else(|| malformed(&format!("unknown update policy {policy_tag:?}")))?;
    let prefixes_raw = take_meta(META_DELETED_PREFIXES)?;
    let deleted_prefixes: Vec<String> = if prefixes_raw.is_empty() {
        Vec::new()
    } else {
        prefixes_raw
            .split(PREFIX_SEPARATOR)
            .map(ToString::to_string)
            .collect()
    };

    Ok(Store::from_segment_parts(
        name,
        module_hash,
        start_block,
        update_policy,
        value_type,
        kv,
        deleted_prefixes,
    ))
}

/// Segment persistence over an object store.
///
/// Writes follow the write-then-rename discipline so that partially
/// written segments are never visible under their final path.
#[derive(Clone)]
pub struct SegmentStore {
    objects: Arc<dyn ObjectStore>,
}

impl SegmentStore {
    /// Creates a segment store over the given backend.
    #[must_use]
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// Persists a store's current state as the segment for `range`.
    ///
    /// # Errors
    ///
    /// Surfaces object-store failures.
    pub async fn save(&self, store: &Store, range: SegmentRange) -> Result<()> {
        let path = segment_path(store.module_hash(), range);
        let data = encode_segment(store);
        tracing::debug!(path = %path, size = data.len(), "saving store segment");
        self.objects.put_atomic(&path, data).await?;
        Ok(())
    }

    /// Loads one segment.
    ///
    /// # Errors
    ///
    /// Surfaces object-store failures and malformed segments.
    pub async fn load(&self, module_hash: &str, range: SegmentRange) -> Result<Store> {
        let path = segment_path(module_hash, range);
        let data = self.objects.get(&path).await?;
        decode_segment(&path, &data)
    }

    /// Lists persisted segment ranges for a module, ordered by start block.
    ///
    /// # Errors
    ///
    /// Surfaces object-store failures.
    pub async fn list(&self, module_hash: &str) -> Result<Vec<SegmentRange>> {
        let listed = self.objects.list(&format!("{module_hash}/")).await?;
        let mut ranges: Vec<SegmentRange> = listed
            .iter()
            .filter_map(|meta| parse_segment_path(&meta.path))
            .collect();
        ranges.sort();
        Ok(ranges)
    }

    /// Returns the exclusive end of contiguous coverage starting at
    /// `module_start`: the first block for which no persisted state
    /// exists. Equals `module_start` when nothing is persisted.
    ///
    /// # Errors
    ///
    /// Surfaces object-store failures.
    pub async fn last_contiguous_end(&self, module_hash: &str, module_start: u64) -> Result<u64> {
        let mut covered = module_start;
        for range in self.list(module_hash).await? {
            if range.start <= covered && range.end > covered {
                covered = range.end;
            }
        }
        Ok(covered)
    }

    /// Assembles the store state covering `[module_start, up_to)`.
    ///
    /// Segments starting at the module start are full dumps; the newest
    /// one not reaching past `up_to` becomes the base (full dumps
    /// supersede each other, they are never merged together). Segments
    /// starting later are partials and fold on top, oldest first, each
    /// picking up exactly where coverage ends.
    ///
    /// Returns `None` when `up_to == module_start` (nothing to cover).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CoverageGap`] when persisted segments leave a
    /// hole in the required range.
    pub async fn load_merged(
        &self,
        module_hash: &str,
        module_start: u64,
        up_to: u64,
    ) -> Result<Option<Store>> {
        if up_to <= module_start {
            return Ok(None);
        }

        let ranges = self.list(module_hash).await?;

        let base_range = ranges
            .iter()
            .filter(|r| r.start == module_start && r.end <= up_to)
            .max_by_key(|r| r.end)
            .copied();
        let (mut merged, mut covered) = match base_range {
            Some(range) => (Some(self.load(module_hash, range).await?), range.end),
            None => (None, module_start),
        };

        while covered < up_to {
            let Some(next) = ranges
                .iter()
                .find(|r| r.start == covered && r.end > covered && r.end <= up_to)
                .copied()
            else {
                return Err(Error::CoverageGap {
                    module_hash: module_hash.to_string(),
                    gap_at: covered,
                    from: module_start,
                    to: up_to,
                });
            };
            let segment = self.load(module_hash, next).await?;
            merged = Some(match merged {
                None => segment,
                Some(prev) => {
                    let mut latest = segment;
                    latest.merge(&prev)?;
                    latest
                }
            });
            covered = next.end;
        }

        Ok(merged)
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::MemoryStore;

    fn sample_store() -> Store {
        let mut store = Store::new(
            "totals",
            "modulehash.1",
            5,
            UpdatePolicy::Sum,
            ValueType::Int64,
        );
        store.set(1, "one", Bytes::from("1")).unwrap();
        store.set(2, "two", Bytes::from("2")).unwrap();
        store.flush(9);
        store
    }

    #[test]
    fn path_round_trip() {
        let range = SegmentRange::new(5, 100);
        let path = segment_path("abc123", range);
        assert_eq!(path, "abc123/5-100.kv");
        assert_eq!(parse_segment_path(&path), Some(range));
    }

    #[test]
    fn scratch_paths_are_not_segments() {
        assert_eq!(parse_segment_path("abc/5-100.kv.write"), None);
        assert_eq!(parse_segment_path("abc/manifest.json"), None);
    }

    #[test]
    fn encode_decode_round_trip_strips_metadata() {
        let store = sample_store();
        let data = encode_segment(&store);
        let decoded = decode_segment("modulehash.1/5-10.kv", &data).unwrap();

        assert_eq!(decoded.name(), "totals");
        assert_eq!(decoded.module_hash(), "modulehash.1");
        assert_eq!(decoded.module_start_block(), 5);
        assert_eq!(decoded.update_policy(), UpdatePolicy::Sum);
        assert_eq!(decoded.value_type(), ValueType::Int64);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|(k, _)| !k.starts_with("__!__")));
        assert_eq!(decoded.get_last("one"), Some(Bytes::from("1")));
    }

    #[test]
    fn deleted_prefixes_survive_persistence() {
        let mut store = sample_store();
        store.set(3, "p:x", Bytes::from("9")).unwrap();
        store.delete_prefix(4, "p:").unwrap();

        let decoded = decode_segment("x", &encode_segment(&store)).unwrap();
        assert_eq!(decoded.deleted_prefixes(), &["p:".to_string()]);
    }

    #[test]
    fn truncated_segment_is_rejected() {
        let data = encode_segment(&sample_store());
        let err = decode_segment("p", &data[..data.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedSegment { .. }));
    }

    #[test]
    fn missing_metadata_is_rejected() {
        // An empty map has no metadata keys at all.
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);
        let err = decode_segment("p", &buf).unwrap_err();
        assert!(err.to_string().contains("missing metadata"));
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        let store = sample_store();
        segments.save(&store, SegmentRange::new(5, 10)).await.unwrap();

        let loaded = segments
            .load("modulehash.1", SegmentRange::new(5, 10))
            .await
            .unwrap();
        assert_eq!(loaded.get_last("two"), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn list_orders_numerically_not_lexically() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        let store = sample_store();
        for (start, end) in [(100, 200), (5, 10), (10, 100)] {
            segments
                .save(&store, SegmentRange::new(start, end))
                .await
                .unwrap();
        }

        let ranges = segments.list("modulehash.1").await.unwrap();
        let starts: Vec<u64> = ranges.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![5, 10, 100]);
    }

    #[tokio::test]
    async fn last_contiguous_end_stops_at_gap() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        let store = sample_store();
        segments.save(&store, SegmentRange::new(5, 10)).await.unwrap();
        segments.save(&store, SegmentRange::new(10, 20)).await.unwrap();
        segments.save(&store, SegmentRange::new(30, 40)).await.unwrap();

        let end = segments.last_contiguous_end("modulehash.1", 5).await.unwrap();
        assert_eq!(end, 20);
    }

    #[tokio::test]
    async fn last_contiguous_end_with_no_segments_is_module_start() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        let end = segments.last_contiguous_end("nothing", 7).await.unwrap();
        assert_eq!(end, 7);
    }

    #[tokio::test]
    async fn load_merged_folds_adjacent_segments() {
        let objects = Arc::new(MemoryStore::new());
        let segments = SegmentStore::new(objects);

        let mut first = Store::new("totals", "h", 0, UpdatePolicy::Sum, ValueType::Int64);
        first.set(1, "one", Bytes::from("1")).unwrap();
        first.flush(9);
        segments.save(&first, SegmentRange::new(0, 10)).await.unwrap();

        let mut second = Store::new("totals", "h", 0, UpdatePolicy::Sum, ValueType::Int64);
        second.set(1, "one", Bytes::from("2")).unwrap();
        second.set(2, "two", Bytes::from("5")).unwrap();
        second.flush(19);
        segments.save(&second, SegmentRange::new(10, 20)).await.unwrap();

        let merged = segments.load_merged("h", 0, 20).await.unwrap().unwrap();
        assert_eq!(merged.get_last("one"), Some(Bytes::from("3")));
        assert_eq!(merged.get_last("two"), Some(Bytes::from("5")));
    }

    #[tokio::test]
    async fn load_merged_full_dumps_supersede_instead_of_merging() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));

        // Two overlapping full snapshots of a sum store: the newer one
        // must be taken as-is, never added onto the older one.
        let mut early = Store::new("totals", "h", 0, UpdatePolicy::Sum, ValueType::Int64);
        early.set(1, "one", Bytes::from("1")).unwrap();
        early.flush(1);
        segments.save(&early, SegmentRange::new(0, 2)).await.unwrap();

        let mut later = Store::new("totals", "h", 0, UpdatePolicy::Sum, ValueType::Int64);
        later.set(1, "one", Bytes::from("3")).unwrap();
        later.flush(3);
        segments.save(&later, SegmentRange::new(0, 4)).await.unwrap();

        let mut partial = Store::new("totals", "h", 0, UpdatePolicy::Sum, ValueType::Int64);
        partial.set(1, "one", Bytes::from("10")).unwrap();
        partial.flush(5);
        segments.save(&partial, SegmentRange::new(4, 6)).await.unwrap();

        let merged = segments.load_merged("h", 0, 6).await.unwrap().unwrap();
        assert_eq!(merged.get_last("one"), Some(Bytes::from("13")));
    }

    #[tokio::test]
    async fn load_merged_detects_gaps() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        let store = sample_store();
        segments.save(&store, SegmentRange::new(5, 10)).await.unwrap();

        let err = segments.load_merged("modulehash.1", 5, 20).await.unwrap_err();
        assert!(matches!(err, Error::CoverageGap { gap_at: 10, .. }));
    }

    #[tokio::test]
    async fn load_merged_of_empty_range_is_none() {
        let segments = SegmentStore::new(Arc::new(MemoryStore::new()));
        assert!(segments.load_merged("h", 5, 5).await.unwrap().is_none());
    }
}
