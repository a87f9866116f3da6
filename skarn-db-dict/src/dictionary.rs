//! The persistent string dictionary.
//!
//! Maps opaque strings to dense `i32` ids and back. The forward direction is
//! an open-addressed, power-of-two hash index over ids; the reverse
//! direction reads the append-only storage directly. One readers/writer lock
//! guards all mutable state; scans fan out to worker threads while their
//! caller holds the lock exclusively.
//!
//! Ids are assigned in insertion order, never reused, and survive restarts:
//! recovery replays the offsets/payload files and reinstalls every id at its
//! original value.

use crate::config::DictOptions;
use crate::encoding::DictCode;
use crate::error::{DictError, Result};
use crate::hash::{rk_hash, round_up_p2};
use crate::remote::{DictRef, DictionaryClient};
use crate::scan::ScanCaches;
use crate::storage::{DictStorage, StorageEntry, RECORD_SIZE};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Id stored in empty index slots.
pub const INVALID_STR_ID: i32 = -1;

/// The `i32` id encoding SQL NULL (empty-string inputs).
pub const NULL_STR_ID: i32 = i32::MIN;

/// Maximum encodable string length in bytes. Strictly below the on-disk
/// canary value `0xFFFF`.
pub const MAX_STRLEN: usize = (1 << 15) - 1;

/// Maximum number of strings one dictionary can hold.
pub const MAX_STRCOUNT: usize = (1 << 31) - 1;

/// Entry threshold above which `copy_strings` fans out to worker threads.
const COPY_STRINGS_PARALLEL_THRESHOLD: usize = 10_000;

enum Mode {
    Local(RwLock<DictInner>),
    Remote {
        /// Interactive calls, transport timeout applies.
        client: Arc<dyn DictionaryClient>,
        /// Bulk ingestion, no timeout.
        client_no_timeout: Arc<dyn DictionaryClient>,
    },
}

/// All mutable dictionary state, guarded by one `RwLock`.
pub(crate) struct DictInner {
    pub(crate) storage: DictStorage,
    /// Open-addressed index: bucket -> string id, `INVALID_STR_ID` if empty.
    /// Length is always a power of two and greater than `2 * str_count`.
    pub(crate) str_ids: Vec<i32>,
    /// Materialized per-id hashes, when enabled. Length tracks `str_ids`.
    pub(crate) rk_hashes: Option<Vec<u32>>,
    pub(crate) str_count: usize,
    pub(crate) caches: ScanCaches,
}

pub struct StringDictionary {
    mode: Mode,
}

impl StringDictionary {
    /// Open a dictionary backed by the `DictPayload`/`DictOffsets` pair in
    /// `folder`. With `options.recover`, existing contents are preserved and
    /// the index is rebuilt from them; otherwise the files are truncated.
    ///
    /// With `options.temp`, the folder is ignored and the dictionary lives
    /// on the heap (see [`StringDictionary::temp`]).
    pub fn open(folder: impl AsRef<Path>, options: DictOptions) -> Result<Self> {
        options.validate()?;
        if options.temp {
            return Ok(Self::temp_inner(&options));
        }
        let storage = DictStorage::open(folder.as_ref(), options.recover)?;
        let mut inner = DictInner::new(storage, &options);
        if options.recover && inner.storage.recovered_offsets_len() > 0 {
            inner.recover_from_storage()?;
        }
        Ok(Self {
            mode: Mode::Local(RwLock::new(inner)),
        })
    }

    /// Heap-backed dictionary for transient query execution. Never touches
    /// disk; dropped with the last reference.
    pub fn temp(options: DictOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::temp_inner(&options))
    }

    fn temp_inner(options: &DictOptions) -> Self {
        let inner = DictInner::new(DictStorage::temp(), options);
        Self {
            mode: Mode::Local(RwLock::new(inner)),
        }
    }

    /// A dictionary whose state lives on another node. Every operation
    /// delegates to the clients; `client_no_timeout` serves bulk ingestion.
    pub fn open_remote(
        client: Arc<dyn DictionaryClient>,
        client_no_timeout: Arc<dyn DictionaryClient>,
    ) -> Self {
        Self {
            mode: Mode::Remote {
                client,
                client_no_timeout,
            },
        }
    }

    pub(crate) fn local(&self) -> Option<&RwLock<DictInner>> {
        match &self.mode {
            Mode::Local(lock) => Some(lock),
            Mode::Remote { .. } => None,
        }
    }

    pub(crate) fn remote_client(&self) -> Option<&Arc<dyn DictionaryClient>> {
        match &self.mode {
            Mode::Local(_) => None,
            Mode::Remote { client, .. } => Some(client),
        }
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Return the id of `s`, inserting it if absent. The empty string is
    /// never stored; it encodes as [`NULL_STR_ID`].
    pub fn get_or_add(&self, s: &str) -> Result<i32> {
        if s.is_empty() {
            return Ok(NULL_STR_ID);
        }
        if let Mode::Remote { client, .. } = &self.mode {
            let batch = [s.to_string()];
            let ids = client.get_or_add_bulk(&batch)?;
            debug_assert_eq!(ids.len(), 1);
            return ids
                .first()
                .copied()
                .ok_or_else(|| DictError::remote("empty bulk response"));
        }
        check_strlen(s)?;
        let bytes = s.as_bytes();
        let hash = rk_hash(bytes);
        let lock = self.local().expect("local mode");

        // Fast path: shared lock, probe only.
        {
            let inner = lock.read();
            let bucket = inner.compute_bucket(hash, bytes);
            let id = inner.str_ids[bucket];
            if id != INVALID_STR_ID {
                return Ok(id);
            }
        }

        // Slow path: exclusive lock, re-probe (the table may have changed
        // between the locks), insert if still absent.
        let mut inner = lock.write();
        let bucket = inner.compute_bucket(hash, bytes);
        let existing = inner.str_ids[bucket];
        if existing != INVALID_STR_ID {
            return Ok(existing);
        }
        let id = inner.insert_new(bytes, hash, bucket)?;
        inner.caches.invalidate();
        Ok(id)
    }

    /// Bulk get-or-add, writing `T`-width codes into `out`.
    ///
    /// Per string: empty encodes as `T`'s null sentinel; an existing entry
    /// encodes as its id; a novel entry is added unless the dictionary has
    /// already reached the width's id limit, in which case the code is the
    /// null sentinel and an error is logged (the entry is *not* added).
    /// The whole batch runs under one exclusive lock; scan caches are
    /// invalidated once at the end.
    pub fn get_or_add_bulk<T: DictCode>(&self, strings: &[String], out: &mut [T]) -> Result<()> {
        assert_eq!(
            strings.len(),
            out.len(),
            "output buffer length must match input batch"
        );
        if let Mode::Remote {
            client_no_timeout, ..
        } = &self.mode
        {
            return remote_bulk::<T>(client_no_timeout, strings, out);
        }
        let lock = self.local().expect("local mode");
        let mut inner = lock.write();
        for (s, slot) in strings.iter().zip(out.iter_mut()) {
            if s.is_empty() {
                *slot = T::NULL_SENTINEL;
                continue;
            }
            check_strlen(s)?;
            let bytes = s.as_bytes();
            let hash = rk_hash(bytes);
            let bucket = inner.compute_bucket(hash, bytes);
            let existing = inner.str_ids[bucket];
            if existing != INVALID_STR_ID {
                *slot = T::from_id(existing);
                continue;
            }
            if inner.str_count >= T::max_id_count() {
                log_encoding_error::<T>(s);
                *slot = T::NULL_SENTINEL;
                continue;
            }
            let id = inner.insert_new(bytes, hash, bucket)?;
            *slot = T::from_id(id);
        }
        inner.caches.invalidate();
        Ok(())
    }

    /// Bulk get-or-add for array columns: one id vector per input row.
    pub fn get_or_add_bulk_array<T: DictCode>(
        &self,
        string_arrays: &[Vec<String>],
    ) -> Result<Vec<Vec<T>>> {
        string_arrays
            .iter()
            .map(|strings| {
                let mut codes = vec![T::NULL_SENTINEL; strings.len()];
                self.get_or_add_bulk(strings, &mut codes)?;
                Ok(codes)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Lookup without insert. [`INVALID_STR_ID`] when absent.
    pub fn get_id_of_string(&self, s: &str) -> Result<i32> {
        if let Mode::Remote { client, .. } = &self.mode {
            return client.get(s);
        }
        let lock = self.local().expect("local mode");
        let inner = lock.read();
        let bytes = s.as_bytes();
        let bucket = inner.compute_bucket(rk_hash(bytes), bytes);
        Ok(inner.str_ids[bucket])
    }

    /// Fetch the string stored at `id`.
    ///
    /// Panics if `id` is outside `[0, str_count)` — passing an id that was
    /// never handed out is a caller bug.
    pub fn get_string(&self, id: i32) -> Result<String> {
        if let Mode::Remote { client, .. } = &self.mode {
            return client.get_string(id);
        }
        let lock = self.local().expect("local mode");
        let inner = lock.read();
        inner.check_id(id);
        let bytes = inner.string_at(id as usize);
        // SAFETY: every stored payload came in as &str; recovery replays the
        // same bytes. debug_assert catches on-disk corruption in dev builds.
        debug_assert!(std::str::from_utf8(bytes).is_ok());
        Ok(unsafe { std::str::from_utf8_unchecked(bytes) }.to_string())
    }

    /// Borrow the raw payload bytes of `id` for the duration of `f`.
    ///
    /// The borrow is confined to the closure so it can neither outlive the
    /// dictionary nor cross an index resize or storage grow. Not available
    /// on remote dictionaries.
    pub fn with_string_bytes<R>(&self, id: i32, f: impl FnOnce(&[u8]) -> R) -> R {
        let lock = self
            .local()
            .expect("with_string_bytes is not available on a remote dictionary");
        let inner = lock.read();
        inner.check_id(id);
        f(inner.string_at(id as usize))
    }

    /// Number of stored strings.
    pub fn storage_entry_count(&self) -> Result<usize> {
        if let Mode::Remote { client, .. } = &self.mode {
            return client.storage_entry_count();
        }
        let lock = self.local().expect("local mode");
        Ok(lock.read().str_count)
    }

    /// Snapshot of every stored string, in id order. Cached until the next
    /// insert; built with worker threads for large dictionaries.
    pub fn copy_strings(&self) -> Result<Arc<Vec<String>>> {
        if self.remote_client().is_some() {
            return Err(DictError::RemoteUnsupported("copy_strings"));
        }
        let lock = self.local().expect("local mode");
        let mut inner = lock.write();
        if let Some(snapshot) = &inner.caches.strings_snapshot {
            return Ok(Arc::clone(snapshot));
        }
        let count = inner.str_count;
        let copy_one = |inner: &DictInner, id: usize| {
            let bytes = inner.string_at(id);
            debug_assert!(std::str::from_utf8(bytes).is_ok());
            unsafe { std::str::from_utf8_unchecked(bytes) }.to_string()
        };
        let strings: Vec<String> = if count > COPY_STRINGS_PARALLEL_THRESHOLD {
            use rayon::prelude::*;
            let shared = &*inner;
            (0..count)
                .into_par_iter()
                .map(|id| copy_one(shared, id))
                .collect()
        } else {
            (0..count).map(|id| copy_one(&inner, id)).collect()
        };
        let snapshot = Arc::new(strings);
        inner.caches.strings_snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Flush both mappings and both file descriptors. True only if every
    /// sync succeeded. Remote dictionaries forward the call and report
    /// `false` on transport failure.
    ///
    /// Panics on a temp dictionary — there is nothing to sync.
    pub fn checkpoint(&self) -> bool {
        if let Mode::Remote { client, .. } = &self.mode {
            return client.checkpoint().is_ok();
        }
        let lock = self.local().expect("local mode");
        let inner = lock.read();
        assert!(
            !inner.storage.is_temp(),
            "checkpoint on a temp dictionary"
        );
        inner.storage.checkpoint()
    }
}

/// Translate ids minted by `source` into ids of `dest`, inserting missing
/// strings. [`NULL_STR_ID`] passes through as the empty string (which `dest`
/// encodes back to the sentinel); other negative ids are rejected.
pub fn populate_string_ids(
    dest: &StringDictionary,
    source: &StringDictionary,
    source_ids: &[i32],
) -> Result<Vec<i32>> {
    let mut strings = Vec::with_capacity(source_ids.len());
    for &source_id in source_ids {
        if source_id == NULL_STR_ID {
            strings.push(String::new());
        } else if source_id < 0 {
            return Err(DictError::InvalidStringId(source_id));
        } else {
            strings.push(source.get_string(source_id)?);
        }
    }
    let mut ids = vec![NULL_STR_ID; strings.len()];
    dest.get_or_add_bulk::<i32>(&strings, &mut ids)?;
    Ok(ids)
}

/// Array-column variant of [`populate_string_ids`]. Rows fan out to worker
/// threads when there are enough of them to matter.
pub fn populate_string_array_ids(
    dest: &StringDictionary,
    source: &StringDictionary,
    source_array_ids: &[Vec<i32>],
) -> Result<Vec<Vec<i32>>> {
    let workers = rayon::current_num_threads().max(1);
    if source_array_ids.len() / workers > 10 {
        use rayon::prelude::*;
        source_array_ids
            .par_iter()
            .map(|ids| populate_string_ids(dest, source, ids))
            .collect()
    } else {
        source_array_ids
            .iter()
            .map(|ids| populate_string_ids(dest, source, ids))
            .collect()
    }
}

/// Translate ids between two dictionaries living on a remote server.
pub fn translate_string_ids(
    client: &dyn DictionaryClient,
    dest: DictRef,
    source_ids: &[i32],
    source: DictRef,
    dest_generation: i32,
) -> Result<Vec<i32>> {
    client.translate_string_ids(dest, source_ids, source, dest_generation)
}

fn check_strlen(s: &str) -> Result<()> {
    if s.len() > MAX_STRLEN {
        return Err(DictError::StringTooLong {
            len: s.len(),
            max: MAX_STRLEN,
        });
    }
    Ok(())
}

fn log_encoding_error<T: DictCode>(s: &str) {
    tracing::error!(
        string = %s,
        bits = T::BITS,
        "could not encode string: the encoded value does not fit, storing NULL instead"
    );
}

fn remote_bulk<T: DictCode>(
    client: &Arc<dyn DictionaryClient>,
    strings: &[String],
    out: &mut [T],
) -> Result<()> {
    let ids = client.get_or_add_bulk(strings)?;
    if ids.len() != out.len() {
        return Err(DictError::remote(format!(
            "bulk response length {} does not match batch length {}",
            ids.len(),
            out.len()
        )));
    }
    for ((id, slot), s) in ids.iter().zip(out.iter_mut()).zip(strings) {
        let too_wide = *id >= 0 && *id as usize >= T::max_id_count();
        if too_wide {
            log_encoding_error::<T>(s);
            *slot = T::NULL_SENTINEL;
        } else if *id == NULL_STR_ID {
            *slot = T::NULL_SENTINEL;
        } else {
            *slot = T::from_id(*id);
        }
    }
    Ok(())
}

// ============================================================================
// DictInner: probe / insert / resize / recovery
// ============================================================================

impl DictInner {
    fn new(storage: DictStorage, options: &DictOptions) -> Self {
        Self {
            storage,
            str_ids: vec![INVALID_STR_ID; options.initial_capacity],
            rk_hashes: options
                .materialize_hashes
                .then(|| vec![0u32; options.initial_capacity]),
            str_count: 0,
            caches: ScanCaches::default(),
        }
    }

    #[inline]
    pub(crate) fn check_id(&self, id: i32) {
        assert!(
            id >= 0 && (id as usize) < self.str_count,
            "string id {id} out of range (count {})",
            self.str_count
        );
    }

    /// Payload bytes of a live id. A canary here means the offsets file and
    /// the index disagree — unrecoverable.
    #[inline]
    pub(crate) fn string_at(&self, id: usize) -> &[u8] {
        match self.storage.entry(id) {
            StorageEntry::Bytes(bytes) => bytes,
            StorageEntry::Canary => panic!("canary record for live string id {id}"),
        }
    }

    /// Probe for `s`: first bucket that is empty or holds an equal string.
    /// With materialized hashes, a hash mismatch skips the payload fetch.
    pub(crate) fn compute_bucket(&self, hash: u32, s: &[u8]) -> usize {
        let mask = self.str_ids.len() - 1;
        let mut bucket = hash as usize & mask;
        loop {
            let id = self.str_ids[bucket];
            if id == INVALID_STR_ID {
                return bucket;
            }
            let candidate = match &self.rk_hashes {
                Some(hashes) => hashes[id as usize] == hash,
                None => true,
            };
            if candidate && self.string_at(id as usize) == s {
                return bucket;
            }
            bucket = (bucket + 1) & mask;
        }
    }

    /// Probe for the first empty bucket. Only valid when the caller knows
    /// the key is not in `table` (recovery, resize).
    fn compute_unique_bucket(hash: u32, table: &[i32]) -> usize {
        let mask = table.len() - 1;
        let mut bucket = hash as usize & mask;
        while table[bucket] != INVALID_STR_ID {
            bucket = (bucket + 1) & mask;
        }
        bucket
    }

    /// Installing one more id would push the index past 50% full.
    #[inline]
    fn fill_rate_is_high(&self) -> bool {
        self.str_ids.len() < (self.str_count + 1) * 2
    }

    /// Append `bytes` to storage and install its new id at `bucket`
    /// (re-derived if the table had to grow). The caller has verified the
    /// bucket is empty and the width/count limits hold.
    fn insert_new(&mut self, bytes: &[u8], hash: u32, bucket: usize) -> Result<i32> {
        if self.str_count >= MAX_STRCOUNT {
            tracing::error!(
                count = self.str_count,
                path = ?self.storage.offsets_path(),
                "maximum dictionary entry count reached for this column"
            );
            return Err(DictError::TooManyStrings(MAX_STRCOUNT));
        }
        let mut bucket = bucket;
        if self.fill_rate_is_high() {
            self.increase_capacity();
            bucket = self.compute_bucket(hash, bytes);
        }
        self.storage.append(bytes, self.str_count)?;
        let id = self.str_count as i32;
        self.str_ids[bucket] = id;
        if let Some(hashes) = &mut self.rk_hashes {
            hashes[self.str_count] = hash;
        }
        self.str_count += 1;
        Ok(id)
    }

    /// Double the index. With materialized hashes, live ids re-bucket from
    /// their stored hash; otherwise each string is re-read and re-hashed.
    fn increase_capacity(&mut self) {
        let new_len = self.str_ids.len() * 2;
        let mut new_ids = vec![INVALID_STR_ID; new_len];
        match &self.rk_hashes {
            Some(hashes) => {
                for &id in &self.str_ids {
                    if id != INVALID_STR_ID {
                        let bucket = Self::compute_unique_bucket(hashes[id as usize], &new_ids);
                        new_ids[bucket] = id;
                    }
                }
            }
            None => {
                for id in 0..self.str_count {
                    let hash = rk_hash(self.string_at(id));
                    let bucket = Self::compute_unique_bucket(hash, &new_ids);
                    new_ids[bucket] = id as i32;
                }
            }
        }
        self.str_ids = new_ids;
        if let Some(hashes) = &mut self.rk_hashes {
            hashes.resize(new_len, 0);
        }
    }

    /// Rebuild the index from the offsets/payload files. Payload reads fan
    /// out to worker threads; installation happens on this thread in id
    /// order, so recovered ids equal the ids the writing session assigned.
    fn recover_from_storage(&mut self) -> Result<()> {
        let started = Instant::now();
        let offsets_len = self.storage.recovered_offsets_len() as usize;
        if offsets_len % RECORD_SIZE != 0 {
            tracing::warn!(
                path = ?self.storage.offsets_path(),
                len = offsets_len,
                "offsets file length is not a whole number of records; file is truncated"
            );
        }
        // Upper bound: pre-grown canary records count here too. Workers stop
        // at the first canary they see.
        let upper_count = offsets_len / RECORD_SIZE;
        let capacity = round_up_p2(upper_count as u64 * 2 + 1) as usize;
        self.str_ids = vec![INVALID_STR_ID; capacity];
        if self.rk_hashes.is_some() {
            self.rk_hashes = Some(vec![0u32; capacity]);
        }

        let workers = rayon::current_num_threads().max(1);
        let items_per_thread = (upper_count / workers + 1).clamp(2_000, 200_000);
        let chunks: Vec<(usize, usize)> = (0..upper_count)
            .step_by(items_per_thread)
            .map(|start| (start, (start + items_per_thread).min(upper_count)))
            .collect();

        let storage = &self.storage;
        let hash_lists: Vec<Vec<(u32, usize)>> = {
            use rayon::prelude::*;
            chunks
                .par_iter()
                .map(|&(start, end)| {
                    let mut hashes = Vec::new();
                    for id in start..end {
                        match storage.entry(id) {
                            StorageEntry::Canary => break,
                            StorageEntry::Bytes(bytes) => {
                                hashes.push((rk_hash(bytes), bytes.len()));
                            }
                        }
                    }
                    hashes
                })
                .collect()
        };

        self.str_count = 0;
        for hashes in hash_lists {
            for (hash, size) in hashes {
                let bucket = Self::compute_unique_bucket(hash, &self.str_ids);
                self.storage.advance_payload_off(size as u64);
                self.str_ids[bucket] = self.str_count as i32;
                if let Some(materialized) = &mut self.rk_hashes {
                    materialized[self.str_count] = hash;
                }
                self.str_count += 1;
            }
        }
        tracing::info!(
            entries = self.str_count,
            index_slots = self.str_ids.len(),
            payload_bytes = self.storage.payload_off(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "string dictionary recovered"
        );
        Ok(())
    }
}
