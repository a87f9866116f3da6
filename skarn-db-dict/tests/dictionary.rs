//! End-to-end dictionary tests: persistence and recovery, bulk width
//! semantics, scans over recovered state, cross-dictionary population, and
//! remote delegation.

use skarn_db_dict::{
    populate_string_ids, DictError, DictOptions, DictRef, DictionaryClient, Result,
    StringDictionary, INVALID_STR_ID, NULL_STR_ID,
};
use std::sync::Arc;

fn open_at(dir: &std::path::Path, recover: bool) -> StringDictionary {
    StringDictionary::open(dir, DictOptions::new().recover(recover)).unwrap()
}

// ----------------------------------------------------------------------------
// Persistence + recovery
// ----------------------------------------------------------------------------

#[test]
fn test_checkpoint_close_reopen_recovers_mapping() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dict = open_at(dir.path(), false);
        for s in ["foo", "bar", "baz"] {
            dict.get_or_add(s).unwrap();
        }
        assert!(dict.checkpoint());
    }
    let dict = open_at(dir.path(), true);
    assert_eq!(dict.storage_entry_count().unwrap(), 3);
    assert_eq!(dict.get_string(1).unwrap(), "bar");
    assert_eq!(dict.get_id_of_string("foo").unwrap(), 0);
    assert_eq!(dict.get_id_of_string("baz").unwrap(), 2);
    // Recovered dictionaries keep accepting inserts where they left off.
    assert_eq!(dict.get_or_add("qux").unwrap(), 3);
}

#[test]
fn test_recovery_preserves_large_id_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let strings: Vec<String> = (0..5_000).map(|i| format!("value_{i:05}")).collect();
    {
        let dict = open_at(dir.path(), false);
        let mut codes = vec![0i32; strings.len()];
        dict.get_or_add_bulk(&strings, &mut codes).unwrap();
        assert!(dict.checkpoint());
    }
    let dict = StringDictionary::open(
        dir.path(),
        DictOptions::new().recover(true).materialize_hashes(true),
    )
    .unwrap();
    assert_eq!(dict.storage_entry_count().unwrap(), strings.len());
    for probe in [0usize, 1, 999, 2_500, 4_999] {
        assert_eq!(dict.get_string(probe as i32).unwrap(), strings[probe]);
        assert_eq!(
            dict.get_id_of_string(&strings[probe]).unwrap(),
            probe as i32
        );
    }
}

#[test]
fn test_open_without_recover_truncates() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dict = open_at(dir.path(), false);
        dict.get_or_add("stale").unwrap();
        assert!(dict.checkpoint());
    }
    let dict = open_at(dir.path(), false);
    assert_eq!(dict.storage_entry_count().unwrap(), 0);
    assert_eq!(dict.get_id_of_string("stale").unwrap(), INVALID_STR_ID);
}

#[test]
fn test_scans_work_on_recovered_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dict = open_at(dir.path(), false);
        for s in ["ab", "ac", "b", "bb"] {
            dict.get_or_add(s).unwrap();
        }
        assert!(dict.checkpoint());
    }
    let dict = open_at(dir.path(), true);
    assert_eq!(dict.get_compare("b", "=", 4).unwrap(), vec![2]);
    assert_eq!(dict.get_compare("b", "<", 4).unwrap(), vec![0, 1]);
    assert_eq!(dict.get_compare("b", ">=", 4).unwrap(), vec![2, 3]);
    let mut like = dict.get_like("a%", false, false, '\\', 4).unwrap();
    like.sort_unstable();
    assert_eq!(like, vec![0, 1]);
}

#[test]
fn test_open_missing_folder_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no_such_subdir");
    match StringDictionary::open(&missing, DictOptions::new()) {
        Err(DictError::PayloadUnavailable { path, .. }) => {
            assert!(path.starts_with(&missing));
        }
        Err(e) => panic!("expected PayloadUnavailable, got {e}"),
        Ok(_) => panic!("open against a missing folder should fail"),
    }
}

// ----------------------------------------------------------------------------
// Bulk width semantics
// ----------------------------------------------------------------------------

#[test]
fn test_bulk_u8_empty_and_codes() {
    let dict = StringDictionary::temp(DictOptions::new()).unwrap();
    let batch = vec!["x".to_string(), String::new(), "y".to_string()];
    let mut codes = vec![0u8; batch.len()];
    dict.get_or_add_bulk(&batch, &mut codes).unwrap();
    assert_eq!(codes, vec![0, u8::MAX, 1]);
    assert_eq!(dict.storage_entry_count().unwrap(), 2);
}

#[test]
fn test_bulk_u8_overflow_writes_null() {
    let dict = StringDictionary::temp(DictOptions::new()).unwrap();
    let batch: Vec<String> = (0..256).map(|i| format!("s{i}")).collect();
    let mut codes = vec![0u8; batch.len()];
    dict.get_or_add_bulk(&batch, &mut codes).unwrap();
    // 255 real codes, one overflow null; the overflowing string is not added.
    assert_eq!(dict.storage_entry_count().unwrap(), 255);
    let nulls = codes.iter().filter(|&&c| c == u8::MAX).count();
    assert_eq!(nulls, 1);
    assert_eq!(codes[255], u8::MAX);
    assert_eq!(dict.get_id_of_string("s255").unwrap(), INVALID_STR_ID);
    // Overflowed strings keep resolving to existing entries on later calls.
    let mut again = vec![0u8; 1];
    dict.get_or_add_bulk(&["s7".to_string()], &mut again).unwrap();
    assert_eq!(again[0], 7);
}

#[test]
fn test_bulk_u16_and_i32_round_trip() {
    let dict = StringDictionary::temp(DictOptions::new()).unwrap();
    let batch: Vec<String> = (0..1_000).map(|i| format!("v{i}")).collect();
    let mut wide = vec![0i32; batch.len()];
    dict.get_or_add_bulk(&batch, &mut wide).unwrap();
    let mut narrow = vec![0u16; batch.len()];
    dict.get_or_add_bulk(&batch, &mut narrow).unwrap();
    for (i, (&w, &n)) in wide.iter().zip(&narrow).enumerate() {
        assert_eq!(w, i as i32);
        assert_eq!(n as i32, w);
    }
    assert_eq!(dict.storage_entry_count().unwrap(), 1_000);
}

#[test]
fn test_bulk_array_rows() {
    let dict = StringDictionary::temp(DictOptions::new()).unwrap();
    let rows = vec![
        vec!["red".to_string(), "green".to_string()],
        vec![String::new()],
        vec!["green".to_string(), "blue".to_string()],
    ];
    let ids: Vec<Vec<i32>> = dict.get_or_add_bulk_array(&rows).unwrap();
    assert_eq!(ids[0], vec![0, 1]);
    assert_eq!(ids[1], vec![NULL_STR_ID]);
    assert_eq!(ids[2], vec![1, 2]);
}

// ----------------------------------------------------------------------------
// Cross-dictionary population
// ----------------------------------------------------------------------------

#[test]
fn test_populate_string_ids_translates_and_keeps_nulls() {
    let source = StringDictionary::temp(DictOptions::new()).unwrap();
    for s in ["alpha", "beta", "gamma"] {
        source.get_or_add(s).unwrap();
    }
    let dest = StringDictionary::temp(DictOptions::new()).unwrap();
    dest.get_or_add("gamma").unwrap(); // dest id 0

    let translated = populate_string_ids(&dest, &source, &[2, NULL_STR_ID, 0]).unwrap();
    assert_eq!(translated[0], 0); // gamma already present in dest
    assert_eq!(translated[1], NULL_STR_ID);
    assert_eq!(dest.get_string(translated[2]).unwrap(), "alpha");
}

#[test]
fn test_populate_rejects_negative_non_null_ids() {
    let source = StringDictionary::temp(DictOptions::new()).unwrap();
    let dest = StringDictionary::temp(DictOptions::new()).unwrap();
    assert!(populate_string_ids(&dest, &source, &[-7]).is_err());
}

// ----------------------------------------------------------------------------
// Scan cache bound
// ----------------------------------------------------------------------------

#[test]
fn test_like_cache_bound_keeps_results_correct() {
    let dict = StringDictionary::temp(DictOptions::new()).unwrap();
    for s in ["pattern_a", "pattern_b", "other"] {
        dict.get_or_add(s).unwrap();
    }
    // Push well past the cache entry bound with distinct patterns.
    for i in 0..1_100 {
        let pattern = format!("nomatch_{i}%");
        assert!(dict.get_like(&pattern, false, false, '\\', 3).unwrap().is_empty());
    }
    let mut ids = dict.get_like("pattern%", false, false, '\\', 3).unwrap();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1]);
}

// ----------------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------------

#[test]
fn test_concurrent_inserts_serialize_to_consistent_ids() {
    let dict = Arc::new(StringDictionary::temp(DictOptions::new()).unwrap());
    // Threads insert overlapping sets; the lock serializes id assignment, so
    // every thread must observe the same id for the same string.
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let dict = Arc::clone(&dict);
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                for i in 0..500 {
                    // Half shared across threads, half thread-private.
                    let s = if i % 2 == 0 {
                        format!("shared_{i}")
                    } else {
                        format!("private_{t}_{i}")
                    };
                    let id = dict.get_or_add(&s).unwrap();
                    seen.push((s, id));
                }
                seen
            })
        })
        .collect();

    let mut all: Vec<(String, i32)> = Vec::new();
    for handle in threads {
        all.extend(handle.join().unwrap());
    }
    // 250 shared strings + 8 * 250 private ones.
    let count = dict.storage_entry_count().unwrap();
    assert_eq!(count, 250 + 8 * 250);
    for (s, id) in all {
        assert_eq!(dict.get_id_of_string(&s).unwrap(), id);
        assert_eq!(dict.get_string(id).unwrap(), s);
    }
}

// ----------------------------------------------------------------------------
// Remote delegation
// ----------------------------------------------------------------------------

/// In-process stand-in for a dictionary server: a temp dictionary behind the
/// client interface, with a switch to simulate transport failure.
struct LoopbackClient {
    backing: StringDictionary,
    fail: std::sync::atomic::AtomicBool,
}

impl LoopbackClient {
    fn new() -> Self {
        Self {
            backing: StringDictionary::temp(DictOptions::new()).unwrap(),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(DictError::remote("connection reset"));
        }
        Ok(())
    }
}

impl DictionaryClient for LoopbackClient {
    fn get_or_add_bulk(&self, strings: &[String]) -> Result<Vec<i32>> {
        self.check()?;
        let mut ids = vec![0i32; strings.len()];
        self.backing.get_or_add_bulk(strings, &mut ids)?;
        Ok(ids)
    }

    fn get(&self, s: &str) -> Result<i32> {
        self.check()?;
        self.backing.get_id_of_string(s)
    }

    fn get_string(&self, string_id: i32) -> Result<String> {
        self.check()?;
        self.backing.get_string(string_id)
    }

    fn storage_entry_count(&self) -> Result<usize> {
        self.check()?;
        self.backing.storage_entry_count()
    }

    fn get_like(
        &self,
        pattern: &str,
        icase: bool,
        is_simple: bool,
        escape: char,
        generation: usize,
    ) -> Result<Vec<i32>> {
        self.check()?;
        self.backing.get_like(pattern, icase, is_simple, escape, generation)
    }

    fn get_regexp_like(&self, pattern: &str, escape: char, generation: usize) -> Result<Vec<i32>> {
        self.check()?;
        self.backing.get_regexp_like(pattern, escape, generation)
    }

    fn get_compare(
        &self,
        pattern: &str,
        comp_operator: &str,
        generation: usize,
    ) -> Result<Vec<i32>> {
        self.check()?;
        self.backing.get_compare(pattern, comp_operator, generation)
    }

    fn checkpoint(&self) -> Result<()> {
        self.check()
    }

    fn translate_string_ids(
        &self,
        _dest: DictRef,
        source_ids: &[i32],
        _source: DictRef,
        _dest_generation: i32,
    ) -> Result<Vec<i32>> {
        self.check()?;
        Ok(source_ids.to_vec())
    }
}

fn remote_pair() -> (Arc<LoopbackClient>, StringDictionary) {
    let client = Arc::new(LoopbackClient::new());
    let dict = StringDictionary::open_remote(client.clone(), client.clone());
    (client, dict)
}

#[test]
fn test_remote_delegates_ingest_and_reads() {
    let (_, dict) = remote_pair();
    assert_eq!(dict.get_or_add("apple").unwrap(), 0);
    assert_eq!(dict.get_or_add("banana").unwrap(), 1);
    assert_eq!(dict.get_or_add("apple").unwrap(), 0);
    assert_eq!(dict.get_or_add("").unwrap(), NULL_STR_ID);
    assert_eq!(dict.storage_entry_count().unwrap(), 2);
    assert_eq!(dict.get_string(1).unwrap(), "banana");
    assert_eq!(dict.get_id_of_string("missing").unwrap(), INVALID_STR_ID);
    let ids = dict.get_like("app%", false, false, '\\', 2).unwrap();
    assert_eq!(ids, vec![0]);
}

#[test]
fn test_remote_bulk_narrows_with_overflow_nulls() {
    let (client, dict) = remote_pair();
    // Fill the backing dictionary past the u8 id range.
    let warmup: Vec<String> = (0..300).map(|i| format!("w{i}")).collect();
    let mut wide = vec![0i32; warmup.len()];
    client.backing.get_or_add_bulk(&warmup, &mut wide).unwrap();

    let batch = vec!["w7".to_string(), String::new(), "w299".to_string()];
    let mut codes = vec![0u8; batch.len()];
    dict.get_or_add_bulk(&batch, &mut codes).unwrap();
    assert_eq!(codes[0], 7);
    assert_eq!(codes[1], u8::MAX); // null passes through
    assert_eq!(codes[2], u8::MAX); // id 299 does not fit in u8
}

#[test]
fn test_remote_failures_surface() {
    let (client, dict) = remote_pair();
    dict.get_or_add("ok").unwrap();
    assert!(dict.checkpoint());
    client.fail.store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(!dict.checkpoint());
    assert!(dict.get_or_add("nope").is_err());
    assert!(dict.get_like("x%", false, false, '\\', 1).is_err());
}

#[test]
fn test_remote_copy_strings_unsupported() {
    let (_, dict) = remote_pair();
    assert!(matches!(
        dict.copy_strings(),
        Err(DictError::RemoteUnsupported(_))
    ));
}
