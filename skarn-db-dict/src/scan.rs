//! Predicate scans over the dictionary: LIKE, regex, equality, and ordered
//! comparison, plus the caches that make repeated predicates cheap.
//!
//! Every scan takes a `generation` — an upper id bound `<= str_count` that
//! fixes which entries the caller may see. Scan entry points take the
//! dictionary lock exclusively (they fill caches and may build the sorted
//! cache); the workers they fan out to read storage without further locking
//! because that exclusive hold shuts out mutation.
//!
//! Cache shapes:
//! - LIKE results keyed by `(pattern, icase, is_simple, escape)`;
//! - regex results keyed by `(pattern, escape)`;
//! - equality keyed by pattern, holding the single matching id;
//! - ordered comparisons keyed by pattern in a small LRU of binary-search
//!   outcomes over the sorted cache.
//!
//! The result caches are entry-bounded (cleared when full); every insert
//! into the dictionary invalidates them wholesale.

use crate::dictionary::{DictInner, StringDictionary};
use crate::error::{DictError, Result};
use crate::like::{string_ilike, string_ilike_simple, string_like, string_like_simple};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Entry bound for the LIKE/regex/equality result caches.
const SCAN_CACHE_MAX_ENTRIES: usize = 1024;

/// Capacity of the ordered-comparison LRU.
const COMPARE_CACHE_CAPACITY: usize = 64;

type LikeKey = (String, bool, bool, char);

/// Outcome of the sorted-cache binary search for one pattern.
///
/// `diff == 0` iff the pattern matches `sorted[index]` exactly; otherwise
/// `index` is the position of the largest strictly-smaller string (0 when
/// the pattern precedes everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompareHit {
    pub index: usize,
    pub diff: u8,
}

// ============================================================================
// Caches
// ============================================================================

/// LRU of binary-search outcomes, keyed by pattern.
pub(crate) struct CompareCache {
    map: FxHashMap<String, CompareHit>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CompareCache {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<CompareHit> {
        let hit = self.map.get(key).copied()?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let touched = self.order.remove(pos).expect("position is in range");
            self.order.push_back(touched);
        }
        Some(hit)
    }

    pub(crate) fn put(&mut self, key: String, hit: CompareHit) {
        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        if self.map.insert(key.clone(), hit).is_none() {
            self.order.push_back(key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }
}

/// All scan-side caches, owned by `DictInner` and invalidated on insert.
pub(crate) struct ScanCaches {
    pub(crate) like: FxHashMap<LikeKey, Vec<i32>>,
    pub(crate) regex: FxHashMap<(String, char), Vec<i32>>,
    pub(crate) equal: FxHashMap<String, i32>,
    pub(crate) compare: CompareCache,
    /// Ids ordered by byte-lexicographic payload comparison. Extended
    /// incrementally; *not* cleared on insert.
    pub(crate) sorted: Vec<i32>,
    /// `copy_strings` snapshot.
    pub(crate) strings_snapshot: Option<Arc<Vec<String>>>,
}

impl Default for ScanCaches {
    fn default() -> Self {
        Self {
            like: FxHashMap::default(),
            regex: FxHashMap::default(),
            equal: FxHashMap::default(),
            compare: CompareCache::with_capacity(COMPARE_CACHE_CAPACITY),
            sorted: Vec::new(),
            strings_snapshot: None,
        }
    }
}

impl ScanCaches {
    /// Drop every result cache. The sorted cache survives — it only ever
    /// lags behind `str_count` and catches up on the next comparison scan.
    pub(crate) fn invalidate(&mut self) {
        self.like.clear();
        self.regex.clear();
        self.equal.clear();
        self.compare.clear();
        self.strings_snapshot = None;
    }
}

/// Insert with the entry bound: a full cache is cleared rather than grown.
fn insert_bounded<K: std::hash::Hash + Eq, V>(map: &mut FxHashMap<K, V>, key: K, value: V) {
    if map.len() >= SCAN_CACHE_MAX_ENTRIES {
        map.clear();
    }
    map.insert(key, value);
}

// ============================================================================
// Parallel scan driver
// ============================================================================

/// Run `predicate` over ids `[0, generation)` with strided workers: worker
/// `w` of `W` tests ids `w, w+W, w+2W, …`. Results concatenate in worker
/// order.
fn parallel_scan<F>(inner: &DictInner, generation: usize, predicate: F) -> Vec<i32>
where
    F: Fn(&[u8]) -> bool + Sync,
{
    let worker_count = rayon::current_num_threads().max(1);
    let mut worker_results: Vec<Vec<i32>> = Vec::new();
    worker_results.resize_with(worker_count, Vec::new);
    rayon::scope(|scope| {
        for (worker_idx, results) in worker_results.iter_mut().enumerate() {
            let predicate = &predicate;
            scope.spawn(move |_| {
                let mut id = worker_idx;
                while id < generation {
                    if predicate(inner.string_at(id)) {
                        results.push(id as i32);
                    }
                    id += worker_count;
                }
            });
        }
    });
    worker_results.into_iter().flatten().collect()
}

/// Compile a scan regex, honoring a non-default escape character by
/// rewriting `escape`-prefixed characters into regex literals.
fn build_scan_regex(pattern: &str, escape: char) -> Result<regex::bytes::Regex> {
    let translated: std::borrow::Cow<'_, str> = if escape == '\\' {
        std::borrow::Cow::Borrowed(pattern)
    } else {
        let mut out = String::with_capacity(pattern.len() + 8);
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            if c == escape {
                let literal = chars.next().unwrap_or(c);
                out.push_str(&regex::escape(literal.encode_utf8(&mut [0u8; 4])));
            } else {
                out.push(c);
            }
        }
        std::borrow::Cow::Owned(out)
    };
    regex::bytes::RegexBuilder::new(&translated)
        .build()
        .map_err(|e| DictError::invalid_pattern(format!("invalid regex pattern: {e}")))
}

// ============================================================================
// Scan implementations (exclusive lock held by the caller)
// ============================================================================

impl DictInner {
    pub(crate) fn like_scan(
        &mut self,
        pattern: &str,
        icase: bool,
        is_simple: bool,
        escape: char,
        generation: usize,
    ) -> Vec<i32> {
        assert!(
            generation <= self.str_count,
            "scan generation {generation} exceeds entry count {}",
            self.str_count
        );
        debug_assert!(escape.is_ascii(), "escape must be an ASCII character");
        let key: LikeKey = (pattern.to_string(), icase, is_simple, escape);
        if let Some(cached) = self.caches.like.get(&key) {
            return cached.clone();
        }
        let pattern_bytes = pattern.as_bytes();
        let escape_byte = escape as u8;
        let result = parallel_scan(self, generation, |s| match (icase, is_simple) {
            (true, true) => string_ilike_simple(s, pattern_bytes),
            (true, false) => string_ilike(s, pattern_bytes, escape_byte),
            (false, true) => string_like_simple(s, pattern_bytes),
            (false, false) => string_like(s, pattern_bytes, escape_byte),
        });
        insert_bounded(&mut self.caches.like, key, result.clone());
        result
    }

    pub(crate) fn regexp_scan(
        &mut self,
        pattern: &str,
        escape: char,
        generation: usize,
    ) -> Result<Vec<i32>> {
        assert!(
            generation <= self.str_count,
            "scan generation {generation} exceeds entry count {}",
            self.str_count
        );
        let key = (pattern.to_string(), escape);
        if let Some(cached) = self.caches.regex.get(&key) {
            return Ok(cached.clone());
        }
        let re = build_scan_regex(pattern, escape)?;
        let result = parallel_scan(self, generation, |s| re.is_match(s));
        insert_bounded(&mut self.caches.regex, key, result.clone());
        Ok(result)
    }

    pub(crate) fn compare_scan(
        &mut self,
        pattern: &str,
        comp_operator: &str,
        generation: usize,
    ) -> Result<Vec<i32>> {
        assert!(
            generation <= self.str_count,
            "scan generation {generation} exceeds entry count {}",
            self.str_count
        );
        if !matches!(comp_operator, "<" | "<=" | ">" | ">=" | "=" | "<>") {
            return Err(DictError::UnknownCompareOperator(comp_operator.to_string()));
        }
        if self.str_count == 0 {
            return Ok(Vec::new());
        }
        if self.caches.sorted.len() < self.str_count {
            // Equality operators don't need ordering; serve them from the
            // equality cache instead of paying for a sort.
            if comp_operator == "=" || comp_operator == "<>" {
                return Ok(self.equals_scan(pattern, comp_operator, generation));
            }
            self.build_sorted_cache();
        }

        let hit = self.compare_hit(pattern);
        let sorted = &self.caches.sorted;
        let result = match comp_operator {
            "<" => {
                let k = if hit.diff == 0 {
                    hit.index
                } else if hit.index == 0 {
                    0
                } else {
                    hit.index + 1
                };
                sorted[..k].to_vec()
            }
            "<=" => {
                let k = if hit.index == 0 && hit.diff > 0 {
                    0
                } else {
                    hit.index + 1
                };
                sorted[..k].to_vec()
            }
            ">" => {
                let k = if hit.index == 0 && hit.diff > 0 {
                    0
                } else {
                    hit.index + 1
                };
                sorted[k..].to_vec()
            }
            ">=" => {
                let k = if hit.diff == 0 {
                    hit.index
                } else if hit.index == 0 {
                    0
                } else {
                    hit.index + 1
                };
                sorted[k..].to_vec()
            }
            "=" => {
                if hit.diff == 0 {
                    vec![sorted[hit.index]]
                } else {
                    Vec::new()
                }
            }
            "<>" => {
                if hit.diff == 0 {
                    sorted
                        .iter()
                        .enumerate()
                        .filter(|&(pos, _)| pos != hit.index)
                        .map(|(_, &id)| id)
                        .collect()
                } else {
                    sorted.clone()
                }
            }
            _ => unreachable!("operator validated above"),
        };
        Ok(result)
    }

    /// Equality via the single-id cache: `=` returns the matching id, `<>`
    /// the complement over `[0, generation)`.
    fn equals_scan(&mut self, pattern: &str, comp_operator: &str, generation: usize) -> Vec<i32> {
        if let Some(&eq_id) = self.caches.equal.get(pattern) {
            return match comp_operator {
                "=" => vec![eq_id],
                _ => (0..generation as i32).filter(|&id| id != eq_id).collect(),
            };
        }
        let pattern_bytes = pattern.as_bytes();
        let matches = parallel_scan(self, generation, |s| s == pattern_bytes);
        let eq_id = matches.first().copied();
        if let Some(id) = eq_id {
            insert_bounded(&mut self.caches.equal, pattern.to_string(), id);
        }
        match comp_operator {
            "=" => matches,
            _ => (0..generation as i32)
                .filter(|&id| Some(id) != eq_id)
                .collect(),
        }
    }

    /// Binary-search the sorted cache for `pattern`, LRU-cached per pattern.
    fn compare_hit(&mut self, pattern: &str) -> CompareHit {
        if let Some(hit) = self.caches.compare.get(pattern) {
            return hit;
        }
        let pattern_bytes = pattern.as_bytes();
        let sorted = &self.caches.sorted;
        let pos = sorted.partition_point(|&id| self.string_at(id as usize) < pattern_bytes);
        let hit = if pos == sorted.len() {
            CompareHit {
                index: sorted.len() - 1,
                diff: 1,
            }
        } else if self.string_at(sorted[pos] as usize) == pattern_bytes {
            CompareHit {
                index: pos,
                diff: 0,
            }
        } else if pos == 0 {
            CompareHit { index: 0, diff: 1 }
        } else {
            CompareHit {
                index: pos - 1,
                diff: 1,
            }
        };
        self.caches.compare.put(pattern.to_string(), hit);
        hit
    }

    /// Extend the sorted cache to cover `[0, str_count)`: sort the new id
    /// range by payload bytes, then merge with the existing run.
    pub(crate) fn build_sorted_cache(&mut self) {
        let existing = std::mem::take(&mut self.caches.sorted);
        let mut fresh: Vec<i32> = (existing.len()..self.str_count).map(|id| id as i32).collect();
        fresh.sort_unstable_by(|&a, &b| {
            self.string_at(a as usize).cmp(self.string_at(b as usize))
        });

        if existing.is_empty() {
            self.caches.sorted = fresh;
            return;
        }
        let mut merged = Vec::with_capacity(existing.len() + fresh.len());
        let (mut e, mut f) = (0, 0);
        while e < existing.len() && f < fresh.len() {
            let take_fresh =
                self.string_at(fresh[f] as usize) < self.string_at(existing[e] as usize);
            if take_fresh {
                merged.push(fresh[f]);
                f += 1;
            } else {
                merged.push(existing[e]);
                e += 1;
            }
        }
        merged.extend_from_slice(&fresh[f..]);
        merged.extend_from_slice(&existing[e..]);
        self.caches.sorted = merged;
    }
}

// ============================================================================
// Public scan entry points
// ============================================================================

impl StringDictionary {
    /// Ids of entries matching a LIKE pattern, bounded by `generation`.
    /// Results are cached per `(pattern, icase, is_simple, escape)`.
    pub fn get_like(
        &self,
        pattern: &str,
        icase: bool,
        is_simple: bool,
        escape: char,
        generation: usize,
    ) -> Result<Vec<i32>> {
        if let Some(client) = self.remote_client() {
            return client.get_like(pattern, icase, is_simple, escape, generation);
        }
        let lock = self.local().expect("local mode");
        let mut inner = lock.write();
        Ok(inner.like_scan(pattern, icase, is_simple, escape, generation))
    }

    /// Ids of entries matching a regex, bounded by `generation`. Results are
    /// cached per `(pattern, escape)`.
    pub fn get_regexp_like(&self, pattern: &str, escape: char, generation: usize) -> Result<Vec<i32>> {
        if let Some(client) = self.remote_client() {
            return client.get_regexp_like(pattern, escape, generation);
        }
        let lock = self.local().expect("local mode");
        let mut inner = lock.write();
        inner.regexp_scan(pattern, escape, generation)
    }

    /// Ids of entries satisfying `comp_operator` (`<`, `<=`, `>`, `>=`, `=`,
    /// `<>`) against `pattern` under byte-wise ordering. Ordered operators
    /// build or extend the sorted cache on demand.
    pub fn get_compare(
        &self,
        pattern: &str,
        comp_operator: &str,
        generation: usize,
    ) -> Result<Vec<i32>> {
        if let Some(client) = self.remote_client() {
            return client.get_compare(pattern, comp_operator, generation);
        }
        let lock = self.local().expect("local mode");
        let mut inner = lock.write();
        inner.compare_scan(pattern, comp_operator, generation)
    }
}

// ============================================================================
// Tests
// ============================================================================
