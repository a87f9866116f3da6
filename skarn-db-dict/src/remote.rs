//! Remote dictionary client interface.
//!
//! A dictionary whose state lives on another node delegates every operation
//! across this trait. The transport is the embedder's concern — the core
//! only needs the call surface. A remote dictionary carries two handles: one
//! with the transport's normal timeout for interactive calls, and one
//! without for bulk ingestion, matching the per-call choice the server side
//! expects.

use crate::error::Result;

/// Identifies one dictionary on a remote host (database-local dictionary
/// reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DictRef {
    pub db_id: i32,
    pub dict_id: i32,
}

impl DictRef {
    pub fn new(db_id: i32, dict_id: i32) -> Self {
        Self { db_id, dict_id }
    }
}

/// Transport-agnostic remote dictionary operations.
///
/// Implementations are expected to be cheap to clone behind an `Arc` and
/// callable from many threads.
pub trait DictionaryClient: Send + Sync {
    /// Bulk get-or-add. Returns one id per input string, in order. Empty
    /// strings come back as the i32 null sentinel.
    fn get_or_add_bulk(&self, strings: &[String]) -> Result<Vec<i32>>;

    /// Lookup without insert. `INVALID_STR_ID` when absent.
    fn get(&self, s: &str) -> Result<i32>;

    /// Fetch the string for an id.
    fn get_string(&self, string_id: i32) -> Result<String>;

    /// Number of entries on the remote node.
    fn storage_entry_count(&self) -> Result<usize>;

    fn get_like(
        &self,
        pattern: &str,
        icase: bool,
        is_simple: bool,
        escape: char,
        generation: usize,
    ) -> Result<Vec<i32>>;

    fn get_regexp_like(&self, pattern: &str, escape: char, generation: usize) -> Result<Vec<i32>>;

    fn get_compare(&self, pattern: &str, comp_operator: &str, generation: usize)
        -> Result<Vec<i32>>;

    /// Flush remote state to disk.
    fn checkpoint(&self) -> Result<()>;

    /// Translate ids minted by `source` into ids of the dictionary behind
    /// this client, bounded by the destination generation.
    fn translate_string_ids(
        &self,
        dest: DictRef,
        source_ids: &[i32],
        source: DictRef,
        dest_generation: i32,
    ) -> Result<Vec<i32>>;
}
