//! Persistent dictionary-encoded string storage.
//!
//! Wide columns of human-readable text become narrow columns of dense `i32`
//! codes: every distinct string gets one id on first insertion, ids never
//! change, and predicates on encoded columns (equality, LIKE, regex, ordered
//! comparison) run inside the dictionary instead of over the raw column.
//!
//! A dictionary is either **persistent** (two memory-mapped, append-only
//! files: `DictPayload` holds the concatenated string bytes, `DictOffsets`
//! the fixed-size locator records), **temp** (the same layout in heap
//! buffers, for transient query execution), or **remote** (every call
//! forwarded through a [`DictionaryClient`]).
//!
//! ```no_run
//! use skarn_db_dict::{DictOptions, StringDictionary};
//!
//! let dict = StringDictionary::open("/var/lib/skarn/col_city", DictOptions::new())?;
//! let id = dict.get_or_add("Oslo")?;
//! assert_eq!(dict.get_string(id)?, "Oslo");
//! let hits = dict.get_like("Os%", false, false, '\\', dict.storage_entry_count()?)?;
//! # Ok::<(), skarn_db_dict::DictError>(())
//! ```

mod config;
mod dictionary;
mod encoding;
mod error;
mod hash;
mod like;
mod remote;
mod scan;
mod storage;

pub use config::{DictOptions, DEFAULT_INITIAL_CAPACITY};
pub use dictionary::{
    populate_string_array_ids, populate_string_ids, translate_string_ids, StringDictionary,
    INVALID_STR_ID, MAX_STRCOUNT, MAX_STRLEN, NULL_STR_ID,
};
pub use encoding::DictCode;
pub use error::{DictError, Result};
pub use remote::{DictRef, DictionaryClient};
