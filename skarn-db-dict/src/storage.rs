//! Append-only dictionary storage: payload bytes + fixed-size offset records.
//!
//! A dictionary owns two regions. `DictPayload` is the concatenation of every
//! stored string with no separators; `DictOffsets` is a flat array of records
//! locating each string. Persistent dictionaries keep both regions as
//! memory-mapped files; temp dictionaries keep them as heap buffers with the
//! same layout.
//!
//! ## Record format
//!
//! ```text
//! payload_offset: u64 LE | size: u16 LE | reserved: 2B
//! ```
//!
//! Regions grow by appending a 1024-page chunk of `0xFF` bytes (the offsets
//! chunk is truncated to whole records). Any record read from the unused tail
//! therefore decodes with `size == 0xFFFF` — the canary that marks the
//! logical end of data. `size` is range-checked strictly below the canary
//! value on every append.
//!
//! All access is by offset against the current mapping; no pointer into a
//! mapping survives a grow, because growing swaps in a fresh map.

use crate::error::{DictError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Offset-record size in bytes: u64 offset + u16 size + 2 reserved.
pub const RECORD_SIZE: usize = 12;

/// `size` value marking an unused (canary) record.
pub const CANARY_SIZE: u16 = 0xFFFF;

/// Payload file name within a dictionary folder.
const PAYLOAD_FILE: &str = "DictPayload";

/// Offsets file name within a dictionary folder.
const OFFSETS_FILE: &str = "DictOffsets";

/// Pages per growth chunk.
const CANARY_PAGES: usize = 1024;

/// Process-wide canary chunk, 1024 pages of `0xFF`, shared by every
/// dictionary in the process.
static CANARY_BUFFER: OnceLock<Vec<u8>> = OnceLock::new();

fn page_size() -> usize {
    #[cfg(unix)]
    {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz > 0 {
            return sz as usize;
        }
    }
    4096
}

fn canary_chunk() -> &'static [u8] {
    CANARY_BUFFER.get_or_init(|| vec![0xff; CANARY_PAGES * page_size()])
}

/// Offsets growth chunk: the canary chunk truncated to whole records, so the
/// offsets region length is always a record multiple and a partial record at
/// the tail can only mean external truncation.
fn offsets_chunk() -> &'static [u8] {
    let chunk = canary_chunk();
    &chunk[..(chunk.len() / RECORD_SIZE) * RECORD_SIZE]
}

#[inline]
fn encode_record(payload_offset: u64, size: u16) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[..8].copy_from_slice(&payload_offset.to_le_bytes());
    buf[8..10].copy_from_slice(&size.to_le_bytes());
    buf
}

#[inline]
fn decode_record(buf: &[u8]) -> (u64, u16) {
    debug_assert_eq!(buf.len(), RECORD_SIZE);
    let off = u64::from_le_bytes(buf[..8].try_into().unwrap());
    let size = u16::from_le_bytes(buf[8..10].try_into().unwrap());
    (off, size)
}

// ============================================================================
// Region: one growable append target (mapped file or heap buffer)
// ============================================================================

enum Region {
    Mapped { file: File, map: memmap2::MmapMut },
    Heap(Vec<u8>),
}

impl Region {
    /// Map an already-sized file read/write shared.
    fn map_file(file: File) -> std::io::Result<Self> {
        let map = unsafe { memmap2::MmapMut::map_mut(&file)? };
        advise(&map);
        Ok(Region::Mapped { file, map })
    }

    fn len(&self) -> usize {
        match self {
            Region::Mapped { map, .. } => map.len(),
            Region::Heap(buf) => buf.len(),
        }
    }

    /// Append one canary chunk and (for files) remap.
    fn grow(&mut self, chunk: &'static [u8]) -> std::io::Result<()> {
        match self {
            Region::Mapped { file, map } => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(chunk)?;
                let new_map = unsafe { memmap2::MmapMut::map_mut(&*file)? };
                advise(&new_map);
                *map = new_map;
            }
            Region::Heap(buf) => {
                buf.extend_from_slice(chunk);
            }
        }
        Ok(())
    }

    #[inline]
    fn slice(&self, off: usize, len: usize) -> &[u8] {
        match self {
            Region::Mapped { map, .. } => &map[off..off + len],
            Region::Heap(buf) => &buf[off..off + len],
        }
    }

    #[inline]
    fn write(&mut self, off: usize, bytes: &[u8]) {
        match self {
            Region::Mapped { map, .. } => map[off..off + bytes.len()].copy_from_slice(bytes),
            Region::Heap(buf) => buf[off..off + bytes.len()].copy_from_slice(bytes),
        }
    }

    /// msync the mapping. No-op for heap regions.
    fn flush(&self) -> bool {
        match self {
            Region::Mapped { map, .. } => map.flush().is_ok(),
            Region::Heap(_) => true,
        }
    }

    /// fsync the backing file. No-op for heap regions.
    fn sync_file(&self) -> bool {
        match self {
            Region::Mapped { file, .. } => file.sync_all().is_ok(),
            Region::Heap(_) => true,
        }
    }
}

fn advise(map: &memmap2::MmapMut) {
    // Dictionary access is random by id; tell the kernel so. Advice failures
    // are harmless.
    #[cfg(unix)]
    {
        let _ = map.advise(memmap2::Advice::Random);
        let _ = map.advise(memmap2::Advice::WillNeed);
    }
    #[cfg(target_os = "linux")]
    {
        let _ = map.advise(memmap2::Advice::HugePage);
    }
    #[cfg(not(unix))]
    {
        let _ = map;
    }
}

fn open_dict_file(path: &Path, recover: bool) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(!recover)
        .open(path)
        .map_err(|source| DictError::PayloadUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
    let len = file
        .metadata()
        .map_err(|source| DictError::PayloadUnavailable {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    Ok((file, len))
}

// ============================================================================
// DictStorage: payload + offsets pair with append/read discipline
// ============================================================================

/// A borrowed view of one stored string, or the canary marking end-of-data.
pub enum StorageEntry<'a> {
    Bytes(&'a [u8]),
    Canary,
}

pub struct DictStorage {
    payload: Region,
    offsets: Region,
    /// Next free byte in the payload region.
    payload_off: u64,
    /// Offsets-file byte length observed at open, before any growth. Recovery
    /// derives its id bound from this.
    recovered_offsets_len: u64,
    /// Offsets path, kept for diagnostics.
    offsets_path: Option<PathBuf>,
}

impl DictStorage {
    /// Open persistent storage in `folder`. With `recover`, existing file
    /// contents are preserved; otherwise both files are truncated.
    pub fn open(folder: &Path, recover: bool) -> Result<Self> {
        let payload_path = folder.join(PAYLOAD_FILE);
        let offsets_path = folder.join(OFFSETS_FILE);
        let (mut payload_file, payload_len) = open_dict_file(&payload_path, recover)?;
        let (mut offsets_file, offsets_len) = open_dict_file(&offsets_path, recover)?;

        // Mapping a zero-length file is invalid; seed empty files with one
        // canary chunk before the first map.
        if payload_len == 0 {
            payload_file.write_all(canary_chunk())?;
        }
        if offsets_len == 0 {
            offsets_file.write_all(offsets_chunk())?;
        }
        let payload = Region::map_file(payload_file)?;
        let offsets = Region::map_file(offsets_file)?;

        Ok(Self {
            payload,
            offsets,
            payload_off: 0,
            recovered_offsets_len: offsets_len,
            offsets_path: Some(offsets_path),
        })
    }

    /// Heap-backed storage for temp dictionaries. Never touches disk.
    pub fn temp() -> Self {
        let mut payload = Region::Heap(Vec::new());
        let mut offsets = Region::Heap(Vec::new());
        // Growing a heap region cannot fail.
        payload.grow(canary_chunk()).expect("heap grow");
        offsets.grow(offsets_chunk()).expect("heap grow");
        Self {
            payload,
            offsets,
            payload_off: 0,
            recovered_offsets_len: 0,
            offsets_path: None,
        }
    }

    /// Offsets-file length at open time (pre-growth). Non-zero means there
    /// is prior data to recover.
    pub fn recovered_offsets_len(&self) -> u64 {
        self.recovered_offsets_len
    }

    /// Heap-backed (no files to sync).
    pub fn is_temp(&self) -> bool {
        self.offsets_path.is_none()
    }

    pub fn offsets_path(&self) -> Option<&Path> {
        self.offsets_path.as_deref()
    }

    /// Next free payload byte.
    pub fn payload_off(&self) -> u64 {
        self.payload_off
    }

    /// Advance the payload cursor without writing. Recovery uses this while
    /// re-installing records that already exist on disk.
    pub fn advance_payload_off(&mut self, size: u64) {
        self.payload_off += size;
    }

    /// Append one string at slot `slot`, growing either region as needed.
    /// The payload cursor advances only after both writes landed.
    pub fn append(&mut self, bytes: &[u8], slot: usize) -> std::io::Result<()> {
        debug_assert!(u16::try_from(bytes.len()).is_ok() && bytes.len() as u16 != CANARY_SIZE);

        while self.payload_off as usize + bytes.len() > self.payload.len() {
            self.payload.grow(canary_chunk())?;
        }
        self.payload.write(self.payload_off as usize, bytes);

        let record_off = slot * RECORD_SIZE;
        while record_off + RECORD_SIZE > self.offsets.len() {
            self.offsets.grow(offsets_chunk())?;
        }
        let record = encode_record(self.payload_off, bytes.len() as u16);
        self.offsets.write(record_off, &record);

        self.payload_off += bytes.len() as u64;
        Ok(())
    }

    /// Read the string stored at `id`. A canary record marks the logical end
    /// of data and must never be observed for a live id.
    pub fn entry(&self, id: usize) -> StorageEntry<'_> {
        let record_off = id * RECORD_SIZE;
        assert!(
            record_off + RECORD_SIZE <= self.offsets.len(),
            "offset record {id} out of mapped range"
        );
        let (off, size) = decode_record(self.offsets.slice(record_off, RECORD_SIZE));
        if size == CANARY_SIZE {
            return StorageEntry::Canary;
        }
        StorageEntry::Bytes(self.payload.slice(off as usize, size as usize))
    }

    /// msync both mappings, then fsync both files. True only if all four
    /// succeed. Heap-backed storage reports true.
    pub fn checkpoint(&self) -> bool {
        let mut ok = self.offsets.flush();
        ok = ok && self.payload.flush();
        ok = ok && self.offsets.sync_file();
        ok = ok && self.payload.sync_file();
        ok
    }
}
