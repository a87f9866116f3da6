//! Encoded-column code widths for bulk ingestion.
//!
//! A dictionary-encoded column stores ids at the narrowest width that fits
//! its cardinality. [`DictCode`] is implemented for the three supported
//! widths; the sentinel encoding SQL NULL is the bit pattern that is never
//! assigned as an id (`MAX` for the unsigned widths, `MIN` for `i32`).

/// Trait for dictionary code widths (`u8`, `u16`, `i32`).
pub trait DictCode: Copy + Eq + std::fmt::Debug + Send + 'static {
    /// The column value encoding SQL NULL at this width.
    const NULL_SENTINEL: Self;

    /// Number of bits in the code, for diagnostics.
    const BITS: u32;

    /// Maximum number of distinct ids encodable at this width. Ids are
    /// `0..MAX_ID_COUNT`; the sentinel stays unassigned.
    fn max_id_count() -> usize;

    /// Narrow an id to this width. Caller guarantees `id < max_id_count()`.
    fn from_id(id: i32) -> Self;
}

impl DictCode for u8 {
    const NULL_SENTINEL: Self = u8::MAX;
    const BITS: u32 = 8;

    #[inline]
    fn max_id_count() -> usize {
        u8::MAX as usize
    }

    #[inline]
    fn from_id(id: i32) -> Self {
        id as u8
    }
}

impl DictCode for u16 {
    const NULL_SENTINEL: Self = u16::MAX;
    const BITS: u32 = 16;

    #[inline]
    fn max_id_count() -> usize {
        u16::MAX as usize
    }

    #[inline]
    fn from_id(id: i32) -> Self {
        id as u16
    }
}

impl DictCode for i32 {
    const NULL_SENTINEL: Self = i32::MIN;
    const BITS: u32 = 32;

    #[inline]
    fn max_id_count() -> usize {
        i32::MAX as usize
    }

    #[inline]
    fn from_id(id: i32) -> Self {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_unassignable() {
        // The largest assignable id at each width never collides with the
        // NULL sentinel.
        assert_eq!(u8::max_id_count() - 1, 254);
        assert_ne!(u8::from_id(254), u8::NULL_SENTINEL);
        assert_eq!(u16::max_id_count() - 1, 65_534);
        assert_ne!(u16::from_id(65_534), u16::NULL_SENTINEL);
        assert_ne!(i32::from_id(i32::MAX - 1), i32::NULL_SENTINEL);
    }
}
