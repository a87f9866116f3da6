//! Byte-wise LIKE pattern matching for dictionary scans.
//!
//! Strings in the dictionary are opaque byte sequences, so all matching here
//! is byte-wise: `%` matches any run of bytes, `_` matches exactly one byte,
//! and the escape byte makes the following pattern byte literal.
//! Case-insensitive variants fold ASCII only — collation is out of scope.
//!
//! The `simple` variants cover the planner's fast path: a pattern whose body
//! contains no live metacharacters. Leading/trailing `%` keep their anchor
//! meaning, everything in between is literal (including `%` and `_`).

/// Full LIKE match, case-sensitive.
pub fn string_like(s: &[u8], pattern: &[u8], escape: u8) -> bool {
    like_match(s, pattern, escape, false)
}

/// Full LIKE match, ASCII case-insensitive.
pub fn string_ilike(s: &[u8], pattern: &[u8], escape: u8) -> bool {
    like_match(s, pattern, escape, true)
}

/// Simple LIKE match: literal body with optional `%` anchors.
pub fn string_like_simple(s: &[u8], pattern: &[u8]) -> bool {
    simple_match(s, pattern, false)
}

/// Simple LIKE match, ASCII case-insensitive.
pub fn string_ilike_simple(s: &[u8], pattern: &[u8]) -> bool {
    simple_match(s, pattern, true)
}

#[inline]
fn byte_eq(a: u8, b: u8, icase: bool) -> bool {
    if icase {
        a.to_ascii_lowercase() == b.to_ascii_lowercase()
    } else {
        a == b
    }
}

#[inline]
fn slice_eq(a: &[u8], b: &[u8], icase: bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| byte_eq(x, y, icase))
}

/// One decoded pattern token. The `usize` is the index of the next token.
enum Token {
    /// `%` — any run of bytes (possibly empty)
    AnyRun(usize),
    /// `_` — exactly one byte
    AnyOne(usize),
    /// A literal byte (possibly produced by the escape byte)
    Literal(u8, usize),
}

/// Decode the pattern token at `pi`. An escape byte with nothing after it
/// matches itself literally.
#[inline]
fn token_at(p: &[u8], pi: usize, escape: u8) -> Option<Token> {
    if pi >= p.len() {
        return None;
    }
    let b = p[pi];
    if b == escape && pi + 1 < p.len() {
        return Some(Token::Literal(p[pi + 1], pi + 2));
    }
    match b {
        b'%' => Some(Token::AnyRun(pi + 1)),
        b'_' => Some(Token::AnyOne(pi + 1)),
        _ => Some(Token::Literal(b, pi + 1)),
    }
}

/// Iterative LIKE matcher with single-level `%` backtracking.
fn like_match(s: &[u8], p: &[u8], escape: u8, icase: bool) -> bool {
    let mut si = 0;
    let mut pi = 0;
    // Most recent `%`: pattern index after it and the string position it is
    // currently assumed to cover up to.
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        let step = match token_at(p, pi, escape) {
            Some(Token::AnyRun(next)) => {
                star = Some((next, si));
                pi = next;
                true
            }
            Some(Token::AnyOne(next)) => {
                si += 1;
                pi = next;
                true
            }
            Some(Token::Literal(b, next)) if byte_eq(s[si], b, icase) => {
                si += 1;
                pi = next;
                true
            }
            _ => false,
        };
        if !step {
            match star {
                Some((p_next, s_pos)) => {
                    // Widen the run covered by the last `%` by one byte.
                    si = s_pos + 1;
                    star = Some((p_next, s_pos + 1));
                    pi = p_next;
                }
                None => return false,
            }
        }
    }
    // Any trailing `%` tokens match the empty tail.
    while let Some(Token::AnyRun(next)) = token_at(p, pi, escape) {
        pi = next;
    }
    pi == p.len()
}

fn simple_match(s: &[u8], pattern: &[u8], icase: bool) -> bool {
    let mut start = 0;
    let mut end = pattern.len();
    let anchored_start = !pattern.starts_with(b"%");
    let anchored_end = !pattern.ends_with(b"%");
    while start < end && pattern[start] == b'%' {
        start += 1;
    }
    while end > start && pattern[end - 1] == b'%' {
        end -= 1;
    }
    let needle = &pattern[start..end];

    match (anchored_start, anchored_end) {
        (true, true) => slice_eq(s, needle, icase),
        (true, false) => s.len() >= needle.len() && slice_eq(&s[..needle.len()], needle, icase),
        (false, true) => {
            s.len() >= needle.len() && slice_eq(&s[s.len() - needle.len()..], needle, icase)
        }
        (false, false) => {
            needle.is_empty()
                || (needle.len() <= s.len()
                    && s.windows(needle.len()).any(|w| slice_eq(w, needle, icase)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESC: u8 = b'\\';

    #[test]
    fn test_like_exact_and_wildcards() {
        assert!(string_like(b"hello", b"hello", ESC));
        assert!(!string_like(b"hello", b"help", ESC));
        assert!(string_like(b"hello", b"hel%", ESC));
        assert!(string_like(b"hello", b"%llo", ESC));
        assert!(string_like(b"hello", b"%ell%", ESC));
        assert!(string_like(b"hello", b"h_llo", ESC));
        assert!(!string_like(b"hello", b"h_llo_", ESC));
        assert!(string_like(b"hello", b"%", ESC));
        assert!(string_like(b"", b"%", ESC));
        assert!(!string_like(b"", b"_", ESC));
    }

    #[test]
    fn test_like_backtracking() {
        // `%` must be able to widen past an early partial match.
        assert!(string_like(b"abXabYab", b"%abY%", ESC));
        assert!(string_like(b"aaab", b"%aab", ESC));
        assert!(!string_like(b"aaab", b"%aac", ESC));
        assert!(string_like(b"mississippi", b"%iss%ppi", ESC));
    }

    #[test]
    fn test_like_escape() {
        assert!(string_like(b"100%", b"100\\%", ESC));
        assert!(!string_like(b"1000", b"100\\%", ESC));
        assert!(string_like(b"a_b", b"a\\_b", ESC));
        assert!(!string_like(b"axb", b"a\\_b", ESC));
        // Custom escape byte.
        assert!(string_like(b"50%", b"50#%", b'#'));
        assert!(!string_like(b"50x", b"50#%", b'#'));
        // Trailing escape byte matches itself.
        assert!(string_like(b"abc\\", b"abc\\", ESC));
    }

    #[test]
    fn test_ilike_folds_ascii_only() {
        assert!(string_ilike(b"Hello", b"hel%", ESC));
        assert!(string_ilike(b"HELLO", b"%LLo", ESC));
        assert!(!string_ilike(b"HELLO", b"%x%", ESC));
    }

    #[test]
    fn test_simple_anchor_semantics() {
        assert!(string_like_simple(b"hello", b"hello"));
        assert!(string_like_simple(b"hello", b"hel%"));
        assert!(string_like_simple(b"hello", b"%llo"));
        assert!(string_like_simple(b"say hello!", b"%hello%"));
        assert!(!string_like_simple(b"say hello!", b"hello"));
        // `_` is literal in the simple variant.
        assert!(string_like_simple(b"a_b", b"a_b"));
        assert!(!string_like_simple(b"axb", b"a_b"));
        assert!(string_ilike_simple(b"Say Hello", b"%hello"));
    }

    #[test]
    fn test_simple_empty_needle() {
        assert!(string_like_simple(b"anything", b"%"));
        assert!(string_like_simple(b"", b"%"));
        assert!(string_like_simple(b"", b""));
        assert!(!string_like_simple(b"x", b""));
    }
}
