//! Utility macros and functions for the MSRP crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the MSRP crate implementation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(header.len() <= max_header_bytes, ParseError::too_large_header(header.len(), max_header_bytes));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Generates `len` random US-ASCII alphanumeric characters.
///
/// Used for transaction ids and message ids, which must be opaque to the peer.
pub(crate) fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Finds the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_alphanumeric() {
        let id = random_alphanumeric(8);
        assert_eq!(id.len(), 8);
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn find_subsequence_positions() {
        assert_eq!(find_subsequence(b"abc\r\ndef", b"\r\n"), Some(3));
        assert_eq!(find_subsequence(b"abc", b"\r\n"), None);
        assert_eq!(find_subsequence(b"", b"\r\n"), None);
    }
}
