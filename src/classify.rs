//! Text vs. binary classification of captured output.

use unicode_width::UnicodeWidthChar;

/// Returns `true` if the rune should be considered unprintable for binary
/// detection purposes: control and other zero-information characters, but
/// not whitespace. Invalid UTF-8 is handled separately by the caller.
fn is_unprintable(ch: char) -> bool {
    !ch.is_whitespace() && ch.width().is_none()
}

/// Determines whether captured data should be treated as binary output.
///
/// Data is binary if it contains a NUL byte or if more than 10% of it is
/// unprintable. The threshold is compared against the *byte* count rather
/// than the rune count; this slightly undercounts for multi-byte text but
/// allows terminating the scan as soon as the threshold is exceeded.
pub(crate) fn is_binary(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    let threshold = data.len() / 10;
    let mut unprintable = 0;

    for chunk in data.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if ch == '\0' {
                return true;
            }
            if is_unprintable(ch) {
                unprintable += 1;
                if unprintable > threshold {
                    return true;
                }
            }
        }
        // Each byte of an ill-formed sequence counts as one unprintable rune.
        unprintable += chunk.invalid().len();
        if !chunk.invalid().is_empty() && unprintable > threshold {
            return true;
        }
    }

    false
}
