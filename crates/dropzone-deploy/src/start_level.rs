//! Start level derivation from the deployment directory convention.
//!
//! An artifact under a directory named with exactly two decimal digits
//! (`deploy/20/web.pkg`) gets that number as its start level. The first
//! such directory in the location decides. `00` is not a usable start
//! level, so it yields the default.

/// Derive the start level for an artifact location.
#[must_use]
pub fn derive_start_level(location: &str, default_level: u32) -> u32 {
    level_from_location(location).unwrap_or(default_level)
}

/// The level named by the first two-digit directory segment of
/// `location`. `None` when there is no such segment or it is `00`.
#[must_use]
pub fn level_from_location(location: &str) -> Option<u32> {
    let mut segments = location.split('/').peekable();
    while let Some(segment) = segments.next() {
        // The last segment is the file name, not a directory.
        if segments.peek().is_none() {
            break;
        }
        if segment.len() == 2 && segment.bytes().all(|b| b.is_ascii_digit()) {
            return segment.parse::<u32>().ok().filter(|level| *level > 0);
        }
    }
    None
}
