//! Main-phase producer selection.
//!
//! Third-party tooling may attach sidecar producers to the main phase; only
//! the primary worker's output belongs in the aggregated log.

/// Pick the first name of `preference` that is among `producers`.
///
/// Returns `None` when no preferred name is present.
pub fn select_producer<'a>(producers: &[String], preference: &'a [String]) -> Option<&'a str> {
    preference
        .iter()
        .find(|wanted| producers.iter().any(|p| p == *wanted))
        .map(String::as_str)
}
