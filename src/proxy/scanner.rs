//! Path scanner (§4.9): given a stored seed request and a dictionary of
//! path suffixes, replay one freshly generated request per entry and
//! keep whichever come back non-404.
//!
//! No original Go source exists for this; implemented per REDESIGN
//! FLAGS #2, which calls out a bug pattern in the retrieved sources'
//! sibling tools (reusing one seed request/response across every
//! dictionary entry instead of sending a new request per iteration) to
//! avoid reproducing here even though it isn't attested directly.

use crate::error::Result;
use crate::models::RequestData;
use crate::proxy::replay::ReplayClient;
use hyper::StatusCode;
use std::path::Path;
use tracing::{debug, warn};

pub struct ScanHit {
    pub suffix: String,
    pub path: String,
    pub status: StatusCode,
}

/// Try each `dictionary` entry as a path suffix against `seed`'s host,
/// sending a distinct, freshly built request per entry. Stops at the
/// first replay error and returns whatever hits were already found.
pub async fn scan(replay: &ReplayClient, seed: &RequestData, dictionary: &[String]) -> Result<Vec<ScanHit>> {
    let mut hits = Vec::new();

    for suffix in dictionary {
        let trimmed_suffix = suffix.trim_start_matches('/').to_string();
        let mut attempt = seed.clone();
        attempt.path = format!("/{trimmed_suffix}");
        attempt.query_params = Default::default();
        attempt.body = Vec::new();

        let response = match replay.replay(&attempt).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, suffix, "scanner stopping at first replay error");
                break;
            }
        };

        if response.status() != StatusCode::NOT_FOUND {
            debug!(suffix, status = %response.status(), "scanner hit");
            hits.push(ScanHit {
                suffix: trimmed_suffix,
                path: attempt.path.clone(),
                status: response.status(),
            });
        }
    }

    Ok(hits)
}

/// Load a dictionary file: one path suffix per line, blank lines skipped.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_dictionary_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "admin\n\nlogin\n").unwrap();
        let words = load_dictionary(file.path()).unwrap();
        assert_eq!(words, vec!["admin".to_string(), "login".to_string()]);
    }
}
