use common::{
    error::AppError,
    storage::chunk_store::{ChunkPreview, ChunkStore},
};
use tracing::debug;

/// A citation marker found in a generated answer.
///
/// The model is instructed to cite as `[n](chunk:<chunk_id>)`; when it
/// falls back to a bare `citation-<n>` token instead, the marker carries
/// no chunk id and can never resolve to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationMarker {
    Chunk { label: u32, chunk_id: String },
    Fallback { marker: String },
}

/// Classification of a marker against the chunk store.
#[derive(Debug, Clone, PartialEq)]
pub enum CitationOutcome {
    /// The cited chunk exists; the preview carries its provenance.
    Resolved {
        label: u32,
        chunk_id: String,
        preview: ChunkPreview,
    },
    /// A `citation-<n>` token with no chunk id behind it.
    Fallback { marker: String },
    /// The marker names a chunk that no longer exists, e.g. because its
    /// document was deleted after the answer was generated.
    Dangling { label: u32, chunk_id: String },
}

/// Scans an answer for citation markers, in order of appearance with
/// duplicates removed. Malformed bracket constructs are skipped, never an
/// error: answers are model output and arrive in whatever shape they do.
pub fn scan_markers(answer: &str) -> Vec<CitationMarker> {
    let mut markers = Vec::new();

    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some((marker, end)) = parse_chunk_marker(answer, i) {
                push_unique(&mut markers, marker);
                i = end;
                continue;
            }
        }
        if answer[i..].starts_with("citation-") && is_token_start(bytes, i) {
            if let Some((marker, end)) = parse_fallback_marker(answer, i) {
                push_unique(&mut markers, marker);
                i = end;
                continue;
            }
        }
        // Advance one character, not one byte.
        i += answer[i..].chars().next().map_or(1, char::len_utf8);
    }

    markers
}

/// Scans the answer and classifies every marker against the store.
/// Lookup errors other than not-found propagate.
pub async fn resolve_markers(
    chunk_store: &ChunkStore,
    answer: &str,
) -> Result<Vec<CitationOutcome>, AppError> {
    let markers = scan_markers(answer);
    let mut outcomes = Vec::with_capacity(markers.len());

    for marker in markers {
        match marker {
            CitationMarker::Fallback { marker } => {
                outcomes.push(CitationOutcome::Fallback { marker });
            }
            CitationMarker::Chunk { label, chunk_id } => {
                match chunk_store.fetch_by_id(&chunk_id).await {
                    Ok(preview) => outcomes.push(CitationOutcome::Resolved {
                        label,
                        chunk_id,
                        preview,
                    }),
                    Err(AppError::NotFound(_)) => {
                        debug!(chunk_id, "citation points at a missing chunk");
                        outcomes.push(CitationOutcome::Dangling { label, chunk_id });
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    Ok(outcomes)
}

/// Whether a chunk id passed by a client is really a fallback token the
/// model emitted instead of a citation.
pub fn is_fallback_marker(chunk_id: &str) -> bool {
    chunk_id
        .strip_prefix("citation-")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Parses `[n](chunk:<id>)` starting at the `[`. Returns the marker and
/// the byte offset just past the closing `)`.
fn parse_chunk_marker(answer: &str, start: usize) -> Option<(CitationMarker, usize)> {
    let rest = &answer[start + 1..];
    let close = rest.find(']')?;
    let label: u32 = rest[..close].parse().ok()?;

    let after_bracket = &rest[close + 1..];
    let body = after_bracket.strip_prefix("(chunk:")?;
    let end = body.find(')')?;
    let chunk_id = &body[..end];
    if chunk_id.is_empty() || !chunk_id.bytes().all(is_id_byte) {
        return None;
    }

    let consumed = start + 1 + close + 1 + "(chunk:".len() + end + 1;
    Some((
        CitationMarker::Chunk {
            label,
            chunk_id: chunk_id.to_string(),
        },
        consumed,
    ))
}

/// Parses a bare `citation-<n>` token starting at the `c`.
fn parse_fallback_marker(answer: &str, start: usize) -> Option<(CitationMarker, usize)> {
    let digits_start = start + "citation-".len();
    let digits_len = answer[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }

    let end = digits_start + digits_len;
    // Must end at a token boundary: "citation-12x" is not a marker.
    if answer.as_bytes().get(end).copied().is_some_and(is_id_byte) {
        return None;
    }

    Some((
        CitationMarker::Fallback {
            marker: answer[start..end].to_string(),
        },
        end,
    ))
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_token_start(bytes: &[u8], i: usize) -> bool {
    i == 0 || !is_id_byte(bytes[i - 1])
}

fn push_unique(markers: &mut Vec<CitationMarker>, marker: CitationMarker) {
    if !markers.contains(&marker) {
        markers.push(marker);
    }
}
