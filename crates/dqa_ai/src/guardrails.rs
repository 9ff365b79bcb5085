use dqa_core::error::AppError;

const MARKER_OPEN: &str = "[[doc:";
const MARKER_CLOSE: &str = "]]";

/// Citation markers (`[[doc:...]]`) in order of first appearance, without duplicates.
pub fn extract_citation_markers(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(MARKER_OPEN) {
        let after = &rest[start..];
        let Some(end) = after.find(MARKER_CLOSE) else {
            break;
        };
        let marker = &after[..end + MARKER_CLOSE.len()];
        // A nested opener means the first marker was never closed.
        let inner = &marker[MARKER_OPEN.len()..marker.len() - MARKER_CLOSE.len()];
        if let Some(nested) = inner.find("[[") {
            rest = &after[MARKER_OPEN.len() + nested..];
            continue;
        }
        if !out.iter().any(|m| m == marker) {
            out.push(marker.to_string());
        }
        rest = &after[marker.len()..];
    }
    out
}

/// Require at least one citation marker in a model answer.
pub fn enforce_citations(output: &str) -> Result<(), AppError> {
    if extract_citation_markers(output).is_empty() {
        return Err(AppError::new(
            "AI_CITATION_REQUIRED",
            "Answer must cite evidence markers",
        ));
    }
    Ok(())
}
