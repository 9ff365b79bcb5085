use std::sync::LazyLock;

use regex::Regex;

static HYPHEN_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\s*\n\s*").expect("hyphen break regex is valid"));
static SPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("space run regex is valid"));

/// Flatten extracted page text into a single whitespace-normalized line.
pub fn clean_page_text(raw: &str) -> String {
    let text = raw
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{a0}', '\u{200b}'], " ");
    let text = HYPHEN_BREAK_RE.replace_all(&text, "");
    let text = text.replace('\n', " ");
    let text = SPACE_RUN_RE.replace_all(&text, " ");
    text.trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_len(window: &[String]) -> usize {
    if window.is_empty() {
        return 0;
    }
    window.iter().map(|w| char_len(w)).sum::<usize>() + window.len() - 1
}

/// Words longer than `max` are cut into `max`-char pieces so every piece fits a chunk.
fn pieces(text: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split_whitespace() {
        if char_len(word) <= max {
            out.push(word.to_string());
            continue;
        }
        let chars: Vec<char> = word.chars().collect();
        for part in chars.chunks(max) {
            out.push(part.iter().collect());
        }
    }
    out
}

/// Greedy whitespace-boundary splitter. Every chunk is at most `chunk_size` chars and
/// starts with up to `overlap` chars of trailing words from the previous chunk.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::new();
    let mut window: Vec<String> = Vec::new();

    for piece in pieces(text, chunk_size) {
        let piece_len = char_len(&piece);
        if !window.is_empty() && joined_len(&window) + 1 + piece_len > chunk_size {
            out.push(window.join(" "));

            let mut carry: Vec<String> = Vec::new();
            for w in window.iter().rev() {
                let mut candidate = carry.clone();
                candidate.push(w.clone());
                if joined_len(&candidate) > overlap {
                    break;
                }
                carry = candidate;
            }
            carry.reverse();
            window = carry;

            while !window.is_empty() && joined_len(&window) + 1 + piece_len > chunk_size {
                window.remove(0);
            }
        }
        window.push(piece);
    }
    if !window.is_empty() {
        out.push(window.join(" "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_hyphenation_and_whitespace() {
        let raw = "Garbled cir-\n  cuits are\u{a0}a  protocol\nfor\t\ttwo parties. ";
        assert_eq!(
            clean_page_text(raw),
            "Garbled circuits are a protocol for two parties."
        );
    }

    #[test]
    fn split_respects_size_and_overlap() {
        let text = (0..200).map(|i| format!("w{i:03}")).collect::<Vec<_>>().join(" ");
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 100, "chunk too long: {}", c.len());
        }
        // The second chunk starts with words carried over from the first.
        let first_tail = chunks[0].split(' ').last().unwrap();
        assert!(chunks[1].contains(first_tail));
    }

    #[test]
    fn split_cuts_overlong_words() {
        let word = "x".repeat(250);
        let chunks = split_text(&word, 100, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn split_of_empty_text_is_empty() {
        assert!(split_text("   ", 100, 10).is_empty());
    }
}
