use dqa_core::config::ControllerConfig;
use dqa_core::domain::ConversationTurn;

use crate::evidence::EvidenceItem;

const HISTORY_ANSWER_CHARS: usize = 600;

/// How much evidence text a single prompt may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_context_chars: usize,
    pub snippet_chars: usize,
}

impl From<&ControllerConfig> for ContextBudget {
    fn from(c: &ControllerConfig) -> Self {
        Self {
            max_context_chars: c.max_context_chars,
            snippet_chars: c.snippet_chars,
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

/// Whole blocks only: once the budget is spent the remaining items are left out.
/// The first block is always included.
pub fn evidence_blocks(evidence: &[EvidenceItem], budget: ContextBudget) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for item in evidence {
        let c = &item.chunk;
        let block = format!(
            "{} source={} pages={} score={:.3}\n{}",
            item.citation().marker,
            c.source_document,
            c.page_range,
            item.score,
            truncate_chars(c.text.trim(), budget.snippet_chars)
        );
        let len = block.chars().count();
        if used > 0 && used + len > budget.max_context_chars {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n---\n\n");
        }
        out.push_str(&block);
        used += len;
    }
    out
}

pub fn history_block(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "(none)".to_string();
    }
    history
        .iter()
        .map(|t| {
            format!(
                "User: {}\nAssistant: {}",
                t.question.trim(),
                truncate_chars(t.answer.trim(), HISTORY_ANSWER_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn decision_prompt(
    question: &str,
    round_number: u32,
    max_rounds: u32,
    queries_issued: &[String],
    history: &str,
    evidence_blocks: &str,
) -> String {
    let issued = queries_issued
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You decide whether the retrieved document excerpts are enough to answer the user's question.

Rules (non-negotiable):
1) Judge ONLY from the excerpts below. Do not use outside knowledge.
2) If the excerpts support a clear answer, set "continue" to false.
3) If they are insufficient but point to related terms or sections, set "continue" to true and put a short, more specific search phrase (at most 20 words) in "next_query".
4) Never propose a query that was already issued.

Retrieval round: {round_number} of {max_rounds}

Queries already issued:
{issued}

Conversation so far:
{history}

Question:
{question}

Excerpts:
{evidence_blocks}

Output:
- Return a single JSON object and nothing else, no Markdown fences.
- Shape: {{"continue": <bool>, "next_query": <string or null>, "rationale": <one sentence>}}
"#
    )
}

pub fn answer_prompt(question: &str, history: &str, evidence_blocks: &str) -> String {
    format!(
        r#"You answer questions about a collection of documents.

Rules (non-negotiable):
1) Use ONLY the excerpts provided below. Do not invent facts.
2) Every claim MUST carry the citation marker of the excerpt supporting it, copied exactly as shown, e.g. [[doc:paper.pdf|p:3|c:12]].
3) If the excerpts do not contain the answer, say so plainly and do not cite.
4) Answer in the language of the question.

Conversation so far:
{history}

Question:
{question}

Excerpts:
{evidence_blocks}

Output:
- Return the answer as plain text with inline citation markers.
"#
    )
}

/// At most `max_chars` characters; a cut is marked with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let mut s = text[..cut].to_string();
            s.push_str("...");
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("短文本", 10), "短文本");
    }
}
