//! Grounding instruction and token-bounded context assembly.
//!
//! Token counting prefers the `tiktoken-rs` encoding for the generation model, then
//! `cl100k_base`, and finally a whitespace counter when no encoding can be loaded.

use std::sync::Arc;
use tiktoken_rs::{cl100k_base, get_bpe_from_model};

/// Counts the tokens in a string.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// System instruction restricting the generator to the supplied context.
pub const SYSTEM_INSTRUCTION: &str = "You are a document-grounded assistant. Answer ONLY with \
information explicitly stated in the CONTEXT provided by the user. If the answer is not in the \
context, reply exactly: \"This information is not available in the provided documents.\" Never \
use outside knowledge or guess. Cite the bracketed source numbers you relied on.";

/// One retrieved passage eligible for the context block.
#[derive(Debug, Clone)]
pub struct ContextPassage {
    /// Owning document.
    pub document_id: String,
    /// Similarity score.
    pub score: f32,
    /// Passage text.
    pub text: String,
}

/// Build the token counter for `model`.
pub fn build_token_counter(model: &str) -> TokenCounter {
    let encoding = get_bpe_from_model(model.trim()).or_else(|_| cl100k_base());
    match encoding {
        Ok(bpe) => {
            let bpe = Arc::new(bpe);
            Arc::new(move |text: &str| bpe.encode_ordinary(text).len())
        }
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_counter()
        }
    }
}

/// Counter that treats each whitespace-separated word as one token.
pub fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

/// Concatenate passages in order until `max_tokens` is reached.
///
/// Returns the context block and how many passages it contains. A first passage larger than the
/// whole budget is cut down word by word so the context is never empty when passages exist.
pub fn assemble_context(
    passages: &[ContextPassage],
    max_tokens: usize,
    counter: &TokenCounter,
) -> (String, usize) {
    let mut context = String::new();
    let mut used = 0;
    let mut included = 0;

    for (position, passage) in passages.iter().enumerate() {
        let block = format_block(position + 1, passage, &passage.text);
        let cost = counter(&block);
        if used + cost <= max_tokens {
            context.push_str(&block);
            used += cost;
            included += 1;
            continue;
        }
        if included == 0 {
            let header_cost = counter(&format_block(position + 1, passage, ""));
            let remaining = max_tokens.saturating_sub(header_cost);
            let trimmed = take_tokens(&passage.text, remaining, counter);
            if !trimmed.is_empty() {
                context.push_str(&format_block(position + 1, passage, &trimmed));
                included = 1;
            }
        }
        break;
    }

    (context, included)
}

/// Render the user prompt from the context block and question.
pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!("CONTEXT:\n{context}\nQUESTION: {question}\n\nAnswer using only the context above.")
}

fn format_block(index: usize, passage: &ContextPassage, text: &str) -> String {
    format!(
        "[{index}] document {} (score {:.3})\n{}\n\n",
        passage.document_id, passage.score, text
    )
}

fn take_tokens(text: &str, budget: usize, counter: &TokenCounter) -> String {
    let mut taken = String::new();
    for word in text.split_whitespace() {
        let candidate = if taken.is_empty() {
            word.to_string()
        } else {
            format!("{taken} {word}")
        };
        if counter(&candidate) > budget {
            break;
        }
        taken = candidate;
    }
    taken
}
