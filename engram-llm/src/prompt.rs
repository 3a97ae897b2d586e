//! Prompt templates for the two chat uses the memory engine has:
//! compaction summaries and answer polishing.
//!
//! Templates are compiled-in constants with `{key}` placeholders; both
//! builders return `(system_prompt, user_prompt)` pairs ready for
//! [`crate::ChatClient::simple_chat`].

/// System prompt for memory-batch summarization.
pub const SUMMARIZE_SYSTEM: &str = r"You condense a batch of personal memory snippets into one short summary.

RULES:
- One or two sentences, third person neutral.
- Keep concrete names, places, and recurring topics.
- No commentary, no bullet points, no preamble.";

/// User prompt for memory-batch summarization.
pub const SUMMARIZE_USER: &str = r"Summarize these {count} memory snippets into one retrieval-friendly note:

{memories}";

/// System prompt for polishing a template-synthesized answer.
pub const POLISH_SYSTEM: &str = r"You rewrite a draft answer to a personal-memory question so it reads naturally.

RULES:
- Preserve every fact in the draft. Add nothing.
- One or two sentences, conversational tone.
- If the draft says there is no information, keep that meaning.";

/// User prompt for polishing a template-synthesized answer.
pub const POLISH_USER: &str = r"Question: {question}
Draft answer: {draft}

Rewrite the draft answer.";

/// Simple template interpolation: replaces `{key}` with the value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Build the summarization prompt pair for a batch of memory contents.
#[must_use]
pub fn summarize_memories(contents: &[&str]) -> (String, String) {
    let joined = contents
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let count = contents.len().to_string();
    let user = render_template(
        SUMMARIZE_USER,
        &[("count", count.as_str()), ("memories", joined.as_str())],
    );
    (SUMMARIZE_SYSTEM.to_string(), user)
}

/// Build the answer-polish prompt pair.
#[must_use]
pub fn polish_answer(question: &str, draft: &str) -> (String, String) {
    let user = render_template(POLISH_USER, &[("question", question), ("draft", draft)]);
    (POLISH_SYSTEM.to_string(), user)
}
