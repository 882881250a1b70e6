//! Summary and reply-draft generation.
//!
//! Three generation paths share one invariant: the model is never allowed to
//! emit a sign-off. Residual closing lines are stripped from whatever comes
//! back, and for outgoing replies the canonical sign-off block is appended
//! exactly once by [`finalize_reply`].

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::llm::{LlmClient, LlmError};

pub const NO_CONTENT_PLACEHOLDER: &str = "(No content)";

/// Bodies at or under this many characters (and without a line break) are
/// passed through untouched; trivial mail like "ok" never hits the model.
pub const SHORT_BODY_LIMIT: usize = 40;

const SNIPPET_LIMIT: usize = 150;

/// Fixed closing block appended to every outgoing reply.
#[derive(Debug, Clone)]
pub struct SignOff {
    pub closing: String,
    pub organization: String,
}

impl SignOff {
    pub fn new(closing: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            closing: closing.into(),
            organization: organization.into(),
        }
    }

    pub fn block(&self) -> String {
        format!("{}\n{}", self.closing, self.organization)
    }
}

fn sign_off_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*(best regards|kind regards|warm regards|best wishes|best|regards|sincerely|thank you|thanks|cheers|take care)[ \t]*[,.!]?[ \t]*$",
        )
        .expect("sign-off pattern compiles")
    })
}

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank-run pattern compiles"))
}

/// Normalize newlines and collapse runs of blank lines so generated text
/// always reads as double-newline-separated paragraphs.
pub fn ensure_formatted(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    blank_run_regex()
        .replace_all(&normalized, "\n\n")
        .trim()
        .to_string()
}

/// Drop a trailing sign-off block: the first line consisting solely of a
/// common closing phrase, and everything after it. Heuristic by design; a
/// mid-body line that is exactly "Thanks," is indistinguishable from a
/// closing.
pub fn strip_trailing_sign_off(text: &str) -> String {
    match sign_off_line_regex().find(text) {
        Some(found) => text[..found.start()].trim_end().to_string(),
        None => text.trim_end().to_string(),
    }
}

/// Deterministic summary used when generation is disabled or fails: first
/// line as greeting, the rest flattened and trimmed to a short snippet with
/// any sign-off removed.
pub fn fallback_summary(normalized: &str) -> String {
    let mut lines = normalized.lines().filter(|line| !line.trim().is_empty());
    let greeting = lines.next().unwrap_or("").trim().to_string();
    let rest = lines.collect::<Vec<_>>().join("\n");
    let rest = strip_trailing_sign_off(&rest);
    let flattened = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    let snippet: String = flattened.chars().take(SNIPPET_LIMIT).collect();
    let snippet = snippet.trim().to_string();

    if greeting.is_empty() {
        if snippet.is_empty() {
            NO_CONTENT_PLACEHOLDER.to_string()
        } else {
            snippet
        }
    } else if snippet.is_empty() {
        greeting
    } else {
        format!("{}\n\n{}", greeting, snippet)
    }
}

fn summary_prompt(normalized: &str) -> String {
    format!(
        "Rewrite this email into exactly this format. Output ONLY:\n\
         1) One line: the greeting only (e.g. \"Dear Yaroslavl,\" or \"Hi,\").\n\
         2) A blank line.\n\
         3) One or two sentences that summarize the main point of the email. \
         Do not include any sign-off (no Best, Sincerely, Regards, Thanks, etc.). \
         Do not include closings.\n\n\
         Email:\n{}",
        normalized
    )
}

/// Produce the greeting+synopsis block for a normalized body. Never errors;
/// generation problems degrade to the deterministic fallback.
pub async fn summary_block(llm: &LlmClient, normalized: &str) -> String {
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return NO_CONTENT_PLACEHOLDER.to_string();
    }
    if trimmed.chars().count() <= SHORT_BODY_LIMIT && !trimmed.contains('\n') {
        return trimmed.to_string();
    }
    if !llm.is_enabled() {
        return fallback_summary(normalized);
    }

    match llm.complete(&summary_prompt(normalized), 200).await {
        Ok(text) => {
            let cleaned = strip_trailing_sign_off(&ensure_formatted(&text));
            if cleaned.is_empty() {
                fallback_summary(normalized)
            } else {
                cleaned
            }
        }
        Err(err) => {
            warn!("summary generation failed, using fallback: {}", err);
            fallback_summary(normalized)
        }
    }
}

fn reply_prompt(intent: &str, recipient: &str) -> String {
    format!(
        "You are a professional email assistant. The user wants to reply to an email.\n\
         Convert their short message into a polite, respectful, professional email.\n\n\
         Rules:\n\
         - Start with \"Dear [recipient name],\" (e.g. Dear Nguyen Phan Anh). Put a comma only \
         at the end of the greeting line; do not put commas between parts of the name. Do not use \"Hi\".\n\
         - Use proper paragraph breaks (blank line between paragraphs)\n\
         - Do not include any sign-off, closing phrase, or signature; the signature is appended separately\n\
         - Output plain text only, well-formatted with double newlines between paragraphs\n\
         - Keep tone professional and friendly\n\n\
         User's message: {}\n\
         Recipient name (for greeting): {}",
        intent,
        if recipient.trim().is_empty() { "there" } else { recipient }
    )
}

fn edit_prompt(draft: &str, feedback: &str) -> String {
    format!(
        "You are a professional email assistant. The user wants to modify this draft email.\n\n\
         Current draft:\n{}\n\n\
         User's edit request: {}\n\n\
         Apply the changes. Keep the \"Dear [recipient name],\" greeting style. Do not include \
         any sign-off, closing phrase, or signature; the signature is appended separately.\n\
         Output the revised email only, well-formatted with double newlines between paragraphs.",
        draft, feedback
    )
}

/// Strip any residual closing and append the canonical sign-off block once.
pub fn finalize_reply(text: &str, sign_off: &SignOff) -> String {
    let formatted = ensure_formatted(text);
    if formatted.ends_with(&sign_off.block()) {
        return formatted;
    }
    let body = strip_trailing_sign_off(&formatted);
    if body.is_empty() {
        sign_off.block()
    } else {
        format!("{}\n\n{}", body, sign_off.block())
    }
}

/// Expand a user's short reply intent into a full draft, finalized with the
/// canonical sign-off.
pub async fn draft_reply(
    llm: &LlmClient,
    intent: &str,
    recipient: &str,
    sign_off: &SignOff,
) -> Result<String, LlmError> {
    let text = llm.complete(&reply_prompt(intent, recipient), 500).await?;
    Ok(finalize_reply(&text, sign_off))
}

/// Apply free-text feedback to an existing draft, finalized with the
/// canonical sign-off. The draft handed to the model includes the current
/// sign-off so edits stay anchored to the text the user is looking at.
pub async fn apply_edit(
    llm: &LlmClient,
    draft: &str,
    feedback: &str,
    sign_off: &SignOff,
) -> Result<String, LlmError> {
    let text = llm.complete(&edit_prompt(draft, feedback), 800).await?;
    Ok(finalize_reply(&text, sign_off))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_body;

    fn sign_off() -> SignOff {
        SignOff::new("Best regards,", "The Team")
    }

    #[test]
    fn empty_body_yields_placeholder() {
        assert_eq!(fallback_summary(""), NO_CONTENT_PLACEHOLDER);
        assert_eq!(fallback_summary("   \n  "), NO_CONTENT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn short_body_short_circuits() {
        let llm = LlmClient::new(None, "http://localhost:1", "test-model");
        assert_eq!(summary_block(&llm, "ok").await, "ok");
        assert_eq!(summary_block(&llm, "").await, NO_CONTENT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn long_body_falls_back_when_disabled() {
        let llm = LlmClient::new(None, "http://localhost:1", "test-model");
        let normalized = normalize_body("Hi,\n\nCan we meet Friday?\n\nBest,\nJane");
        assert_eq!(
            summary_block(&llm, &normalized).await,
            "Hi,\n\nCan we meet Friday?"
        );
    }

    #[test]
    fn fallback_strips_sign_off_and_keeps_greeting() {
        let normalized = normalize_body("Hello team,\n\nThe report is ready.\n\nThanks,\nBob");
        assert_eq!(
            fallback_summary(&normalized),
            "Hello team,\n\nThe report is ready."
        );
    }

    #[test]
    fn single_line_body_survives_the_fallback() {
        assert_eq!(
            fallback_summary("just one line of text that runs a bit longer than forty characters"),
            "just one line of text that runs a bit longer than forty characters"
        );
    }

    #[test]
    fn fallback_truncates_long_snippets() {
        let long_line = "word ".repeat(80);
        let body = format!("Hi,\n{}", long_line);
        let out = fallback_summary(&body);
        let snippet = out.split("\n\n").nth(1).expect("snippet present");
        assert!(snippet.chars().count() <= 150);
    }

    #[test]
    fn strip_only_removes_whole_closing_lines() {
        let body = "Thanks for the update.\nThe rest still stands.";
        assert_eq!(strip_trailing_sign_off(body), body);

        let with_closing = "The rest still stands.\nBest,\nJane";
        assert_eq!(strip_trailing_sign_off(with_closing), "The rest still stands.");
    }

    #[test]
    fn finalize_appends_sign_off_exactly_once() {
        let draft = "Dear Jane,\n\nFriday works for me.";
        let out = finalize_reply(draft, &sign_off());
        assert_eq!(out, "Dear Jane,\n\nFriday works for me.\n\nBest regards,\nThe Team");
        assert_eq!(out.matches("Best regards,").count(), 1);
    }

    #[test]
    fn finalize_replaces_model_emitted_closings() {
        let draft = "Dear Jane,\n\nFriday works for me.\n\nSincerely,\nSome Bot";
        let out = finalize_reply(draft, &sign_off());
        assert!(out.ends_with("Best regards,\nThe Team"));
        assert!(!out.contains("Sincerely"));
        assert_eq!(out.matches("Best regards,").count(), 1);
    }

    #[test]
    fn finalize_does_not_duplicate_canonical_block() {
        let draft = "Dear Jane,\n\nFriday works for me.\n\nBest regards,\nThe Team";
        let out = finalize_reply(draft, &sign_off());
        assert_eq!(out.matches("Best regards,\nThe Team").count(), 1);
    }

    #[test]
    fn finalize_of_bare_closing_still_signs() {
        let out = finalize_reply("Cheers!", &sign_off());
        assert_eq!(out, "Best regards,\nThe Team");
    }

    #[test]
    fn finalize_collapses_excess_blank_lines() {
        let draft = "Dear Jane,\n\n\n\nFriday works.\r\n\r\nSee you.";
        let out = finalize_reply(draft, &sign_off());
        assert_eq!(
            out,
            "Dear Jane,\n\nFriday works.\n\nSee you.\n\nBest regards,\nThe Team"
        );
    }
}
