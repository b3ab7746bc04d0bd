//! Parse-then-repair-once decoding of language model JSON replies.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Decode a model reply as `T`.
///
/// The reply is first parsed as-is. If that fails, exactly one repair pass
/// runs: the first balanced `{...}` span is cut out of the reply (dropping
/// prose, code fences and trailing chatter) and parsed. There is no further
/// retry.
pub fn parse_llm_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let strict_err = match serde_json::from_str::<T>(response.trim()) {
        Ok(parsed) => return Ok(parsed),
        Err(e) => e,
    };

    debug!("Strict JSON parse failed ({}), attempting repair", strict_err);

    let candidate = first_balanced_object(response).ok_or_else(|| {
        anyhow!(
            "No JSON object found in response ({}): {}",
            strict_err,
            preview(response)
        )
    })?;

    serde_json::from_str(candidate)
        .with_context(|| format!("JSON structure mismatch after repair: {}", preview(candidate)))
}

/// Return the first balanced `{...}` span of `text`, borrowed from it.
///
/// Braces inside JSON string literals (including escaped quotes) do not
/// count towards nesting. Spans are tried from each `{` in order; the first
/// one that closes wins.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .find_map(|(start, _)| balanced_from(text, start))
}

fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
