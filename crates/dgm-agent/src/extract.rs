//! Pull program text out of an oracle reply

use regex::Regex;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Optional language tag line on the opening fence, lazily matched body
    PATTERN.get_or_init(|| {
        Regex::new(r"```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?([\s\S]+?)\s*```").expect("valid regex")
    })
}

/// Extract the code from a reply
///
/// Returns the body of the first fenced block if there is one, otherwise the
/// whole trimmed reply. The result may be empty; emptiness is the caller's
/// call to make.
pub fn extract_code(reply: &str) -> String {
    if let Some(body) = fenced_block()
        .captures(reply)
        .and_then(|c| c.get(1))
    {
        return body.as_str().trim().to_string();
    }
    reply.trim().to_string()
}
