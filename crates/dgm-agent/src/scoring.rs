//! Answer scoring: (expected, actual) -> correct / incorrect

use regex::Regex;
use std::sync::OnceLock;

/// Decides whether an agent's answer matches the label
pub trait Scorer: Send + Sync {
    fn is_correct(&self, expected: &str, actual: &str) -> bool;
}

/// Whitespace-trimmed string equality
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl Scorer for ExactMatch {
    fn is_correct(&self, expected: &str, actual: &str) -> bool {
        expected.trim() == actual.trim()
    }
}

/// Compares the final numeric answer of both texts
///
/// Looks for the last `#### <number>` marker, falling back to the last number
/// anywhere in the text. Commas and a trailing period are dropped. A label
/// without any number never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalAnswerMatch;

impl Scorer for FinalAnswerMatch {
    fn is_correct(&self, expected: &str, actual: &str) -> bool {
        let expected = extract_final_answer(expected);
        !expected.is_empty() && expected == extract_final_answer(actual)
    }
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"####\s*([0-9,.]+)").expect("valid regex"))
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9,.]+)").expect("valid regex"))
}

/// Extract the normalized final answer, or an empty string
pub fn extract_final_answer(text: &str) -> String {
    let last = |re: &Regex| {
        re.captures_iter(text)
            .last()
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    let raw = last(marker_pattern()).or_else(|| {
        // Bare punctuation such as "..." is not a number
        number_pattern()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|s| s.chars().any(|ch| ch.is_ascii_digit()))
            .last()
            .map(str::to_string)
    });

    match raw {
        Some(number) => number.replace(',', "").trim().trim_end_matches('.').to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prefers_marker() {
        assert_eq!(extract_final_answer("3 apples then 4\n#### 7"), "7");
        assert_eq!(extract_final_answer("#### 1,234."), "1234");
    }

    #[test]
    fn test_extract_falls_back_to_last_number() {
        assert_eq!(extract_final_answer("The answer is 12.5 dollars."), "12.5");
        assert_eq!(extract_final_answer("no numbers here..."), "");
    }

    #[test]
    fn test_final_answer_match() {
        let scorer = FinalAnswerMatch;
        assert!(scorer.is_correct("Natalia sold 48+24 = 72\n#### 72", "So the total is 72."));
        assert!(!scorer.is_correct("#### 72", "#### 73"));
        assert!(!scorer.is_correct("no label", "no answer"));
    }

    #[test]
    fn test_exact_match_trims() {
        assert!(ExactMatch.is_correct(" Paris\n", "Paris"));
        assert!(!ExactMatch.is_correct("Paris", "paris"));
    }
}
