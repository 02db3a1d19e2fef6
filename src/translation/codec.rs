//! Line-oriented text form exchanged with the LLM
//!
//! Each segment travels as `[id]<TAB>text`, `id` being its 1-based global
//! position. Replies are parsed tolerantly because models decorate ids with
//! bold markers, full-width brackets and assorted separators.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::ops::RangeInclusive;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\**\s*[\[【]?\s*(\d+)\s*[\]】]?\s*\**\s*[.．)）:：\t \x{3000}]*(.*)$")
        .expect("Invalid regex")
});

static THINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<think>.*?</think>").expect("Invalid regex")
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Collapse internal whitespace runs (newlines included) to single spaces
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// `[id]\ttext` lines for the segments in `range`
pub fn compress<S: AsRef<str>>(texts: &[S], range: RangeInclusive<usize>) -> String {
    range
        .filter_map(|i| texts.get(i).map(|t| format!("[{}]\t{}", i + 1, collapse_whitespace(t.as_ref()))))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `[id] original -> translated` lines for the overlap carried into a chunk.
/// Segments without a translation yet are skipped.
pub fn context_block<S: AsRef<str>>(
    texts: &[S],
    translations: &[Option<String>],
    range: RangeInclusive<usize>,
) -> String {
    range
        .filter_map(|i| {
            let original = texts.get(i)?;
            let translated = translations.get(i)?.as_ref()?;
            Some(format!(
                "[{}] {} -> {}",
                i + 1,
                collapse_whitespace(original.as_ref()),
                collapse_whitespace(translated)
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove `<think>` blocks reasoning models emit before their answer
pub fn strip_reasoning(output: &str) -> String {
    let stripped = THINK_RE.replace_all(output, "");
    // An unterminated block means the answer never started
    match stripped.find("<think>") {
        Some(pos) => stripped[..pos].to_string(),
        None => stripped.into_owned(),
    }
}

/// Translations keyed by 0-based segment index. Only ids inside `range` are
/// kept and the first non-empty line for an id wins; lines without a leading
/// id are ignored.
pub fn parse_reply(output: &str, range: &RangeInclusive<usize>) -> HashMap<usize, String> {
    let mut parsed = HashMap::new();

    for line in strip_reasoning(output).lines() {
        let Some(caps) = LINE_RE.captures(line) else {
            continue;
        };
        let Ok(id) = caps[1].parse::<usize>() else {
            continue;
        };
        if id == 0 || !range.contains(&(id - 1)) {
            continue;
        }

        let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        if text.is_empty() {
            continue;
        }
        parsed.entry(id - 1).or_insert_with(|| text.to_string());
    }

    parsed
}

/// Merge parsed translations back over the source texts of `range`. Missing
/// ids fall back to the original; a reply identical to the collapsed source
/// keeps the source verbatim.
pub fn merge<S: AsRef<str>>(
    texts: &[S],
    parsed: &HashMap<usize, String>,
    range: RangeInclusive<usize>,
) -> Vec<(usize, String)> {
    range
        .filter_map(|i| {
            let original = texts.get(i)?.as_ref();
            let text = match parsed.get(&i) {
                Some(t) if *t != collapse_whitespace(original) => t.clone(),
                _ => original.to_string(),
            };
            Some((i, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_uses_global_ids() {
        let texts = ["a", " Messi   scores\n again ", "c"];
        assert_eq!(compress(&texts, 1..=2), "[2]\tMessi scores again\n[3]\tc");
    }

    #[test]
    fn test_parser_accepts_decorated_ids() {
        let reply = "[1]\tfoo\n1. ignored duplicate\n**2** bar\nnot a line\n3) baz\n【4】：全角\n  5\u{3000}qux";
        let parsed = parse_reply(reply, &(0..=4));

        assert_eq!(parsed[&0], "foo");
        assert_eq!(parsed[&1], "bar");
        assert_eq!(parsed[&2], "baz");
        assert_eq!(parsed[&3], "全角");
        assert_eq!(parsed[&4], "qux");
    }

    #[test]
    fn test_parser_plain_numbered_line() {
        let parsed = parse_reply("1. foo", &(0..=0));
        assert_eq!(parsed[&0], "foo");
    }

    #[test]
    fn test_parser_ignores_ids_outside_chunk_and_empty_lines() {
        let reply = "[1]\tcontext echo\n[3]\t\n[3]\tthird\n[9]\tstray";
        let parsed = parse_reply(reply, &(1..=2));

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[&2], "third");
    }

    #[test]
    fn test_reasoning_is_stripped() {
        let reply = "<think>\n[1] draft\n</think>\n[1]\tfinal";
        assert_eq!(parse_reply(reply, &(0..=0))[&0], "final");
        assert!(parse_reply("<think>[1] never finished", &(0..=0)).is_empty());
    }

    #[test]
    fn test_identity_round_trip() {
        let texts = ["Kick off!", "  2 minutes   in ", "Goal\tfor Spain", "3-1"];
        let compressed = compress(&texts, 0..=3);
        let parsed = parse_reply(&compressed, &(0..=3));
        let merged = merge(&texts, &parsed, 0..=3);

        let merged_texts: Vec<&str> = merged.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(merged_texts, texts);
    }

    #[test]
    fn test_missing_translation_falls_back_to_original() {
        let texts = ["one", "two"];
        let parsed = parse_reply("[2]\t二", &(0..=1));
        let merged = merge(&texts, &parsed, 0..=1);

        assert_eq!(merged, vec![(0, "one".to_string()), (1, "二".to_string())]);
    }

    #[test]
    fn test_context_block_skips_untranslated() {
        let texts = ["a", "b", "c"];
        let translations = vec![Some("甲".to_string()), None, Some("丙".to_string())];
        assert_eq!(context_block(&texts, &translations, 0..=2), "[1] a -> 甲\n[3] c -> 丙");
    }
}
