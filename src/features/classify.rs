//! Templated-message classification.
//!
//! Pure and total: no I/O, terminates for any input. A message is a template
//! iff at least one canned-response marker or the mention-colon structure is
//! present.

use crate::core::types::Classification;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;
use std::sync::OnceLock;

/// Canned apology / response phrases, English then Chinese. Order is the
/// reporting order of matched markers.
pub const TEMPLATE_MARKERS: &[&str] = &[
    "sorry for the inconvenience",
    "we apologize for",
    "we apologise for",
    "sorry to hear",
    "thank you for your patience",
    "thanks for your patience",
    "thank you for reaching out",
    "thanks for reaching out",
    "please open a ticket",
    "please contact support",
    "our team will get back to you",
    "we have received your feedback",
    "we are looking into it",
    "we're looking into it",
    "很抱歉给您带来不便",
    "抱歉给您带来不便",
    "给您带来的不便",
    "非常抱歉",
    "感谢您的耐心",
    "感谢你的耐心",
    "感谢您的反馈",
    "我们已收到",
    "请提交工单",
    "请联系客服",
    "我们正在处理",
];

/// Label reported when the structural marker matches.
pub const MENTION_COLON_MARKER: &str = "@mention:";

static MARKER_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
static MENTION_COLON: OnceLock<Regex> = OnceLock::new();

fn marker_matcher() -> &'static AhoCorasick {
    MARKER_MATCHER.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(TEMPLATE_MARKERS)
            .expect("valid template markers")
    })
}

fn mention_colon() -> &'static Regex {
    MENTION_COLON.get_or_init(|| {
        // `@name:` / `@name：`: the mention token directly followed by a colon.
        Regex::new(r"@[^\s@:：]{1,64}[:：]").expect("valid mention pattern")
    })
}

pub fn classify(text: &str) -> Classification {
    let mut hit = vec![false; TEMPLATE_MARKERS.len()];
    for m in marker_matcher().find_overlapping_iter(text) {
        hit[m.pattern().as_usize()] = true;
    }
    let mut markers: Vec<String> = TEMPLATE_MARKERS
        .iter()
        .zip(hit)
        .filter(|(_, h)| *h)
        .map(|(m, _)| m.to_string())
        .collect();

    if mention_colon().is_match(text) {
        markers.push(MENTION_COLON_MARKER.to_string());
    }

    Classification {
        is_template: !markers.is_empty(),
        markers,
    }
}

pub fn is_template(text: &str) -> bool {
    classify(text).is_template
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chat_is_not_template() {
        assert!(!is_template("anyone up for a match tonight?"));
        assert!(!is_template(""));
        assert!(!is_template("email me at someone@example.com"));
        assert!(!is_template("time is 10:30"));
    }

    #[test]
    fn test_every_marker_alone_is_template() {
        for marker in TEMPLATE_MARKERS {
            let text = format!("xx {} yy", marker);
            assert!(is_template(&text), "marker not detected: {marker}");
        }
    }

    #[test]
    fn test_case_insensitive_english() {
        let c = classify("Hi! SORRY FOR THE INCONVENIENCE, please open a ticket.");
        assert!(c.is_template);
        assert_eq!(
            c.markers,
            vec!["sorry for the inconvenience", "please open a ticket"]
        );
    }

    #[test]
    fn test_chinese_markers() {
        let c = classify("非常抱歉，我们正在处理您的问题");
        assert!(c.is_template);
        assert!(c.markers.iter().any(|m| m == "非常抱歉"));
        assert!(c.markers.iter().any(|m| m == "我们正在处理"));
    }

    #[test]
    fn test_mention_colon_structure() {
        assert!(is_template("@alice: your order shipped"));
        assert!(is_template("@小明：已经处理"));
        assert!(!is_template("@alice your order shipped"));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let text = "@bob: thanks for your patience";
        assert_eq!(classify(text), classify(text));
    }
}
