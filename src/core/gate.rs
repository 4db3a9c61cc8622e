//! Intent gate: decides which connectors and tools apply to an utterance.
//!
//! Two strategies coexist. Leading directive tags (`[texts]`, `[emails]`,
//! `[files]`) select connectors explicitly. Without tags, a lexical pattern
//! list over the lower-cased text decides whether messaging tools are
//! offered at all. Classification never fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Variant order is the fixed retrieval order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connector {
    Texts,
    Emails,
    Files,
}

impl Connector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connector::Texts => "texts",
            Connector::Emails => "emails",
            Connector::Files => "files",
        }
    }

    fn from_tag(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "texts" => Some(Connector::Texts),
            "emails" => Some(Connector::Emails),
            "files" => Some(Connector::Files),
            _ => None,
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectors activated for one turn. Built once by the gate; there is no
/// way to change it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationSet(BTreeSet<Connector>);

impl ActivationSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, connector: Connector) -> bool {
        self.0.contains(&connector)
    }

    /// Iterates in retrieval order: texts, emails, files.
    pub fn iter(&self) -> impl Iterator<Item = Connector> + '_ {
        self.0.iter().copied()
    }

    /// Renders the set back as leading tags, e.g. `[texts][files]`.
    pub fn as_tags(&self) -> String {
        self.iter().map(|c| format!("[{c}]")).collect()
    }
}

impl FromIterator<Connector> for ActivationSet {
    fn from_iter<I: IntoIterator<Item = Connector>>(iter: I) -> Self {
        ActivationSet(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub activation: ActivationSet,
    /// Utterance with leading tags stripped. This is what retrieval, the
    /// model and the session store see.
    pub clean_query: String,
    /// Pattern gate result. Only consulted when no tag was given.
    pub tools_needed: bool,
    /// No tag, no pattern, but the wording looks like it wanted a connector.
    pub near_miss: bool,
}

static TOOL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bread\b.{0,40}\b(message|text|imessage|chat)",
        r"\bshow\b.{0,40}\b(message|text|imessage)",
        r"\bcheck\b.{0,40}\b(message|text|imessage)",
        r"\bwhat did\b.{0,40}\bsay\b",
        r"\blast\b.{0,20}\b(message|text|imessage)",
        r"\brecent\b.{0,20}\b(message|text|imessage)",
        r"\bany (new )?message",
        r"\bsend\b.{0,60}\bto\b.{0,60}(\+\d|@)",
        r"\btext\b.{0,60}\bsaying\b",
        r"\breply\b.{0,40}\bto\b",
        r"\bmessage\b.{0,40}\bfor me\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static NEAR_MISS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\b(send|reply|forward|text|email|e-mail|inbox|imessages?|messages?|texts|emails|documents?|files?)\b",
    )
    .ok()
});

/// Pattern gate over the lower-cased text.
pub fn needs_tools(text: &str) -> bool {
    let lower = text.to_lowercase();
    TOOL_PATTERNS.iter().any(|re| re.is_match(&lower))
}

fn looks_like_connector_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    NEAR_MISS.as_ref().is_some_and(|re| re.is_match(&lower))
}

/// Consumes leading tags greedily. Tags may repeat, come in any order and
/// be separated by spaces. Scanning halts at the first token that is not a
/// well-formed known tag; that token stays in the remainder.
fn strip_leading_tags(utterance: &str) -> (ActivationSet, &str) {
    let mut found = Vec::new();
    let mut rest = utterance.trim_start();

    loop {
        let candidate = rest.trim_start_matches(' ');
        let Some(body) = candidate.strip_prefix('[') else {
            break;
        };
        let Some(close) = body.find(']') else {
            break;
        };
        match Connector::from_tag(&body[..close]) {
            Some(connector) => {
                found.push(connector);
                rest = &body[close + 1..];
            }
            None => break,
        }
    }

    (found.into_iter().collect(), rest)
}

pub fn classify(utterance: &str) -> Classification {
    let (activation, rest) = strip_leading_tags(utterance);

    if !activation.is_empty() {
        return Classification {
            activation,
            clean_query: rest.trim().to_string(),
            tools_needed: false,
            near_miss: false,
        };
    }

    let clean_query = utterance.trim().to_string();
    let tools_needed = needs_tools(&clean_query);
    let near_miss = !tools_needed && looks_like_connector_request(&clean_query);

    Classification {
        activation,
        clean_query,
        tools_needed,
        near_miss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[Connector]) -> ActivationSet {
        items.iter().copied().collect()
    }

    #[test]
    fn plain_utterance_has_empty_activation_and_no_tools() {
        let c = classify("what is the capital of France?");
        assert!(c.activation.is_empty());
        assert!(!c.tools_needed);
        assert!(!c.near_miss);
        assert_eq!(c.clean_query, "what is the capital of France?");
    }

    #[test]
    fn adjacent_tags_are_all_consumed() {
        let c = classify("[texts][emails] summarize my day");
        assert_eq!(c.activation, set(&[Connector::Texts, Connector::Emails]));
        assert_eq!(c.clean_query, "summarize my day");
    }

    #[test]
    fn single_files_tag() {
        let c = classify("[files] refund policy");
        assert_eq!(c.activation, set(&[Connector::Files]));
        assert_eq!(c.clean_query, "refund policy");
    }

    #[test]
    fn tags_are_case_insensitive_and_may_repeat() {
        let c = classify("[FILES] [Texts] [files]   what changed");
        assert_eq!(c.activation, set(&[Connector::Texts, Connector::Files]));
        assert_eq!(c.clean_query, "what changed");
    }

    #[test]
    fn mid_utterance_tag_is_left_verbatim() {
        let c = classify("summarize [files] for me");
        assert!(c.activation.is_empty());
        assert_eq!(c.clean_query, "summarize [files] for me");
    }

    #[test]
    fn unknown_tag_halts_scanning() {
        let c = classify("[texts] [calendar] [emails] lunch?");
        assert_eq!(c.activation, set(&[Connector::Texts]));
        assert_eq!(c.clean_query, "[calendar] [emails] lunch?");
    }

    #[test]
    fn unclosed_bracket_is_not_a_tag() {
        let c = classify("[texts what now");
        assert!(c.activation.is_empty());
        assert_eq!(c.clean_query, "[texts what now");
    }

    #[test]
    fn tag_only_utterance_yields_empty_query() {
        let c = classify("[emails]");
        assert_eq!(c.activation, set(&[Connector::Emails]));
        assert_eq!(c.clean_query, "");
    }

    #[test]
    fn reprefixing_tags_reproduces_activation() {
        for input in [
            "[emails][texts] who wrote last",
            "[files] refund policy",
            "  [texts]   [files]hello",
        ] {
            let first = classify(input);
            let again = classify(&format!(
                "{} {}",
                first.activation.as_tags(),
                first.clean_query
            ));
            assert_eq!(first.activation, again.activation, "input: {input}");
            assert_eq!(first.clean_query, again.clean_query, "input: {input}");
        }
    }

    #[test]
    fn pattern_gate_fires_on_read_and_send_requests() {
        assert!(classify("Read my recent messages from mom").tools_needed);
        assert!(classify("send hello there to +15551234567").tools_needed);
        assert!(classify("what did Sam say yesterday").tools_needed);
        assert!(classify("any new messages?").tools_needed);
    }

    #[test]
    fn tagged_utterance_skips_pattern_gate() {
        let c = classify("[files] read my last message");
        assert!(!c.tools_needed);
    }

    #[test]
    fn near_miss_flags_connector_wording_without_match() {
        let c = classify("please email Dana about the invoice");
        assert!(!c.tools_needed);
        assert!(c.near_miss);
        assert!(c.activation.is_empty());
    }

    #[test]
    fn iteration_follows_retrieval_order() {
        let c = classify("[files][emails][texts] x");
        let order: Vec<_> = c.activation.iter().collect();
        assert_eq!(
            order,
            vec![Connector::Texts, Connector::Emails, Connector::Files]
        );
    }
}
