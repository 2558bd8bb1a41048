//! Keyword extraction.
//!
//! Turns free text into the normalized term set used by the keyword index:
//! lower-cased, split on punctuation, stop words removed, plural suffixes
//! folded. Pure and deterministic.

use std::collections::{BTreeMap, BTreeSet};

/// Short tokens that carry meaning in test-case text and survive the
/// minimum-length filter.
const SHORT_TERMS: &[&str] = &["ai", "db", "id", "ip", "os", "qa", "ui", "ux"];

const MIN_TERM_LEN: usize = 3;

/// English stop words.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "an",
    "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "be", "became", "because", "become", "becomes", "becoming", "been",
    "before", "beforehand", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "done", "down",
    "due", "during", "each", "either", "else", "elsewhere", "enough", "etc", "even", "ever",
    "every", "everyone", "everything", "everywhere", "except", "few", "for", "former",
    "formerly", "from", "further", "had", "has", "hasnt", "have", "having", "he", "hence", "her",
    "here", "hereafter", "hereby", "herein", "hers", "herself", "him", "himself", "his", "how",
    "however", "i", "ie", "if", "in", "indeed", "into", "is", "it", "its", "itself", "just",
    "last", "latter", "least", "less", "many", "may", "me", "meanwhile", "might", "mine", "more",
    "moreover", "most", "mostly", "much", "must", "my", "myself", "namely", "neither", "never",
    "nevertheless", "next", "no", "nobody", "none", "nor", "not", "nothing", "now", "nowhere",
    "of", "off", "often", "on", "once", "one", "only", "onto", "or", "other", "others",
    "otherwise", "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps", "please",
    "rather", "same", "seem", "seemed", "seeming", "seems", "several", "she", "should", "since",
    "so", "some", "somehow", "someone", "something", "sometime", "sometimes", "somewhere",
    "still", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "thence", "there", "thereafter", "thereby", "therefore", "therein", "thereupon", "these",
    "they", "this", "those", "though", "through", "throughout", "thru", "thus", "to",
    "together", "too", "toward", "towards", "under", "until", "up", "upon", "us", "very", "via",
    "was", "we", "well", "were", "what", "whatever", "when", "whence", "whenever", "where",
    "whereafter", "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which",
    "while", "whither", "who", "whoever", "whole", "whom", "whose", "why", "will", "with",
    "within", "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Extract the normalized term set from `text`.
///
/// Hyphenated and underscored compounds contribute both the compound and
/// its parts, so `push-notification` matches a query for `push notification`.
/// Empty or whitespace-only input yields an empty set.
pub fn extract_terms(text: &str) -> BTreeSet<String> {
    term_frequencies(text).into_keys().collect()
}

/// Term frequencies for `text`, with the same normalization as [`extract_terms`].
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut freqs = BTreeMap::new();
    for token in tokenize(text) {
        let mut emit = |t: &str| {
            if let Some(term) = normalize_token(t) {
                *freqs.entry(term).or_insert(0) += 1;
            }
        };
        if token.contains(is_joiner) {
            for part in token.split(is_joiner) {
                emit(part);
            }
        }
        emit(&token);
    }
    freqs
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|raw| raw.trim_matches(is_joiner).to_lowercase())
        .filter(|t| !t.is_empty())
}

fn is_joiner(c: char) -> bool {
    c == '-' || c == '_'
}

fn normalize_token(token: &str) -> Option<String> {
    if token.is_empty() || STOP_WORDS.contains(&token) {
        return None;
    }
    if token.chars().count() < MIN_TERM_LEN && !SHORT_TERMS.contains(&token) {
        return None;
    }
    Some(stem(token))
}

/// Fold common English plural suffixes.
fn stem(term: &str) -> String {
    if !term.chars().all(|c| c.is_ascii_alphabetic()) {
        return term.to_string();
    }
    let len = term.len();
    if len > 4 && term.ends_with("ies") {
        return format!("{}y", &term[..len - 3]);
    }
    if len > 4 && term.ends_with("sses") {
        return term[..len - 2].to_string();
    }
    if len > MIN_TERM_LEN
        && term.ends_with('s')
        && !term.ends_with("ss")
        && !term.ends_with("us")
        && !term.ends_with("is")
    {
        return term[..len - 1].to_string();
    }
    term.to_string()
}
