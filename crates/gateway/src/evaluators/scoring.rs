use aegis_common::types::{Severity, TextSpan, Violation};

/// A lexicon entry: the term to look for, the score penalty it carries,
/// and the severity of the resulting violation.
pub struct Term {
    pub term: &'static str,
    pub penalty: f64,
    pub severity: Severity,
}

pub const fn term(term: &'static str, penalty: f64, severity: Severity) -> Term {
    Term {
        term,
        penalty,
        severity,
    }
}

/// One lexicon match with its location in the scanned text.
pub struct TermHit<'a> {
    pub entry: &'a Term,
    pub span: TextSpan,
}

/// Case-insensitive scan for every occurrence of every lexicon term.
/// Matches are whole-word (ASCII alphanumeric boundaries).
pub fn scan_terms<'a>(text: &str, lexicon: &'a [Term]) -> Vec<TermHit<'a>> {
    let lowered = text.to_lowercase();
    let mut hits = Vec::new();

    for entry in lexicon {
        let needle = entry.term;
        let mut from = 0;
        while let Some(offset) = lowered[from..].find(needle) {
            let start = from + offset;
            let end = start + needle.len();

            let boundary_before = start == 0
                || !lowered[..start]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_ascii_alphanumeric());
            let boundary_after = end >= lowered.len()
                || !lowered[end..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric());

            if boundary_before && boundary_after {
                hits.push(TermHit {
                    entry,
                    span: TextSpan { start, end },
                });
            }
            from = end;
        }
    }

    hits.sort_by_key(|h| h.span.start);
    hits
}

/// Score after applying penalties: 1.0 minus the summed penalties,
/// clamped to [0,1].
pub fn penalized_score(hits: &[TermHit<'_>]) -> f64 {
    clamp01(1.0 - hits.iter().map(|h| h.entry.penalty).sum::<f64>())
}

/// Construct a violation for a lexicon hit.
pub fn hit_violation(
    kind: &str,
    hit: &TermHit<'_>,
    message: String,
    suggestions: Vec<String>,
) -> Violation {
    Violation {
        violation_type: kind.to_string(),
        severity: hit.entry.severity,
        message,
        confidence: 0.7 + 0.3 * hit.entry.penalty.min(1.0),
        location: Some(hit.span),
        suggestions,
    }
}

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Population variance of a score set. Empty input has no spread.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Tokenize into lowercase alphanumeric words of 3+ chars — shared by the
/// overlap heuristics in the accuracy evaluator.
pub fn content_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect()
}
