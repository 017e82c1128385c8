//! Pattern analysis.
//!
//! A single traversal of the normalized tree plus the compiled program
//! derives the feature vector that drives engine selection, emission-mode
//! choices and streaming buffer sizing. The analyzer is side-effect-free;
//! its output is attached to the program.

use crate::compile::num_captures;
use crate::expr::{Expr, Look, RepeatKind};
use crate::inst::{Inst, Insts};

/// Structural and quantitative summary of a compiled pattern.
#[derive(Clone, Debug, Default)]
pub struct Features {
    /// Every match must begin at the start of the text.
    pub anchored_start: bool,
    /// The pattern ends with an end-of-text assertion.
    pub anchored_end: bool,
    /// The pattern has at least one user-visible capture group.
    pub has_captures: bool,
    /// At least one capture group is named.
    pub has_named_captures: bool,
    /// The pattern contains an alternation.
    pub has_alternation: bool,
    /// The pattern contains a character class.
    pub has_class: bool,
    /// The pattern contains any repetition operator.
    pub has_quantifier: bool,
    /// The pattern contains an unbounded repetition (star or plus).
    pub has_unbounded_quantifier: bool,
    /// An unbounded repetition contains another unbounded repetition.
    /// This is the catastrophic-backtracking proxy.
    pub has_nested_unbounded: bool,
    /// Some character class reaches past the one-byte UTF-8 space.
    pub has_multibyte_class: bool,
    /// The pattern uses a word boundary assertion.
    pub has_word_boundary: bool,
    /// The pattern source used a non-capturing group.
    pub has_non_capturing: bool,
    /// Every character the program can consume is ASCII, so the emitted
    /// machine may compare raw bytes instead of decoding codepoints.
    pub ascii_only: bool,
    /// The length of the instruction program; the engine cost proxy.
    pub nfa_states: usize,
    /// Capture groups including the whole match.
    pub capture_count: usize,
    /// Fewest characters a match can span.
    pub min_match_len: usize,
    /// Most characters a match can span; `None` is unbounded.
    pub max_match_len: Option<usize>,
}

impl Features {
    pub fn analyze(pattern: &str, expr: &Expr, insts: &Insts) -> Features {
        let mut f = Features {
            anchored_start: insts.anchored_begin(),
            anchored_end: insts.anchored_end(),
            nfa_states: insts.len(),
            capture_count: num_captures(insts),
            ascii_only: ascii_only(insts),
            has_non_capturing: pattern.contains("(?:"),
            ..Features::default()
        };
        f.has_captures = f.capture_count > 1;
        walk(expr, false, &mut f);
        let (min, max) = match_len(expr);
        f.min_match_len = min;
        f.max_match_len = max;
        f
    }

    /// Upper bound on the byte length of a match, for stream buffer
    /// sizing. `None` is unbounded.
    pub fn max_match_bytes(&self) -> Option<usize> {
        let per_char = if self.ascii_only { 1 } else { 4 };
        self.max_match_len.map(|n| n * per_char)
    }
}

fn walk(e: &Expr, inside_unbounded: bool, f: &mut Features) {
    match e {
        Expr::Class(cls) => {
            f.has_class = true;
            if cls.has_multibyte() {
                f.has_multibyte_class = true;
            }
        }
        Expr::AnyChar => {
            f.has_class = true;
            f.has_multibyte_class = true;
        }
        Expr::Look(look) => {
            if matches!(look, Look::WordBoundary | Look::NotWordBoundary) {
                f.has_word_boundary = true;
            }
        }
        Expr::Concat(es) => {
            for child in es {
                walk(child, inside_unbounded, f);
            }
        }
        Expr::Alternate(es) => {
            f.has_alternation = true;
            for child in es {
                walk(child, inside_unbounded, f);
            }
        }
        Expr::Repeat { e, kind, .. } => {
            f.has_quantifier = true;
            let unbounded = matches!(
                kind,
                RepeatKind::ZeroOrMore
                    | RepeatKind::OneOrMore
                    | RepeatKind::Range { max: None, .. }
            );
            if unbounded {
                f.has_unbounded_quantifier = true;
                if inside_unbounded {
                    f.has_nested_unbounded = true;
                }
                // An unbounded repetition whose body can match empty has
                // the same blowup shape as nesting: the stack engine
                // could retry the empty iteration forever, so such
                // patterns are routed to the linear engines too.
                if match_len(e).0 == 0 {
                    f.has_nested_unbounded = true;
                }
            }
            walk(e, inside_unbounded || unbounded, f);
        }
        Expr::Group { e, name, .. } => {
            if name.is_some() {
                f.has_named_captures = true;
            }
            walk(e, inside_unbounded, f);
        }
        Expr::Empty | Expr::Literal(_) => {}
    }
}

/// Min and max match length in characters, computed recursively.
fn match_len(e: &Expr) -> (usize, Option<usize>) {
    match e {
        Expr::Empty | Expr::Look(_) => (0, Some(0)),
        Expr::Literal(_) | Expr::Class(_) | Expr::AnyChar => (1, Some(1)),
        Expr::Concat(es) => {
            let mut min = 0usize;
            let mut max = Some(0usize);
            for child in es {
                let (cmin, cmax) = match_len(child);
                min = min.saturating_add(cmin);
                max = match (max, cmax) {
                    (Some(a), Some(b)) => Some(a.saturating_add(b)),
                    _ => None,
                };
            }
            (min, max)
        }
        Expr::Alternate(es) => {
            let mut min = usize::MAX;
            let mut max = Some(0usize);
            for child in es {
                let (cmin, cmax) = match_len(child);
                min = min.min(cmin);
                max = match (max, cmax) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
            if es.is_empty() {
                (0, Some(0))
            } else {
                (min, max)
            }
        }
        Expr::Repeat { e, kind, .. } => {
            let (cmin, cmax) = match_len(e);
            match kind {
                RepeatKind::ZeroOrOne => (0, cmax),
                RepeatKind::ZeroOrMore => (0, unbounded_max(cmax)),
                RepeatKind::OneOrMore => (cmin, unbounded_max(cmax)),
                RepeatKind::Range { min, max } => (
                    cmin.saturating_mul(*min as usize),
                    match (cmax, max) {
                        (Some(cm), Some(m)) => {
                            Some(cm.saturating_mul(*m as usize))
                        }
                        _ => None,
                    },
                ),
            }
        }
        Expr::Group { e, .. } => match_len(e),
    }
}

/// A star or plus over something that can consume is unbounded; over a
/// zero-width body it stays zero-width.
fn unbounded_max(child_max: Option<usize>) -> Option<usize> {
    match child_max {
        Some(0) => Some(0),
        _ => None,
    }
}

fn ascii_only(insts: &Insts) -> bool {
    insts.iter().all(|inst| match inst {
        Inst::Char(i) => i.c.is_ascii(),
        Inst::Ranges(r) => r.is_ascii(),
        Inst::Any(_) => false,
        _ => true,
    })
}

/// The closed set of feature labels exposed by the analysis interface.
/// Sorted for deterministic equality comparison.
pub fn feature_labels(f: &Features) -> Vec<&'static str> {
    let mut labels = Vec::new();
    if f.anchored_start || f.anchored_end {
        labels.push("Anchored");
    }
    if f.has_alternation {
        labels.push("Alternation");
    }
    if f.has_captures {
        labels.push("Captures");
    }
    if f.has_class {
        labels.push("CharClass");
    }
    if f.has_multibyte_class || !f.ascii_only {
        labels.push("Multibyte");
    }
    if f.has_non_capturing {
        labels.push("NonCapturing");
    }
    if f.has_quantifier {
        labels.push("Quantifiers");
    }
    if f.has_multibyte_class {
        labels.push("UnicodeCharClass");
    }
    if f.has_word_boundary {
        labels.push("WordBoundary");
    }
    if labels.is_empty() {
        labels.push("Simple");
    }
    labels.sort_unstable();
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn features(pattern: &str) -> Features {
        Program::new(pattern).unwrap().features
    }

    #[test]
    fn date_pattern() {
        let f = features(r"(\d{4})-(\d{2})-(\d{2})");
        assert!(f.has_captures);
        assert!(!f.has_named_captures);
        assert_eq!(f.capture_count, 4);
        assert_eq!(f.min_match_len, 10);
        assert_eq!(f.max_match_len, Some(10));
        // \d is Unicode-aware, so the machine must decode codepoints.
        assert!(!f.ascii_only);
        assert!(!f.has_nested_unbounded);
    }

    #[test]
    fn nested_unbounded_detected() {
        assert!(features(r"(a+)+b").has_nested_unbounded);
        assert!(features(r"(?:a*b)*").has_nested_unbounded);
        assert!(!features(r"a+b+").has_nested_unbounded);
        assert!(!features(r"(?:ab){2,}").has_nested_unbounded
            || features(r"(?:ab){2,}").has_unbounded_quantifier);
    }

    #[test]
    fn unbounded_lengths() {
        let f = features(r"a+");
        assert_eq!(f.min_match_len, 1);
        assert_eq!(f.max_match_len, None);
        let f = features(r"a*");
        assert_eq!(f.min_match_len, 0);
        assert_eq!(f.max_match_len, None);
        let f = features(r"a{2,5}");
        assert_eq!(f.min_match_len, 2);
        assert_eq!(f.max_match_len, Some(5));
    }

    #[test]
    fn alternation_lengths() {
        let f = features(r"foo|ba");
        assert_eq!(f.min_match_len, 2);
        assert_eq!(f.max_match_len, Some(3));
    }

    #[test]
    fn ascii_only_flips_on_unicode() {
        assert!(features(r"[a-z]+").ascii_only);
        assert!(!features(r"\w+").ascii_only);
        assert!(!features(r"é").ascii_only);
        assert!(!features(r".").ascii_only);
    }

    #[test]
    fn labels_are_sorted_and_deterministic() {
        let f = features(r"(?:a|b)+\d");
        let labels = feature_labels(&f);
        let mut sorted = labels.clone();
        sorted.sort_unstable();
        assert_eq!(labels, sorted);
        assert!(labels.contains(&"Alternation"));
        assert!(labels.contains(&"Quantifiers"));
        assert!(labels.contains(&"NonCapturing"));
    }

    #[test]
    fn simple_label_for_plain_literal() {
        let f = features("abc");
        assert_eq!(feature_labels(&f), vec!["Simple"]);
    }
}
