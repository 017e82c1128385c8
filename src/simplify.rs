//! Syntax-tree normalization.
//!
//! Two structural rewrites run before lowering: a simplification pass that
//! collapses degenerate shapes, and an unrolling pass that replaces small
//! exact repetitions with explicit concatenation so the emitted machine has
//! no counter loops for them. The normalizer is idempotent: running it on
//! its own output returns the same tree.

use crate::expr::{Expr, RepeatKind};

/// The weighted-cost ceiling below which an exact repetition is unrolled.
/// Keeps any unroll site under roughly thirty nodes after expansion.
const UNROLL_COST_LIMIT: usize = 10;

/// Normalizes a parsed tree. Takes ownership; rewrites never renumber
/// capture groups.
pub fn simplify(e: Expr) -> Expr {
    unroll(collapse(e))
}

fn collapse(e: Expr) -> Expr {
    match e {
        Expr::Concat(es) => {
            let mut out = Vec::with_capacity(es.len());
            for child in es {
                match collapse(child) {
                    Expr::Empty => {}
                    Expr::Concat(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            match out.len() {
                0 => Expr::Empty,
                1 => out.pop().unwrap(),
                _ => Expr::Concat(out),
            }
        }
        Expr::Alternate(es) => {
            let mut out = Vec::with_capacity(es.len());
            for child in es {
                match collapse(child) {
                    Expr::Alternate(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            match out.len() {
                0 => Expr::Empty,
                1 => out.pop().unwrap(),
                _ => Expr::Alternate(out),
            }
        }
        Expr::Repeat { e, kind, greedy } => {
            let e = collapse(*e);
            if e == Expr::Empty {
                return Expr::Empty;
            }
            let kind = match kind {
                RepeatKind::Range { min: 0, max: Some(0) } => {
                    return Expr::Empty
                }
                RepeatKind::Range { min: 1, max: Some(1) } => return e,
                RepeatKind::Range { min: 0, max: Some(1) } => {
                    RepeatKind::ZeroOrOne
                }
                RepeatKind::Range { min: 0, max: None } => {
                    RepeatKind::ZeroOrMore
                }
                RepeatKind::Range { min: 1, max: None } => {
                    RepeatKind::OneOrMore
                }
                k => k,
            };
            Expr::Repeat { e: Box::new(e), kind, greedy }
        }
        Expr::Group { e, index, name } => Expr::Group {
            e: Box::new(collapse(*e)),
            index,
            name,
        },
        leaf => leaf,
    }
}

fn unroll(e: Expr) -> Expr {
    match e {
        Expr::Repeat { e, kind, greedy } => {
            let body = unroll(*e);
            if let RepeatKind::Range { min, max: Some(max) } = kind {
                // Only exact {2} and {3}, only when the body is cheap, and
                // only when no capture group would be duplicated: copies of
                // a capture would all write the same slot.
                if min == max
                    && (2..=3).contains(&min)
                    && cost(&body) < UNROLL_COST_LIMIT
                    && !body.has_captures()
                {
                    let copies =
                        (0..min).map(|_| body.clone()).collect::<Vec<_>>();
                    return collapse(Expr::Concat(copies));
                }
            }
            Expr::Repeat { e: Box::new(body), kind, greedy }
        }
        Expr::Concat(es) => {
            collapse(Expr::Concat(es.into_iter().map(unroll).collect()))
        }
        Expr::Alternate(es) => {
            Expr::Alternate(es.into_iter().map(unroll).collect())
        }
        Expr::Group { e, index, name } => Expr::Group {
            e: Box::new(unroll(*e)),
            index,
            name,
        },
        leaf => leaf,
    }
}

/// Node count weighted by operation kind. Concatenation, alternation and
/// captures add one on top of their children; repetitions add two.
fn cost(e: &Expr) -> usize {
    match e {
        Expr::Concat(es) | Expr::Alternate(es) => {
            1 + es.iter().map(cost).sum::<usize>()
        }
        Expr::Repeat { e, .. } => 2 + cost(e),
        Expr::Group { e, .. } => 1 + cost(e),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn norm(pattern: &str) -> Expr {
        simplify(Expr::parse(pattern).unwrap())
    }

    #[test]
    fn empty_children_are_dropped() {
        assert!(norm("a()c").has_captures());
        assert_eq!(norm("(?:)a"), Expr::Literal('a'));
    }

    #[test]
    fn exact_one_collapses() {
        assert_eq!(norm("a{1}"), Expr::Literal('a'));
    }

    #[test]
    fn exact_zero_is_empty() {
        assert_eq!(norm("a{0}b"), Expr::Literal('b'));
    }

    #[test]
    fn question_star_plus_rewrites() {
        assert!(matches!(
            norm("a{0,1}"),
            Expr::Repeat { kind: RepeatKind::ZeroOrOne, .. }
        ));
        assert!(matches!(
            norm("a{0,}"),
            Expr::Repeat { kind: RepeatKind::ZeroOrMore, .. }
        ));
        assert!(matches!(
            norm("a{1,}"),
            Expr::Repeat { kind: RepeatKind::OneOrMore, .. }
        ));
    }

    #[test]
    fn small_exact_repeat_unrolls() {
        assert_eq!(
            norm("a{3}"),
            Expr::Concat(vec![
                Expr::Literal('a'),
                Expr::Literal('a'),
                Expr::Literal('a'),
            ])
        );
    }

    #[test]
    fn unroll_flattens_into_surrounding_concat() {
        assert_eq!(
            norm("x(?:ab){2}"),
            Expr::Concat(vec![
                Expr::Literal('x'),
                Expr::Literal('a'),
                Expr::Literal('b'),
                Expr::Literal('a'),
                Expr::Literal('b'),
            ])
        );
    }

    #[test]
    fn capturing_repeat_is_left_alone() {
        assert!(matches!(
            norm("(ab){2}"),
            Expr::Repeat { kind: RepeatKind::Range { min: 2, max: Some(2) }, .. }
        ));
    }

    #[test]
    fn expensive_repeat_is_left_alone() {
        // The body costs well over the limit, so {2} survives.
        assert!(matches!(
            norm("(?:abcdefghijkl){2}"),
            Expr::Repeat { .. }
        ));
    }

    #[test]
    fn idempotent() {
        for p in ["a{3}", "x(?:ab){2}", "(a+)+b", "(?:a|b|c)*", "a{2,5}"] {
            let once = norm(p);
            assert_eq!(simplify(once.clone()), once, "pattern {p}");
        }
    }
}
