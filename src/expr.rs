use regex_syntax::hir::{self, Hir, HirKind};
use regex_syntax::ParserBuilder;

use crate::error::Error;

/// A syntax tree for a single regular expression, owned by this crate.
///
/// The parser is taken as given: a pattern string is parsed by `regex-syntax`
/// and its HIR is converted into this tree. Conversion is also where
/// unsupported constructs are rejected, so everything downstream can assume
/// the full node set is compilable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Matches the empty string.
    Empty,
    /// Matches one specific codepoint.
    Literal(char),
    /// Matches one codepoint inside a set of ranges.
    Class(CharClass),
    /// Matches any one codepoint.
    AnyChar,
    /// Matches each child in sequence.
    Concat(Vec<Expr>),
    /// Matches the first child that matches, in order.
    Alternate(Vec<Expr>),
    /// A repetition of the child expression.
    Repeat {
        e: Box<Expr>,
        kind: RepeatKind,
        greedy: bool,
    },
    /// A capture group. Index 0 is reserved for the whole match and never
    /// appears in a tree.
    Group {
        e: Box<Expr>,
        index: u32,
        name: Option<String>,
    },
    /// A zero-width assertion.
    Look(Look),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepeatKind {
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
    Range { min: u32, max: Option<u32> },
}

/// The zero-width assertions understood by the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Look {
    StartText,
    EndText,
    WordBoundary,
    NotWordBoundary,
}

/// A sorted, non-overlapping sequence of codepoint ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharClass {
    ranges: Vec<(char, char)>,
}

impl CharClass {
    pub fn new(mut ranges: Vec<(char, char)>) -> CharClass {
        ranges.sort();
        ranges.dedup();
        CharClass { ranges }
    }

    pub fn ranges(&self) -> &[(char, char)] {
        &self.ranges
    }

    pub fn contains(&self, c: char) -> bool {
        self.ranges
            .binary_search_by(|&(lo, hi)| {
                if hi < c {
                    std::cmp::Ordering::Less
                } else if lo > c {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// True iff every range lies inside the ASCII block.
    pub fn is_ascii(&self) -> bool {
        self.ranges.last().map_or(true, |&(_, hi)| hi <= '\x7f')
    }

    /// True iff some range reaches past the one-byte UTF-8 space.
    pub fn has_multibyte(&self) -> bool {
        !self.is_ascii()
    }

    /// True iff the class covers the entire codepoint space.
    pub fn is_all(&self) -> bool {
        self.ranges == [('\0', '\u{d7ff}'), ('\u{e000}', '\u{10ffff}')]
            || self.ranges == [('\0', char::MAX)]
    }

    /// The complement of this class over the valid codepoint space.
    pub fn complement(&self) -> CharClass {
        let mut out = Vec::new();
        let mut next = Some('\0');
        for &(lo, hi) in &self.ranges {
            if let Some(n) = next {
                if n < lo {
                    out.push((n, prev_char(lo)));
                }
            }
            next = succ_char(hi);
        }
        if let Some(n) = next {
            out.push((n, char::MAX));
        }
        // Drop the surrogate gap so the complement stays scalar-value only.
        let out = out
            .into_iter()
            .flat_map(|(lo, hi)| {
                if lo <= '\u{d7ff}' && hi >= '\u{e000}' {
                    vec![(lo, '\u{d7ff}'), ('\u{e000}', hi)]
                } else {
                    vec![(lo, hi)]
                }
            })
            .collect();
        CharClass { ranges: out }
    }

    /// The number of codepoints the class matches.
    pub fn num_chars(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(lo, hi)| 1 + (hi as u64) - (lo as u64))
            .sum()
    }
}

fn prev_char(c: char) -> char {
    match c {
        '\u{e000}' => '\u{d7ff}',
        c => char::from_u32(c as u32 - 1).unwrap_or('\0'),
    }
}

fn succ_char(c: char) -> Option<char> {
    match c {
        '\u{d7ff}' => Some('\u{e000}'),
        char::MAX => None,
        c => char::from_u32(c as u32 + 1),
    }
}

impl Expr {
    /// Parses a pattern and converts it into this crate's tree.
    pub fn parse(pattern: &str) -> Result<Expr, Error> {
        let hir = ParserBuilder::new().build().parse(pattern)?;
        from_hir(&hir)
    }

    /// True iff the expression or any descendant is a capture group.
    pub fn has_captures(&self) -> bool {
        match self {
            Expr::Group { .. } => true,
            Expr::Concat(es) | Expr::Alternate(es) => {
                es.iter().any(Expr::has_captures)
            }
            Expr::Repeat { e, .. } => e.has_captures(),
            _ => false,
        }
    }
}

fn from_hir(hir: &Hir) -> Result<Expr, Error> {
    match hir.kind() {
        HirKind::Empty => Ok(Expr::Empty),
        HirKind::Literal(hir::Literal(bytes)) => {
            let s = std::str::from_utf8(bytes).map_err(|_| {
                Error::Unsupported("non-UTF-8 literal".to_string())
            })?;
            let mut chars: Vec<Expr> = s.chars().map(Expr::Literal).collect();
            match chars.len() {
                0 => Ok(Expr::Empty),
                1 => Ok(chars.pop().unwrap()),
                _ => Ok(Expr::Concat(chars)),
            }
        }
        HirKind::Class(cls) => class_expr(cls),
        HirKind::Look(look) => {
            use regex_syntax::hir::Look as L;
            let look = match look {
                L::Start => Look::StartText,
                L::End => Look::EndText,
                L::WordAscii | L::WordUnicode => Look::WordBoundary,
                L::WordAsciiNegate | L::WordUnicodeNegate => {
                    Look::NotWordBoundary
                }
                other => {
                    return Err(Error::Unsupported(format!(
                        "assertion {other:?}"
                    )))
                }
            };
            Ok(Expr::Look(look))
        }
        HirKind::Repetition(rep) => {
            let e = Box::new(from_hir(&rep.sub)?);
            let kind = match (rep.min, rep.max) {
                (0, Some(1)) => RepeatKind::ZeroOrOne,
                (0, None) => RepeatKind::ZeroOrMore,
                (1, None) => RepeatKind::OneOrMore,
                (min, max) => RepeatKind::Range { min, max },
            };
            Ok(Expr::Repeat { e, kind, greedy: rep.greedy })
        }
        HirKind::Capture(cap) => Ok(Expr::Group {
            e: Box::new(from_hir(&cap.sub)?),
            index: cap.index,
            name: cap.name.as_ref().map(|n| n.to_string()),
        }),
        HirKind::Concat(subs) => {
            let mut es = Vec::with_capacity(subs.len());
            for sub in subs {
                es.push(from_hir(sub)?);
            }
            Ok(Expr::Concat(es))
        }
        HirKind::Alternation(subs) => {
            let mut es = Vec::with_capacity(subs.len());
            for sub in subs {
                es.push(from_hir(sub)?);
            }
            Ok(Expr::Alternate(es))
        }
    }
}

fn class_expr(cls: &hir::Class) -> Result<Expr, Error> {
    let ranges: Vec<(char, char)> = match cls {
        hir::Class::Unicode(u) => {
            u.iter().map(|r| (r.start(), r.end())).collect()
        }
        hir::Class::Bytes(b) => {
            // Byte classes only appear for non-Unicode patterns. ASCII-only
            // ones translate cleanly; anything above 0x7f would need a
            // byte-oriented machine this compiler does not build.
            if b.iter().any(|r| r.end() > 0x7f) {
                return Err(Error::Unsupported(
                    "non-ASCII byte class".to_string(),
                ));
            }
            b.iter()
                .map(|r| (r.start() as char, r.end() as char))
                .collect()
        }
    };
    if ranges.is_empty() {
        return Err(Error::Unsupported("empty character class".to_string()));
    }
    let class = CharClass::new(ranges);
    if class.is_all() {
        Ok(Expr::AnyChar)
    } else if class.ranges.len() == 1 && class.ranges[0].0 == class.ranges[0].1
    {
        Ok(Expr::Literal(class.ranges[0].0))
    } else {
        Ok(Expr::Class(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_run_becomes_concat() {
        let e = Expr::parse("abc").unwrap();
        assert_eq!(
            e,
            Expr::Concat(vec![
                Expr::Literal('a'),
                Expr::Literal('b'),
                Expr::Literal('c'),
            ])
        );
    }

    #[test]
    fn dot_all_is_any_char() {
        let e = Expr::parse("(?s).").unwrap();
        assert_eq!(e, Expr::AnyChar);
    }

    #[test]
    fn single_char_class_collapses_to_literal() {
        let e = Expr::parse("[a]").unwrap();
        assert_eq!(e, Expr::Literal('a'));
    }

    #[test]
    fn named_group_keeps_its_name() {
        let e = Expr::parse("(?P<user>x)").unwrap();
        match e {
            Expr::Group { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name.as_deref(), Some("user"));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn line_anchors_are_rejected() {
        assert!(matches!(
            Expr::parse("(?m)^a"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn complement_of_digit_class() {
        let cls = CharClass::new(vec![('0', '9')]);
        let comp = cls.complement();
        assert!(!comp.contains('5'));
        assert!(comp.contains('a'));
        assert!(comp.contains('\0'));
        assert!(comp.contains(char::MAX));
    }
}
