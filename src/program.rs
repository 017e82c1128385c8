use crate::analyze::Features;
use crate::compile::{num_captures, Compiler};
use crate::error::Error;
use crate::expr::Expr;
use crate::inst::{Inst, Insts};
use crate::simplify::simplify;

/// Program represents a compiled regular expression. Once an expression is
/// compiled, its representation is immutable: the instruction sequence, the
/// capture name table and the feature vector never change, and the emitters
/// only read from it.
#[derive(Clone, Debug)]
pub struct Program {
    /// The original regular expression string.
    pub pattern: String,
    /// A sequence of instructions; instruction 0 is the entry point.
    pub insts: Insts,
    /// The sequence of capture group names. There is an entry for each
    /// capture group index and a name exists only if the group is named.
    /// Index 0 is the whole match and is always unnamed.
    pub cap_names: Vec<Option<String>>,
    /// Structural and quantitative summary used for engine selection and
    /// streaming setup.
    pub features: Features,
}

impl Program {
    /// Parses, normalizes, lowers and analyzes a pattern.
    pub fn new(pattern: &str) -> Result<Program, Error> {
        let expr = simplify(Expr::parse(pattern)?);
        let (insts, mut cap_names) = Compiler::new().compile(&expr);
        // Groups can be sparse only if the parser produced them that way;
        // make sure the name table spans every referenced slot.
        let ncaps = num_captures(&insts);
        if cap_names.len() < ncaps {
            cap_names.resize(ncaps, None);
        }
        let features = Features::analyze(pattern, &expr, &insts);
        Ok(Program {
            pattern: pattern.to_string(),
            insts,
            cap_names,
            features,
        })
    }

    /// Returns the total number of capture groups in the regular
    /// expression, including the zeroth capture for the whole match.
    pub fn num_captures(&self) -> usize {
        num_captures(&self.insts)
    }

    /// The number of capture slots: two per group.
    pub fn num_slots(&self) -> usize {
        2 * self.num_captures()
    }

    /// Resolves a group name to its index.
    pub fn capture_index(&self, name: &str) -> Option<usize> {
        self.cap_names
            .iter()
            .position(|n| n.as_deref() == Some(name))
    }

    /// The distinct UTF-8 leading bytes a match can start with, when that
    /// set is small enough to drive a byte scan. `None` when the pattern is
    /// anchored, can match empty, or starts too many ways.
    ///
    /// This is the single-byte analog of the prefix literal machinery in
    /// the interpreting engines: unanchored find loops skip ahead with
    /// `memchr` over these bytes instead of stepping one position at a
    /// time.
    pub fn prefix_bytes(&self) -> Option<Vec<u8>> {
        if self.features.anchored_start || self.features.min_match_len == 0 {
            return None;
        }
        let mut bytes: Vec<u8> = Vec::new();
        let mut seen = vec![false; self.insts.len()];
        let mut stack = vec![0usize];
        while let Some(pc) = stack.pop() {
            if seen[pc] {
                continue;
            }
            seen[pc] = true;
            match &self.insts[pc] {
                Inst::Save(i) => stack.push(i.goto),
                Inst::EmptyLook(i) => stack.push(i.goto),
                Inst::Split(i) => {
                    stack.push(i.goto1);
                    stack.push(i.goto2);
                }
                Inst::Char(i) => {
                    let mut buf = [0u8; 4];
                    let b = i.c.encode_utf8(&mut buf).as_bytes()[0];
                    if !bytes.contains(&b) {
                        bytes.push(b);
                    }
                }
                Inst::Ranges(r) => {
                    if r.negated {
                        return None;
                    }
                    for &(lo, hi) in &r.ranges {
                        // A range wider than a few characters rarely has a
                        // small leading-byte set; give up early.
                        if (hi as u32) - (lo as u32) > 8 {
                            return None;
                        }
                        for cp in lo as u32..=hi as u32 {
                            let c = match char::from_u32(cp) {
                                Some(c) => c,
                                None => continue,
                            };
                            let mut buf = [0u8; 4];
                            let b = c.encode_utf8(&mut buf).as_bytes()[0];
                            if !bytes.contains(&b) {
                                bytes.push(b);
                            }
                            if bytes.len() > 3 {
                                return None;
                            }
                        }
                    }
                }
                Inst::Any(_) => return None,
                Inst::Match | Inst::Fail => return None,
            }
            if bytes.len() > 3 {
                return None;
            }
        }
        if bytes.is_empty() {
            None
        } else {
            bytes.sort_unstable();
            Some(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_bytes_for_literal_head() {
        let p = Program::new("foo|far").unwrap();
        assert_eq!(p.prefix_bytes(), Some(vec![b'f']));
    }

    #[test]
    fn prefix_bytes_for_small_alternation() {
        let p = Program::new("(?:cat|dog)").unwrap();
        assert_eq!(p.prefix_bytes(), Some(vec![b'c', b'd']));
    }

    #[test]
    fn no_prefix_for_anchored() {
        let p = Program::new("^abc").unwrap();
        assert_eq!(p.prefix_bytes(), None);
    }

    #[test]
    fn no_prefix_for_possibly_empty() {
        let p = Program::new("a*").unwrap();
        assert_eq!(p.prefix_bytes(), None);
    }

    #[test]
    fn no_prefix_for_wide_class() {
        let p = Program::new(r"\w+").unwrap();
        assert_eq!(p.prefix_bytes(), None);
    }

    #[test]
    fn capture_index_by_name() {
        let p = Program::new("(?P<user>a)@(?P<domain>b)").unwrap();
        assert_eq!(p.capture_index("user"), Some(1));
        assert_eq!(p.capture_index("domain"), Some(2));
        assert_eq!(p.capture_index("missing"), None);
    }
}
