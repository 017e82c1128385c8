use std::ops::Deref;

use crate::expr::Look;

/// InstIdx represents the index of an instruction in a compiled program.
pub type InstIdx = usize;

/// Insts is a sequence of instructions.
///
/// Instruction 0 is always the entry point. Every non-terminal instruction
/// carries the index of its successor explicitly, so the program is a
/// directly addressable graph rather than a fall-through list.
#[derive(Clone, Debug)]
pub struct Insts {
    insts: Vec<Inst>,
}

impl Insts {
    /// Create a new instruction sequence.
    ///
    /// A `Vec<Inst>` can be created with the program builder.
    pub fn new(insts: Vec<Inst>) -> Self {
        Insts { insts }
    }

    /// If pc is an index to a no-op instruction (like Save), then return the
    /// next pc that is not a no-op instruction.
    pub fn skip(&self, mut pc: usize) -> usize {
        loop {
            match self[pc] {
                Inst::Save(ref i) => pc = i.goto,
                _ => return pc,
            }
        }
    }

    /// Return true if and only if the program is anchored at the start of
    /// search text.
    ///
    /// Instruction 0 is the opening Save for the whole match, so the probe
    /// looks through it.
    pub fn anchored_begin(&self) -> bool {
        match self.get(self.skip(0)) {
            Some(Inst::EmptyLook(inst)) => inst.look == Look::StartText,
            _ => false,
        }
    }

    /// Return true if and only if the last real step of the pattern is an
    /// end-of-text assertion.
    pub fn anchored_end(&self) -> bool {
        // The closing Save sits just before Match; the instruction before
        // that Save is the last real step of the pattern.
        let m = match self.iter().position(|i| matches!(i, Inst::Match)) {
            Some(m) => m,
            None => return false,
        };
        match m.checked_sub(2).and_then(|i| self.get(i)) {
            Some(Inst::EmptyLook(inst)) => inst.look == Look::EndText,
            _ => false,
        }
    }
}

impl Deref for Insts {
    type Target = [Inst];

    fn deref(&self) -> &Self::Target {
        &*self.insts
    }
}

/// Inst is an instruction code in a compiled program.
#[derive(Clone, Debug)]
pub enum Inst {
    /// Match indicates that the program has reached a match state.
    Match,
    /// Fail aborts the current path unconditionally. Unreachable by
    /// construction; emitted as defensive dead code.
    Fail,
    /// Save causes the program to save the current location of the input in
    /// the slot indicated by InstSave.
    Save(InstSave),
    /// Split causes the program to diverge to one of two paths in the
    /// program, preferring goto1 in InstSplit.
    Split(InstSplit),
    /// EmptyLook represents a zero-width assertion: it consumes no input and
    /// fails the path if the assertion does not hold.
    EmptyLook(InstEmptyLook),
    /// Char requires the program to match the character in InstChar at the
    /// current position in the input.
    Char(InstChar),
    /// Ranges requires the character at the current position to fall inside
    /// (or, when negated, outside) the ranges in InstRanges.
    Ranges(InstRanges),
    /// Any advances over one character of any value, failing only on
    /// exhausted input.
    Any(InstAny),
}

impl Inst {
    /// The successor of this instruction, if it has exactly one.
    pub fn goto(&self) -> Option<InstIdx> {
        match self {
            Inst::Save(i) => Some(i.goto),
            Inst::EmptyLook(i) => Some(i.goto),
            Inst::Char(i) => Some(i.goto),
            Inst::Ranges(i) => Some(i.goto),
            Inst::Any(i) => Some(i.goto),
            Inst::Match | Inst::Fail | Inst::Split(_) => None,
        }
    }

    /// True iff the instruction consumes one character on success.
    pub fn is_consuming(&self) -> bool {
        matches!(self, Inst::Char(_) | Inst::Ranges(_) | Inst::Any(_))
    }
}

/// Representation of the Save instruction.
#[derive(Clone, Debug)]
pub struct InstSave {
    /// The next location to execute in the program.
    pub goto: InstIdx,
    /// The capture slot (there are two slots for every capture group,
    /// including the zeroth capture for the entire match).
    pub slot: usize,
}

/// Representation of the Split instruction.
#[derive(Clone, Debug)]
pub struct InstSplit {
    /// The first instruction to try. A match resulting from following goto1
    /// has precedence over a match resulting from following goto2.
    pub goto1: InstIdx,
    /// The second instruction to try, pushed as a backtrack point.
    pub goto2: InstIdx,
}

/// Representation of the EmptyLook instruction.
#[derive(Clone, Debug)]
pub struct InstEmptyLook {
    /// The next location to execute in the program if this instruction
    /// succeeds.
    pub goto: InstIdx,
    /// The type of zero-width assertion to check.
    pub look: Look,
}

impl InstEmptyLook {
    /// Tests whether the pair of characters around a position satisfies
    /// this assertion. `prev`/`next` are the characters before and after
    /// the position, absent at the text boundaries.
    pub fn matches(&self, prev: Option<char>, next: Option<char>) -> bool {
        match self.look {
            Look::StartText => prev.is_none(),
            Look::EndText => next.is_none(),
            boundary => {
                let w1 = prev.map_or(false, is_word_char);
                let w2 = next.map_or(false, is_word_char);
                (boundary == Look::WordBoundary) == (w1 ^ w2)
            }
        }
    }
}

/// The word-character test used by word boundary assertions.
pub fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Representation of the Char instruction.
#[derive(Clone, Debug)]
pub struct InstChar {
    /// The next location to execute in the program if this instruction
    /// succeeds.
    pub goto: InstIdx,
    /// The character to test.
    pub c: char,
}

/// Representation of the Ranges instruction.
#[derive(Clone, Debug)]
pub struct InstRanges {
    /// The next location to execute in the program if this instruction
    /// succeeds.
    pub goto: InstIdx,
    /// The set of scalar value ranges to test, sorted and non-overlapping.
    pub ranges: Vec<(char, char)>,
    /// When true, the instruction matches characters outside the ranges.
    pub negated: bool,
}

impl InstRanges {
    /// Tests whether the given input character matches this instruction.
    pub fn matches(&self, c: char) -> bool {
        self.in_ranges(c) != self.negated
    }

    fn in_ranges(&self, c: char) -> bool {
        // Check the first few ranges directly before binary search; most
        // classes in real patterns are short and ASCII-first.
        for r in self.ranges.iter().take(4) {
            if c < r.0 {
                return false;
            }
            if c <= r.1 {
                return true;
            }
        }
        self.ranges
            .binary_search_by(|r| {
                if r.1 < c {
                    std::cmp::Ordering::Less
                } else if r.0 > c {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// True iff the matching character set is entirely ASCII.
    pub fn is_ascii(&self) -> bool {
        !self.negated
            && self.ranges.last().map_or(true, |&(_, hi)| hi <= '\x7f')
    }
}

/// Representation of the Any instruction.
#[derive(Clone, Debug)]
pub struct InstAny {
    /// The next location to execute in the program if this instruction
    /// succeeds.
    pub goto: InstIdx,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_match_respects_negation() {
        let pos = InstRanges {
            goto: 0,
            ranges: vec![('0', '9')],
            negated: false,
        };
        let neg = InstRanges {
            goto: 0,
            ranges: vec![('0', '9')],
            negated: true,
        };
        assert!(pos.matches('5'));
        assert!(!pos.matches('a'));
        assert!(!neg.matches('5'));
        assert!(neg.matches('a'));
    }

    #[test]
    fn empty_look_word_boundary() {
        let b = InstEmptyLook { goto: 0, look: Look::WordBoundary };
        assert!(b.matches(None, Some('a')));
        assert!(b.matches(Some('a'), None));
        assert!(!b.matches(Some('a'), Some('b')));
        assert!(!b.matches(None, Some(' ')));
        let nb = InstEmptyLook { goto: 0, look: Look::NotWordBoundary };
        assert!(nb.matches(Some('a'), Some('b')));
        assert!(!nb.matches(None, Some('a')));
    }
}
