//! Lowering from the normalized syntax tree to an instruction program.
//!
//! Standard Thompson-style construction extended with capture instructions.
//! Sub-expressions are emitted bottom-up into a growing vector; forward
//! branches are left as holes and patched once the successor is known. For
//! greedy versus lazy repetitions the order of the two split targets is
//! swapped.

use crate::expr::{Expr, RepeatKind};
use crate::inst::{
    Inst, InstAny, InstChar, InstEmptyLook, InstIdx, InstRanges, InstSave,
    InstSplit, Insts,
};

/// Placeholder successor for an instruction whose target is not yet known.
const HOLE: InstIdx = usize::MAX;

/// A compiler turns one normalized tree into a sequence of instructions and
/// the table of capture group names.
pub struct Compiler {
    insts: Vec<Inst>,
    cap_names: Vec<Option<String>>,
}

/// A compiled fragment: its entry point (absent for fragments that emit no
/// instructions, like the empty expression) and the dangling successor
/// holes that must be patched to whatever runs after it.
struct Frag {
    start: Option<InstIdx>,
    holes: Vec<Hole>,
}

/// A dangling successor slot inside an emitted instruction.
#[derive(Clone, Copy, Debug)]
enum Hole {
    Goto(InstIdx),
    Split1(InstIdx),
    Split2(InstIdx),
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler { insts: Vec::new(), cap_names: vec![None] }
    }

    /// Compiles the given tree into a program and its capture names.
    ///
    /// The program is wrapped in Save(0)/Save(1) for the whole match, ends
    /// in Match, and carries one trailing Fail as defensive dead code.
    pub fn compile(mut self, e: &Expr) -> (Insts, Vec<Option<String>>) {
        let open = self.push(Inst::Save(InstSave { goto: HOLE, slot: 0 }));
        let frag = self.c(e);
        let body = frag.start;
        let close =
            self.push(Inst::Save(InstSave { goto: HOLE, slot: 1 }));
        match body {
            Some(s) => self.fill(Hole::Goto(open), s),
            None => self.fill(Hole::Goto(open), close),
        }
        for hole in frag.holes {
            self.fill(hole, close);
        }
        let m = self.push(Inst::Match);
        self.fill(Hole::Goto(close), m);
        self.push(Inst::Fail);
        (Insts::new(self.insts), self.cap_names)
    }

    fn c(&mut self, e: &Expr) -> Frag {
        match e {
            Expr::Empty => Frag { start: None, holes: vec![] },
            Expr::Literal(c) => {
                let i =
                    self.push(Inst::Char(InstChar { goto: HOLE, c: *c }));
                Frag { start: Some(i), holes: vec![Hole::Goto(i)] }
            }
            Expr::Class(cls) => {
                // Store whichever of the class and its complement is the
                // shorter range list; the negated form makes classes like
                // [^a] a single range test.
                let comp = cls.complement();
                let (ranges, negated) =
                    if comp.ranges().len() < cls.ranges().len() {
                        (comp.ranges().to_vec(), true)
                    } else {
                        (cls.ranges().to_vec(), false)
                    };
                let i = self.push(Inst::Ranges(InstRanges {
                    goto: HOLE,
                    ranges,
                    negated,
                }));
                Frag { start: Some(i), holes: vec![Hole::Goto(i)] }
            }
            Expr::AnyChar => {
                let i = self.push(Inst::Any(InstAny { goto: HOLE }));
                Frag { start: Some(i), holes: vec![Hole::Goto(i)] }
            }
            Expr::Look(look) => {
                let i = self.push(Inst::EmptyLook(InstEmptyLook {
                    goto: HOLE,
                    look: *look,
                }));
                Frag { start: Some(i), holes: vec![Hole::Goto(i)] }
            }
            Expr::Concat(es) => {
                let mut start = None;
                let mut pending: Vec<Hole> = vec![];
                for child in es {
                    let frag = self.c(child);
                    if let Some(s) = frag.start {
                        for hole in pending.drain(..) {
                            self.fill(hole, s);
                        }
                        pending = frag.holes;
                        if start.is_none() {
                            start = Some(s);
                        }
                    }
                    // A fragment with no instructions contributes nothing.
                }
                Frag { start, holes: pending }
            }
            Expr::Alternate(es) => self.alternate(es),
            Expr::Group { e, index, name } => {
                let slot = 2 * (*index as usize);
                if self.cap_names.len() <= *index as usize {
                    self.cap_names.resize(*index as usize + 1, None);
                }
                self.cap_names[*index as usize] = name.clone();
                let open =
                    self.push(Inst::Save(InstSave { goto: HOLE, slot }));
                let frag = self.c(e);
                let close = self.push(Inst::Save(InstSave {
                    goto: HOLE,
                    slot: slot + 1,
                }));
                match frag.start {
                    Some(s) => self.fill(Hole::Goto(open), s),
                    None => self.fill(Hole::Goto(open), close),
                }
                for hole in frag.holes {
                    self.fill(hole, close);
                }
                Frag {
                    start: Some(open),
                    holes: vec![Hole::Goto(close)],
                }
            }
            Expr::Repeat { e, kind, greedy } => match kind {
                RepeatKind::ZeroOrOne => self.question(e, *greedy),
                RepeatKind::ZeroOrMore => self.star(e, *greedy),
                RepeatKind::OneOrMore => self.plus(e, *greedy),
                RepeatKind::Range { min, max } => {
                    let mut frags = Vec::new();
                    for _ in 0..*min {
                        frags.push(self.c(e));
                    }
                    match max {
                        None => frags.push(self.star(e, *greedy)),
                        Some(max) => {
                            for _ in *min..*max {
                                frags.push(self.question(e, *greedy));
                            }
                        }
                    }
                    self.join(frags)
                }
            },
        }
    }

    fn alternate(&mut self, es: &[Expr]) -> Frag {
        match es {
            [] => Frag { start: None, holes: vec![] },
            [only] => self.c(only),
            [first, rest @ ..] => {
                // The split comes first so the primary target is the next
                // reachable instruction in textual order.
                let split = self.push(Inst::Split(InstSplit {
                    goto1: HOLE,
                    goto2: HOLE,
                }));
                let head = self.c(first);
                let mut holes = match head.start {
                    Some(s) => {
                        self.fill(Hole::Split1(split), s);
                        head.holes
                    }
                    None => {
                        let mut hs = head.holes;
                        hs.push(Hole::Split1(split));
                        hs
                    }
                };
                let tail = self.alternate(rest);
                match tail.start {
                    Some(s) => self.fill(Hole::Split2(split), s),
                    None => holes.push(Hole::Split2(split)),
                }
                holes.extend(tail.holes);
                Frag { start: Some(split), holes }
            }
        }
    }

    fn question(&mut self, e: &Expr, greedy: bool) -> Frag {
        let split = self.push(Inst::Split(InstSplit {
            goto1: HOLE,
            goto2: HOLE,
        }));
        let frag = self.c(e);
        let (into, out) = if greedy {
            (Hole::Split1(split), Hole::Split2(split))
        } else {
            (Hole::Split2(split), Hole::Split1(split))
        };
        let mut holes = frag.holes;
        match frag.start {
            Some(s) => self.fill(into, s),
            None => holes.push(into),
        }
        holes.push(out);
        Frag { start: Some(split), holes }
    }

    fn star(&mut self, e: &Expr, greedy: bool) -> Frag {
        let split = self.push(Inst::Split(InstSplit {
            goto1: HOLE,
            goto2: HOLE,
        }));
        let frag = self.c(e);
        let (into, out) = if greedy {
            (Hole::Split1(split), Hole::Split2(split))
        } else {
            (Hole::Split2(split), Hole::Split1(split))
        };
        match frag.start {
            Some(s) => self.fill(into, s),
            // An empty body loops straight back; the split alone decides.
            None => self.fill(into, split),
        }
        for hole in frag.holes {
            self.fill(hole, split);
        }
        Frag { start: Some(split), holes: vec![out] }
    }

    fn plus(&mut self, e: &Expr, greedy: bool) -> Frag {
        let frag = self.c(e);
        let split = self.push(Inst::Split(InstSplit {
            goto1: HOLE,
            goto2: HOLE,
        }));
        let (back, out) = if greedy {
            (Hole::Split1(split), Hole::Split2(split))
        } else {
            (Hole::Split2(split), Hole::Split1(split))
        };
        let start = match frag.start {
            Some(s) => {
                self.fill(back, s);
                s
            }
            None => {
                self.fill(back, split);
                split
            }
        };
        for hole in frag.holes {
            self.fill(hole, split);
        }
        Frag { start: Some(start), holes: vec![out] }
    }

    /// Concatenates already-compiled fragments in order.
    fn join(&mut self, frags: Vec<Frag>) -> Frag {
        let mut start = None;
        let mut pending: Vec<Hole> = vec![];
        for frag in frags {
            if let Some(s) = frag.start {
                for hole in pending.drain(..) {
                    self.fill(hole, s);
                }
                pending = frag.holes;
                if start.is_none() {
                    start = Some(s);
                }
            } else {
                pending.extend(frag.holes);
            }
        }
        Frag { start, holes: pending }
    }

    fn push(&mut self, inst: Inst) -> InstIdx {
        self.insts.push(inst);
        self.insts.len() - 1
    }

    fn fill(&mut self, hole: Hole, target: InstIdx) {
        match hole {
            Hole::Goto(i) => match &mut self.insts[i] {
                Inst::Save(x) => x.goto = target,
                Inst::EmptyLook(x) => x.goto = target,
                Inst::Char(x) => x.goto = target,
                Inst::Ranges(x) => x.goto = target,
                Inst::Any(x) => x.goto = target,
                other => unreachable!("goto hole in {other:?}"),
            },
            Hole::Split1(i) => match &mut self.insts[i] {
                Inst::Split(x) => x.goto1 = target,
                other => unreachable!("split hole in {other:?}"),
            },
            Hole::Split2(i) => match &mut self.insts[i] {
                Inst::Split(x) => x.goto2 = target,
                other => unreachable!("split hole in {other:?}"),
            },
        }
    }
}

impl Default for Compiler {
    fn default() -> Compiler {
        Compiler::new()
    }
}

/// Return the number of capture groups referenced by a program, including
/// the zeroth capture for the whole match.
pub fn num_captures(insts: &[Inst]) -> usize {
    let mut n = 0;
    for inst in insts {
        if let Inst::Save(inst) = inst {
            n = n.max(inst.slot + 1);
        }
    }
    // There are exactly two Save slots for every capture.
    n.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::simplify::simplify;

    fn program(pattern: &str) -> (Insts, Vec<Option<String>>) {
        let e = simplify(Expr::parse(pattern).unwrap());
        Compiler::new().compile(&e)
    }

    #[test]
    fn wraps_in_whole_match_saves() {
        let (insts, _) = program("a");
        // Save(0), Char, Save(1), Match, Fail.
        assert_eq!(insts.len(), 5);
        assert!(matches!(&insts[0], Inst::Save(s) if s.slot == 0));
        assert!(matches!(&insts[1], Inst::Char(c) if c.c == 'a'));
        assert!(matches!(&insts[2], Inst::Save(s) if s.slot == 1));
        assert!(matches!(&insts[3], Inst::Match));
        assert!(matches!(&insts[4], Inst::Fail));
    }

    #[test]
    fn empty_pattern_matches_empty() {
        let (insts, _) = program("");
        assert!(matches!(&insts[0], Inst::Save(s) if s.goto == 1));
        assert!(matches!(&insts[1], Inst::Save(s) if s.slot == 1));
    }

    #[test]
    fn greedy_star_prefers_body() {
        let (insts, _) = program("a*");
        let (body, out) = match &insts[1] {
            Inst::Split(s) => (s.goto1, s.goto2),
            other => panic!("expected split, got {other:?}"),
        };
        assert!(matches!(&insts[body], Inst::Char(_)));
        assert!(matches!(&insts[out], Inst::Save(s) if s.slot == 1));
    }

    #[test]
    fn lazy_star_prefers_exit() {
        let (insts, _) = program("a*?");
        let (exit, body) = match &insts[1] {
            Inst::Split(s) => (s.goto1, s.goto2),
            other => panic!("expected split, got {other:?}"),
        };
        assert!(matches!(&insts[exit], Inst::Save(s) if s.slot == 1));
        assert!(matches!(&insts[body], Inst::Char(_)));
    }

    #[test]
    fn capture_slots_and_names() {
        let (insts, names) = program("(?P<y>a)(b)");
        assert_eq!(num_captures(&insts), 3);
        assert_eq!(
            names,
            vec![None, Some("y".to_string()), None]
        );
    }

    #[test]
    fn negated_class_stores_complement() {
        let (insts, _) = program("[^a]");
        let found = insts.iter().any(|i| match i {
            Inst::Ranges(r) => r.negated && r.ranges == [('a', 'a')],
            _ => false,
        });
        assert!(found, "expected a negated single-range class");
    }

    #[test]
    fn bounded_range_expands() {
        // a{2,4} = a a a? a?
        let (insts, _) = program("a{2,4}");
        let chars = insts
            .iter()
            .filter(|i| matches!(i, Inst::Char(_)))
            .count();
        let splits = insts
            .iter()
            .filter(|i| matches!(i, Inst::Split(_)))
            .count();
        assert_eq!(chars, 4);
        assert_eq!(splits, 2);
    }

    #[test]
    fn anchor_probes() {
        let (insts, _) = program("^ab$");
        assert!(insts.anchored_begin());
        assert!(insts.anchored_end());
        let (insts, _) = program("ab");
        assert!(!insts.anchored_begin());
        assert!(!insts.anchored_end());
    }

    #[test]
    fn alternation_splits_in_textual_order() {
        let (insts, _) = program("a|b|c");
        // First split's primary target must be the next reachable
        // instruction in textual order.
        match &insts[1] {
            Inst::Split(s) => assert_eq!(s.goto1, 2),
            other => panic!("expected split, got {other:?}"),
        }
    }
}
