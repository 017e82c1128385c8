//! Tagged-DFA construction and emitter.
//!
//! Standard powerset construction over an alphabet of codepoint
//! equivalence classes, with tag operations attached to transitions. A
//! DFA state is an ordered set of NFA threads; each thread owns a register
//! row of capture slots, and every transition copies rows between two
//! banks while stamping the slots whose Save instructions the epsilon
//! closure crossed. States are an arena of integer IDs; transitions are
//! `(class → state id)` pairs, never pointers, so construction stays
//! trivially serializable.
//!
//! Construction aborts when the state arena outgrows its budget, or when
//! the pattern carries assertions a DFA cannot resolve statically (word
//! boundaries, or a start anchor the scan cannot prove); the selector
//! then falls back to the tagged NFA. Matching is strictly one pass, no
//! backtracking: the emitted scan loop is a switch over the state number
//! with one case per state.

use rustc_hash::FxHashMap;

use crate::backtrack::{emit_advance, emit_prefix_skip};
use crate::codegen::CodeWriter;
use crate::expr::Look;
use crate::inst::{Inst, InstIdx, InstRanges};
use crate::program::Program;

/// Why determinization gave up. Both reasons fall back to the tagged NFA
/// unless the DFA was forced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TdfaError {
    /// The state arena outgrew the configured budget.
    Budget(usize),
    /// The pattern has an assertion the DFA cannot evaluate statically.
    Assertion,
}

impl std::fmt::Display for TdfaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TdfaError::Budget(b) => {
                write!(f, "state budget of {b} states exceeded")
            }
            TdfaError::Assertion => {
                write!(f, "pattern assertions need runtime context")
            }
        }
    }
}

/// One register-row move on a transition: thread `dst` of the target
/// state inherits thread `src`'s row, then stamps the current position
/// into `sets`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub dst: usize,
    pub src: usize,
    pub sets: Vec<usize>,
}

/// A transition on one alphabet class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trans {
    pub next: usize,
    pub moves: Vec<Move>,
}

/// One DFA state: its ordered threads and accept bookkeeping.
#[derive(Clone, Debug)]
pub struct State {
    /// `(pc, eof-only)` per thread, priority order.
    pub threads: Vec<(InstIdx, bool)>,
    /// Thread index that accepts regardless of position.
    pub uncond_accept: Option<usize>,
    /// Thread index that accepts only at end of input.
    pub eof_accept: Option<usize>,
    /// Per alphabet class; `None` is the dead transition.
    pub transitions: Vec<Option<Trans>>,
}

/// The determinized automaton.
#[derive(Clone, Debug)]
pub struct Tdfa {
    /// Alphabet class boundaries: class `i` covers codepoints from
    /// `bounds[i]` up to the next boundary.
    pub bounds: Vec<u32>,
    pub states: Vec<State>,
    /// Slot sets applied to each initial thread at scan start.
    pub init: Vec<Vec<usize>>,
    /// Widest thread list across states; sizes the register banks.
    pub max_threads: usize,
}

/// Builds the tagged DFA for a program, within `budget` states.
pub fn build(
    prog: &Program,
    nslots: usize,
    budget: usize,
) -> Result<Tdfa, TdfaError> {
    let bounds = class_bounds(prog);
    let nclasses = bounds.len();

    let builder = Builder {
        insts: &prog.insts,
        nslots,
        anchored: prog.features.anchored_start,
    };

    let first = builder.closure(&[(0, 0)], true)?;
    let init = first.iter().map(|t| t.sets.clone()).collect();

    let mut key_to_id: FxHashMap<Vec<(InstIdx, bool)>, usize> =
        FxHashMap::default();
    let mut states: Vec<State> = Vec::new();
    let mut pending: Vec<Vec<Thread>> = Vec::new();

    let key: Vec<(InstIdx, bool)> =
        first.iter().map(|t| (t.pc, t.eof)).collect();
    key_to_id.insert(key, 0);
    states.push(state_shell(&prog.insts, &first, nclasses));
    pending.push(first);

    let mut next = 0usize;
    while next < states.len() {
        let threads = pending[next].clone();
        for class in 0..nclasses {
            let b = bounds[class];
            let mut seeds: Vec<(usize, InstIdx)> = Vec::new();
            for (i, t) in threads.iter().enumerate() {
                if t.eof {
                    continue;
                }
                match &prog.insts[t.pc] {
                    Inst::Char(c) if c.c as u32 == b => {
                        seeds.push((i, c.goto))
                    }
                    Inst::Ranges(r) if range_member(r, b) => {
                        seeds.push((i, r.goto))
                    }
                    Inst::Any(a) => seeds.push((i, a.goto)),
                    _ => {}
                }
            }
            if seeds.is_empty() {
                continue;
            }
            let closed = builder.closure(&seeds, false)?;
            if closed.is_empty() {
                continue;
            }
            let key: Vec<(InstIdx, bool)> =
                closed.iter().map(|t| (t.pc, t.eof)).collect();
            let id = match key_to_id.get(&key) {
                Some(&id) => id,
                None => {
                    let id = states.len();
                    if id >= budget {
                        return Err(TdfaError::Budget(budget));
                    }
                    key_to_id.insert(key, id);
                    states.push(state_shell(
                        &prog.insts,
                        &closed,
                        nclasses,
                    ));
                    pending.push(closed.clone());
                    id
                }
            };
            let moves = closed
                .iter()
                .enumerate()
                .map(|(dst, t)| Move {
                    dst,
                    src: t.src,
                    sets: t.sets.clone(),
                })
                .collect();
            states[next].transitions[class] =
                Some(Trans { next: id, moves });
        }
        next += 1;
    }

    let max_threads =
        states.iter().map(|s| s.threads.len()).max().unwrap_or(1).max(1);
    Ok(Tdfa { bounds, states, init, max_threads })
}

/// One closure-produced thread.
#[derive(Clone, Debug)]
struct Thread {
    pc: InstIdx,
    src: usize,
    sets: Vec<usize>,
    eof: bool,
}

struct Builder<'a> {
    insts: &'a [Inst],
    nslots: usize,
    anchored: bool,
}

impl Builder<'_> {
    /// Epsilon-closes the seed threads in priority order. Depth-first,
    /// primary split target first, first visit wins; the closure stops
    /// after an unconditional match because later threads can never win.
    fn closure(
        &self,
        seeds: &[(usize, InstIdx)],
        initial: bool,
    ) -> Result<Vec<Thread>, TdfaError> {
        let mut out: Vec<Thread> = Vec::new();
        let mut seen: Vec<[bool; 2]> = vec![[false; 2]; self.insts.len()];
        let mut stopped = false;
        for &(src, pc) in seeds {
            if stopped {
                break;
            }
            let mut sets = Vec::new();
            self.dfs(
                pc, src, &mut sets, false, initial, &mut seen, &mut out,
                &mut stopped,
            )?;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs(
        &self,
        pc: InstIdx,
        src: usize,
        sets: &mut Vec<usize>,
        eof: bool,
        initial: bool,
        seen: &mut [[bool; 2]],
        out: &mut Vec<Thread>,
        stopped: &mut bool,
    ) -> Result<(), TdfaError> {
        if *stopped || seen[pc][eof as usize] {
            return Ok(());
        }
        seen[pc][eof as usize] = true;
        match &self.insts[pc] {
            Inst::Split(s) => {
                self.dfs(
                    s.goto1, src, sets, eof, initial, seen, out, stopped,
                )?;
                self.dfs(
                    s.goto2, src, sets, eof, initial, seen, out, stopped,
                )?;
            }
            Inst::Save(s) => {
                if s.slot < self.nslots {
                    sets.push(s.slot);
                    self.dfs(
                        s.goto, src, sets, eof, initial, seen, out,
                        stopped,
                    )?;
                    sets.pop();
                } else {
                    self.dfs(
                        s.goto, src, sets, eof, initial, seen, out,
                        stopped,
                    )?;
                }
            }
            Inst::EmptyLook(e) => match e.look {
                Look::StartText => {
                    // Only provable when the whole scan is pinned to
                    // offset zero.
                    if initial && self.anchored {
                        self.dfs(
                            e.goto, src, sets, eof, initial, seen, out,
                            stopped,
                        )?;
                    } else {
                        return Err(TdfaError::Assertion);
                    }
                }
                Look::EndText => {
                    self.dfs(
                        e.goto, src, sets, true, initial, seen, out,
                        stopped,
                    )?;
                }
                Look::WordBoundary | Look::NotWordBoundary => {
                    return Err(TdfaError::Assertion)
                }
            },
            Inst::Char(_) | Inst::Ranges(_) | Inst::Any(_) => {
                // A consuming step cannot happen past the end of input.
                if !eof {
                    out.push(Thread {
                        pc,
                        src,
                        sets: sets.clone(),
                        eof: false,
                    });
                }
            }
            Inst::Match => {
                out.push(Thread { pc, src, sets: sets.clone(), eof });
                if !eof {
                    *stopped = true;
                }
            }
            Inst::Fail => {}
        }
        Ok(())
    }
}

fn state_shell(
    insts: &[Inst],
    threads: &[Thread],
    nclasses: usize,
) -> State {
    let mut uncond_accept = None;
    let mut eof_accept = None;
    for (i, t) in threads.iter().enumerate() {
        if matches!(insts[t.pc], Inst::Match) {
            if t.eof {
                if eof_accept.is_none() {
                    eof_accept = Some(i);
                }
            } else if uncond_accept.is_none() {
                uncond_accept = Some(i);
            }
        }
    }
    State {
        threads: threads.iter().map(|t| (t.pc, t.eof)).collect(),
        uncond_accept,
        eof_accept,
        transitions: vec![None; nclasses],
    }
}

/// The sorted class boundaries derived from every consuming instruction.
fn class_bounds(prog: &Program) -> Vec<u32> {
    let mut bounds = vec![0u32];
    for inst in prog.insts.iter() {
        match inst {
            Inst::Char(c) => {
                bounds.push(c.c as u32);
                bounds.push(c.c as u32 + 1);
            }
            Inst::Ranges(r) => {
                for &(lo, hi) in &r.ranges {
                    bounds.push(lo as u32);
                    bounds.push(hi as u32 + 1);
                }
            }
            _ => {}
        }
    }
    bounds.retain(|&b| b <= 0x0010_ffff);
    bounds.sort_unstable();
    bounds.dedup();
    bounds
}

/// Whether a Ranges instruction accepts the class starting at `b`.
fn range_member(r: &InstRanges, b: u32) -> bool {
    let inside = r
        .ranges
        .iter()
        .any(|&(lo, hi)| (lo as u32) <= b && b <= (hi as u32));
    inside != r.negated
}

/// Emits `classify`, `dfa_at` and `captures_from` for a built automaton.
pub fn emit(
    w: &mut CodeWriter,
    prog: &Program,
    dfa: &Tdfa,
    nslots: usize,
) {
    let t = dfa.max_threads;
    let s = nslots;

    let bounds: Vec<String> =
        dfa.bounds.iter().map(|b| b.to_string()).collect();
    w.line("/// Alphabet class boundaries for the state machine.");
    w.line(&format!(
        "const CLASS_BOUNDS: &'static [u32] = &[{}];",
        bounds.join(", ")
    ));
    w.line("");
    w.line("/// The alphabet class of one codepoint.");
    w.open("fn classify(c: char) -> usize {");
    w.open("match Self::CLASS_BOUNDS.binary_search(&(c as u32)) {");
    w.line("Ok(i) => i,");
    w.line("Err(i) => i - 1,");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// Runs the tagged DFA anchored at `start`. One switch over \
            the state");
    w.line("/// number per character; register rows recover the capture \
            positions");
    w.line("/// of the best accept seen. No backtracking.");
    w.open(
        "fn dfa_at(input: &str, start: usize, slots: &mut [usize]) -> \
         bool {",
    );
    w.line(&format!("let mut cur = [[NO_POS; {s}]; {t}];"));
    w.line(&format!("let mut nxt = [[NO_POS; {s}]; {t}];"));
    w.line(&format!("let mut best = [NO_POS; {s}];"));
    w.line("let mut matched = false;");
    for (thread, sets) in dfa.init.iter().enumerate() {
        for &slot in sets {
            w.line(&format!("cur[{thread}][{slot}] = start;"));
        }
    }
    w.line("let mut state = 0usize;");
    w.line("let mut at = start;");
    if let Some(thread) = dfa.states[0].uncond_accept {
        w.line(&format!("best = cur[{thread}];"));
        w.line("matched = true;");
    }
    w.open("'scan: loop {");
    w.open("let c = match input[at..].chars().next() {");
    w.line("Some(c) => c,");
    w.line("None => break 'scan,");
    w.close("};");
    w.line("let nat = at + c.len_utf8();");
    w.line("let cls = Self::classify(c);");
    w.open("match state {");
    for (sid, state) in dfa.states.iter().enumerate() {
        if state.transitions.iter().all(Option::is_none) {
            continue;
        }
        w.open(&format!("{sid} => match cls {{"));
        // Group classes that share a transition into one arm.
        let mut done = vec![false; state.transitions.len()];
        for c0 in 0..state.transitions.len() {
            if done[c0] {
                continue;
            }
            let trans = match &state.transitions[c0] {
                Some(t) => t,
                None => continue,
            };
            let mut classes = vec![c0];
            for c1 in c0 + 1..state.transitions.len() {
                if state.transitions[c1].as_ref() == Some(trans) {
                    classes.push(c1);
                    done[c1] = true;
                }
            }
            let pattern: Vec<String> =
                classes.iter().map(|c| c.to_string()).collect();
            w.open(&format!("{} => {{", pattern.join(" | ")));
            for mv in &trans.moves {
                w.line(&format!("nxt[{}] = cur[{}];", mv.dst, mv.src));
                for &slot in &mv.sets {
                    w.line(&format!("nxt[{}][{slot}] = nat;", mv.dst));
                }
            }
            w.line(&format!("state = {};", trans.next));
            w.close("}");
        }
        w.line("_ => break 'scan,");
        w.close("},");
    }
    w.line("_ => break 'scan,");
    w.close("}");
    w.line("std::mem::swap(&mut cur, &mut nxt);");
    w.line("at = nat;");
    let accepts: Vec<(usize, usize)> = dfa
        .states
        .iter()
        .enumerate()
        .filter_map(|(sid, st)| st.uncond_accept.map(|t| (sid, t)))
        .collect();
    if !accepts.is_empty() {
        w.open("match state {");
        for (sid, thread) in &accepts {
            w.open(&format!("{sid} => {{"));
            w.line(&format!("best = cur[{thread}];"));
            w.line("matched = true;");
            w.close("}");
        }
        w.line("_ => {}");
        w.close("}");
    }
    w.close("}");
    // End-of-input accepts: the lowest-index accepting thread wins.
    let eof_accepts: Vec<(usize, usize)> = dfa
        .states
        .iter()
        .enumerate()
        .filter_map(|(sid, st)| {
            let best = match (st.eof_accept, st.uncond_accept) {
                (Some(e), Some(u)) => Some(e.min(u)),
                (Some(e), None) => Some(e),
                _ => None,
            };
            best.map(|t| (sid, t))
        })
        .collect();
    if !eof_accepts.is_empty() {
        w.open("if at == input.len() {");
        w.open("match state {");
        for (sid, thread) in &eof_accepts {
            w.open(&format!("{sid} => {{"));
            w.line(&format!("best = cur[{thread}];"));
            w.line("matched = true;");
            w.close("}");
        }
        w.line("_ => {}");
        w.close("}");
        w.close("}");
    }
    w.open("if matched {");
    w.line("slots.copy_from_slice(&best);");
    w.line("return true;");
    w.close("}");
    w.line("false");
    w.close("}");
    w.line("");

    w.line("/// Leftmost capture-recording match at or after `start`; \
            fills");
    w.line("/// `slots` and returns true on success.");
    w.open(
        "fn captures_from(input: &str, start: usize, slots: &mut \
         [usize]) -> bool {",
    );
    w.open("if start > input.len() {");
    w.line("return false;");
    w.close("}");
    if prog.features.anchored_start {
        w.open("if start != 0 {");
        w.line("return false;");
        w.close("}");
        w.line("Self::dfa_at(input, 0, slots)");
    } else {
        w.line("let mut at = start;");
        w.open("loop {");
        emit_prefix_skip(w, prog, "return false");
        w.open("if Self::dfa_at(input, at, slots) {");
        w.line("return true;");
        w.close("}");
        w.open("if at >= input.len() {");
        w.line("return false;");
        w.close("}");
        emit_advance(w, prog);
        w.close("}");
    }
    w.close("}");
    w.line("");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn try_build(
        pattern: &str,
        budget: usize,
    ) -> Result<Tdfa, TdfaError> {
        let prog = Program::new(pattern).unwrap();
        build(&prog, prog.num_slots(), budget)
    }

    #[test]
    fn date_pattern_determinizes() {
        let dfa = try_build(r"(\d{4})-(\d{2})-(\d{2})", 500).unwrap();
        assert!(dfa.states.len() > 5);
        assert!(dfa.states.len() <= 30, "{}", dfa.states.len());
        assert!(dfa
            .states
            .iter()
            .any(|s| s.uncond_accept.is_some()));
    }

    #[test]
    fn budget_is_enforced() {
        let err = try_build(r"(\d{4})-(\d{2})-(\d{2})", 3).unwrap_err();
        assert_eq!(err, TdfaError::Budget(3));
    }

    #[test]
    fn word_boundary_defeats_the_dfa() {
        let err = try_build(r"\b(a)", 500).unwrap_err();
        assert_eq!(err, TdfaError::Assertion);
    }

    #[test]
    fn leading_anchor_is_fine_when_anchored() {
        assert!(try_build(r"^(ab)+", 500).is_ok());
    }

    #[test]
    fn trailing_anchor_becomes_eof_accept() {
        let dfa = try_build(r"(a+)$", 500).unwrap();
        assert!(dfa.states.iter().any(|s| s.eof_accept.is_some()));
    }

    #[test]
    fn alternation_priority_prunes_after_match() {
        // In `a|ab`, once the first branch matches no lower-priority
        // thread survives in that state.
        let dfa = try_build(r"(a|ab)", 500).unwrap();
        for state in &dfa.states {
            if let Some(t) = state.uncond_accept {
                assert_eq!(
                    t + 1,
                    state.threads.len(),
                    "threads after an unconditional match must be pruned"
                );
            }
        }
    }

    #[test]
    fn emitted_code_shape() {
        let prog = Program::new(r"(\d+)-(\d+)").unwrap();
        let dfa = build(&prog, prog.num_slots(), 500).unwrap();
        let mut w = CodeWriter::new();
        emit(&mut w, &prog, &dfa, prog.num_slots());
        let code = w.finish();
        assert!(code.contains("fn classify(c: char) -> usize"), "{code}");
        assert!(code.contains("fn dfa_at"), "{code}");
        assert!(code.contains("fn captures_from"), "{code}");
        assert!(code.contains("std::mem::swap(&mut cur, &mut nxt);"));
        assert!(code.contains("'scan: loop {"));
    }

    #[test]
    fn deterministic_construction() {
        let a = format!("{:?}", try_build(r"(\w)-(\d+)", 500));
        let b = format!("{:?}", try_build(r"(\w)-(\d+)", 500));
        assert_eq!(a, b);
    }
}
