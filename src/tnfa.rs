//! Tagged-NFA emitter with memoization.
//!
//! The linear-time capture engine for patterns the tagged DFA cannot
//! hold: a breadth-first simulation over two thread lists, each thread
//! carrying a compact capture-tag array, advancing one character at a
//! time with epsilon closure through split, save and assertion edges.
//! A hash set keyed on `(position, closure fingerprint)` prunes branches
//! whose outcome is already decided, which caps the pathological cases
//! at O(input length × program size).

use rustc_hash::FxHashSet;

use crate::backtrack::emit_prefix_skip;
use crate::codegen::{char_lit, ClassEmitter, CodeWriter};
use crate::expr::Look;
use crate::inst::Inst;
use crate::program::Program;

/// Ceiling on `program size × tracked slots`, the analytical proxy for
/// the simulator's thread lists and the memo table they key.
const MAX_MEMO_CELLS: usize = 1 << 16;

/// Returns true iff the given program can be emitted by this engine with
/// reasonable memory usage. Each simulated position carries up to one tag
/// row per instruction, and the memo table is keyed by per-position
/// closures, so program size times tracked slots is the cost to bound.
/// Generation fails with an engine-too-complex diagnostic past it.
pub fn should_emit(prog: &Program, nslots: usize) -> bool {
    prog.insts.len().saturating_mul(nslots.max(1)) <= MAX_MEMO_CELLS
}

/// The memoization table consumed by emitted tagged-NFA engines. Keys are
/// `(position, epsilon-closure fingerprint)` pairs; a repeated key means
/// the same closure was already explored at the same position and the
/// branch can be pruned.
#[derive(Debug, Default)]
pub struct MemoSet {
    seen: FxHashSet<u64>,
}

impl MemoSet {
    pub fn new() -> MemoSet {
        MemoSet::default()
    }

    /// Records one `(position, fingerprint)` pair; true when it was
    /// already present.
    pub fn seen(&mut self, at: usize, fingerprint: u64) -> bool {
        let key = (at as u64)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ fingerprint;
        !self.seen.insert(key)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Emits `tnfa_add` (epsilon closure) and `captures_from` (the
/// single-pass leftmost search).
pub fn emit(
    w: &mut CodeWriter,
    classes: &mut ClassEmitter,
    prog: &Program,
    nslots: usize,
) {
    let n = prog.insts.len();
    let words = n.div_ceil(64);
    let anchored = prog.features.anchored_start;

    emit_add(w, prog, nslots, words);

    w.line("/// Leftmost capture-recording match at or after `start`; \
            fills");
    w.line("/// `slots` and returns true on success. Breadth-first with \
            tag");
    w.line("/// arrays per thread; a position-fingerprint memo table \
            caps the");
    w.line("/// worst case.");
    w.open(
        "fn captures_from(input: &str, start: usize, slots: &mut \
         [usize]) -> bool {",
    );
    w.open("if start > input.len() {");
    w.line("return false;");
    w.close("}");
    w.line(&format!(
        "let mut cl_pcs: Vec<usize> = Vec::with_capacity({n});"
    ));
    w.line(&format!(
        "let mut cl_caps: Vec<[usize; {nslots}]> = \
         Vec::with_capacity({n});"
    ));
    w.line(&format!(
        "let mut nl_pcs: Vec<usize> = Vec::with_capacity({n});"
    ));
    w.line(&format!(
        "let mut nl_caps: Vec<[usize; {nslots}]> = \
         Vec::with_capacity({n});"
    ));
    w.line(&format!("let mut cl_bits = [0u64; {words}];"));
    w.line(&format!("let mut nl_bits = [0u64; {words}];"));
    w.line("let mut memo = MemoSet::new();");
    w.line("let mut matched = false;");
    w.line("let mut at = start;");
    w.open("loop {");
    w.open("if cl_pcs.is_empty() {");
    w.open("if matched {");
    w.line("break;");
    w.close("}");
    if anchored {
        w.open("if at > start {");
        w.line("break;");
        w.close("}");
    } else {
        emit_prefix_skip(w, prog, "break");
    }
    w.close("}");
    if anchored {
        w.open("if !matched && at == start {");
    } else {
        w.open("if !matched {");
    }
    w.line(&format!("let mut caps = [NO_POS; {nslots}];"));
    w.line(
        "Self::tnfa_add(&mut cl_pcs, &mut cl_caps, &mut cl_bits, input, \
         at, 0, &mut caps);",
    );
    w.close("}");
    w.line("// Prune a closure this call has already explored here.");
    w.line("let mut fp = 0xcbf2_9ce4_8422_2325u64;");
    w.open("for &word in cl_bits.iter() {");
    w.line("fp = (fp ^ word).wrapping_mul(0x0000_0100_0000_01b3);");
    w.close("}");
    w.open("if !cl_pcs.is_empty() && memo.seen(at, fp) {");
    w.line("cl_pcs.clear();");
    w.line("cl_caps.clear();");
    w.line(&format!("cl_bits = [0u64; {words}];"));
    w.open("if matched || at >= input.len() {");
    w.line("break;");
    w.close("}");
    w.line("at = Self::next_boundary(input, at);");
    w.line("continue;");
    w.close("}");
    w.line("let c = input[at..].chars().next();");
    w.line("let nat = at + c.map_or(1, char::len_utf8);");
    w.open("for i in 0..cl_pcs.len() {");
    w.open("match cl_pcs[i] {");
    for pc in 0..n {
        match &prog.insts[pc] {
            Inst::Char(ch) => {
                w.open(&format!("{pc} => {{"));
                w.open(&format!(
                    "if c == Some({}) {{",
                    char_lit(ch.c)
                ));
                w.line("let mut caps = cl_caps[i];");
                w.line(&format!(
                    "Self::tnfa_add(&mut nl_pcs, &mut nl_caps, &mut \
                     nl_bits, input, nat, {}, &mut caps);",
                    ch.goto
                ));
                w.close("}");
                w.close("}");
            }
            Inst::Ranges(r) => {
                let test = classes.char_test(&r.ranges, r.negated, "ch");
                w.open(&format!("{pc} => {{"));
                w.open(&format!(
                    "if c.map_or(false, |ch| {test}) {{"
                ));
                w.line("let mut caps = cl_caps[i];");
                w.line(&format!(
                    "Self::tnfa_add(&mut nl_pcs, &mut nl_caps, &mut \
                     nl_bits, input, nat, {}, &mut caps);",
                    r.goto
                ));
                w.close("}");
                w.close("}");
            }
            Inst::Any(a) => {
                w.open(&format!("{pc} => {{"));
                w.open("if c.is_some() {");
                w.line("let mut caps = cl_caps[i];");
                w.line(&format!(
                    "Self::tnfa_add(&mut nl_pcs, &mut nl_caps, &mut \
                     nl_bits, input, nat, {}, &mut caps);",
                    a.goto
                ));
                w.close("}");
                w.close("}");
            }
            Inst::Match => {
                w.open(&format!("{pc} => {{"));
                w.line("// Leftmost-first: drop lower-priority threads.");
                w.line("slots.copy_from_slice(&cl_caps[i]);");
                w.line("matched = true;");
                w.line("break;");
                w.close("}");
            }
            _ => {}
        }
    }
    w.line("_ => {}");
    w.close("}");
    w.close("}");
    w.open("if c.is_none() {");
    w.line("break;");
    w.close("}");
    w.line("std::mem::swap(&mut cl_pcs, &mut nl_pcs);");
    w.line("std::mem::swap(&mut cl_caps, &mut nl_caps);");
    w.line("std::mem::swap(&mut cl_bits, &mut nl_bits);");
    w.line("nl_pcs.clear();");
    w.line("nl_caps.clear();");
    w.line(&format!("nl_bits = [0u64; {words}];"));
    w.line("at = nat;");
    w.close("}");
    w.line("matched");
    w.close("}");
    w.line("");
}

/// The epsilon-closure routine: recursive over split/save/assertion
/// edges, appending consuming and match threads with a copy of the tag
/// array as it stood along the path.
fn emit_add(
    w: &mut CodeWriter,
    prog: &Program,
    nslots: usize,
    words: usize,
) {
    let n = prog.insts.len();
    w.line("/// Adds `pc` and its epsilon closure to a thread list, \
            first visit");
    w.line("/// wins. Save edges stamp the tag array on the way in and \
            restore it");
    w.line("/// on the way out.");
    w.open(&format!(
        "fn tnfa_add(pcs: &mut Vec<usize>, caps_list: &mut Vec<[usize; \
         {nslots}]>, bits: &mut [u64; {words}], input: &str, at: usize, \
         pc: usize, caps: &mut [usize; {nslots}]) {{"
    ));
    w.open("if bits[pc >> 6] & (1 << (pc & 63)) != 0 {");
    w.line("return;");
    w.close("}");
    w.line("bits[pc >> 6] |= 1 << (pc & 63);");
    w.open("match pc {");
    for pc in 0..n {
        match &prog.insts[pc] {
            Inst::Split(s) => {
                w.open(&format!("{pc} => {{"));
                w.line(&format!(
                    "Self::tnfa_add(pcs, caps_list, bits, input, at, \
                     {}, caps);",
                    s.goto1
                ));
                w.line(&format!(
                    "Self::tnfa_add(pcs, caps_list, bits, input, at, \
                     {}, caps);",
                    s.goto2
                ));
                w.close("}");
            }
            Inst::Save(s) => {
                if s.slot < nslots {
                    w.open(&format!("{pc} => {{"));
                    w.line(&format!("let old = caps[{}];", s.slot));
                    w.line(&format!("caps[{}] = at;", s.slot));
                    w.line(&format!(
                        "Self::tnfa_add(pcs, caps_list, bits, input, \
                         at, {}, caps);",
                        s.goto
                    ));
                    w.line(&format!("caps[{}] = old;", s.slot));
                    w.close("}");
                } else {
                    w.line(&format!(
                        "{pc} => Self::tnfa_add(pcs, caps_list, bits, \
                         input, at, {}, caps),",
                        s.goto
                    ));
                }
            }
            Inst::EmptyLook(e) => {
                w.open(&format!("{pc} => {{"));
                match e.look {
                    Look::StartText => {
                        w.open("if at == 0 {");
                        w.line(&format!(
                            "Self::tnfa_add(pcs, caps_list, bits, \
                             input, at, {}, caps);",
                            e.goto
                        ));
                        w.close("}");
                    }
                    Look::EndText => {
                        w.open("if at == input.len() {");
                        w.line(&format!(
                            "Self::tnfa_add(pcs, caps_list, bits, \
                             input, at, {}, caps);",
                            e.goto
                        ));
                        w.close("}");
                    }
                    Look::WordBoundary | Look::NotWordBoundary => {
                        w.line(
                            "let before = input[..at].chars()\
                             .next_back().map_or(false, word_char);",
                        );
                        w.line(
                            "let after = input[at..].chars().next()\
                             .map_or(false, word_char);",
                        );
                        let cmp = if e.look == Look::WordBoundary {
                            "!="
                        } else {
                            "=="
                        };
                        w.open(&format!("if before {cmp} after {{"));
                        w.line(&format!(
                            "Self::tnfa_add(pcs, caps_list, bits, \
                             input, at, {}, caps);",
                            e.goto
                        ));
                        w.close("}");
                    }
                }
                w.close("}");
            }
            _ => {}
        }
    }
    w.open("_ => {");
    w.line("pcs.push(pc);");
    w.line("caps_list.push(*caps);");
    w.close("}");
    w.close("}");
    w.close("}");
    w.line("");
}
