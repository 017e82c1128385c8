//! Backtracking NFA emitter.
//!
//! Emits a goto-threaded engine: one dispatcher arm per instruction, a
//! frame stack of `(offset, next instruction, capture checkpoint)` pushed
//! by every split, and a central fallback arm that pops frames and unwinds
//! the capture log. Bounds checks are merged across runs of consecutive
//! literal instructions, and unanchored scans skip ahead with a byte probe
//! when the pattern has a small leading-byte set.
//!
//! The match-only form carries no capture plumbing at all; the linear-time
//! Thompson variant comes out of this module too, selected by a flag when
//! nested unbounded quantifiers make backtracking pathological.

use crate::codegen::{char_lit, str_lit, ClassEmitter, CodeWriter};
use crate::inst::{Inst, InstIdx};
use crate::program::Program;

/// How the emitted engine reads input: raw bytes for ASCII-only patterns,
/// decoded codepoints otherwise. Word boundaries force the generic path
/// because they classify the characters around a position.
pub fn byte_mode(prog: &Program) -> bool {
    prog.features.ascii_only && !prog.features.has_word_boundary
}

/// A maximal chain of literal instructions that can be matched with one
/// merged comparison.
struct LiteralRun {
    text: String,
    /// Instructions covered by the run after its head; their arms are
    /// never emitted because nothing else targets them.
    tail: Vec<InstIdx>,
    goto: InstIdx,
}

/// Computes the merged literal run starting at each instruction, if any.
fn literal_runs(prog: &Program) -> Vec<Option<LiteralRun>> {
    let insts = &prog.insts;
    let mut indegree = vec![0usize; insts.len()];
    indegree[0] += 1;
    for inst in insts.iter() {
        match inst {
            Inst::Split(s) => {
                indegree[s.goto1] += 1;
                indegree[s.goto2] += 1;
            }
            other => {
                if let Some(g) = other.goto() {
                    indegree[g] += 1;
                }
            }
        }
    }
    let mut runs: Vec<Option<LiteralRun>> = Vec::with_capacity(insts.len());
    let mut covered = vec![false; insts.len()];
    for pc in 0..insts.len() {
        if covered[pc] {
            runs.push(None);
            continue;
        }
        let mut text = String::new();
        let mut tail = Vec::new();
        let mut cur = pc;
        let mut goto = pc;
        while let Inst::Char(c) = &insts[cur] {
            if cur != pc && indegree[cur] != 1 {
                break;
            }
            if cur != pc {
                tail.push(cur);
            }
            text.push(c.c);
            goto = c.goto;
            cur = c.goto;
        }
        if text.chars().count() >= 2 {
            for &t in &tail {
                covered[t] = true;
            }
            runs.push(Some(LiteralRun { text, tail, goto }));
        } else {
            runs.push(None);
        }
    }
    runs
}

/// Emits `match_at` (one anchored attempt, no captures) and `span_from`
/// (the leftmost scan loop), plus `is_match`'s engine.
pub fn emit_match_core(
    w: &mut CodeWriter,
    classes: &mut ClassEmitter,
    prog: &Program,
    pooling: bool,
) {
    let bytes = byte_mode(prog);
    w.line("/// Attempts a match starting exactly at `start`, returning \
            the end");
    w.line("/// offset. The frame stack holds backtrack points; no \
            captures are");
    w.line("/// tracked here.");
    w.open(
        "fn match_at(input: &str, start: usize, stack: &mut Vec<(usize, \
         usize, usize)>) -> Option<usize> {",
    );
    if bytes {
        w.line("let h = input.as_bytes();");
    }
    w.line("stack.clear();");
    w.line("let mut at = start;");
    w.line("let mut pc = 0usize;");
    w.open("loop {");
    w.open("match pc {");
    let runs = literal_runs(prog);
    let mut skip = vec![false; prog.insts.len()];
    for run in runs.iter().flatten() {
        for &t in &run.tail {
            skip[t] = true;
        }
    }
    for pc in 0..prog.insts.len() {
        if skip[pc] {
            continue;
        }
        emit_arm(w, classes, prog, pc, runs[pc].as_ref(), bytes, None);
    }
    emit_fallback(w, None);
    w.close("}");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// Leftmost match at or after `start`, as byte offsets.");
    w.open(
        "fn span_from(input: &str, start: usize) -> Option<(usize, \
         usize)> {",
    );
    w.open("if start > input.len() {");
    w.line("return None;");
    w.close("}");
    if pooling {
        w.line("let mut scratch = pool::scratch(0);");
        w.line("let MatchScratch { stack, .. } = &mut *scratch;");
    } else {
        w.line("let mut scratch = MatchScratch::new(0);");
        w.line("let MatchScratch { stack, .. } = &mut scratch;");
    }
    if prog.features.anchored_start {
        w.open("if start != 0 {");
        w.line("return None;");
        w.close("}");
        w.line("Self::match_at(input, 0, stack).map(|e| (0, e))");
    } else {
        w.line("let mut at = start;");
        w.open("loop {");
        emit_prefix_skip(w, prog, "return None");
        w.open("if let Some(e) = Self::match_at(input, at, stack) {");
        w.line("return Some((at, e));");
        w.close("}");
        w.open("if at >= input.len() {");
        w.line("return None;");
        w.close("}");
        emit_advance(w, prog);
        w.close("}");
    }
    w.close("}");
    w.line("");
}

/// Emits `captures_at` and `captures_from`: the capture-producing engine
/// with the checkpoint save/restore scheme over the capture log.
pub fn emit_captures_core(
    w: &mut CodeWriter,
    classes: &mut ClassEmitter,
    prog: &Program,
    pooling: bool,
    nslots: usize,
) {
    let bytes = byte_mode(prog);
    w.line("/// Attempts a capture-recording match starting exactly at \
            `start`.");
    w.line("/// Splits checkpoint the capture log; the fallback arm \
            truncates it");
    w.line("/// back, so a failed branch leaves capture state exactly as \
            it found");
    w.line("/// it.");
    w.open(
        "fn captures_at(input: &str, start: usize, slots: &mut [usize], \
         stack: &mut Vec<(usize, usize, usize)>, log: &mut Vec<(u32, \
         usize)>) -> bool {",
    );
    if bytes {
        w.line("let h = input.as_bytes();");
    }
    w.line("stack.clear();");
    w.line("log.clear();");
    w.line("let mut at = start;");
    w.line("let mut pc = 0usize;");
    w.open("loop {");
    w.open("match pc {");
    let runs = literal_runs(prog);
    let mut skip = vec![false; prog.insts.len()];
    for run in runs.iter().flatten() {
        for &t in &run.tail {
            skip[t] = true;
        }
    }
    for pc in 0..prog.insts.len() {
        if skip[pc] {
            continue;
        }
        emit_arm(
            w,
            classes,
            prog,
            pc,
            runs[pc].as_ref(),
            bytes,
            Some(nslots),
        );
    }
    emit_fallback(w, Some(nslots));
    w.close("}");
    w.close("}");
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
    if pooling {
        w.line("let mut scratch = pool::scratch(0);");
        w.line("let MatchScratch { stack, log, .. } = &mut *scratch;");
    } else {
        w.line("let mut scratch = MatchScratch::new(0);");
        w.line("let MatchScratch { stack, log, .. } = &mut scratch;");
    }
    if prog.features.anchored_start {
        w.open("if start != 0 {");
        w.line("return false;");
        w.close("}");
        w.line("Self::captures_at(input, 0, slots, stack, log)");
    } else {
        w.line("let mut at = start;");
        w.open("loop {");
        emit_prefix_skip(w, prog, "return false");
        w.open("if Self::captures_at(input, at, slots, stack, log) {");
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

/// The byte-probe line for unanchored scans, or nothing when the pattern
/// has no usable leading-byte set.
pub(crate) fn emit_prefix_skip(w: &mut CodeWriter, prog: &Program, bail: &str) {
    let bytes = match prog.prefix_bytes() {
        Some(b) => b,
        None => return,
    };
    let call = match bytes.as_slice() {
        [a] => format!("scan::find_byte({a}, input.as_bytes(), at)"),
        [a, b] => {
            format!("scan::find_byte2({a}, {b}, input.as_bytes(), at)")
        }
        [a, b, c] => format!(
            "scan::find_byte3({a}, {b}, {c}, input.as_bytes(), at)"
        ),
        _ => return,
    };
    w.open(&format!("at = match {call} {{"));
    w.line("Some(i) => i,");
    w.line(&format!("None => {bail},"));
    w.close("};");
}

/// How the scan loop advances past a failed start position.
pub(crate) fn emit_advance(w: &mut CodeWriter, prog: &Program) {
    if byte_mode(prog)
        && prog.features.min_match_len > 0
        && prog.prefix_bytes().is_some()
    {
        // The next probe realigns to a leading byte, so a bare byte
        // step is enough.
        w.line("at += 1;");
    } else {
        w.line("at = Self::next_boundary(input, at);");
    }
}

/// One dispatcher arm for the instruction at `pc`.
fn emit_arm(
    w: &mut CodeWriter,
    classes: &mut ClassEmitter,
    prog: &Program,
    pc: InstIdx,
    run: Option<&LiteralRun>,
    bytes: bool,
    caps: Option<usize>,
) {
    use crate::expr::Look;
    let fail = "Self::FAIL";
    match &prog.insts[pc] {
        Inst::Match => match caps {
            Some(_) => w.line(&format!("{pc} => return true,")),
            None => w.line(&format!("{pc} => return Some(at),")),
        },
        Inst::Fail => w.line(&format!("{pc} => pc = {fail},")),
        Inst::Save(s) => match caps {
            Some(nslots) if s.slot < nslots => {
                w.open(&format!("{pc} => {{"));
                w.line(&format!(
                    "log.push(({}u32, slots[{}]));",
                    s.slot, s.slot
                ));
                w.line(&format!("slots[{}] = at;", s.slot));
                w.line(&format!("pc = {};", s.goto));
                w.close("}");
            }
            _ => w.line(&format!("{pc} => pc = {},", s.goto)),
        },
        Inst::Split(s) => {
            w.open(&format!("{pc} => {{"));
            let ckpt = if caps.is_some() { "log.len()" } else { "0" };
            w.line(&format!(
                "stack.push((at, {}, {ckpt}));",
                s.goto2
            ));
            w.line(&format!("pc = {};", s.goto1));
            w.close("}");
        }
        Inst::EmptyLook(e) => {
            w.open(&format!("{pc} => {{"));
            match e.look {
                Look::StartText => {
                    w.line(&format!(
                        "pc = if at == 0 {{ {} }} else {{ {fail} }};",
                        e.goto
                    ));
                }
                Look::EndText => {
                    w.line(&format!(
                        "pc = if at == input.len() {{ {} }} else {{ \
                         {fail} }};",
                        e.goto
                    ));
                }
                Look::WordBoundary | Look::NotWordBoundary => {
                    w.line(
                        "let before = input[..at].chars().next_back()\
                         .map_or(false, word_char);",
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
                    w.line(&format!(
                        "pc = if before {cmp} after {{ {} }} else {{ \
                         {fail} }};",
                        e.goto
                    ));
                }
            }
            w.close("}");
        }
        Inst::Char(c) => {
            w.open(&format!("{pc} => {{"));
            match run {
                Some(run) => {
                    let len = run.text.len();
                    if bytes {
                        w.open(&format!(
                            "if h[at..].starts_with(b{}) {{",
                            str_lit(&run.text)
                        ));
                    } else {
                        w.open(&format!(
                            "if input[at..].starts_with({}) {{",
                            str_lit(&run.text)
                        ));
                    }
                    w.line(&format!("at += {len};"));
                    w.line(&format!("pc = {};", run.goto));
                    w.close("} else {");
                    w.indent();
                    w.line(&format!("pc = {fail};"));
                    w.close("}");
                }
                None => {
                    if bytes {
                        w.open(&format!(
                            "if at < h.len() && h[at] == b{} {{",
                            char_lit(c.c)
                        ));
                        w.line("at += 1;");
                    } else {
                        w.open(&format!(
                            "if input[at..].starts_with({}) {{",
                            char_lit(c.c)
                        ));
                        w.line(&format!("at += {};", c.c.len_utf8()));
                    }
                    w.line(&format!("pc = {};", c.goto));
                    w.close("} else {");
                    w.indent();
                    w.line(&format!("pc = {fail};"));
                    w.close("}");
                }
            }
            w.close("}");
        }
        Inst::Ranges(r) => {
            w.open(&format!("{pc} => {{"));
            if bytes {
                let test = classes.byte_test(&r.ranges, "h[at]");
                w.open(&format!("if at < h.len() && {test} {{"));
                w.line("at += 1;");
                w.line(&format!("pc = {};", r.goto));
                w.close("} else {");
                w.indent();
                w.line(&format!("pc = {fail};"));
                w.close("}");
            } else {
                let test = classes.char_test(&r.ranges, r.negated, "c");
                w.open("match input[at..].chars().next() {");
                w.open(&format!("Some(c) if {test} => {{"));
                w.line("at += c.len_utf8();");
                w.line(&format!("pc = {};", r.goto));
                w.close("}");
                w.line(&format!("_ => pc = {fail},"));
                w.close("}");
            }
            w.close("}");
        }
        Inst::Any(a) => {
            w.open(&format!("{pc} => {{"));
            w.open("match input[at..].chars().next() {");
            w.open("Some(c) => {");
            w.line("at += c.len_utf8();");
            w.line(&format!("pc = {};", a.goto));
            w.close("}");
            w.line(&format!("None => pc = {fail},"));
            w.close("}");
            w.close("}");
        }
    }
}

/// The central fallback arm: pop a frame, restore position and capture
/// state, or report no match when the stack is empty.
fn emit_fallback(w: &mut CodeWriter, caps: Option<usize>) {
    w.open("_ => match stack.pop() {");
    w.open("Some(f) => {");
    w.line("at = f.0;");
    w.line("pc = f.1;");
    if caps.is_some() {
        w.open("while log.len() > f.2 {");
        w.open("if let Some((slot, old)) = log.pop() {");
        w.line("slots[slot as usize] = old;");
        w.close("}");
        w.close("}");
    }
    w.close("}");
    if caps.is_some() {
        w.open("None => {");
        w.open("while let Some((slot, old)) = log.pop() {");
        w.line("slots[slot as usize] = old;");
        w.close("}");
        w.line("return false;");
        w.close("}");
    } else {
        w.line("None => return None,");
    }
    w.close("},");
}

/// Emits the Thompson simulator variant: a breadth-first bitset walk with
/// no backtracking, used for boolean membership when nested unbounded
/// quantifiers make the stack engine pathological.
pub fn emit_thompson(
    w: &mut CodeWriter,
    classes: &mut ClassEmitter,
    prog: &Program,
) {
    let n = prog.insts.len();
    let words = n.div_ceil(64);
    let match_pc = prog
        .insts
        .iter()
        .position(|i| matches!(i, Inst::Match))
        .expect("program always ends in Match");
    let anchored = prog.features.anchored_start;

    w.line("/// Epsilon-closes `pc0` into the state set at position `at`.");
    w.open(&format!(
        "fn thompson_add(list: &mut [u64; {words}], work: &mut \
         Vec<usize>, input: &str, at: usize, pc0: usize) {{"
    ));
    w.line("work.clear();");
    w.line("work.push(pc0);");
    w.open("while let Some(pc) = work.pop() {");
    w.open("if list[pc >> 6] & (1 << (pc & 63)) != 0 {");
    w.line("continue;");
    w.close("}");
    w.line("list[pc >> 6] |= 1 << (pc & 63);");
    w.open("match pc {");
    for pc in 0..n {
        use crate::expr::Look;
        match &prog.insts[pc] {
            Inst::Save(s) => {
                w.line(&format!("{pc} => work.push({}),", s.goto))
            }
            Inst::Split(s) => {
                // Priority does not matter for membership; push both.
                w.open(&format!("{pc} => {{"));
                w.line(&format!("work.push({});", s.goto2));
                w.line(&format!("work.push({});", s.goto1));
                w.close("}");
            }
            Inst::EmptyLook(e) => {
                w.open(&format!("{pc} => {{"));
                match e.look {
                    Look::StartText => {
                        w.open("if at == 0 {");
                        w.line(&format!("work.push({});", e.goto));
                        w.close("}");
                    }
                    Look::EndText => {
                        w.open("if at == input.len() {");
                        w.line(&format!("work.push({});", e.goto));
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
                        w.line(&format!("work.push({});", e.goto));
                        w.close("}");
                    }
                }
                w.close("}");
            }
            _ => {}
        }
    }
    w.line("_ => {}");
    w.close("}");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// Boolean membership in O(input length × program size).");
    w.open("fn thompson_is_match(input: &str) -> bool {");
    w.line(&format!("let mut clist = [0u64; {words}];"));
    w.line(&format!("let mut nlist = [0u64; {words}];"));
    w.line(&format!(
        "let mut work: Vec<usize> = Vec::with_capacity({n});"
    ));
    w.line("let mut at = 0usize;");
    w.open("loop {");
    if anchored {
        w.open("if at == 0 {");
        w.line(
            "Self::thompson_add(&mut clist, &mut work, input, at, 0);",
        );
        w.close("}");
    } else {
        w.line("Self::thompson_add(&mut clist, &mut work, input, at, 0);");
    }
    w.open(&format!(
        "if clist[{}] & {:#x} != 0 {{",
        match_pc >> 6,
        1u64 << (match_pc & 63)
    ));
    w.line("return true;");
    w.close("}");
    w.open("let c = match input[at..].chars().next() {");
    w.line("Some(c) => c,");
    w.line("None => return false,");
    w.close("};");
    w.line("let at_next = at + c.len_utf8();");
    w.open(&format!("for word in 0..{words} {{"));
    w.line("let mut bits = clist[word];");
    w.open("while bits != 0 {");
    w.line("let pc = (word << 6) + bits.trailing_zeros() as usize;");
    w.line("bits &= bits - 1;");
    w.open("match pc {");
    for pc in 0..n {
        match &prog.insts[pc] {
            Inst::Char(c) => {
                w.open(&format!("{pc} => {{"));
                w.open(&format!("if c == {} {{", char_lit(c.c)));
                w.line(&format!(
                    "Self::thompson_add(&mut nlist, &mut work, input, \
                     at_next, {});",
                    c.goto
                ));
                w.close("}");
                w.close("}");
            }
            Inst::Ranges(r) => {
                let test = classes.char_test(&r.ranges, r.negated, "c");
                w.open(&format!("{pc} => {{"));
                w.open(&format!("if {test} {{"));
                w.line(&format!(
                    "Self::thompson_add(&mut nlist, &mut work, input, \
                     at_next, {});",
                    r.goto
                ));
                w.close("}");
                w.close("}");
            }
            Inst::Any(a) => {
                w.open(&format!("{pc} => {{"));
                w.line(&format!(
                    "Self::thompson_add(&mut nlist, &mut work, input, \
                     at_next, {});",
                    a.goto
                ));
                w.close("}");
            }
            _ => {}
        }
    }
    w.line("_ => {}");
    w.close("}");
    w.close("}");
    w.close("}");
    w.line("clist = nlist;");
    w.line(&format!("nlist = [0u64; {words}];"));
    w.line("at = at_next;");
    w.close("}");
    w.close("}");
    w.line("");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn emit(pattern: &str, caps: Option<usize>) -> String {
        let prog = Program::new(pattern).unwrap();
        let mut w = CodeWriter::new();
        let mut classes = ClassEmitter::new();
        match caps {
            Some(n) => {
                emit_captures_core(&mut w, &mut classes, &prog, true, n)
            }
            None => emit_match_core(&mut w, &mut classes, &prog, true),
        }
        w.finish()
    }

    #[test]
    fn literal_run_is_merged() {
        let code = emit("abc", None);
        assert!(code.contains("starts_with(b\"abc\")"), "{code}");
        // Interior instructions of the run emit no arms.
        assert!(!code.contains("== b'b'"), "{code}");
    }

    #[test]
    fn split_does_not_merge_into_runs() {
        // `ab|b` shares no mergeable tail; both alternatives stay intact.
        let code = emit("ab|cb", None);
        assert!(code.contains("starts_with(b\"ab\")"), "{code}");
        assert!(code.contains("starts_with(b\"cb\")"), "{code}");
    }

    #[test]
    fn captures_core_logs_slots() {
        let code = emit("(a)(b)", Some(6));
        assert!(code.contains("log.push((2u32, slots[2]));"), "{code}");
        assert!(code.contains("log.push((5u32, slots[5]));"), "{code}");
        assert!(code.contains("while log.len() > f.2"), "{code}");
    }

    #[test]
    fn slots_beyond_tracked_count_pass_through() {
        let code = emit("(a)(b)", Some(2));
        // Group slots 2..6 degrade to plain jumps.
        assert!(!code.contains("slots[2]"), "{code}");
        assert!(code.contains("log.push((0u32, slots[0]));"), "{code}");
    }

    #[test]
    fn word_boundary_forces_char_mode() {
        let code = emit(r"\bfoo", None);
        assert!(code.contains("word_char"), "{code}");
        assert!(code.contains("input[at..].starts_with(\"foo\")"), "{code}");
    }

    #[test]
    fn anchored_scan_attempts_only_start() {
        let code = emit("^abc", None);
        assert!(code.contains("if start != 0"), "{code}");
        assert!(!code.contains("find_byte"), "{code}");
    }

    #[test]
    fn unanchored_scan_uses_byte_probe() {
        let code = emit("foo", None);
        assert!(
            code.contains("scan::find_byte(102, input.as_bytes(), at)"),
            "{code}"
        );
    }

    #[test]
    fn thompson_variant_emits_bitsets() {
        let prog = Program::new("(a+)+b").unwrap();
        let mut w = CodeWriter::new();
        let mut classes = ClassEmitter::new();
        emit_thompson(&mut w, &mut classes, &prog);
        let code = w.finish();
        assert!(code.contains("fn thompson_is_match"), "{code}");
        assert!(code.contains("fn thompson_add"), "{code}");
        assert!(code.contains("bits.trailing_zeros()"), "{code}");
    }
}
