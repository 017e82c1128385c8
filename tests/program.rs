//! Differential tests of the compiled instruction program against the
//! reference regex library.
//!
//! A small breadth-first interpreter mirrors the semantics every emitted
//! engine specializes: ordered thread lists for leftmost-first priority,
//! tag arrays stamped and restored across save edges, assertions checked
//! against the characters around the position. If the program is lowered
//! correctly, interpreting it must agree with the `regex` crate.

use regex::Regex;
use rexgen::inst::Inst;
use rexgen::pool::NO_POS;
use rexgen::program::Program;

fn add(
    prog: &Program,
    list: &mut Vec<(usize, Vec<usize>)>,
    bits: &mut [bool],
    input: &str,
    at: usize,
    pc: usize,
    caps: &mut Vec<usize>,
) {
    if bits[pc] {
        return;
    }
    bits[pc] = true;
    match &prog.insts[pc] {
        Inst::Split(s) => {
            add(prog, list, bits, input, at, s.goto1, caps);
            add(prog, list, bits, input, at, s.goto2, caps);
        }
        Inst::Save(s) => {
            let old = caps[s.slot];
            caps[s.slot] = at;
            add(prog, list, bits, input, at, s.goto, caps);
            caps[s.slot] = old;
        }
        Inst::EmptyLook(e) => {
            let prev = input[..at].chars().next_back();
            let next = input[at..].chars().next();
            if e.matches(prev, next) {
                add(prog, list, bits, input, at, e.goto, caps);
            }
        }
        _ => list.push((pc, caps.clone())),
    }
}

/// Leftmost capture-recording match at or after `start`.
fn captures_from(
    prog: &Program,
    input: &str,
    start: usize,
) -> Option<Vec<usize>> {
    let n = prog.insts.len();
    let nslots = prog.num_slots();
    let anchored = prog.features.anchored_start;
    let mut cl: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut nl: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut cbits = vec![false; n];
    let mut nbits = vec![false; n];
    let mut matched: Option<Vec<usize>> = None;
    let mut at = start;
    if start > input.len() {
        return None;
    }
    loop {
        if matched.is_none() && (!anchored || at == start) {
            let mut caps = vec![NO_POS; nslots];
            add(prog, &mut cl, &mut cbits, input, at, 0, &mut caps);
        }
        let c = input[at..].chars().next();
        let nat = at + c.map_or(1, |c| c.len_utf8());
        for i in 0..cl.len() {
            let (pc, caps) = cl[i].clone();
            match &prog.insts[pc] {
                Inst::Char(x) => {
                    if c == Some(x.c) {
                        let mut caps = caps;
                        add(
                            prog, &mut nl, &mut nbits, input, nat,
                            x.goto, &mut caps,
                        );
                    }
                }
                Inst::Ranges(r) => {
                    if c.map_or(false, |ch| r.matches(ch)) {
                        let mut caps = caps;
                        add(
                            prog, &mut nl, &mut nbits, input, nat,
                            r.goto, &mut caps,
                        );
                    }
                }
                Inst::Any(a) => {
                    if c.is_some() {
                        let mut caps = caps;
                        add(
                            prog, &mut nl, &mut nbits, input, nat,
                            a.goto, &mut caps,
                        );
                    }
                }
                Inst::Match => {
                    matched = Some(caps);
                    break;
                }
                _ => {}
            }
        }
        if c.is_none() {
            break;
        }
        std::mem::swap(&mut cl, &mut nl);
        nl.clear();
        std::mem::swap(&mut cbits, &mut nbits);
        for b in nbits.iter_mut() {
            *b = false;
        }
        at = nat;
        if cl.is_empty() && (matched.is_some() || anchored) {
            break;
        }
    }
    matched
}

/// All non-overlapping match spans, mirroring the emitted find_all loop.
fn find_all_spans(prog: &Program, input: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut at = 0usize;
    while at <= input.len() {
        let caps = match captures_from(prog, input, at) {
            Some(caps) => caps,
            None => break,
        };
        let (s, e) = (caps[0], caps[1]);
        out.push((s, e));
        at = if e == s {
            match input[e..].chars().next() {
                Some(c) => e + c.len_utf8(),
                None => e + 1,
            }
        } else {
            e
        };
    }
    out
}

fn check_against_reference(pattern: &str, inputs: &[&str]) {
    let prog = Program::new(pattern).unwrap();
    let re = Regex::new(pattern).unwrap();
    for input in inputs {
        let got = captures_from(&prog, input, 0);
        let want = re.captures(input);
        assert_eq!(
            got.is_some(),
            want.is_some(),
            "membership disagrees for {pattern:?} on {input:?}"
        );
        if let (Some(got), Some(want)) = (got, want) {
            for g in 0..prog.num_captures() {
                let got_span = match (got[2 * g], got[2 * g + 1]) {
                    (NO_POS, _) | (_, NO_POS) => None,
                    (s, e) => Some((s, e)),
                };
                let want_span =
                    want.get(g).map(|m| (m.start(), m.end()));
                assert_eq!(
                    got_span, want_span,
                    "group {g} disagrees for {pattern:?} on {input:?}"
                );
            }
        }
    }
}

#[test]
fn date_pattern_captures() {
    check_against_reference(
        r"(\d{4})-(\d{2})-(\d{2})",
        &["2024-12-25", "no dates here", "x 1999-01-31 y", "999-01-01"],
    );
}

#[test]
fn named_email_pattern() {
    check_against_reference(
        r"(?P<user>\w+)@(?P<domain>\w+)",
        &["a@b and c@d", "nobody", "@", "Δ@δ"],
    );
}

#[test]
fn email_address_regression() {
    // Historical false reject: the minimal address must match.
    check_against_reference(
        r"[\w.+-]+@[\w.-]+\.[\w.-]+",
        &["a@b.c", "first.last+tag@example.co.uk", "not an email"],
    );
}

#[test]
fn nested_quantifier_completes_quickly() {
    let prog = Program::new(r"(a+)+b").unwrap();
    let input = format!("{}b", "a".repeat(20));
    let caps = captures_from(&prog, &input, 0).unwrap();
    assert_eq!((caps[0], caps[1]), (0, 21));
    // And the classic non-matching blowup input.
    let bad = "a".repeat(24);
    assert!(captures_from(&prog, &bad, 0).is_none());
}

#[test]
fn alternation_is_leftmost_first() {
    check_against_reference(r"a|ab", &["ab"]);
    check_against_reference(r"ab|a", &["ab"]);
    check_against_reference(r"(foo|foobar)", &["foobar"]);
}

#[test]
fn greedy_and_lazy_quantifiers() {
    check_against_reference(r"<(.+)>", &["<a><b>"]);
    check_against_reference(r"<(.+?)>", &["<a><b>"]);
    check_against_reference(r"a*", &["aaa", ""]);
    check_against_reference(r"(a*)(b*)", &["aabb", "bb", ""]);
}

#[test]
fn anchors_and_boundaries() {
    check_against_reference(r"^abc$", &["abc", "xabc", "abcx", ""]);
    check_against_reference(r"^a+", &["aaa", "baa"]);
    check_against_reference(r"\bfoo\b", &["foo", "foobar", "a foo b"]);
    check_against_reference(r"\Bar", &["bar", "ar"]);
}

#[test]
fn optional_groups_leave_empty_slots() {
    check_against_reference(r"(a)?(b)", &["b", "ab"]);
    check_against_reference(r"(x(y)?)+", &["xxy", "x"]);
}

#[test]
fn zero_width_matches_between_every_byte() {
    let prog = Program::new(r"a*").unwrap();
    let re = Regex::new(r"a*").unwrap();
    let spans = find_all_spans(&prog, "bbb");
    let want: Vec<(usize, usize)> =
        re.find_iter("bbb").map(|m| (m.start(), m.end())).collect();
    assert_eq!(spans, want);
    assert_eq!(spans.len(), 4);
}

#[test]
fn find_all_matches_reference_everywhere() {
    for (pattern, input) in [
        (r"\d+", "a1b22c333"),
        (r"a", "aaaa"),
        (r"a{2}", "aaaaa"),
        (r"[αβ]+", "αβ x β"),
        (r"\w+@\w+", "a@b c@d e"),
    ] {
        let prog = Program::new(pattern).unwrap();
        let re = Regex::new(pattern).unwrap();
        let want: Vec<(usize, usize)> = re
            .find_iter(input)
            .map(|m| (m.start(), m.end()))
            .collect();
        assert_eq!(
            find_all_spans(&prog, input),
            want,
            "find_all disagrees for {pattern:?} on {input:?}"
        );
    }
}

#[test]
fn empty_input_never_panics() {
    for pattern in [r"a+", r"\d", r"(x)(y)", r"^$", r".", r"\bx"] {
        let prog = Program::new(pattern).unwrap();
        let re = Regex::new(pattern).unwrap();
        assert_eq!(
            captures_from(&prog, "", 0).is_some(),
            re.is_match(""),
            "{pattern:?} on empty input"
        );
    }
}

#[test]
fn multibyte_inputs() {
    check_against_reference(r"é+", &["héllo éé", "no accents"]);
    check_against_reference(r"(д)(а)", &["да", "ад"]);
    check_against_reference(r".", &["é", ""]);
}
