//! Structural checks on emitted source: the public surface, engine
//! dispatch, pooling, emission modes and precompiled-template
//! specialization.

use rexgen::{generate, Config};

fn code(config: Config) -> String {
    generate(&config).unwrap().code
}

#[test]
fn full_operation_surface_is_emitted() {
    let code = code(
        Config::new(r"(?P<user>\w+)@(?P<domain>\w+)", "Email")
            .replacer("$user@REDACTED"),
    );
    for needle in [
        "pub struct Email;",
        "pub struct EmailMatch {",
        "pub struct EmailMatchRef<'a> {",
        "pub fn is_match(input: &str) -> bool",
        "pub fn find(input: &str) -> Option<EmailMatch>",
        "pub fn find_ref<'a>(input: &'a str) -> Option<EmailMatchRef<'a>>",
        "pub fn find_reuse(input: &str, out: &mut EmailMatch) -> bool",
        "pub fn find_all(input: &str, limit: isize) -> Vec<EmailMatch>",
        "pub fn find_all_append(",
        "pub fn replace_all(",
        "pub fn replace_first(",
        "pub fn replace_all_append(",
        "pub fn replace_all_0(input: &str) -> String",
        "pub fn stream_find<R: Read>(",
        "pub fn stream_find_count<R: Read>(",
        "pub fn stream_find_first<R: Read>(",
        "pub fn stream_replace<R: Read, W: Write>(",
        "pub const PATTERN: &'static str",
    ] {
        assert!(code.contains(needle), "missing `{needle}` in:\n{code}");
    }
}

#[test]
fn named_groups_become_fields() {
    let code = code(Config::new(
        r"(?P<user>\w+)@(?P<domain>\w+)",
        "Email",
    ));
    assert!(code.contains("pub user: String,"));
    assert!(code.contains("pub domain: String,"));
    assert!(code.contains("pub user: &'a str,"));
}

#[test]
fn unnamed_groups_get_positional_fields() {
    let code = code(Config::new(r"(\d{4})-(\d{2})-(\d{2})", "Date"));
    assert!(code.contains("pub group_1: String,"));
    assert!(code.contains("pub group_3: String,"));
}

#[test]
fn engine_dispatch_by_pattern_shape() {
    // Plain pattern: backtracker both for membership and spans.
    let plain = code(Config::new("abc", "Abc"));
    assert!(plain.contains("fn match_at"));
    assert!(plain.contains("fn captures_at"));
    assert!(!plain.contains("fn dfa_at"));

    // Captures: tagged DFA for the find family.
    let caps = code(Config::new(r"(\d+)-(\d+)", "Pair"));
    assert!(caps.contains("fn match_at"));
    assert!(caps.contains("fn dfa_at"));
    assert!(caps.contains("fn classify"));

    // Catastrophic shape: Thompson membership, tagged NFA captures.
    let risky = code(Config::new(r"(a+)+b", "Risky"));
    assert!(risky.contains("fn thompson_is_match"));
    assert!(risky.contains("fn tnfa_add"));
    assert!(!risky.contains("fn match_at"));
}

#[test]
fn pooling_toggles_scratch_acquisition() {
    let pooled = code(Config::new("abc", "Abc"));
    assert!(pooled.contains("pool::scratch(0)"));
    let unpooled = code(Config::new("abc", "Abc").use_pool(false));
    assert!(unpooled.contains("MatchScratch::new(0)"));
    assert!(!unpooled.contains("pool::scratch"));
}

#[test]
fn ascii_pattern_runs_on_bytes() {
    let code = code(Config::new(r"[a-z]+[0-9]", "Token"));
    assert!(code.contains("let h = input.as_bytes();"));
    assert!(code.contains("h[at]"));
}

#[test]
fn unicode_pattern_decodes_chars() {
    let code = code(Config::new(r"\w+", "Word"));
    assert!(code.contains("input[at..].chars().next()"));
    assert!(!code.contains("let h = input.as_bytes();"));
}

#[test]
fn recognized_classes_use_hand_written_tests() {
    let code = code(Config::new(r"[0-9]+[a-z]", "Num"));
    assert!(code.contains("is_ascii_digit()"));
    assert!(code.contains("is_ascii_lowercase()"));
}

#[test]
fn anchored_pattern_skips_scan_loop() {
    let code = code(Config::new(r"^ab", "Head"));
    assert!(code.contains("if start != 0"));
    assert!(!code.contains("find_byte"));
}

#[test]
fn unanchored_literal_head_uses_memchr_probe() {
    let code = code(Config::new("foobar", "Foo"));
    assert!(code.contains("scan::find_byte(102, input.as_bytes(), at)"));
}

#[test]
fn precompiled_literal_only_template_skips_captures() {
    let code = code(
        Config::new(r"\d+", "Digits")
            .replacer("N")
            .replacer("<$0>"),
    );
    // Both specialized templates drive the span engine, not the capture
    // engine.
    let body_0 = code
        .split("pub fn replace_all_0")
        .nth(1)
        .and_then(|s| s.split("pub fn").next())
        .unwrap();
    assert!(body_0.contains("span_from"), "{body_0}");
    assert!(!body_0.contains("captures_from"), "{body_0}");
    assert!(body_0.contains("out.push_str(\"N\");"), "{body_0}");
    let body_1 = code
        .split("pub fn replace_all_1")
        .nth(1)
        .and_then(|s| s.split("pub fn").next())
        .unwrap();
    assert!(body_1.contains("span_from"), "{body_1}");
    assert!(body_1.contains("out.push_str(&input[s..e]);"), "{body_1}");
}

#[test]
fn precompiled_group_template_inlines_the_walk() {
    let code = code(
        Config::new(r"(?P<user>\w+)@(?P<domain>\w+)", "Email")
            .replacer("$user@REDACTED"),
    );
    let body = code
        .split("pub fn replace_all_0")
        .nth(1)
        .and_then(|s| s.split("pub fn").next())
        .unwrap();
    assert!(body.contains("captures_from"), "{body}");
    assert!(
        body.contains("Self::group_text(input, &slots, 1)"),
        "{body}"
    );
    assert!(body.contains("out.push_str(\"@REDACTED\");"), "{body}");
    // Names resolved at generation time: no runtime template parsing.
    assert!(!body.contains("replace::compile"), "{body}");
}

#[test]
fn invalid_replacer_fails_generation() {
    let err = generate(
        &Config::new(r"(a)", "One").replacer("${oops"),
    )
    .unwrap_err();
    assert!(matches!(err, rexgen::Error::Template { index: 0, .. }));
    let err = generate(
        &Config::new(r"(a)", "One").replacer("$nope"),
    )
    .unwrap_err();
    assert!(matches!(err, rexgen::Error::Template { index: 0, .. }));
}

#[test]
fn word_boundary_support_fn_only_when_needed() {
    let with = code(Config::new(r"\bword\b", "W"));
    assert!(with.contains("fn word_char(c: char) -> bool"));
    let without = code(Config::new("word", "W"));
    assert!(!without.contains("fn word_char"));
}

#[test]
fn provenance_header_names_pattern_and_engines() {
    let code = code(Config::new(r"(a)(b)", "Two"));
    assert!(code.starts_with("// Code generated by rexgen; do not edit."));
    assert!(code.contains("// pattern: (a)(b)"));
    assert!(code.contains("// engines: "));
}

#[test]
fn captures_can_be_disabled() {
    let code = code(
        Config::new(r"(\d+)-(\d+)", "Pair").with_captures(false),
    );
    // Only the whole-match field remains, and spans come from the
    // backtracker rather than a tag engine.
    assert!(!code.contains("group_1"));
    assert!(code.contains("const NSLOTS: usize = 2;"));
    assert!(!code.contains("fn dfa_at"));
}

#[test]
fn package_path_flows_into_use_lines() {
    let code = code(
        Config::new("a", "A").package("my_rt"),
    );
    assert!(code.contains("use my_rt::pool::"));
    assert!(code.contains("use my_rt::stream::"));
}
