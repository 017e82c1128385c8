//! Template semantics against the reference regex library. The template
//! grammar maps `$name`/`$N` onto the reference library's forms, so a
//! replace loop driven by reference matches plus this crate's expansion
//! must reproduce the reference result.

use regex::Regex;
use rexgen::replace::{compile, Resolved};

/// The replace-all loop the emitted routines specialize, driven here by
/// the reference library's capture machinery.
fn replace_all_with(re: &Regex, input: &str, resolved: &Resolved) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0usize;
    for caps in re.captures_iter(input) {
        let m = caps.get(0).unwrap();
        out.push_str(&input[last..m.start()]);
        let groups: Vec<Option<&str>> = (0..re.captures_len())
            .map(|g| caps.get(g).map(|m| m.as_str()))
            .collect();
        resolved.expand(&groups, &mut out);
        last = m.end();
    }
    out.push_str(&input[last..]);
    out
}

fn names_of(re: &Regex) -> Vec<Option<String>> {
    re.capture_names()
        .map(|n| n.map(str::to_string))
        .collect()
}

fn check(pattern: &str, template: &str, input: &str, reference: &str) {
    let re = Regex::new(pattern).unwrap();
    let names = names_of(&re);
    let names_ref: Vec<Option<&str>> =
        names.iter().map(|n| n.as_deref()).collect();
    let resolved = compile(template, &names_ref).unwrap();
    assert_eq!(
        replace_all_with(&re, input, &resolved),
        reference,
        "pattern {pattern:?}, template {template:?}, input {input:?}"
    );
}

#[test]
fn named_reference_redaction() {
    check(
        r"(?P<user>\w+)@(?P<domain>\w+)",
        "$user@REDACTED",
        "a@b and c@d",
        "a@REDACTED and c@REDACTED",
    );
}

#[test]
fn dollar_dollar_is_a_literal_dollar() {
    check(r"\d+", "$$", "a1b2", "a$b$");
}

#[test]
fn agreement_with_reference_expansion() {
    // The reference library's `${name}`/`${N}` forms are the same
    // semantics; cross-check a handful of templates.
    for (pattern, template, reference_template, input) in [
        (r"(\d)(\d)", "$2$1", "${2}${1}", "1234 and 56"),
        (r"(?P<a>x+)(?P<b>y*)", "[$a|$b]", "[${a}|${b}]", "xxy x yy"),
        (r"(\w+) (\w+)", "$2, $1", "${2}, ${1}", "hello world"),
        (r"a(b)?c", "<$1>", "<${1}>", "ac abc"),
    ] {
        let re = Regex::new(pattern).unwrap();
        let names = names_of(&re);
        let names_ref: Vec<Option<&str>> =
            names.iter().map(|n| n.as_deref()).collect();
        let resolved = compile(template, &names_ref).unwrap();
        let got = replace_all_with(&re, input, &resolved);
        let want = re.replace_all(input, reference_template).to_string();
        assert_eq!(
            got, want,
            "template {template:?} on {input:?} with {pattern:?}"
        );
    }
}

#[test]
fn append_buffer_reuses_backing_storage() {
    let names: &[Option<&str>] = &[None, None];
    let resolved = compile("[$1]", names).unwrap();
    let groups: &[Option<&str>] = &[Some("ab"), Some("a")];

    // Warm buffer with plenty of capacity: the expansion must reuse it.
    let mut buf = Vec::with_capacity(256);
    let ptr = buf.as_ptr();
    resolved.expand_bytes(groups, &mut buf);
    assert_eq!(buf, b"[a]");
    assert_eq!(buf.as_ptr(), ptr, "backing storage must be reused");

    // And the result is identical regardless of pre-existing capacity.
    let mut tiny = Vec::new();
    resolved.expand_bytes(groups, &mut tiny);
    assert_eq!(tiny, buf);
}

#[test]
fn resolution_is_ahead_of_time() {
    // After resolve, no name segments remain, so expansion never does a
    // name lookup.
    let names: &[Option<&str>] = &[None, Some("user")];
    let resolved = compile("$user!", names).unwrap();
    let rendered = format!("{resolved:?}");
    assert!(
        !rendered.contains("Name"),
        "resolved template still has name segments: {rendered}"
    );
}
