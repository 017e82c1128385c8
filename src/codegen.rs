//! Shared code-emission substrate.
//!
//! Everything the engine emitters have in common lives here: the indented
//! source writer, Rust literal escaping, character-class test lowering
//! (with the hand-optimized forms for common classes and a bitmap path for
//! big ASCII sets), the result-record structs, and the public operation
//! surface, which is the same text for every engine because all capture
//! engines emit one `captures_from` entry point.

use std::fmt::Write as _;

use crate::config::Config;
use crate::engine::{Engine, Selection};
use crate::error::Error;
use crate::program::Program;
use crate::replace::{Resolved, ResolvedSeg};

/// An indented source writer. One instance accumulates the whole emitted
/// file; emitters append through it so indentation stays consistent.
pub struct CodeWriter {
    out: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> CodeWriter {
        CodeWriter { out: String::new(), indent: 0 }
    }

    /// Appends one line at the current indent. An empty string emits a
    /// blank line.
    pub fn line(&mut self, s: &str) {
        if s.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    /// Appends a line and indents what follows.
    pub fn open(&mut self, s: &str) {
        self.line(s);
        self.indent += 1;
    }

    /// Dedents and appends a closing line.
    pub fn close(&mut self, s: &str) {
        self.indent -= 1;
        self.line(s);
    }

    /// Raises the indent without emitting a line, for continuation
    /// blocks like an `else` arm built from `close`.
    pub fn indent(&mut self) {
        self.indent += 1;
    }

    /// Lowers the indent without emitting a line.
    pub fn dedent(&mut self) {
        self.indent -= 1;
    }

    /// Appends already-rendered source verbatim; the text carries its
    /// own indentation.
    pub fn push_raw(&mut self, rendered: &str) {
        self.out.push_str(rendered);
    }

    pub fn finish(self) -> String {
        self.out
    }
}

impl Default for CodeWriter {
    fn default() -> CodeWriter {
        CodeWriter::new()
    }
}

/// A Rust string literal for `s`, escapes included.
pub fn str_lit(s: &str) -> String {
    format!("{s:?}")
}

/// A Rust char literal for `c`.
pub fn char_lit(c: char) -> String {
    format!("{c:?}")
}

/// Turns a capture group name into a struct field identifier, falling back
/// to the positional name when the group name cannot be a field or would
/// collide with the whole-match field.
pub fn field_ident(name: Option<&str>, index: usize) -> String {
    match name {
        Some(n)
            if crate::config::is_valid_identifier(n)
                && n != "full"
                && !n.starts_with("group_") =>
        {
            n.to_string()
        }
        _ => format!("group_{index}"),
    }
}

/// Character-class test lowering.
///
/// Produces a boolean expression over a char (or byte) variable. Common
/// classes come out as the obvious hand-written tests, tiny sets as
/// equality chains, big ASCII sets as a 256-bit bitmap lookup, and
/// everything else as a range check; multibyte classes always go through
/// the generic path. Any tables the tests need are accumulated as support
/// items and emitted once per file.
pub struct ClassEmitter {
    support: Vec<String>,
    need_table_fn: bool,
    need_bitmap_fn: bool,
    next_id: usize,
}

/// Range lists longer than this become a table probe instead of inline
/// pattern alternatives.
const INLINE_RANGE_LIMIT: usize = 12;

/// ASCII classes with more ranges than this become a bitmap.
const BITMAP_RANGE_LIMIT: usize = 4;

impl ClassEmitter {
    pub fn new() -> ClassEmitter {
        ClassEmitter {
            support: Vec::new(),
            need_table_fn: false,
            need_bitmap_fn: false,
            next_id: 0,
        }
    }

    /// A test over the char variable `var`.
    pub fn char_test(
        &mut self,
        ranges: &[(char, char)],
        negated: bool,
        var: &str,
    ) -> String {
        let inner = self.positive_char_test(ranges, var);
        if negated {
            format!("!({inner})")
        } else {
            inner
        }
    }

    fn positive_char_test(
        &mut self,
        ranges: &[(char, char)],
        var: &str,
    ) -> String {
        if let Some(test) = recognized_class(ranges, var, false) {
            return test;
        }
        let ascii = ranges.last().map_or(true, |&(_, hi)| hi <= '\x7f');
        if ascii && ranges.len() > BITMAP_RANGE_LIMIT {
            return self.bitmap_test(ranges, &format!("{var} as u32"));
        }
        if ranges.len() > INLINE_RANGE_LIMIT {
            return self.table_test(ranges, var);
        }
        let alts: Vec<String> = ranges
            .iter()
            .map(|&(lo, hi)| {
                if lo == hi {
                    char_lit(lo)
                } else {
                    format!("{}..={}", char_lit(lo), char_lit(hi))
                }
            })
            .collect();
        format!("matches!({var}, {})", alts.join(" | "))
    }

    /// A test over the byte variable `var`; callers guarantee the ranges
    /// are ASCII.
    pub fn byte_test(
        &mut self,
        ranges: &[(char, char)],
        var: &str,
    ) -> String {
        debug_assert!(ranges.iter().all(|&(_, hi)| hi <= '\x7f'));
        if let Some(test) = recognized_class(ranges, var, true) {
            return test;
        }
        if ranges.len() > BITMAP_RANGE_LIMIT {
            return self.bitmap_test(ranges, &format!("{var} as u32"));
        }
        let alts: Vec<String> = ranges
            .iter()
            .map(|&(lo, hi)| {
                if lo == hi {
                    format!("{}", lo as u8)
                } else {
                    format!("{}..={}", lo as u8, hi as u8)
                }
            })
            .collect();
        format!("matches!({var}, {})", alts.join(" | "))
    }

    fn bitmap_test(&mut self, ranges: &[(char, char)], expr: &str) -> String {
        let id = self.next_id;
        self.next_id += 1;
        let mut bits = [0u64; 4];
        for &(lo, hi) in ranges {
            for b in lo as u32..=hi as u32 {
                bits[(b >> 6) as usize] |= 1 << (b & 63);
            }
        }
        self.support.push(format!(
            "const CLASS_{id}: [u64; 4] = [{:#018x}, {:#018x}, {:#018x}, \
             {:#018x}];",
            bits[0], bits[1], bits[2], bits[3]
        ));
        self.need_bitmap_fn = true;
        format!("in_bitmap(&CLASS_{id}, {expr})")
    }

    fn table_test(&mut self, ranges: &[(char, char)], var: &str) -> String {
        let id = self.next_id;
        self.next_id += 1;
        let mut table = String::new();
        for &(lo, hi) in ranges {
            let _ = write!(
                table,
                "({}, {}), ",
                char_lit(lo),
                char_lit(hi)
            );
        }
        self.support.push(format!(
            "const CLASS_{id}: &[(char, char)] = &[{table}];"
        ));
        self.need_table_fn = true;
        format!("in_table(CLASS_{id}, {var})")
    }

    /// Emits the accumulated tables and probe helpers.
    pub fn emit_support(self, w: &mut CodeWriter) {
        for item in &self.support {
            w.line(item);
        }
        if !self.support.is_empty() {
            w.line("");
        }
        if self.need_bitmap_fn {
            w.open("fn in_bitmap(bits: &[u64; 4], b: u32) -> bool {");
            w.line("b < 256 && bits[(b >> 6) as usize] & (1 << (b & 63)) \
                    != 0");
            w.close("}");
            w.line("");
        }
        if self.need_table_fn {
            w.open("fn in_table(table: &[(char, char)], c: char) -> bool {");
            w.line("table");
            w.indent();
            w.open(".binary_search_by(|&(lo, hi)| {");
            w.open("if hi < c {");
            w.line("std::cmp::Ordering::Less");
            w.close("} else if lo > c {");
            w.indent();
            w.line("std::cmp::Ordering::Greater");
            w.close("} else {");
            w.indent();
            w.line("std::cmp::Ordering::Equal");
            w.close("}");
            w.close("})");
            w.line(".is_ok()");
            w.dedent();
            w.close("}");
            w.line("");
        }
    }
}

/// The hand-optimized tests for classes a human would write by hand.
fn recognized_class(
    ranges: &[(char, char)],
    var: &str,
    byte: bool,
) -> Option<String> {
    let method = match ranges {
        [('0', '9')] => "is_ascii_digit",
        [('a', 'z')] => "is_ascii_lowercase",
        [('A', 'Z')] => "is_ascii_uppercase",
        [('A', 'Z'), ('a', 'z')] => "is_ascii_alphabetic",
        [('0', '9'), ('A', 'Z'), ('a', 'z')] => "is_ascii_alphanumeric",
        [('0', '9'), ('A', 'F'), ('a', 'f')] => "is_ascii_hexdigit",
        _ => {
            if word_class(ranges) {
                return Some(if byte {
                    format!("({var} == b'_' || {var}.is_ascii_alphanumeric())")
                } else {
                    format!("({var} == '_' || {var}.is_ascii_alphanumeric())")
                });
            }
            if space_class(ranges) {
                return Some(if byte {
                    format!(
                        "({var} == 0x0b || {var}.is_ascii_whitespace())"
                    )
                } else {
                    format!(
                        "({var} == '\\u{{b}}' || \
                         {var}.is_ascii_whitespace())"
                    )
                });
            }
            // Up to three distinct single characters: an equality chain.
            if ranges.len() <= 3
                && ranges.iter().all(|&(lo, hi)| lo == hi)
            {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|&(lo, _)| {
                        if byte {
                            format!("{var} == {}", lo as u8)
                        } else {
                            format!("{var} == {}", char_lit(lo))
                        }
                    })
                    .collect();
                return Some(if parts.len() == 1 {
                    parts.into_iter().next().unwrap()
                } else {
                    format!("({})", parts.join(" || "))
                });
            }
            return None;
        }
    };
    Some(format!("{var}.{method}()"))
}

/// `[0-9A-Z_a-z]`, the ASCII word class.
fn word_class(ranges: &[(char, char)]) -> bool {
    ranges == [('0', '9'), ('A', 'Z'), ('_', '_'), ('a', 'z')]
}

/// `[\t-\r ]`, the ASCII space class.
fn space_class(ranges: &[(char, char)]) -> bool {
    ranges == [('\t', '\r'), (' ', ' ')]
}

/// Everything the operation-surface emitter needs to know about one run.
pub struct EmitPlan<'a> {
    pub program: &'a Program,
    pub config: &'a Config,
    pub selection: &'a Selection,
    /// (field name, group index) for each emitted record field after
    /// `full`; empty when capture routines are disabled.
    pub fields: Vec<(String, usize)>,
    /// Precompiled templates, resolved against the capture table.
    pub templates: Vec<Resolved>,
}

impl<'a> EmitPlan<'a> {
    pub fn new(
        program: &'a Program,
        config: &'a Config,
        selection: &'a Selection,
    ) -> Result<EmitPlan<'a>, Error> {
        let captures =
            crate::engine::wants_captures(&program.features, config);
        let fields = if captures {
            (1..program.num_captures())
                .map(|g| {
                    (field_ident(program.cap_names[g].as_deref(), g), g)
                })
                .collect()
        } else {
            Vec::new()
        };
        // Validate against the groups the engine will actually track, so
        // a template cannot reference slots that are never written.
        let names: Vec<Option<&str>> = program.cap_names
            [..selection.nslots / 2]
            .iter()
            .map(|n| n.as_deref())
            .collect();
        let mut templates = Vec::with_capacity(config.replacers.len());
        for (index, t) in config.replacers.iter().enumerate() {
            let resolved = crate::replace::compile(t, &names)
                .map_err(|source| Error::Template { index, source })?;
            templates.push(resolved);
        }
        Ok(EmitPlan { program, config, selection, fields, templates })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn match_type(&self) -> String {
        format!("{}Match", self.config.name)
    }

    pub fn ref_type(&self) -> String {
        format!("{}MatchRef", self.config.name)
    }

    /// The runtime crate path emitted in `use` lines.
    pub fn pkg(&self) -> &str {
        &self.config.package
    }

    /// True iff a backtracking span scanner is available, which the
    /// match-only operations and the specialized replacers prefer.
    pub fn has_span_core(&self) -> bool {
        self.selection.match_engine == Engine::Backtrack
    }
}

/// Emits the file header, the `use` block and the matcher struct.
pub fn emit_prelude(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let name = plan.name();
    let pkg = plan.pkg();
    w.line("// Code generated by rexgen; do not edit.");
    w.line("//");
    w.line(&format!("// pattern: {}", plan.program.pattern));
    w.line(&format!(
        "// engines: {}",
        plan.selection.labels().join(", ")
    ));
    w.line("");
    w.line(
        "#![allow(dead_code, unused_imports, unused_mut, \
         unused_variables)]",
    );
    w.line("");
    w.line("use std::io::{Read, Write};");
    w.line("");
    w.line(&format!(
        "use {pkg}::pool::{{self, MatchScratch, NO_POS}};"
    ));
    w.line(&format!("use {pkg}::replace;"));
    w.line(&format!("use {pkg}::scan;"));
    w.line(&format!(
        "use {pkg}::stream::{{self, ScanParams, StreamConfig, \
         StreamError}};"
    ));
    w.line(&format!("use {pkg}::TemplateError;"));
    if plan.selection.find_engine == Engine::Tnfa {
        w.line(&format!("use {pkg}::tnfa::MemoSet;"));
    }
    w.line("");
    w.line(&format!(
        "/// Compiled matcher for the pattern `{}`.",
        plan.program.pattern.replace('`', "'")
    ));
    w.line(&format!("pub struct {name};"));
    w.line("");
}

/// Emits the owned and borrowed result records.
pub fn emit_result_structs(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let name = plan.name();
    let mt = plan.match_type();
    let rt = plan.ref_type();
    w.line(&format!(
        "/// One match of [`{name}`], with owned text per group."
    ));
    w.line("#[derive(Clone, Debug, Default, PartialEq, Eq)]");
    w.open(&format!("pub struct {mt} {{"));
    w.line("/// The whole match.");
    w.line("pub full: String,");
    for (field, g) in &plan.fields {
        w.line(&format!(
            "/// Capture group {g}; empty when the group did not \
             participate."
        ));
        w.line(&format!("pub {field}: String,"));
    }
    w.close("}");
    w.line("");
    w.line(&format!(
        "/// One match of [`{name}`] borrowing the searched text: the \
         zero-copy"
    ));
    w.line("/// variant. Views must not outlive the input.");
    w.line("#[derive(Clone, Copy, Debug, PartialEq, Eq)]");
    w.open(&format!("pub struct {rt}<'a> {{"));
    w.line("/// The whole match.");
    w.line("pub full: &'a str,");
    for (field, g) in &plan.fields {
        w.line(&format!(
            "/// Capture group {g}; empty when the group did not \
             participate."
        ));
        w.line(&format!("pub {field}: &'a str,"));
    }
    w.close("}");
    w.line("");
}

/// Emits the associated constants every routine shares.
pub fn emit_consts(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let p = plan.program;
    let f = &p.features;
    w.line("/// The source pattern this matcher was compiled from.");
    w.line(&format!(
        "pub const PATTERN: &'static str = {};",
        str_lit(&p.pattern)
    ));
    w.line(&format!(
        "const NSLOTS: usize = {};",
        plan.selection.nslots
    ));
    w.line("/// Dispatcher target for a failed path; the fallback arm.");
    w.line("const FAIL: usize = usize::MAX;");
    // Only groups the engine actually tracks are visible to templates;
    // with captures disabled that is just the whole match.
    let ngroups = plan.selection.nslots / 2;
    let names: Vec<String> = p.cap_names[..ngroups]
        .iter()
        .map(|n| match n {
            Some(n) => format!("Some({})", str_lit(n)),
            None => "None".to_string(),
        })
        .collect();
    w.line(&format!(
        "const GROUPS: [Option<&'static str>; {ngroups}] = [{}];",
        names.join(", ")
    ));
    let max = match f.max_match_bytes() {
        Some(m) => format!("Some({m})"),
        None => "None".to_string(),
    };
    w.open("const SCAN_PARAMS: ScanParams = ScanParams {");
    w.line(&format!("min_match_bytes: {},", f.min_match_len));
    w.line(&format!("max_match_bytes: {max},"));
    w.close("};");
    w.line("");
}

/// Emits `group_text` and the record constructors.
pub fn emit_materialize(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let mt = plan.match_type();
    let rt = plan.ref_type();
    w.open(
        "fn group_text<'a>(input: &'a str, slots: &[usize], g: usize) -> \
         Option<&'a str> {",
    );
    w.line("let (s, e) = (slots[2 * g], slots[2 * g + 1]);");
    w.open("if s == NO_POS || e == NO_POS {");
    w.line("None");
    w.close("} else {");
    w.indent();
    w.line("Some(&input[s..e])");
    w.close("}");
    w.close("}");
    w.line("");
    w.open(&format!(
        "fn materialize(input: &str, slots: &[usize]) -> {mt} {{"
    ));
    w.open(&format!("{mt} {{"));
    w.line(
        "full: Self::group_text(input, slots, 0).unwrap_or(\"\")\
         .to_string(),",
    );
    for (field, g) in &plan.fields {
        w.line(&format!(
            "{field}: Self::group_text(input, slots, {g})\
             .unwrap_or(\"\").to_string(),"
        ));
    }
    w.close("}");
    w.close("}");
    w.line("");
    w.open(&format!(
        "fn materialize_ref<'a>(input: &'a str, slots: &[usize]) -> \
         {rt}<'a> {{"
    ));
    w.open(&format!("{rt} {{"));
    w.line("full: Self::group_text(input, slots, 0).unwrap_or(\"\"),");
    for (field, g) in &plan.fields {
        w.line(&format!(
            "{field}: Self::group_text(input, slots, {g})\
             .unwrap_or(\"\"),"
        ));
    }
    w.close("}");
    w.close("}");
    w.line("");
    w.open(&format!(
        "fn materialize_into(input: &str, slots: &[usize], out: &mut \
         {mt}) {{"
    ));
    w.line("out.full.clear();");
    w.line(
        "out.full.push_str(Self::group_text(input, slots, 0)\
         .unwrap_or(\"\"));",
    );
    for (field, g) in &plan.fields {
        w.line(&format!("out.{field}.clear();"));
        w.line(&format!(
            "out.{field}.push_str(Self::group_text(input, slots, {g})\
             .unwrap_or(\"\"));"
        ));
    }
    w.close("}");
    w.line("");
}

/// Emits the find family. Engine-agnostic: every capture engine provides
/// `captures_from` with the same signature.
pub fn emit_find_ops(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let mt = plan.match_type();
    let rt = plan.ref_type();

    if plan.has_span_core() {
        w.line("/// Returns true iff the pattern matches anywhere in \
                `input`.");
        w.open("pub fn is_match(input: &str) -> bool {");
        w.line("Self::span_from(input, 0).is_some()");
        w.close("}");
    } else {
        w.line("/// Returns true iff the pattern matches anywhere in \
                `input`.");
        w.open("pub fn is_match(input: &str) -> bool {");
        w.line("Self::thompson_is_match(input)");
        w.close("}");
    }
    w.line("");

    w.line("/// Returns the first match, or `None`.");
    w.open(&format!("pub fn find(input: &str) -> Option<{mt}> {{"));
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.open("if Self::captures_from(input, 0, &mut slots) {");
    w.line("Some(Self::materialize(input, &slots))");
    w.close("} else {");
    w.indent();
    w.line("None");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// Zero-copy variant of [`find`](Self::find): fields borrow \
            `input`.");
    w.open(&format!(
        "pub fn find_ref<'a>(input: &'a str) -> Option<{rt}<'a>> {{"
    ));
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.open("if Self::captures_from(input, 0, &mut slots) {");
    w.line("Some(Self::materialize_ref(input, &slots))");
    w.close("} else {");
    w.indent();
    w.line("None");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// Like [`find`](Self::find), but fills a caller-owned record \
            to avoid");
    w.line("/// allocation; returns false and leaves the record cleared on \
            no match.");
    w.open(&format!(
        "pub fn find_reuse(input: &str, out: &mut {mt}) -> bool {{"
    ));
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.open("if Self::captures_from(input, 0, &mut slots) {");
    w.line("Self::materialize_into(input, &slots, out);");
    w.line("true");
    w.close("} else {");
    w.indent();
    w.line("out.full.clear();");
    for (field, _) in &plan.fields {
        w.line(&format!("out.{field}.clear();"));
    }
    w.line("false");
    w.close("}");
    w.close("}");
    w.line("");

    w.line("/// All non-overlapping matches, at most `limit` when `limit \
            >= 0`.");
    w.line("/// `limit == 0` yields an empty list.");
    w.open(&format!(
        "pub fn find_all(input: &str, limit: isize) -> Vec<{mt}> {{"
    ));
    w.line("Self::find_all_append(input, limit, Vec::new())");
    w.close("}");
    w.line("");

    w.line("/// [`find_all`](Self::find_all) into a caller-owned list, \
            reusing its");
    w.line("/// backing storage.");
    w.open(&format!(
        "pub fn find_all_append(input: &str, limit: isize, mut out: \
         Vec<{mt}>) -> Vec<{mt}> {{"
    ));
    w.line("out.clear();");
    w.open("if limit == 0 {");
    w.line("return out;");
    w.close("}");
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.line("let mut at = 0usize;");
    w.open("while at <= input.len() {");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if !Self::captures_from(input, at, &mut slots) {");
    w.line("break;");
    w.close("}");
    w.line("let (s, e) = (slots[0], slots[1]);");
    w.line("out.push(Self::materialize(input, &slots));");
    w.open("if limit > 0 && out.len() as isize >= limit {");
    w.line("break;");
    w.close("}");
    w.line("at = if e == s { Self::next_boundary(input, e) } else { e };");
    w.close("}");
    w.line("out");
    w.close("}");
    w.line("");

    w.line("/// The byte offset just past the character at `at`; past the \
            end when");
    w.line("/// `at` is at the end. Empty matches advance through here.");
    w.open("fn next_boundary(input: &str, at: usize) -> usize {");
    w.open("match input[at..].chars().next() {");
    w.line("Some(c) => at + c.len_utf8(),");
    w.line("None => at + 1,");
    w.close("}");
    w.close("}");
    w.line("");
}

/// Emits the replacement family: runtime templates, numbered precompiled
/// templates with their specialized forms, and the append variant.
pub fn emit_replace_ops(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let ngroups = plan.selection.nslots / 2;

    w.line("/// Group texts in index order for one match, for template \
            expansion.");
    w.open(&format!(
        "fn group_array<'a>(input: &'a str, slots: &[usize]) -> \
         [Option<&'a str>; {ngroups}] {{"
    ));
    w.open("[");
    for g in 0..ngroups {
        w.line(&format!("Self::group_text(input, slots, {g}),"));
    }
    w.close("]");
    w.close("}");
    w.line("");

    // The shared replace loop over a resolved template.
    w.open(
        "fn replace_resolved(input: &str, resolved: &replace::Resolved, \
         limit: isize) -> String {",
    );
    w.line("let mut out = String::with_capacity(input.len());");
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.line("let mut at = 0usize;");
    w.line("let mut last = 0usize;");
    w.line("let mut n = 0isize;");
    w.open("while at <= input.len() {");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if !Self::captures_from(input, at, &mut slots) {");
    w.line("break;");
    w.close("}");
    w.line("let (s, e) = (slots[0], slots[1]);");
    w.line("out.push_str(&input[last..s]);");
    w.line(
        "resolved.expand(&Self::group_array(input, &slots), &mut out);",
    );
    w.line("last = e;");
    w.line("n += 1;");
    w.open("if limit > 0 && n >= limit {");
    w.line("break;");
    w.close("}");
    w.line("at = if e == s { Self::next_boundary(input, e) } else { e };");
    w.close("}");
    w.line("out.push_str(&input[last..]);");
    w.line("out");
    w.close("}");
    w.line("");

    w.line("/// Replaces every match using a `$`-style template parsed at \
            call time.");
    w.line("///");
    w.line("/// Template syntax: `$N`/`${N}` by group index, \
            `$name`/`${name}` by");
    w.line("/// group name, `$0` the whole match, `$$` a literal dollar.");
    w.open(
        "pub fn replace_all(input: &str, template: &str) -> \
         Result<String, TemplateError> {",
    );
    w.line(
        "let resolved = replace::compile(template, &Self::GROUPS)?;",
    );
    w.line("Ok(Self::replace_resolved(input, &resolved, -1))");
    w.close("}");
    w.line("");

    w.line("/// Replaces only the first match; see \
            [`replace_all`](Self::replace_all).");
    w.open(
        "pub fn replace_first(input: &str, template: &str) -> \
         Result<String, TemplateError> {",
    );
    w.line(
        "let resolved = replace::compile(template, &Self::GROUPS)?;",
    );
    w.line("Ok(Self::replace_resolved(input, &resolved, 1))");
    w.close("}");
    w.line("");

    w.line("/// [`replace_all`](Self::replace_all) into a caller-owned \
            byte buffer:");
    w.line("/// the buffer is cleared, refilled, and returned with its \
            backing");
    w.line("/// storage reused when capacity allows.");
    w.open(
        "pub fn replace_all_append(input: &str, template: &str, mut out: \
         Vec<u8>) -> Result<Vec<u8>, TemplateError> {",
    );
    w.line(
        "let resolved = replace::compile(template, &Self::GROUPS)?;",
    );
    w.line("out.clear();");
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.line("let mut at = 0usize;");
    w.line("let mut last = 0usize;");
    w.open("while at <= input.len() {");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if !Self::captures_from(input, at, &mut slots) {");
    w.line("break;");
    w.close("}");
    w.line("let (s, e) = (slots[0], slots[1]);");
    w.line("out.extend_from_slice(input[last..s].as_bytes());");
    w.line(
        "resolved.expand_bytes(&Self::group_array(input, &slots), &mut \
         out);",
    );
    w.line("last = e;");
    w.line("at = if e == s { Self::next_boundary(input, e) } else { e };");
    w.close("}");
    w.line("out.extend_from_slice(input[last..].as_bytes());");
    w.line("Ok(out)");
    w.close("}");
    w.line("");

    for (i, resolved) in plan.templates.iter().enumerate() {
        emit_precompiled_replacer(w, plan, i, resolved);
    }
}

/// One numbered precompiled replace routine. Literal-only templates skip
/// the capture engine entirely; templates that reference only the whole
/// match need spans but no group plumbing.
fn emit_precompiled_replacer(
    w: &mut CodeWriter,
    plan: &EmitPlan<'_>,
    i: usize,
    resolved: &Resolved,
) {
    let template = &plan.config.replacers[i];
    w.line(&format!(
        "/// Replaces every match with the precompiled template `{}`.",
        template.replace('`', "'")
    ));
    w.open(&format!("pub fn replace_all_{i}(input: &str) -> String {{"));
    let spans_only = resolved.is_full_match_only();
    if spans_only && plan.has_span_core() {
        // No capture machinery: drive the match-only engine.
        w.line("let mut out = String::with_capacity(input.len());");
        w.line("let mut at = 0usize;");
        w.line("let mut last = 0usize;");
        w.open("while at <= input.len() {");
        w.open("let (s, e) = match Self::span_from(input, at) {");
        w.line("Some(span) => span,");
        w.line("None => break,");
        w.close("};");
        w.line("out.push_str(&input[last..s]);");
        emit_inline_expansion(w, resolved, "input", "s", "e", None);
        w.line("last = e;");
        w.line(
            "at = if e == s { Self::next_boundary(input, e) } else { e };",
        );
        w.close("}");
        w.line("out.push_str(&input[last..]);");
        w.line("out");
    } else {
        w.line("let mut out = String::with_capacity(input.len());");
        w.line("let mut slots = [NO_POS; Self::NSLOTS];");
        w.line("let mut at = 0usize;");
        w.line("let mut last = 0usize;");
        w.open("while at <= input.len() {");
        w.open("for s in slots.iter_mut() {");
        w.line("*s = NO_POS;");
        w.close("}");
        w.open("if !Self::captures_from(input, at, &mut slots) {");
        w.line("break;");
        w.close("}");
        w.line("let (s, e) = (slots[0], slots[1]);");
        w.line("out.push_str(&input[last..s]);");
        emit_inline_expansion(
            w,
            resolved,
            "input",
            "s",
            "e",
            Some("slots"),
        );
        w.line("last = e;");
        w.line(
            "at = if e == s { Self::next_boundary(input, e) } else { e };",
        );
        w.close("}");
        w.line("out.push_str(&input[last..]);");
        w.line("out");
    }
    w.close("}");
    w.line("");
}

/// The inlined segment walk of a precompiled template.
fn emit_inline_expansion(
    w: &mut CodeWriter,
    resolved: &Resolved,
    input: &str,
    s: &str,
    e: &str,
    slots: Option<&str>,
) {
    for seg in resolved.segments() {
        match seg {
            ResolvedSeg::Literal(text) => {
                w.line(&format!("out.push_str({});", str_lit(text)));
            }
            ResolvedSeg::Group(0) => {
                w.line(&format!("out.push_str(&{input}[{s}..{e}]);"));
            }
            ResolvedSeg::Group(g) => {
                let slots = slots.expect(
                    "group reference requires a capture engine",
                );
                w.line(&format!(
                    "out.push_str(Self::group_text({input}, &{slots}, \
                     {g}).unwrap_or(\"\"));"
                ));
            }
        }
    }
}

/// Emits the streaming family on top of the runtime's chunk driver.
pub fn emit_stream_ops(w: &mut CodeWriter, plan: &EmitPlan<'_>) {
    let mt = plan.match_type();

    w.line("/// Runs the pattern over a byte stream, invoking `on_match` \
            for every");
    w.line("/// match with its absolute offset and text. The text borrows \
            an");
    w.line("/// internal buffer: copy it for any use past the callback. \
            Returning");
    w.line("/// false stops the stream early.");
    w.open(
        "pub fn stream_find<R: Read>(src: R, config: &StreamConfig, mut \
         on_match: impl FnMut(u64, &str) -> bool) -> Result<u64, \
         StreamError> {",
    );
    w.line("let mut slots = [NO_POS; Self::NSLOTS];");
    w.open("stream::find_matches(");
    w.line("src,");
    w.line("config,");
    w.line("&Self::SCAN_PARAMS,");
    w.open("move |text, from| {");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if Self::captures_from(text, from, &mut slots) {");
    w.line("Some((slots[0], slots[1]))");
    w.close("} else {");
    w.indent();
    w.line("None");
    w.close("}");
    w.close("},");
    w.line("|off, text| on_match(off, text),");
    w.close(")");
    w.close("}");
    w.line("");

    w.line("/// Counts matches in a byte stream.");
    w.open(
        "pub fn stream_find_count<R: Read>(src: R, config: \
         &StreamConfig) -> Result<u64, StreamError> {",
    );
    w.line("Self::stream_find(src, config, |_, _| true)");
    w.close("}");
    w.line("");

    w.line("/// Returns the first match in a byte stream, or `None`.");
    w.open(&format!(
        "pub fn stream_find_first<R: Read>(src: R, config: \
         &StreamConfig) -> Result<Option<{mt}>, StreamError> {{"
    ));
    w.line("let slots = std::cell::RefCell::new([NO_POS; Self::NSLOTS]);");
    w.line(&format!("let mut found: Option<{mt}> = None;"));
    w.open("stream::find_matches(");
    w.line("src,");
    w.line("config,");
    w.line("&Self::SCAN_PARAMS,");
    w.open("|text, from| {");
    w.line("let mut slots = slots.borrow_mut();");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if Self::captures_from(text, from, &mut slots[..]) {");
    w.line("Some((slots[0], slots[1]))");
    w.close("} else {");
    w.indent();
    w.line("None");
    w.close("}");
    w.close("},");
    w.open("|_, text| {");
    w.line("// Slot offsets are chunk-relative; rebase onto the match.");
    w.line("let abs = slots.borrow();");
    w.line("let base = abs[0];");
    w.line("let mut rel = [NO_POS; Self::NSLOTS];");
    w.open("for (r, &a) in rel.iter_mut().zip(abs.iter()) {");
    w.line("*r = if a == NO_POS { NO_POS } else { a - base };");
    w.close("}");
    w.line("found = Some(Self::materialize(text, &rel));");
    w.line("false");
    w.close("},");
    w.close(")?;");
    w.line("Ok(found)");
    w.close("}");
    w.line("");

    w.line("/// Streams `src` into `dst`, rewriting every match through a \
            `$`-style");
    w.line("/// template. Template errors surface as invalid-input I/O \
            errors.");
    w.open(
        "pub fn stream_replace<R: Read, W: Write>(src: R, config: \
         &StreamConfig, template: &str, dst: W) -> Result<u64, \
         StreamError> {",
    );
    w.open(
        "let resolved = match replace::compile(template, &Self::GROUPS) {",
    );
    w.line("Ok(r) => r,");
    w.open("Err(e) => {");
    w.open("return Err(StreamError::Io(std::io::Error::new(");
    w.line("std::io::ErrorKind::InvalidInput,");
    w.line("e.to_string(),");
    w.close(")))");
    w.close("}");
    w.close("};");
    w.line("let slots = std::cell::RefCell::new([NO_POS; Self::NSLOTS]);");
    w.open("stream::transform(");
    w.line("src,");
    w.line("dst,");
    w.line("config,");
    w.line("Self::SCAN_PARAMS,");
    w.open("|text, from| {");
    w.line("let mut slots = slots.borrow_mut();");
    w.open("for s in slots.iter_mut() {");
    w.line("*s = NO_POS;");
    w.close("}");
    w.open("if Self::captures_from(text, from, &mut slots[..]) {");
    w.line("Some((slots[0], slots[1]))");
    w.close("} else {");
    w.indent();
    w.line("None");
    w.close("}");
    w.close("},");
    w.open("|text, _span, out| {");
    w.line("let slots = slots.borrow();");
    w.line(
        "resolved.expand_bytes(&Self::group_array(text, &slots[..]), \
         out);",
    );
    w.close("},");
    w.close(")");
    w.close("}");
    w.line("");
}

/// Emits the companion test file asserting agreement with the reference
/// regex crate on the configured inputs. The host places it next to the
/// generated module; it requires the `regex` crate as a dev-dependency.
pub fn emit_tests(plan: &EmitPlan<'_>) -> String {
    let name = plan.name();
    let fn_name = snake_ident(name);
    let mut w = CodeWriter::new();
    w.line("// Code generated by rexgen; do not edit.");
    w.line("//");
    w.line(&format!("// Companion tests for `{name}`."));
    w.line("");
    w.line("use regex::Regex;");
    w.line("");
    w.line("use super::*;");
    w.line("");
    w.line("#[test]");
    w.open(&format!(
        "fn {fn_name}_agrees_with_reference_library() {{"
    ));
    w.line(&format!(
        "let re = Regex::new({name}::PATTERN).unwrap();"
    ));
    w.open("let inputs: &[&str] = &[");
    if plan.config.test_inputs.is_empty() {
        w.line("\"\",");
    }
    for input in &plan.config.test_inputs {
        w.line(&format!("{},", str_lit(input)));
    }
    w.close("];");
    w.open("for input in inputs {");
    w.open("assert_eq!(");
    w.line(&format!("{name}::is_match(input),"));
    w.line("re.is_match(input),");
    w.line("\"is_match disagrees on {input:?}\",");
    w.close(");");
    w.open(&format!("match ({name}::find(input), re.find(input)) {{"));
    w.open("(Some(got), Some(want)) => {");
    w.line(
        "assert_eq!(got.full, want.as_str(), \"match text on \
         {input:?}\");",
    );
    w.close("}");
    w.line("(None, None) => {}");
    w.open("(got, want) => {");
    w.line(
        "panic!(\"find disagrees on {input:?}: {got:?} vs {want:?}\");",
    );
    w.close("}");
    w.close("}");
    w.close("}");
    w.close("}");
    w.finish()
}

/// Lower-snake version of the matcher name for generated test names.
fn snake_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
