//! Replacement templates.
//!
//! A template is a `$`-referenced byte string: `$1`/`${1}` by index,
//! `$name`/`${name}` by capture name, `$0` for the whole match, `$$` for a
//! literal dollar. Parsing yields literal and reference segments;
//! validation resolves every name to an index against the pattern's
//! capture table, so name lookup never happens while replacing.
//!
//! Emitted code uses this module two ways: runtime-template routines parse
//! and resolve on every call, while precompiled templates are resolved at
//! generation time and their segment walk is inlined into the emitted
//! source.

use crate::error::TemplateError;

/// One parsed piece of a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Raw bytes copied through verbatim.
    Literal(String),
    /// A capture reference by index; 0 is the whole match.
    Index(usize),
    /// A capture reference by name, resolved during validation.
    Name(String),
}

/// A parsed template, immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

/// A validated template: every segment is a literal or an index into the
/// capture slot table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    segments: Vec<ResolvedSeg>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedSeg {
    Literal(String),
    Group(usize),
}

impl Template {
    /// Parses a template. The grammar is byte-oriented: anything that is
    /// not part of a valid `$` reference is a literal, including a lone
    /// trailing `$`.
    pub fn parse(s: &str) -> Result<Template, TemplateError> {
        let b = s.as_bytes();
        let n = b.len();
        let mut segments = Vec::new();
        let mut lit: Vec<u8> = Vec::new();
        let mut i = 0;
        while i < n {
            if b[i] != b'$' {
                lit.push(b[i]);
                i += 1;
                continue;
            }
            match b.get(i + 1).copied() {
                None => {
                    // `$` at end of input is a literal.
                    lit.push(b'$');
                    i += 1;
                }
                Some(b'$') => {
                    lit.push(b'$');
                    i += 2;
                }
                Some(c) if c.is_ascii_digit() => {
                    flush(&mut lit, &mut segments);
                    // Greedy, up to two digits.
                    let mut end = i + 2;
                    if end < n && b[end].is_ascii_digit() {
                        end += 1;
                    }
                    let index: usize = s[i + 1..end].parse().unwrap();
                    segments.push(Segment::Index(index));
                    i = end;
                }
                Some(b'{') => {
                    flush(&mut lit, &mut segments);
                    let close = b[i + 2..]
                        .iter()
                        .position(|&c| c == b'}')
                        .map(|p| i + 2 + p)
                        .ok_or(TemplateError::UnclosedBrace(i))?;
                    segments.push(braced(&s[i + 2..close], i)?);
                    i = close + 1;
                }
                Some(c) if c == b'_' || c.is_ascii_alphabetic() => {
                    flush(&mut lit, &mut segments);
                    let mut end = i + 2;
                    while end < n
                        && (b[end] == b'_' || b[end].is_ascii_alphanumeric())
                    {
                        end += 1;
                    }
                    segments
                        .push(Segment::Name(s[i + 1..end].to_string()));
                    i = end;
                }
                Some(_) => {
                    // `$` followed by nothing that starts a reference.
                    lit.push(b'$');
                    i += 1;
                }
            }
        }
        flush(&mut lit, &mut segments);
        Ok(Template { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Validates the template against a capture table and rewrites every
    /// name segment into an index segment. `names` has one entry per
    /// group, index 0 first; `names.len()` is the group count including
    /// the whole match.
    pub fn resolve(
        &self,
        names: &[Option<&str>],
    ) -> Result<Resolved, TemplateError> {
        let ngroups = names.len();
        let mut segments = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            segments.push(match seg {
                Segment::Literal(s) => ResolvedSeg::Literal(s.clone()),
                Segment::Index(i) => {
                    if *i >= ngroups {
                        return Err(TemplateError::IndexOutOfRange {
                            index: *i,
                            count: ngroups.saturating_sub(1),
                        });
                    }
                    ResolvedSeg::Group(*i)
                }
                Segment::Name(name) => {
                    let idx = names
                        .iter()
                        .position(|n| n.as_deref() == Some(name.as_str()))
                        .ok_or_else(|| {
                            TemplateError::UnknownName(name.clone())
                        })?;
                    ResolvedSeg::Group(idx)
                }
            });
        }
        Ok(Resolved { segments })
    }
}

/// Parses the inside of a `${...}` reference.
fn braced(content: &str, at: usize) -> Result<Segment, TemplateError> {
    if content.is_empty() {
        return Err(TemplateError::EmptyReference(at));
    }
    let b = content.as_bytes();
    if b.iter().all(|c| c.is_ascii_digit()) {
        return content
            .parse()
            .map(Segment::Index)
            .map_err(|_| TemplateError::MalformedReference(content.into()));
    }
    let ident = (b[0] == b'_' || b[0].is_ascii_alphabetic())
        && b[1..]
            .iter()
            .all(|&c| c == b'_' || c.is_ascii_alphanumeric());
    if ident {
        Ok(Segment::Name(content.to_string()))
    } else {
        Err(TemplateError::MalformedReference(content.to_string()))
    }
}

fn flush(lit: &mut Vec<u8>, segments: &mut Vec<Segment>) {
    if !lit.is_empty() {
        let s = String::from_utf8(std::mem::take(lit))
            .expect("literal split on ASCII boundaries");
        segments.push(Segment::Literal(s));
    }
}

impl Resolved {
    pub fn segments(&self) -> &[ResolvedSeg] {
        &self.segments
    }

    /// True iff no segment references a capture at all.
    pub fn is_literal_only(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, ResolvedSeg::Literal(_)))
    }

    /// True iff the only capture referenced is the whole match, so the
    /// replace routine needs no capture machinery.
    pub fn is_full_match_only(&self) -> bool {
        self.segments.iter().all(|s| match s {
            ResolvedSeg::Literal(_) => true,
            ResolvedSeg::Group(g) => *g == 0,
        })
    }

    /// Expands one match into `out`. `groups` holds the text of each
    /// group in index order; a group that did not participate is `None`
    /// and expands to nothing.
    pub fn expand(&self, groups: &[Option<&str>], out: &mut String) {
        for seg in &self.segments {
            match seg {
                ResolvedSeg::Literal(s) => out.push_str(s),
                ResolvedSeg::Group(g) => {
                    if let Some(text) = groups.get(*g).copied().flatten() {
                        out.push_str(text);
                    }
                }
            }
        }
    }

    /// Byte-buffer variant of [`expand`](Resolved::expand) for the append
    /// routines.
    pub fn expand_bytes(&self, groups: &[Option<&str>], out: &mut Vec<u8>) {
        for seg in &self.segments {
            match seg {
                ResolvedSeg::Literal(s) => {
                    out.extend_from_slice(s.as_bytes())
                }
                ResolvedSeg::Group(g) => {
                    if let Some(text) = groups.get(*g).copied().flatten() {
                        out.extend_from_slice(text.as_bytes());
                    }
                }
            }
        }
    }
}

/// Parses and resolves in one step; the call emitted into runtime-template
/// replace routines.
pub fn compile(
    template: &str,
    names: &[Option<&str>],
) -> Result<Resolved, TemplateError> {
    Template::parse(template)?.resolve(names)
}
