/*!
An ahead-of-time regex compiler.

`rexgen` turns one regular expression into Rust source for a set of
matcher routines specialized to that pattern: `is_match`, the `find`
family, `$`-template replacement and streaming search/replace. The state
machine is inlined into the emitted code, so the host program pays no
pattern-interpretation cost at runtime; this crate is also the runtime
support library the emitted code links against (pools, the streaming
chunk driver, template expansion).

```
use rexgen::Config;

let generated = rexgen::generate(
    &Config::new(r"(?P<year>\d{4})-(?P<month>\d{2})", "Date"),
)
.unwrap();
assert!(generated.code.contains("pub struct Date;"));
assert!(generated.code.contains("pub fn find_all"));
```

Engine selection is automatic: a goto-threaded backtracker for ordinary
patterns, a Thompson bitset simulation when nested unbounded quantifiers
make backtracking pathological, a tagged DFA for capture extraction when
its state set stays within budget, and a memoized tagged NFA as the
linear-time fallback. [`analyze`] reports the decision without emitting
code.
*/

pub mod analyze;
pub mod backtrack;
pub mod codegen;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod inst;
pub mod pool;
pub mod program;
pub mod replace;
pub mod scan;
pub mod simplify;
pub mod stream;
pub mod tdfa;
pub mod tnfa;

use std::io;

use log::warn;

pub use crate::config::Config;
pub use crate::error::{Error, StreamError, TemplateError};

use crate::analyze::feature_labels;
use crate::codegen::{ClassEmitter, CodeWriter, EmitPlan};
use crate::engine::Engine;
use crate::program::Program;

/// The outcome of one generation run.
#[derive(Clone, Debug)]
pub struct Generated {
    /// The emitted matcher source.
    pub code: String,
    /// The companion test file, when requested.
    pub tests: Option<String>,
    /// What was decided along the way.
    pub analysis: Analysis,
}

/// Feature and engine labels for a pattern, plus the compile-time
/// metrics. Label lists are sorted, so equality comparison is
/// deterministic across runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Analysis {
    pub pattern: String,
    pub features: Vec<String>,
    pub engines: Vec<String>,
    pub nfa_states: usize,
    pub capture_count: usize,
    pub min_match_len: usize,
    pub max_match_len: Option<usize>,
    /// Why each engine was chosen, in selection order.
    pub rationale: Vec<String>,
}

/// Compiles a pattern to Rust source per the configuration.
pub fn generate(config: &Config) -> Result<Generated, Error> {
    config.validate()?;
    let prog = Program::new(&config.pattern)?;
    let mut selection = engine::select(&prog.features, config);

    // Resolve a tagged-DFA intent now: determinization is the one choice
    // that can fail, and the fallback is the tagged NFA unless the DFA
    // was forced.
    let dfa = if selection.find_engine == Engine::Tdfa {
        match tdfa::build(&prog, selection.nslots, config.tdfa_state_budget)
        {
            Ok(dfa) => Some(dfa),
            Err(e) if config.force_tdfa => {
                return Err(Error::EngineTooComplex(e.to_string()))
            }
            Err(e) => {
                warn!(
                    "{}: tagged DFA abandoned ({e}); falling back to \
                     tagged NFA",
                    config.name
                );
                selection.find_engine = Engine::Tnfa;
                selection
                    .reasons
                    .push(format!("find: tagged NFA (fallback: {e})"));
                None
            }
        }
    } else {
        None
    };

    // The memoized engine has its own emission-time analytical bound on
    // the memo table; there is no further engine to fall back to.
    if selection.find_engine == Engine::Tnfa
        && !tnfa::should_emit(&prog, selection.nslots)
    {
        return Err(Error::EngineTooComplex(format!(
            "memo table bound exceeded: {} instructions with {} capture \
             slots",
            prog.insts.len(),
            selection.nslots
        )));
    }

    let plan = EmitPlan::new(&prog, config, &selection)?;
    let mut classes = ClassEmitter::new();

    // The impl body first: core engines accumulate class-test support
    // items that must land at file level, before the impl block.
    let mut body = CodeWriter::new();
    body.indent();
    codegen::emit_consts(&mut body, &plan);
    match selection.match_engine {
        Engine::Backtrack => backtrack::emit_match_core(
            &mut body,
            &mut classes,
            &prog,
            config.use_pool,
        ),
        Engine::Thompson => {
            backtrack::emit_thompson(&mut body, &mut classes, &prog)
        }
        other => unreachable!("{other:?} cannot answer is_match"),
    }
    match selection.find_engine {
        Engine::Backtrack => backtrack::emit_captures_core(
            &mut body,
            &mut classes,
            &prog,
            config.use_pool,
            selection.nslots,
        ),
        Engine::Tdfa => tdfa::emit(
            &mut body,
            &prog,
            dfa.as_ref().expect("built above"),
            selection.nslots,
        ),
        Engine::Tnfa => {
            tnfa::emit(&mut body, &mut classes, &prog, selection.nslots)
        }
        other => unreachable!("{other:?} cannot produce captures"),
    }
    codegen::emit_materialize(&mut body, &plan);
    codegen::emit_find_ops(&mut body, &plan);
    codegen::emit_replace_ops(&mut body, &plan);
    codegen::emit_stream_ops(&mut body, &plan);

    let mut w = CodeWriter::new();
    codegen::emit_prelude(&mut w, &plan);
    codegen::emit_result_structs(&mut w, &plan);
    classes.emit_support(&mut w);
    if prog.features.has_word_boundary {
        w.open("fn word_char(c: char) -> bool {");
        w.line("c == '_' || c.is_alphanumeric()");
        w.close("}");
        w.line("");
    }
    w.open(&format!("impl {} {{", config.name));
    w.dedent();
    w.push_raw(&body.finish());
    w.line("}");

    let analysis = Analysis {
        pattern: config.pattern.clone(),
        features: feature_labels(&prog.features)
            .into_iter()
            .map(str::to_string)
            .collect(),
        engines: selection
            .labels()
            .into_iter()
            .map(str::to_string)
            .collect(),
        nfa_states: prog.features.nfa_states,
        capture_count: prog.features.capture_count,
        min_match_len: prog.features.min_match_len,
        max_match_len: prog.features.max_match_len,
        rationale: selection.reasons.clone(),
    };
    let tests = if config.generate_tests {
        Some(codegen::emit_tests(&plan))
    } else {
        None
    };
    Ok(Generated { code: w.finish(), tests, analysis })
}

/// Compiles a pattern and writes the emitted source to `out`. The
/// companion test file, when configured, is dropped; use [`generate`]
/// to receive it.
pub fn generate_to(
    config: &Config,
    out: &mut dyn io::Write,
) -> Result<Analysis, Error> {
    let generated = generate(config)?;
    out.write_all(generated.code.as_bytes())?;
    Ok(generated.analysis)
}

/// Read-only analysis: feature labels and engine labels for a pattern,
/// without emitting code. Deterministic for identical patterns.
pub fn analyze(pattern: &str) -> Result<Analysis, Error> {
    let config = Config::new(pattern, "Analysis");
    config.validate()?;
    let prog = Program::new(pattern)?;
    let mut selection = engine::select(&prog.features, &config);
    if selection.find_engine == Engine::Tdfa {
        if let Err(e) =
            tdfa::build(&prog, selection.nslots, config.tdfa_state_budget)
        {
            selection.find_engine = Engine::Tnfa;
            selection
                .reasons
                .push(format!("find: tagged NFA (fallback: {e})"));
        }
    }
    Ok(Analysis {
        pattern: pattern.to_string(),
        features: feature_labels(&prog.features)
            .into_iter()
            .map(str::to_string)
            .collect(),
        engines: selection
            .labels()
            .into_iter()
            .map(str::to_string)
            .collect(),
        nfa_states: prog.features.nfa_states,
        capture_count: prog.features.capture_count,
        min_match_len: prog.features.min_match_len,
        max_match_len: prog.features.max_match_len,
        rationale: selection.reasons,
    })
}
