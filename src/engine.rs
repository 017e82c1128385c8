//! Engine selection.
//!
//! Two orthogonal choices are resolved per pattern: which engine answers
//! boolean membership, and which engine produces match spans and capture
//! offsets for the find family. The feature vector drives both; explicit
//! overrides from the configuration disable the heuristics.

use log::{debug, info};

use crate::analyze::Features;
use crate::config::Config;

/// The matching engines this compiler can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    /// A goto-threaded backtracking engine with an explicit frame stack.
    /// The fastest choice for patterns without catastrophic risk.
    Backtrack,
    /// A breadth-first bitset simulation guaranteeing O(n × program size)
    /// for boolean membership.
    Thompson,
    /// A tagged DFA: no backtracking, strictly linear scanning, capture
    /// positions recovered from tag registers.
    Tdfa,
    /// A tagged NFA simulation with position-fingerprint memoization; the
    /// linear-time fallback when the DFA does not fit its budget.
    Tnfa,
}

impl Engine {
    /// The labels exposed by the analysis interface for this engine.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Engine::Backtrack => &["Backtracking"],
            Engine::Thompson => &["Thompson"],
            Engine::Tdfa => &["TDFA"],
            Engine::Tnfa => &["TNFA", "Memoization"],
        }
    }
}

/// The outcome of engine selection, with the rationale for the optional
/// analysis-only reporting interface.
#[derive(Clone, Debug)]
pub struct Selection {
    /// Engine for `is_match`: Backtrack or Thompson.
    pub match_engine: Engine,
    /// Engine for the find family: Backtrack (spans only), Tdfa or Tnfa.
    /// A Tdfa choice may still fall back to Tnfa if determinization
    /// exceeds the state budget.
    pub find_engine: Engine,
    /// Number of capture slots the find engine tracks.
    pub nslots: usize,
    /// Why each engine was chosen, in selection order.
    pub reasons: Vec<String>,
}

impl Selection {
    /// Sorted, deduplicated engine labels for analysis output.
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels: Vec<&'static str> = self
            .match_engine
            .labels()
            .iter()
            .chain(self.find_engine.labels())
            .copied()
            .collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

/// True iff capture-producing routines should be emitted for this run.
pub fn wants_captures(features: &Features, config: &Config) -> bool {
    features.capture_count > 1
        && config.with_captures.unwrap_or(true)
}

/// Chooses engines for a pattern. Infallible: conflicting overrides were
/// rejected at configuration validation, and a Tdfa choice that exceeds
/// its budget is resolved by the generator, not here.
pub fn select(features: &Features, config: &Config) -> Selection {
    let mut reasons = Vec::new();
    let captures = wants_captures(features, config);
    let nslots = if captures { 2 * features.capture_count } else { 2 };

    let match_engine = if config.force_thompson {
        reasons.push("match: Thompson (forced)".to_string());
        Engine::Thompson
    } else if features.has_nested_unbounded {
        reasons.push(
            "match: Thompson (nested unbounded quantifier, linear-time \
             guarantee required)"
                .to_string(),
        );
        Engine::Thompson
    } else {
        reasons.push("match: backtracking (no catastrophic risk)".to_string());
        Engine::Backtrack
    };

    let find_engine = if config.force_tdfa {
        reasons.push("find: tagged DFA (forced)".to_string());
        Engine::Tdfa
    } else if config.force_tnfa {
        reasons.push("find: tagged NFA (forced)".to_string());
        Engine::Tnfa
    } else if config.force_thompson {
        reasons.push(
            "find: tagged NFA (Thompson forced; spans and captures need \
             tags)"
                .to_string(),
        );
        Engine::Tnfa
    } else if features.has_nested_unbounded {
        reasons.push(
            "find: tagged NFA (nested unbounded quantifier; skipping DFA)"
                .to_string(),
        );
        Engine::Tnfa
    } else if captures {
        reasons.push(format!(
            "find: tagged DFA (captures present, budget {} states)",
            config.tdfa_state_budget
        ));
        Engine::Tdfa
    } else {
        reasons
            .push("find: backtracking (no capture groups to tag)".to_string());
        Engine::Backtrack
    };

    let selection =
        Selection { match_engine, find_engine, nslots, reasons };
    for reason in &selection.reasons {
        if config.verbose {
            info!("{}: {}", config.name, reason);
        } else {
            debug!("{}: {}", config.name, reason);
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn select_for(pattern: &str, config: Config) -> Selection {
        let prog = Program::new(pattern).unwrap();
        select(&prog.features, &config)
    }

    #[test]
    fn plain_pattern_backtracks() {
        let s = select_for("abc", Config::new("abc", "X"));
        assert_eq!(s.match_engine, Engine::Backtrack);
        assert_eq!(s.find_engine, Engine::Backtrack);
        assert_eq!(s.nslots, 2);
    }

    #[test]
    fn captures_prefer_tdfa() {
        let s = select_for("(a)(b)", Config::new("(a)(b)", "X"));
        assert_eq!(s.match_engine, Engine::Backtrack);
        assert_eq!(s.find_engine, Engine::Tdfa);
        assert_eq!(s.nslots, 6);
    }

    #[test]
    fn nested_unbounded_goes_linear() {
        let s = select_for("(a+)+b", Config::new("(a+)+b", "X"));
        assert_eq!(s.match_engine, Engine::Thompson);
        assert_eq!(s.find_engine, Engine::Tnfa);
    }

    #[test]
    fn disabling_captures_downgrades_find() {
        let cfg = Config::new("(a)(b)", "X").with_captures(false);
        let s = select_for("(a)(b)", cfg);
        assert_eq!(s.find_engine, Engine::Backtrack);
        assert_eq!(s.nslots, 2);
    }

    #[test]
    fn forces_are_honored() {
        let s = select_for("abc", Config::new("abc", "X").force_tnfa(true));
        assert_eq!(s.find_engine, Engine::Tnfa);
        let s = select_for("abc", Config::new("abc", "X").force_tdfa(true));
        assert_eq!(s.find_engine, Engine::Tdfa);
        let s =
            select_for("abc", Config::new("abc", "X").force_thompson(true));
        assert_eq!(s.match_engine, Engine::Thompson);
        assert_eq!(s.find_engine, Engine::Tnfa);
    }

    #[test]
    fn labels_sorted_unique() {
        let s = select_for("(a+)+b", Config::new("(a+)+b", "X"));
        let labels = s.labels();
        assert_eq!(labels, vec!["Memoization", "TNFA", "Thompson"]);
    }
}
