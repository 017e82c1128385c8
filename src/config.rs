use crate::error::Error;

/// Compile-time configuration for one generation run.
///
/// `pattern` and `name` are required; everything else defaults. The
/// builder-style setters consume and return the config so a run reads as
/// one chain.
#[derive(Clone, Debug)]
pub struct Config {
    /// The regex source. Required; non-empty.
    pub pattern: String,
    /// Identifier prefix for the emitted matcher type. Required; must be a
    /// valid Rust identifier.
    pub name: String,
    /// The path under which the emitted code reaches this crate's runtime
    /// modules.
    pub package: String,
    /// Whether emitted code acquires match scratch from the global pool.
    pub use_pool: bool,
    /// Whether capture-producing routines are emitted. Defaults to true
    /// when the pattern contains any capture group.
    pub with_captures: Option<bool>,
    /// Whether a companion test file is emitted alongside.
    pub generate_tests: bool,
    /// Literal input strings for generated tests.
    pub test_inputs: Vec<String>,
    /// Replacement-template strings; each emits a numbered precompiled
    /// replace routine.
    pub replacers: Vec<String>,
    /// Force the linear-time match-only engine.
    pub force_thompson: bool,
    /// Force the tagged-NFA memoized engine for captures.
    pub force_tnfa: bool,
    /// Force the tagged-DFA engine; generation fails if the state budget
    /// is exceeded.
    pub force_tdfa: bool,
    /// Maximum DFA states before falling back from the tagged DFA.
    pub tdfa_state_budget: usize,
    /// Emit engine-selection rationale at info level instead of debug.
    pub verbose: bool,
}

/// Default maximum number of DFA states before the tagged-DFA emitter
/// gives up and the selector falls back.
pub const DEFAULT_TDFA_STATE_BUDGET: usize = 500;

impl Config {
    pub fn new(pattern: &str, name: &str) -> Config {
        Config {
            pattern: pattern.to_string(),
            name: name.to_string(),
            package: "rexgen".to_string(),
            use_pool: true,
            with_captures: None,
            generate_tests: false,
            test_inputs: Vec::new(),
            replacers: Vec::new(),
            force_thompson: false,
            force_tnfa: false,
            force_tdfa: false,
            tdfa_state_budget: DEFAULT_TDFA_STATE_BUDGET,
            verbose: false,
        }
    }

    pub fn package(mut self, package: &str) -> Config {
        self.package = package.to_string();
        self
    }

    pub fn use_pool(mut self, yes: bool) -> Config {
        self.use_pool = yes;
        self
    }

    pub fn with_captures(mut self, yes: bool) -> Config {
        self.with_captures = Some(yes);
        self
    }

    pub fn generate_tests(mut self, yes: bool) -> Config {
        self.generate_tests = yes;
        self
    }

    pub fn test_input(mut self, input: &str) -> Config {
        self.test_inputs.push(input.to_string());
        self
    }

    pub fn replacer(mut self, template: &str) -> Config {
        self.replacers.push(template.to_string());
        self
    }

    pub fn force_thompson(mut self, yes: bool) -> Config {
        self.force_thompson = yes;
        self
    }

    pub fn force_tnfa(mut self, yes: bool) -> Config {
        self.force_tnfa = yes;
        self
    }

    pub fn force_tdfa(mut self, yes: bool) -> Config {
        self.force_tdfa = yes;
        self
    }

    pub fn tdfa_state_budget(mut self, budget: usize) -> Config {
        self.tdfa_state_budget = budget;
        self
    }

    pub fn verbose(mut self, yes: bool) -> Config {
        self.verbose = yes;
        self
    }

    /// Checks the configuration before any parsing happens. Conflicting
    /// engine overrides are rejected here rather than silently prioritized.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pattern.is_empty() {
            return Err(Error::InvalidConfiguration(
                "pattern must not be empty".to_string(),
            ));
        }
        if !is_valid_identifier(&self.name) {
            return Err(Error::InvalidConfiguration(format!(
                "`{}` is not a valid routine name",
                self.name
            )));
        }
        if !self
            .package
            .split("::")
            .all(|seg| is_valid_identifier(seg))
        {
            return Err(Error::InvalidConfiguration(format!(
                "`{}` is not a valid package path",
                self.package
            )));
        }
        let forced = [self.force_thompson, self.force_tnfa, self.force_tdfa]
            .iter()
            .filter(|&&b| b)
            .count();
        if forced > 1 {
            return Err(Error::InvalidConfiguration(
                "at most one engine override may be set".to_string(),
            ));
        }
        if self.tdfa_state_budget == 0 {
            return Err(Error::InvalidConfiguration(
                "tdfa_state_budget must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A conservative identifier check: ASCII identifier syntax and not a
/// keyword that could collide in emitted code.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let head_ok = chars
        .next()
        .map_or(false, |c| c == '_' || c.is_ascii_alphabetic());
    head_ok
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !is_keyword(s)
        && s != "_"
}

fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        "as" | "break" | "const" | "continue" | "crate" | "dyn" | "else"
            | "enum" | "extern" | "false" | "fn" | "for" | "if" | "impl"
            | "in" | "let" | "loop" | "match" | "mod" | "move" | "mut"
            | "pub" | "ref" | "return" | "self" | "Self" | "static"
            | "struct" | "super" | "trait" | "true" | "type" | "unsafe"
            | "use" | "where" | "while" | "async" | "await" | "box"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_validates() {
        assert!(Config::new("a", "Letter").validate().is_ok());
    }

    #[test]
    fn empty_pattern_rejected() {
        assert!(matches!(
            Config::new("", "X").validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn bad_name_rejected() {
        for name in ["", "1abc", "a-b", "fn", "_"] {
            assert!(
                Config::new("a", name).validate().is_err(),
                "name `{name}` should be rejected"
            );
        }
    }

    #[test]
    fn conflicting_forces_rejected() {
        let cfg = Config::new("a", "X").force_tdfa(true).force_tnfa(true);
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn single_force_is_fine() {
        assert!(Config::new("a", "X").force_tdfa(true).validate().is_ok());
    }

    #[test]
    fn zero_budget_rejected() {
        let cfg = Config::new("a", "X").tdfa_state_budget(0);
        assert!(cfg.validate().is_err());
    }
}
