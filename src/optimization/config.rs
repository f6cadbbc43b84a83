//! Optimizer settings

use crate::compiler::{CompilerError, CompilerResult};

/// Optimization level, 0 (off) through 3 (constant folding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OptLevel(u8);

impl OptLevel {
    pub const NONE: OptLevel = OptLevel(0);
    pub const BASIC: OptLevel = OptLevel(1);
    pub const INLINE: OptLevel = OptLevel(2);
    pub const FOLD: OptLevel = OptLevel(3);

    /// Levels above 3 are clamped
    pub fn new(level: u8) -> Self {
        OptLevel(level.min(3))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::BASIC
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerConfig {
    pub level: OptLevel,
    /// Skip the inlining pass entirely
    pub disable_inlining: bool,
    /// Stop after inlining
    pub inline_only: bool,
    /// Rewrite `call; return` into `return_call`
    pub tail_calls: bool,
    /// Trace every rewrite through the `opt` log target
    pub verbose: bool,
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = OptLevel::new(level);
        self
    }

    pub fn with_inlining(mut self, enabled: bool) -> Self {
        self.disable_inlining = !enabled;
        self
    }

    pub fn with_inline_only(mut self, inline_only: bool) -> Self {
        self.inline_only = inline_only;
        self
    }

    pub fn with_tail_calls(mut self, tail_calls: bool) -> Self {
        self.tail_calls = tail_calls;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Read settings from driver flags (`-O2`, `-opt-no-inline`,
    /// `-opt-inline-only`, `-tail-call`, `-opt-log`). Unknown flags belong to
    /// other stages and are ignored.
    pub fn from_args<I, S>(args: I) -> CompilerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            match arg {
                "-opt-no-inline" => config.disable_inlining = true,
                "-opt-inline-only" => config.inline_only = true,
                "-tail-call" => config.tail_calls = true,
                "-opt-log" => config.verbose = true,
                _ => {
                    if let Some(level) = arg.strip_prefix("-O") {
                        let level: u8 = level.parse().map_err(|_| {
                            CompilerError::InvalidOption(format!(
                                "invalid optimization level: {}",
                                arg
                            ))
                        })?;
                        config.level = OptLevel::new(level);
                    }
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        let config = OptimizerConfig::default();
        assert_eq!(config.level, OptLevel::BASIC);
        assert!(!config.tail_calls);
    }

    #[test]
    fn test_from_args() {
        let config =
            OptimizerConfig::from_args(["input.js", "-O3", "-tail-call", "-opt-log", "-d"]).unwrap();
        assert_eq!(config.level, OptLevel::FOLD);
        assert!(config.tail_calls);
        assert!(config.verbose);
        assert!(!config.disable_inlining);

        let config = OptimizerConfig::from_args(["-O9", "-opt-no-inline"]).unwrap();
        assert_eq!(config.level.get(), 3);
        assert!(config.disable_inlining);
    }

    #[test]
    fn test_invalid_level() {
        let err = OptimizerConfig::from_args(["-Ofast"]).unwrap_err();
        assert!(matches!(err, CompilerError::InvalidOption(_)));
    }

    #[test]
    fn test_builder() {
        let config = OptimizerConfig::new()
            .with_level(2)
            .with_inlining(false)
            .with_inline_only(true);
        assert_eq!(config.level, OptLevel::INLINE);
        assert!(config.disable_inlining);
        assert!(config.inline_only);
    }
}
