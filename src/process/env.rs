//! Child environment construction.

use std::ffi::OsString;

/// Variables the editor host injects that must never leak into commands.
///
/// Entries ending in `*` match every variable with that prefix.
pub const DEFAULT_FORBIDDEN_ENV_VARS: &[&str] = &[
    "ELECTRON_RUN_AS_NODE",
    "ELECTRON_NO_ATTACH_CONSOLE",
    "NODE_OPTIONS",
    "APPLICATION_INSIGHTS_NO_DIAGNOSTIC_CHANNEL",
    "VSCODE_*",
];

/// Set of variable names (or `PREFIX*` patterns) stripped from a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenVars {
    patterns: Vec<String>,
}

impl Default for ForbiddenVars {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_FORBIDDEN_ENV_VARS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        }
    }
}

impl ForbiddenVars {
    /// Denylist extended with `extra` patterns.
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vars = Self::default();
        vars.extend(extra);
        vars
    }

    /// Append patterns, skipping blanks and duplicates.
    pub fn extend<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in extra {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() && !self.patterns.iter().any(|p| p == pattern) {
                self.patterns.push(pattern.to_owned());
            }
        }
    }

    /// Patterns in insertion order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `name` is stripped.
    #[must_use]
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            pattern
                .strip_suffix('*')
                .map_or_else(|| pattern == name, |prefix| name.starts_with(prefix))
        })
    }

    /// Filter an environment, keeping only permitted variables.
    #[must_use]
    pub fn apply<I>(&self, vars: I) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter(|(name, _)| !self.is_forbidden(&name.to_string_lossy()))
            .collect()
    }
}

/// Join a command and its arguments into the line handed to the shell.
///
/// Arguments are not quoted: configured arguments are shell words and may
/// carry redirections or globs on purpose.
#[must_use]
pub fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.trim().to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
