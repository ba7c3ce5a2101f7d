//! Runtime knobs. Each has a code default and an environment override.

/// `TRACEGRAPH_RETAIN_HISTORY`: keep rows of entities that dropped out of the
/// latest run (marked not-current) instead of deleting them.
pub const RETAIN_HISTORY_ENV: &str = "TRACEGRAPH_RETAIN_HISTORY";

/// `TRACEGRAPH_PARSE_WORKERS`: thread count for shard parsing.
pub const PARSE_WORKERS_ENV: &str = "TRACEGRAPH_PARSE_WORKERS";

const DEFAULT_PARSE_WORKERS: usize = 4;

/// Boolean toggle read from `name`. When `default` is true only an explicit
/// off value (`0`, `false`, `no`, `off`) disables it; when false only an
/// explicit on value (`1`, `true`, `yes`, `on`) enables it. Unset means
/// `default`.
pub fn env_enabled(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaverConfig {
    pub retain_history: bool,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            retain_history: true,
        }
    }
}

impl SaverConfig {
    pub fn from_env() -> Self {
        Self {
            retain_history: env_enabled(RETAIN_HISTORY_ENV, true),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserConfig {
    pub workers: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_PARSE_WORKERS,
        }
    }
}

impl ParserConfig {
    pub fn from_env() -> Self {
        Self {
            workers: env_usize(PARSE_WORKERS_ENV, DEFAULT_PARSE_WORKERS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variable_uses_default() {
        assert!(env_enabled("TRACEGRAPH_TEST_UNSET_TOGGLE", true));
        assert!(!env_enabled("TRACEGRAPH_TEST_UNSET_TOGGLE", false));
        assert_eq!(env_usize("TRACEGRAPH_TEST_UNSET_WORKERS", 3), 3);
    }

    #[test]
    fn test_set_variable_needs_explicit_flip() {
        std::env::set_var("TRACEGRAPH_TEST_TOGGLE_MAYBE", "maybe");
        assert!(env_enabled("TRACEGRAPH_TEST_TOGGLE_MAYBE", true));
        assert!(!env_enabled("TRACEGRAPH_TEST_TOGGLE_MAYBE", false));

        std::env::set_var("TRACEGRAPH_TEST_TOGGLE_OFF", " Off ");
        assert!(!env_enabled("TRACEGRAPH_TEST_TOGGLE_OFF", true));

        std::env::set_var("TRACEGRAPH_TEST_TOGGLE_ON", "yes");
        assert!(env_enabled("TRACEGRAPH_TEST_TOGGLE_ON", false));
    }

    #[test]
    fn test_defaults() {
        assert!(SaverConfig::default().retain_history);
        assert_eq!(ParserConfig::default().workers, 4);
    }
}
