//! Environment variable access and lenient value parsing.

use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::{DispatchError, DispatchResult};

/// Tokens accepted as `true` for boolean variables (compared lowercased).
pub const TRUTHY_TOKENS: [&str; 5] = ["1", "true", "yes", "y", "on"];

/// A source of named string variables.
pub trait EnvSource {
    /// Returns the value of `name`, or `None` when unset.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        // Values that are not valid unicode are treated as unset.
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<S: EnvSource + ?Sized> EnvSource for &S {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

/// Reads a variable that must be present and non-empty.
pub fn require_var<S: EnvSource + ?Sized>(source: &S, name: &str) -> DispatchResult<String> {
    match source.var(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DispatchError::config(format!(
            "Missing required environment variable: {}",
            name
        ))),
    }
}

/// Reads an optional string; an empty value is kept as-is.
pub fn string_var<S: EnvSource + ?Sized>(source: &S, name: &str, default: &str) -> String {
    source.var(name).unwrap_or_else(|| default.to_string())
}

/// Reads a boolean flag.
///
/// Unset yields `default`. A set value is true only if it matches one of
/// [`TRUTHY_TOKENS`] ignoring case and surrounding whitespace.
pub fn bool_var<S: EnvSource + ?Sized>(source: &S, name: &str, default: bool) -> bool {
    match source.var(name) {
        Some(value) => parse_bool(&value),
        None => default,
    }
}

/// Reads an integer, falling back to `default` when unset or unparsable.
pub fn int_var<S, T>(source: &S, name: &str, default: T) -> T
where
    S: EnvSource + ?Sized,
    T: FromStr + Copy,
{
    let Some(value) = source.var(name) else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::debug!(variable = name, value = %value, "Ignoring malformed integer, using default");
            default
        }
    }
}

/// Parses a boolean token.
pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_lowercase();
    TRUTHY_TOKENS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case("1")]
    #[case("true")]
    #[case("TRUE")]
    #[case("True")]
    #[case("yes")]
    #[case("YeS")]
    #[case("y")]
    #[case("Y")]
    #[case("on")]
    #[case("ON")]
    #[case("  on\n")]
    fn test_truthy_tokens(#[case] value: &str) {
        let env = source(&[("FLAG", value)]);
        assert!(bool_var(&env, "FLAG", false));
    }

    #[rstest]
    #[case("0")]
    #[case("false")]
    #[case("no")]
    #[case("off")]
    #[case("enabled")]
    #[case("")]
    fn test_other_values_are_false(#[case] value: &str) {
        let env = source(&[("FLAG", value)]);
        assert!(!bool_var(&env, "FLAG", true));
    }

    #[test]
    fn test_bool_absent_uses_default() {
        let env = source(&[]);
        assert!(bool_var(&env, "FLAG", true));
        assert!(!bool_var(&env, "FLAG", false));
    }

    #[test]
    fn test_int_var_fallbacks() {
        let env = source(&[
            ("GOOD", "2525"),
            ("PADDED", " 587 "),
            ("BAD", "abc"),
            ("TOO_BIG", "70000"),
            ("NEGATIVE", "-1"),
        ]);
        assert_eq!(int_var::<_, u16>(&env, "GOOD", 25), 2525);
        assert_eq!(int_var::<_, u16>(&env, "PADDED", 25), 587);
        assert_eq!(int_var::<_, u16>(&env, "BAD", 25), 25);
        assert_eq!(int_var::<_, u16>(&env, "TOO_BIG", 25), 25);
        assert_eq!(int_var::<_, u64>(&env, "NEGATIVE", 30), 30);
        assert_eq!(int_var::<_, u64>(&env, "MISSING", 30), 30);
    }

    #[test]
    fn test_require_var() {
        let env = source(&[("PRESENT", "value"), ("EMPTY", "")]);
        assert_eq!(require_var(&env, "PRESENT").unwrap(), "value");

        let err = require_var(&env, "EMPTY").unwrap_err();
        assert_eq!(err.message(), "Missing required environment variable: EMPTY");

        let err = require_var(&env, "ABSENT").unwrap_err();
        assert!(err.message().ends_with("ABSENT"));
    }

    #[test]
    fn test_string_var_keeps_empty_value() {
        let env = source(&[("EMPTY", "")]);
        assert_eq!(string_var(&env, "EMPTY", "fallback"), "");
        assert_eq!(string_var(&env, "ABSENT", "fallback"), "fallback");
    }
}
