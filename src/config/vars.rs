//! Environment variable interpolation for the settings file.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}`: substitute, error if unset
//! - `${VAR:-default}`: default when VAR is unset or empty
//! - `${VAR-default}`: default only when VAR is unset
//! - `$$`: literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)
            (?:(:?-)([^}]*))?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Interpolate using the process environment.
///
/// Every problem is collected so the operator sees all missing variables at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate using an arbitrary variable lookup.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let name = caps
            .get(1)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let operator = caps.get(2).map(|m| m.as_str());
        let fallback = caps.get(3).map(|m| m.as_str());

        match lookup(name) {
            Some(value) if value.contains(['\n', '\r']) => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                whole.to_string()
            }
            Some(value) if value.is_empty() && operator == Some(":-") => {
                fallback.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match fallback {
                Some(default) => default.to_string(),
                None => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            },
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}
