use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(\$?)\{env:([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}")
            .unwrap_or_else(|e| panic!("invalid env placeholder pattern: {e}"))
    })
}

/// Interpolate environment variables in a string
/// Supports syntax: ${env:VAR_NAME} or ${env:VAR_NAME:default_value}.
/// `$${env:VAR_NAME}` is an escape and yields the literal placeholder.
pub fn interpolate_env_vars(input: &str) -> String {
    placeholder_pattern()
        .replace_all(input, |caps: &Captures| {
            if !caps[1].is_empty() {
                return caps[0][1..].to_string();
            }
            match env::var(&caps[2]) {
                Ok(value) => value,
                Err(_) => match caps.get(3) {
                    Some(default) => default.as_str().to_string(),
                    // Keep the placeholder if no default and var not found
                    None => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

/// Interpolate environment variables in a YAML document before parsing
pub fn interpolate_yaml_string(yaml_content: &str) -> String {
    interpolate_env_vars(yaml_content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_interpolate_env_var_exists() {
        env::set_var("PMP_INTERP_VAR", "hello");
        let result = interpolate_env_vars("Value: ${env:PMP_INTERP_VAR}");
        assert_eq!(result, "Value: hello");
        env::remove_var("PMP_INTERP_VAR");
    }

    #[test]
    fn test_interpolate_env_var_with_default() {
        env::remove_var("PMP_INTERP_MISSING");
        let result = interpolate_env_vars("port: ${env:PMP_INTERP_MISSING:8480}");
        assert_eq!(result, "port: 8480");
    }

    #[test]
    fn test_interpolate_env_var_missing_no_default() {
        env::remove_var("PMP_INTERP_MISSING");
        let result = interpolate_env_vars("Value: ${env:PMP_INTERP_MISSING}");
        assert_eq!(result, "Value: ${env:PMP_INTERP_MISSING}");
    }

    #[test]
    fn test_escaped_placeholder() {
        env::set_var("PMP_INTERP_ESCAPED", "nope");
        let result = interpolate_env_vars("literal: $${env:PMP_INTERP_ESCAPED}");
        assert_eq!(result, "literal: ${env:PMP_INTERP_ESCAPED}");
        env::remove_var("PMP_INTERP_ESCAPED");
    }

    #[test]
    fn test_interpolate_origin_url() {
        env::set_var("PMP_INTERP_HOST", "prometheus");
        env::set_var("PMP_INTERP_PORT", "9090");
        let result =
            interpolate_env_vars("http://${env:PMP_INTERP_HOST}:${env:PMP_INTERP_PORT}/api");
        assert_eq!(result, "http://prometheus:9090/api");
        env::remove_var("PMP_INTERP_HOST");
        env::remove_var("PMP_INTERP_PORT");
    }
}
