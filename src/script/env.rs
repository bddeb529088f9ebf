/// Environment variable capture for cache keys
///
/// Only variables whose name matches a configured pattern participate in the
/// fingerprint, keeping unrelated environment noise out of the key. Every
/// configured pattern gets an entry in the result, even when it matched
/// nothing, so adding or removing a pattern also changes the key.
use anyhow::{Context, Result};
use regex::Regex;

use super::entry::{EnvVars, RegexEnvVars};

pub fn build_environment_variables(
    patterns: &[String],
    env: &[(String, String)],
) -> Result<RegexEnvVars> {
    let mut regex_env_vars = RegexEnvVars::new();
    for pattern in patterns {
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid environment variable pattern: {pattern}"))?;
        let mut matched = EnvVars::new();
        for (name, value) in env {
            if regex.is_match(name) {
                matched.insert(name.clone(), value.clone());
            }
        }
        regex_env_vars.insert(pattern.clone(), matched);
    }
    Ok(regex_env_vars)
}
