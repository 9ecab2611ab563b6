//! `${name}` placeholder handling
//!
//! Substitution is a single literal pass over the template: values inserted
//! for one placeholder are never scanned again, so the output only depends on
//! the template and the parameters.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::domain::parameter::ResolvedParameters;
use crate::error::{TaskError, TaskResult};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

/// Returns the names referenced by `${...}` placeholders in `input`
pub fn placeholders(input: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(input)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Replaces every placeholder whose name is resolved; unknown names are kept
pub fn substitute(input: &str, params: &ResolvedParameters) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| match params.value(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Checks that every placeholder in `input` names a known parameter
pub fn check_known<'a>(
    input: &str,
    known: &impl Fn(&str) -> bool,
    missing: &mut BTreeSet<String>,
) {
    for name in placeholders(input) {
        if !known(name) {
            missing.insert(name.to_string());
        }
    }
}

/// Turns a set of unknown placeholder names into a `MissingParameter` error
pub fn missing_to_error(missing: BTreeSet<String>) -> TaskResult<()> {
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = missing.into_iter().collect();
    Err(TaskError::MissingParameter(names.join(", ")))
}
