//! Task parameters
//!
//! A task declares Basic parameters (supplied by the caller or defaulted) and
//! Derived parameters (computed by running an external command). Resolution
//! turns the declarations plus caller overrides into a frozen
//! [`ResolvedParameters`] map used for `${name}` substitution.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

/// Names injected by the builder for every build
pub const BUILD_ID: &str = "BUILD_ID";
pub const GIT_COMMIT: &str = "GIT_COMMIT";
pub const GIT_SHORT_COMMIT: &str = "GIT_SHORT_COMMIT";
pub const PROJECT_ID: &str = "PROJECT_ID";

pub const BUILTIN_PARAMETERS: [&str; 4] = [BUILD_ID, GIT_COMMIT, GIT_SHORT_COMMIT, PROJECT_ID];

/// A declared task parameter
///
/// Entries with a `use` key are derived; everything else is basic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    Derived(DerivedParameter),
    Basic(BasicParameter),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicParameter {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedParameter {
    pub name: String,

    /// Command producing the value on stdout
    #[serde(rename = "use")]
    pub using: String,

    #[serde(default)]
    pub arguments: BTreeMap<String, String>,

    #[serde(default)]
    pub secret: bool,
}

fn default_required() -> bool {
    true
}

impl Parameter {
    pub fn name(&self) -> &str {
        match self {
            Parameter::Basic(p) => &p.name,
            Parameter::Derived(p) => &p.name,
        }
    }

    pub fn is_secret(&self) -> bool {
        match self {
            Parameter::Basic(p) => p.secret,
            Parameter::Derived(p) => p.secret,
        }
    }
}

/// A resolved parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub value: String,
    pub secret: bool,
}

/// Parameter values frozen for one build run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedParameters(BTreeMap<String, ResolvedValue>);

impl ResolvedParameters {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>, secret: bool) {
        self.0.insert(
            name.into(),
            ResolvedValue {
                value: value.into(),
                secret,
            },
        );
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty values of secret parameters, longest first
    pub fn secret_values(&self) -> Vec<String> {
        let mut secrets: Vec<String> = self
            .0
            .values()
            .filter(|v| v.secret && !v.value.is_empty())
            .map(|v| v.value.clone())
            .collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        secrets
    }
}

/// Computes the value of a derived parameter
#[async_trait]
pub trait DerivedValueSource: Send + Sync {
    async fn derive(&self, parameter: &DerivedParameter) -> TaskResult<String>;
}

/// Resolves declared parameters against caller overrides
///
/// Built-ins have the lowest precedence: a declared parameter with the same
/// name replaces them.
pub async fn resolve(
    declared: &[Parameter],
    overrides: &HashMap<String, String>,
    builtins: &BTreeMap<String, String>,
    source: &dyn DerivedValueSource,
) -> TaskResult<ResolvedParameters> {
    let mut resolved = ResolvedParameters::default();

    for (name, value) in builtins {
        resolved.insert(name.clone(), value.clone(), false);
    }

    for parameter in declared {
        match parameter {
            Parameter::Basic(basic) => {
                let value = resolve_basic(basic, overrides)?;
                resolved.insert(basic.name.clone(), value, basic.secret);
            }
            Parameter::Derived(derived) => {
                let value = source.derive(derived).await?;
                resolved.insert(derived.name.clone(), value, derived.secret);
            }
        }
    }

    Ok(resolved)
}

fn resolve_basic(basic: &BasicParameter, overrides: &HashMap<String, String>) -> TaskResult<String> {
    if let Some(value) = overrides.get(&basic.name) {
        return Ok(value.clone());
    }
    if let Some(default) = &basic.default {
        return Ok(default.clone());
    }
    if basic.required {
        return Err(TaskError::MissingParameter(basic.name.clone()));
    }
    Ok(String::new())
}

/// Checks that every required basic parameter can be resolved from `overrides`
pub fn check_required(declared: &[Parameter], overrides: &HashMap<String, String>) -> TaskResult<()> {
    for parameter in declared {
        if let Parameter::Basic(basic) = parameter {
            resolve_basic(basic, overrides)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Result<String, String>);

    #[async_trait]
    impl DerivedValueSource for FixedSource {
        async fn derive(&self, parameter: &DerivedParameter) -> TaskResult<String> {
            self.0.clone().map_err(|reason| TaskError::ParameterResolution {
                name: parameter.name.clone(),
                reason,
            })
        }
    }

    fn basic(name: &str, default: Option<&str>, required: bool) -> Parameter {
        Parameter::Basic(BasicParameter {
            name: name.to_string(),
            default: default.map(str::to_string),
            required,
            secret: false,
        })
    }

    fn derived(name: &str) -> Parameter {
        Parameter::Derived(DerivedParameter {
            name: name.to_string(),
            using: "./version.sh".to_string(),
            arguments: BTreeMap::new(),
            secret: true,
        })
    }

    #[test]
    fn test_parse_basic_and_derived() {
        let yaml = r#"
- name: tag
  default: latest
- name: version
  use: ./version.sh
  arguments:
    format: short
- name: optional
  required: false
"#;
        let params: Vec<Parameter> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(&params[0], Parameter::Basic(p) if p.required && p.default.as_deref() == Some("latest")));
        assert!(matches!(&params[1], Parameter::Derived(p) if p.arguments["format"] == "short"));
        assert!(matches!(&params[2], Parameter::Basic(p) if !p.required));
    }

    #[tokio::test]
    async fn test_override_beats_default() {
        let declared = vec![basic("tag", Some("latest"), true)];
        let overrides = HashMap::from([("tag".to_string(), "1.0".to_string())]);
        let resolved = resolve(&declared, &overrides, &BTreeMap::new(), &FixedSource(Ok(String::new())))
            .await
            .unwrap();
        assert_eq!(resolved.value("tag"), Some("1.0"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let declared = vec![basic("token", None, true)];
        let err = resolve(&declared, &HashMap::new(), &BTreeMap::new(), &FixedSource(Ok(String::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::MissingParameter(name) if name == "token"));
    }

    #[tokio::test]
    async fn test_optional_parameter_is_empty() {
        let declared = vec![basic("extra", None, false)];
        let resolved = resolve(&declared, &HashMap::new(), &BTreeMap::new(), &FixedSource(Ok(String::new())))
            .await
            .unwrap();
        assert_eq!(resolved.value("extra"), Some(""));
    }

    #[tokio::test]
    async fn test_derived_failure_is_resolution_error() {
        let declared = vec![derived("version")];
        let err = resolve(&declared, &HashMap::new(), &BTreeMap::new(), &FixedSource(Err("exit 1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ParameterResolution { name, .. } if name == "version"));
    }

    #[tokio::test]
    async fn test_declared_parameter_shadows_builtin() {
        let declared = vec![basic(BUILD_ID, Some("custom"), true)];
        let builtins = BTreeMap::from([
            (BUILD_ID.to_string(), "generated".to_string()),
            (GIT_COMMIT.to_string(), "abc123".to_string()),
        ]);
        let resolved = resolve(&declared, &HashMap::new(), &builtins, &FixedSource(Ok(String::new())))
            .await
            .unwrap();
        assert_eq!(resolved.value(BUILD_ID), Some("custom"));
        assert_eq!(resolved.value(GIT_COMMIT), Some("abc123"));
    }

    #[tokio::test]
    async fn test_secret_values_longest_first() {
        let declared = vec![derived("token")];
        let resolved = resolve(
            &declared,
            &HashMap::new(),
            &BTreeMap::new(),
            &FixedSource(Ok("s3cr3t".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(resolved.secret_values(), vec!["s3cr3t".to_string()]);
    }

    #[test]
    fn test_check_required() {
        let declared = vec![basic("tag", None, true), derived("version")];
        assert!(check_required(&declared, &HashMap::new()).is_err());
        let overrides = HashMap::from([("tag".to_string(), "v1".to_string())]);
        assert!(check_required(&declared, &overrides).is_ok());
    }
}
