//! Secret resolution
//!
//! Jobs reference secrets by name (`{ secret = "/dockerhub/password" }`); the
//! resolver turns a name into its value when the stage starts.

use std::collections::HashMap;

/// Looks up secret values by name
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Resolves secrets from prefixed environment variables
///
/// `/springboot-multiarch/dockerhub/password` with the default prefix reads
/// `ARCHWAY_SECRET_SPRINGBOOT_MULTIARCH_DOCKERHUB_PASSWORD`.
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
}

impl EnvSecretResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable a secret name maps to
    pub fn variable_for(&self, name: &str) -> String {
        let normalized: String = name
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        std::env::var(self.variable_for(name)).ok()
    }
}

/// Fixed set of secrets
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretResolver for StaticSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_for() {
        let resolver = EnvSecretResolver::new("ARCHWAY_SECRET_");
        assert_eq!(
            resolver.variable_for("/springboot-multiarch/dockerhub/password"),
            "ARCHWAY_SECRET_SPRINGBOOT_MULTIARCH_DOCKERHUB_PASSWORD"
        );
        assert_eq!(resolver.variable_for("token"), "ARCHWAY_SECRET_TOKEN");
    }

    #[test]
    fn test_env_resolver_missing() {
        let resolver = EnvSecretResolver::new("ARCHWAY_SECRET_TEST_UNSET_");
        assert_eq!(resolver.resolve("/definitely/not/set"), None);
    }

    #[test]
    fn test_static_secrets() {
        let secrets = StaticSecrets::new().with("/dockerhub/user", "builder");
        assert_eq!(secrets.resolve("/dockerhub/user"), Some("builder".to_string()));
        assert_eq!(secrets.resolve("/dockerhub/password"), None);
    }
}
