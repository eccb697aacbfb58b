//! Executor profile parser
//!
//! A profile file maps each architecture/environment profile a job can be
//! pinned to (e.g. `arm64`, `amd64`) onto the shell command that performs the
//! build on this host.
//!
//! ```lua
//! return {
//!     arm64 = {
//!         command = "docker buildx build --platform linux/arm64 -t $REPOSITORY_URI:arm64 $SOURCE",
//!         env = { DOCKER_BUILDKIT = "1" },
//!     },
//!     amd64 = { command = "./build.sh amd64", shell = "bash", workdir = "/srv/build" },
//! }
//! ```

use anyhow::{Context, Result};
use mlua::{Table, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::sandbox::create_sandbox;

/// How jobs of one profile are executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorProfile {
    pub name: String,
    pub command: String,
    pub shell: String,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// Parse executor profiles from Lua source code
pub fn parse_profiles(source: &str) -> Result<BTreeMap<String, ExecutorProfile>> {
    let lua = create_sandbox().context("Failed to create sandbox")?;

    let profiles_table: Table = lua
        .load(source)
        .set_name("profiles")
        .eval()
        .context("Failed to evaluate profile definitions")?;

    let mut profiles = BTreeMap::new();

    for pair in profiles_table.pairs::<String, Table>() {
        let (name, table) = pair.context("Profiles must map a name to a table")?;
        let profile = parse_profile(&name, &table)?;
        profiles.insert(name, profile);
    }

    if profiles.is_empty() {
        return Err(anyhow::anyhow!("Profile file defines no profiles"));
    }

    Ok(profiles)
}

fn parse_profile(name: &str, table: &Table) -> Result<ExecutorProfile> {
    let command: String = table
        .get("command")
        .context(format!("Profile '{}' must have a 'command' field", name))?;

    if command.trim().is_empty() {
        return Err(anyhow::anyhow!("Profile '{}' has an empty command", name));
    }

    let shell: String = table
        .get::<Option<String>>("shell")
        .context(format!("Profile '{}': 'shell' must be a string", name))?
        .unwrap_or_else(|| "sh".to_string());

    let workdir: Option<PathBuf> = table
        .get::<Option<String>>("workdir")
        .context(format!("Profile '{}': 'workdir' must be a string", name))?
        .map(PathBuf::from);

    let mut env = BTreeMap::new();
    match table.get::<Value>("env")? {
        Value::Nil => {}
        Value::Table(env_table) => {
            for pair in env_table.pairs::<String, String>() {
                let (key, value) = pair.context(format!(
                    "Profile '{}': env values must be strings",
                    name
                ))?;
                env.insert(key, value);
            }
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Profile '{}': field 'env' must be a table",
                name
            ));
        }
    }

    Ok(ExecutorProfile {
        name: name.to_string(),
        command,
        shell,
        workdir,
        env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profiles() {
        let source = r#"
            return {
                arm64 = {
                    command = "docker buildx build --platform linux/arm64 .",
                    env = { DOCKER_BUILDKIT = "1" },
                },
                amd64 = { command = "./build.sh amd64", shell = "bash", workdir = "/srv/build" },
            }
        "#;

        let profiles = parse_profiles(source).unwrap();
        assert_eq!(profiles.len(), 2);

        let arm = &profiles["arm64"];
        assert_eq!(arm.shell, "sh");
        assert_eq!(arm.workdir, None);
        assert_eq!(arm.env["DOCKER_BUILDKIT"], "1");

        let amd = &profiles["amd64"];
        assert_eq!(amd.shell, "bash");
        assert_eq!(amd.workdir, Some(PathBuf::from("/srv/build")));
    }

    #[test]
    fn test_parse_profile_missing_command() {
        let err = parse_profiles(r#"return { arm64 = { shell = "sh" } }"#).unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_parse_empty_profiles() {
        assert!(parse_profiles("return {}").is_err());
    }
}
