//! The default picker for caserun that gathers cases to run from a
//! caserun.toml file.
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{
    case::{EnvironmentConfig, TestCaseConfig},
    errors::ExecError,
    executor::{
        collection::CollectionSettings,
        registry::{BatchOptions, RegistrySettings, DEFAULT_MAX_CONCURRENCY},
        script::ScriptSettings,
    },
};

/// Name of the configuration file looked up in the test directory.
pub const CONFIG_FILE: &str = "caserun.toml";

/// Configuration for a single caserun run.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Version of the caserun tool this configuration is compatible with.
    pub ver: String,
    /// Glob patterns of case files. Each file holds one case or an array of
    /// cases in JSON.
    pub paths: Vec<String>,
    /// Run cases in concurrent waves.
    #[serde(default)]
    pub parallel: bool,
    /// Size of a wave.
    pub max_concurrency: Option<usize>,
    /// Runner-level default environment.
    pub environment: Option<EnvironmentConfig>,
    #[serde(default)]
    pub collection: CollectionSettings,
    #[serde(default)]
    pub script: ScriptSettings,
}

impl Config {
    /// Create a configuration by reading a `caserun.toml` file.
    /// Ensures that the version number specified in the `caserun.toml`
    /// matches the version of the installed `caserun` binary.
    pub fn from_path(conf_dir: &Path) -> Result<Self, ExecError> {
        let conf_path = conf_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&conf_path).map_err(|_| {
            ExecError::Config(format!(
                "{} is missing. caserun expects a directory with a {} file.",
                conf_path.display(),
                CONFIG_FILE
            ))
        })?;
        Self::from_str_checked(&contents, &conf_path)
    }

    fn from_str_checked(contents: &str, conf_path: &Path) -> Result<Self, ExecError> {
        let conf: Config = toml::from_str(contents).map_err(|err| {
            ExecError::Config(format!("Failed to parse {}: {}", conf_path.display(), err))
        })?;

        if env!("CARGO_PKG_VERSION") != conf.ver {
            return Err(ExecError::Config(format!(
                "caserun version mismatch. Configuration requires: {}, tool version: {}.",
                conf.ver,
                env!("CARGO_PKG_VERSION")
            )));
        }

        Ok(conf)
    }

    /// Scheduling options for the batch.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            parallel: self.parallel,
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        }
    }

    /// Settings used to build the registry.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            environment: self.environment.clone(),
            collection: self.collection.clone(),
            script: self.script.clone(),
        }
    }

    /// Expand the globs (relative to the current directory) and load every
    /// case they match, in path order.
    pub fn cases(&self) -> Result<Vec<TestCaseConfig>, ExecError> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for pattern in &self.paths {
            let matches = glob::glob(pattern).map_err(|err| {
                ExecError::Config(format!("Glob pattern error in `{}`: {}", pattern, err))
            })?;
            for entry in matches {
                paths.push(entry.map_err(|err| {
                    ExecError::Config(format!("Failed to read globbed path: {}", err))
                })?);
            }
        }

        let mut cases = Vec::new();
        for path in paths {
            cases.extend(load_cases(&path)?);
        }
        Ok(cases)
    }
}

/// Read one case file.
pub fn load_cases(path: &Path) -> Result<Vec<TestCaseConfig>, ExecError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| ExecError::Config(format!("{}: {}", path.display(), err)))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|err| ExecError::Config(format!("{}: {}", path.display(), err)))?;
    let parsed = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|case| vec![case])
    };
    parsed.map_err(|err| ExecError::Config(format!("{}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(body: &str) -> Result<Config, ExecError> {
        let contents = format!("ver = \"{}\"\n{}", env!("CARGO_PKG_VERSION"), body);
        Config::from_str_checked(&contents, Path::new(CONFIG_FILE))
    }

    #[test]
    fn reads_sections_with_defaults() {
        let conf = parse(
            r#"
paths = ["cases/*.json"]
parallel = true

[environment]
base_url = "http://localhost:3000"

[environment.variables]
token = "abc"

[collection]
timeout_ms = 60000

[script]
binary = "/opt/venv/bin/pytest"
"#,
        )
        .unwrap();

        assert!(conf.batch_options().parallel);
        assert_eq!(conf.batch_options().max_concurrency, DEFAULT_MAX_CONCURRENCY);
        let env = conf.environment.as_ref().unwrap();
        assert_eq!(env.base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(env.variables["token"], "abc");
        assert_eq!(conf.collection.binary, "newman");
        assert_eq!(conf.collection.timeout_ms, Some(60000));
        assert_eq!(conf.script.binary, "/opt/venv/bin/pytest");
        assert_eq!(conf.script.timeout_ms, 300_000);
    }

    #[test]
    fn collection_timeout_is_unset_by_default() {
        let conf = parse("paths = []").unwrap();
        assert_eq!(conf.collection.timeout_ms, None);
    }

    #[test]
    fn rejects_other_versions() {
        let err = Config::from_str_checked("ver = \"0.0.0-old\"\npaths = []", Path::new(CONFIG_FILE))
            .unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn loads_single_and_array_case_files() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("one.json");
        let many = dir.path().join("many.json");
        fs::write(&single, r#"{"id": 1, "name": "a", "type": "direct-http", "config": {}}"#).unwrap();
        fs::write(
            &many,
            r#"[{"id": 2, "name": "b", "type": "script"}, {"id": 3, "name": "c", "type": "collection"}]"#,
        )
        .unwrap();

        assert_eq!(load_cases(&single).unwrap().len(), 1);
        let cases = load_cases(&many).unwrap();
        assert_eq!(cases.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 3]);
    }
}
