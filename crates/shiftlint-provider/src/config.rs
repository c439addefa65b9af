use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shiftlint_types::AnalysisMode;
use std::collections::BTreeMap;
use std::path::Path;

/// Proxy endpoints applied to a provider's outbound traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl Proxy {
    /// Fill unset fields from the standard proxy environment variables.
    pub fn with_env_fallback(mut self) -> Self {
        if self.http_proxy.is_none() {
            self.http_proxy = env_first(&["HTTP_PROXY", "http_proxy"]);
        }
        if self.https_proxy.is_none() {
            self.https_proxy = env_first(&["HTTPS_PROXY", "https_proxy"]);
        }
        if self.no_proxy.is_none() {
            self.no_proxy = env_first(&["NO_PROXY", "no_proxy"]);
        }
        self
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

/// One code location a provider analyzes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_path: Option<String>,
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_specific_config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
}

/// A configured provider: how to reach it and what it should analyze.
///
/// `address` selects the remote transport (`host:port` or `unix:/path`);
/// `binary_path` spawns the provider as a child spoken to over stdio. With
/// neither, the name must refer to an in-process provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    /// PEM CA bundle; its presence switches the transport to TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    /// Shared secret for bearer tokens; `JWT_SECRET` is the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub init_config: Vec<InitConfig>,
}

/// Load a provider settings file, YAML or JSON by extension with YAML as
/// the fallback parser. The file is a list of provider configurations.
pub fn load_settings(path: &Path) -> Result<Vec<ProviderConfig>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let raw: Value = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
    } else {
        let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        yaml_to_json(yaml)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
    };

    let mut configs: Vec<ProviderConfig> = serde_json::from_value(raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    for config in &mut configs {
        if config.name.is_empty() {
            return Err(Error::Config(format!(
                "{}: provider entry with empty name",
                path.display()
            )));
        }
        // Standard proxy env vars fill whatever the file leaves unset
        for init in &mut config.init_config {
            let proxy = init.proxy.take().unwrap_or_default().with_env_fallback();
            if proxy != Proxy::default() {
                init.proxy = Some(proxy);
            }
        }
    }
    Ok(configs)
}

/// Convert parsed YAML into the canonical JSON value schema. YAML mapping
/// keys that are not strings are a hard error.
pub fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    match value {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::from(u))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f))
            } else {
                Err(Error::Config(format!("unrepresentable number: {:?}", n)))
            }
        }
        serde_yaml::Value::String(s) => Ok(Value::String(s)),
        serde_yaml::Value::Sequence(seq) => Ok(Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        )),
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => {
                        return Err(Error::Config(format!(
                            "mapping key must be a string, got {:?}",
                            other
                        )));
                    }
                };
                out.insert(key, yaml_to_json(val)?);
            }
            Ok(Value::Object(out))
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_yaml_settings() {
        let (_dir, path) = write_settings(
            "settings.yaml",
            r#"
- name: java
  address: "localhost:14651"
  initConfig:
    - location: /src/app
      analysisMode: full
      providerSpecificConfig:
        bundles: /jdt/bundles
- name: builtin
  initConfig:
    - location: /src/app
"#,
        );
        let configs = load_settings(&path).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "java");
        assert_eq!(configs[0].address.as_deref(), Some("localhost:14651"));
        assert_eq!(
            configs[0].init_config[0]
                .provider_specific_config
                .get("bundles")
                .and_then(|v| v.as_str()),
            Some("/jdt/bundles")
        );
    }

    #[test]
    fn loads_json_settings() {
        let (_dir, path) = write_settings(
            "settings.json",
            r#"[{"name":"go","initConfig":[{"location":"/src/go-app","analysisMode":"source-only"}]}]"#,
        );
        let configs = load_settings(&path).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(
            configs[0].init_config[0].analysis_mode,
            shiftlint_types::AnalysisMode::SourceOnly
        );
    }

    #[test]
    fn non_string_yaml_keys_are_rejected() {
        let (_dir, path) = write_settings(
            "settings.yaml",
            r#"
- name: java
  initConfig:
    - location: /src/app
      providerSpecificConfig:
        1: not-a-string-key
"#,
        );
        let err = load_settings(&path).unwrap_err();
        assert!(err.to_string().contains("key must be a string"));
    }

    #[test]
    fn empty_provider_name_is_rejected() {
        let (_dir, path) = write_settings("settings.yaml", "- name: \"\"\n");
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn proxy_env_fallback_fills_unset_fields() {
        let proxy = Proxy {
            http_proxy: Some("http://explicit:3128".to_string()),
            ..Default::default()
        };
        let filled = proxy.with_env_fallback();
        assert_eq!(filled.http_proxy.as_deref(), Some("http://explicit:3128"));
    }
}
