//! stackgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackgridConfig {
    pub regions: RegionsConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    pub templates: TemplatesConfig,
    pub storage: ObjectStorageConfig,
    pub state: StateConfig,
    pub migrations: Option<MigrationsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionsConfig {
    /// Concrete zone the `default` sentinel resolves to.
    pub default_zone: String,
    pub zones: BTreeMap<String, ZoneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// kubeconfig context for this zone's cluster. Falls back to the current context.
    pub context: Option<String>,
    /// Alternate kubeconfig file. Falls back to `KUBECONFIG` / `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// Public domain stacks in this zone are served under (`<slug>.<domain>`).
    pub domain: String,
    /// Base URL for health probes instead of `<scheme>://<slug>.<domain>`.
    /// `{slug}` is replaced with the stack slug.
    #[serde(default)]
    pub probe_url: Option<String>,
}

impl ZoneConfig {
    /// Where a stack in this zone answers health checks.
    pub fn stack_base_url(&self, scheme: &str, slug: &str) -> String {
        match &self.probe_url {
            Some(url) => url.replace("{slug}", slug),
            None => format!("{scheme}://{slug}.{}", self.domain),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Upper bound for a whole deploy when the caller gives none (e.g. "5m").
    pub timeout: String,
    /// Per-check health probe timeout (e.g. "2s").
    pub probe_timeout: String,
    /// Skip HTTP health probes after pods report ready.
    pub skip_health_checks: bool,
    /// NOTIFY the REST layer to reload its schema cache after migrations.
    pub reload_schema: bool,
    /// URL scheme used when probing stack endpoints.
    pub scheme: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout: "5m".to_string(),
            probe_timeout: "2s".to_string(),
            skip_health_checks: false,
            reload_schema: true,
            scheme: "https".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding the manifest templates.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Root directory; buckets are its subdirectories.
    pub root: PathBuf,
    /// Bucket holding VAPI release archives.
    pub vapi_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory of platform-level tenant migrations (`<version>_<name>.sql`).
    pub tenant_dir: PathBuf,
}

impl StackgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StackgridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.regions.zones.contains_key(&self.regions.default_zone) {
            anyhow::bail!(
                "default zone '{}' is not configured under [regions.zones]",
                self.regions.default_zone
            );
        }
        for (field, value) in [
            ("deploy.timeout", &self.deploy.timeout),
            ("deploy.probe_timeout", &self.deploy.probe_timeout),
        ] {
            if parse_duration(value).is_none() {
                anyhow::bail!("invalid duration for {field}: '{value}'");
            }
        }
        Ok(())
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(300))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[regions]
default_zone = "eu-west"

[regions.zones.eu-west]
context = "kind-eu"
domain = "eu.stacks.test"

[templates]
dir = "/etc/stackgrid/templates"

[storage]
root = "/var/lib/stackgrid/objects"
vapi_bucket = "vapi-releases"

[state]
path = "/var/lib/stackgrid/stackgrid.redb"
"#;

    #[test]
    fn parse_minimal_uses_deploy_defaults() {
        let config: StackgridConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.regions.default_zone, "eu-west");
        assert_eq!(config.deploy.timeout(), Duration::from_secs(300));
        assert_eq!(config.deploy.probe_timeout(), Duration::from_secs(2));
        assert!(config.deploy.reload_schema);
        assert!(config.migrations.is_none());
    }

    #[test]
    fn stack_base_url_prefers_probe_url() {
        let mut zone: ZoneConfig = toml::from_str("domain = \"eu.stacks.test\"").unwrap();
        assert_eq!(zone.stack_base_url("https", "acme"), "https://acme.eu.stacks.test");
        zone.probe_url = Some("http://gateway.internal/{slug}".into());
        assert_eq!(zone.stack_base_url("https", "acme"), "http://gateway.internal/acme");
    }

    #[test]
    fn rejects_unknown_default_zone() {
        let text = MINIMAL.replace("default_zone = \"eu-west\"", "default_zone = \"mars\"");
        let config: StackgridConfig = toml::from_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mars"));
    }

    #[test]
    fn rejects_bad_duration() {
        let text = format!("{MINIMAL}\n[deploy]\ntimeout = \"forever\"\n");
        let config: StackgridConfig = toml::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_roundtrips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackgrid.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = StackgridConfig::from_file(&path).unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("eu.stacks.test"));
    }
}
