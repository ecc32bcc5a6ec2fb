//! Which endpoints make up a stack's health.

use std::collections::HashMap;

use stackgrid_state::StackFeatures;

pub const AUTH: &str = "auth";
pub const STORAGE: &str = "storage";
pub const POSTGREST_LIVE: &str = "postgrest-live";
pub const POSTGREST_READY: &str = "postgrest-ready";

/// One named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub name: String,
    pub url: String,
}

/// A resolved VAPI dependency to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapiCheck {
    pub package: String,
    pub major: u64,
}

fn target(base_url: &str, name: &str, path: &str) -> ProbeTarget {
    ProbeTarget {
        name: name.to_string(),
        url: format!("{}{}", base_url.trim_end_matches('/'), path),
    }
}

/// The postgrest readiness check alone, used after a schema reload.
pub fn postgrest_ready(base_url: &str) -> ProbeTarget {
    target(base_url, POSTGREST_READY, "/rest-admin/v1/ready")
}

/// Every check for a stack served at `base_url`: one per enabled feature,
/// plus one per VAPI named after its package. A package present with more
/// than one major version gets one check per major, named `<package>-v<major>`.
pub fn stack_targets(base_url: &str, features: &StackFeatures, vapis: &[VapiCheck]) -> Vec<ProbeTarget> {
    let mut targets = Vec::new();
    if features.auth {
        targets.push(target(base_url, AUTH, "/auth/v1/health"));
    }
    if features.storage {
        targets.push(target(base_url, STORAGE, "/storage/v1/status"));
    }
    if features.postgrest {
        targets.push(target(base_url, POSTGREST_LIVE, "/rest-admin/v1/live"));
        targets.push(postgrest_ready(base_url));
    }
    let mut majors: HashMap<&str, usize> = HashMap::new();
    for vapi in vapis {
        *majors.entry(vapi.package.as_str()).or_default() += 1;
    }
    for vapi in vapis {
        let name = if majors[vapi.package.as_str()] > 1 {
            format!("{}-v{}", vapi.package, vapi.major)
        } else {
            vapi.package.clone()
        };
        targets.push(target(
            base_url,
            &name,
            &format!("/vapi/{}/v{}/_internal/health", vapi.package, vapi.major),
        ));
    }
    targets
}
