//! The desired object set of one instance.

use serde_json::{json, Value};
use stackgrid_kube::{parse_manifest, render_manifest, ClusterObject, LabelSelector};
use stackgrid_state::{Instance, Stack};
use stackgrid_vapi::ResolvedRelease;

use crate::error::DeployResult;
use crate::render::ManifestRenderer;

pub const PROJECT_LABEL: &str = "stackgrid.io/project";
pub const STACK_LABEL: &str = "stackgrid.io/stack";

pub const BASE_TEMPLATES: [&str; 3] = ["base/network.yaml", "base/ingress.yaml", "base/config.yaml"];
pub const AUTH_TEMPLATE: &str = "auth.yaml";
pub const STORAGE_TEMPLATE: &str = "storage.yaml";
pub const POSTGREST_TEMPLATE: &str = "postgrest.yaml";
pub const VAPI_TEMPLATE: &str = "vapi.yaml";

/// Selects every pod belonging to `stack`.
pub fn stack_selector(stack: &Stack) -> LabelSelector {
    LabelSelector::from_labels([
        (PROJECT_LABEL, stack.project_id.as_str()),
        (STACK_LABEL, stack.id.as_str()),
    ])
}

/// Template names for the stack's enabled features, base set first.
pub fn stack_templates(stack: &Stack) -> Vec<&'static str> {
    let mut names = BASE_TEMPLATES.to_vec();
    if stack.features.auth {
        names.push(AUTH_TEMPLATE);
    }
    if stack.features.storage {
        names.push(STORAGE_TEMPLATE);
    }
    if stack.features.postgrest {
        names.push(POSTGREST_TEMPLATE);
    }
    names
}

pub fn template_values(instance: &Instance, stack: &Stack, host: &str) -> Value {
    json!({
        "instance": {
            "id": instance.id,
            "name": instance.name,
            "replicas": instance.num_replicas,
            "max_replicas": instance.max_replicas,
        },
        "stack": {
            "id": stack.id,
            "slug": stack.slug,
            "project_id": stack.project_id,
            "namespace": stack.namespace(),
        },
        "host": host,
        "labels": {
            PROJECT_LABEL: stack.project_id,
            STACK_LABEL: stack.id,
        },
        "features": {
            "auth": stack.features.auth,
            "storage": stack.features.storage,
            "postgrest": stack.features.postgrest,
        },
    })
}

fn vapi_values(base: &Value, vapi: &ResolvedRelease) -> Value {
    let mut values = base.clone();
    if let Value::Object(map) = &mut values {
        map.insert(
            "vapi".to_string(),
            json!({
                "package": vapi.package.name,
                "package_id": vapi.package.id,
                "release_id": vapi.release.id,
                "version": vapi.version.to_string(),
                "major": vapi.major(),
            }),
        );
    }
    values
}

/// Render the instance's manifest in canonical form.
///
/// Objects without a namespace are placed in the stack's namespace, and the
/// text is re-serialized so identical inputs always produce identical text.
pub fn render_stack_manifest(
    renderer: &dyn ManifestRenderer,
    instance: &Instance,
    stack: &Stack,
    host: &str,
    vapis: &[ResolvedRelease],
) -> DeployResult<String> {
    let values = template_values(instance, stack, host);
    let mut parts = vec![renderer.render(&stack_templates(stack), &values)?];
    for vapi in vapis {
        parts.push(renderer.render(&[VAPI_TEMPLATE], &vapi_values(&values, vapi))?);
    }

    let namespace = stack.namespace();
    let mut objects = Vec::new();
    for part in parts {
        for mut object in parse_manifest(&part)? {
            if object.namespace().is_empty() {
                object.set_namespace(&namespace);
            }
            objects.push(object);
        }
    }
    Ok(render_manifest(&objects)?)
}

/// The stack's namespace object, labelled like its pods.
pub fn namespace_object(stack: &Stack) -> DeployResult<ClusterObject> {
    Ok(ClusterObject::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": stack.namespace(),
            "labels": {
                PROJECT_LABEL: stack.project_id,
                STACK_LABEL: stack.id,
            },
        },
    }))?)
}
