//! `ClusterClient` backed by a Kubernetes API server.
//!
//! Objects travel as `DynamicObject`s. The REST path of each kind is resolved
//! through discovery the first time it is used and cached for the lifetime of
//! the client.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, PostParams, PropagationPolicy, WatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Scope};
use kube::{Client, Config};
use serde_json::Value;
use stackgrid_core::ZoneConfig;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::{ClusterClient, DeleteOptions, ObjectList, WatchEvent, WatchStream};
use crate::error::{ClusterError, ClusterResult};
use crate::object::{ClusterObject, Gvk, ObjectRef};

#[derive(Clone)]
struct Resolved {
    resource: ApiResource,
    namespaced: bool,
}

pub struct KubeCluster {
    client: Client,
    resources: RwLock<HashMap<Gvk, Resolved>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client from a zone's kubeconfig file and context.
    pub async fn connect(zone: &ZoneConfig) -> ClusterResult<Self> {
        let options = KubeConfigOptions {
            context: zone.context.clone(),
            ..Default::default()
        };
        let config = match &zone.kubeconfig {
            Some(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|e| ClusterError::Connect(e.to_string()))?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| ClusterError::Connect(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| ClusterError::Connect(e.to_string()))?;
        Ok(Self::new(client))
    }

    async fn resolve(&self, gvk: &Gvk) -> ClusterResult<Resolved> {
        if let Some(found) = self.resources.read().await.get(gvk) {
            return Ok(found.clone());
        }
        let (resource, caps) = kube::discovery::pinned_kind(
            &self.client,
            &GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind),
        )
        .await
        .map_err(|e| ClusterError::Api {
            code: 0,
            message: format!("discovery of {gvk} failed: {e}"),
        })?;
        let resolved = Resolved {
            resource,
            namespaced: matches!(caps.scope, Scope::Namespaced),
        };
        debug!(%gvk, plural = %resolved.resource.plural, "resolved resource");
        self.resources
            .write()
            .await
            .insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn api(&self, gvk: &Gvk, namespace: &str) -> ClusterResult<Api<DynamicObject>> {
        let resolved = self.resolve(gvk).await?;
        let api = if resolved.namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &resolved.resource)
        } else {
            Api::all_with(self.client.clone(), &resolved.resource)
        };
        Ok(api)
    }
}

fn to_dynamic(object: &ClusterObject) -> ClusterResult<DynamicObject> {
    serde_json::from_value(object.to_value()).map_err(|e| ClusterError::InvalidObject(e.to_string()))
}

/// List and watch items may omit `apiVersion`/`kind`; fill them from `gvk`.
fn from_dynamic(object: DynamicObject, gvk: &Gvk) -> ClusterResult<ClusterObject> {
    let mut value =
        serde_json::to_value(object).map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
    if let Value::Object(doc) = &mut value {
        doc.entry("apiVersion")
            .or_insert_with(|| Value::String(gvk.api_version()));
        doc.entry("kind")
            .or_insert_with(|| Value::String(gvk.kind.clone()));
    }
    ClusterObject::from_value(value)
}

fn map_error(err: kube::Error, target: &ObjectRef) -> ClusterError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ClusterError::NotFound(target.clone()),
            409 if resp.reason == "AlreadyExists" => ClusterError::AlreadyExists(target.clone()),
            409 => ClusterError::Conflict {
                target: target.clone(),
                message: resp.message,
            },
            401 => ClusterError::Unauthorized(resp.message),
            403 => ClusterError::Forbidden(resp.message),
            code => ClusterError::Api {
                code,
                message: resp.message,
            },
        },
        other => ClusterError::Connect(other.to_string()),
    }
}

fn collection_ref(gvk: &Gvk, namespace: &str) -> ObjectRef {
    ObjectRef::new(gvk.clone(), namespace, "*")
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn create(&self, object: &ClusterObject) -> ClusterResult<ClusterObject> {
        let target = object.object_ref();
        let api = self.api(object.gvk(), object.namespace()).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(e, &target))?;
        from_dynamic(created, object.gvk())
    }

    async fn get(&self, target: &ObjectRef) -> ClusterResult<ClusterObject> {
        let api = self.api(&target.gvk, &target.namespace).await?;
        let found = api
            .get(&target.name)
            .await
            .map_err(|e| map_error(e, target))?;
        from_dynamic(found, &target.gvk)
    }

    async fn update(&self, object: &ClusterObject) -> ClusterResult<ClusterObject> {
        let target = object.object_ref();
        let api = self.api(object.gvk(), object.namespace()).await?;
        let replaced = api
            .replace(object.name(), &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_error(e, &target))?;
        from_dynamic(replaced, object.gvk())
    }

    async fn delete(&self, target: &ObjectRef, options: DeleteOptions) -> ClusterResult<()> {
        let api = self.api(&target.gvk, &target.namespace).await?;
        let params = if options.force {
            DeleteParams {
                grace_period_seconds: Some(0),
                ..DeleteParams::default()
            }
        } else {
            DeleteParams {
                propagation_policy: Some(PropagationPolicy::Foreground),
                ..DeleteParams::default()
            }
        };
        api.delete(&target.name, &params)
            .await
            .map_err(|e| map_error(e, target))?;
        Ok(())
    }

    async fn list(&self, gvk: &Gvk, namespace: &str, selector: &str) -> ClusterResult<ObjectList> {
        let api = self.api(gvk, namespace).await?;
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| map_error(e, &collection_ref(gvk, namespace)))?;
        let items = list
            .items
            .into_iter()
            .map(|o| from_dynamic(o, gvk))
            .collect::<ClusterResult<Vec<_>>>()?;
        Ok(ObjectList {
            items,
            resource_version: list.metadata.resource_version,
        })
    }

    async fn watch(
        &self,
        gvk: &Gvk,
        namespace: &str,
        selector: &str,
        resource_version: Option<&str>,
    ) -> ClusterResult<WatchStream> {
        let api = self.api(gvk, namespace).await?;
        let mut params = WatchParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        // "0" asks the server to replay current state as ADDED events first.
        let version = resource_version.unwrap_or("0");
        let target = collection_ref(gvk, namespace);
        let events = api
            .watch(&params, version)
            .await
            .map_err(|e| map_error(e, &target))?;

        let gvk = gvk.clone();
        let stream = events
            .map_err(move |e| map_error(e, &target))
            .and_then(move |event| {
                let converted = match event {
                    kube::api::WatchEvent::Added(o) => from_dynamic(o, &gvk).map(WatchEvent::Added),
                    kube::api::WatchEvent::Modified(o) => {
                        from_dynamic(o, &gvk).map(WatchEvent::Modified)
                    }
                    kube::api::WatchEvent::Deleted(o) => {
                        from_dynamic(o, &gvk).map(WatchEvent::Deleted)
                    }
                    kube::api::WatchEvent::Bookmark(_) => Ok(WatchEvent::Bookmark),
                    kube::api::WatchEvent::Error(resp) => Ok(WatchEvent::Error(resp.message)),
                };
                futures::future::ready(converted)
            });
        Ok(stream.boxed())
    }
}
