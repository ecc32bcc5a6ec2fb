//! In-memory cluster for tests.
//!
//! Stores objects by full reference, assigns monotonically increasing
//! resource versions, records every write, broadcasts watch events, and can be
//! told to fail specific verbs on specific object names.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::client::{ClusterClient, DeleteOptions, ObjectList, WatchEvent, WatchStream};
use crate::error::{ClusterError, ClusterResult};
use crate::object::{ClusterObject, Gvk, LabelSelector, ObjectRef};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Get,
    Update,
    Delete,
    List,
    Watch,
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub verb: Verb,
    pub target: ObjectRef,
    pub force: bool,
}

pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

struct Inner {
    objects: BTreeMap<ObjectRef, ClusterObject>,
    revision: u64,
    writes: Vec<Write>,
    /// (verb, object name); an empty name matches every object.
    failures: Vec<(Verb, String)>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                revision: 0,
                writes: Vec::new(),
                failures: Vec::new(),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a write. Watchers see `Added`.
    pub fn insert(&self, object: ClusterObject) {
        let mut inner = self.lock();
        let stored = inner.store(object);
        let _ = inner.events.send(WatchEvent::Added(stored));
    }

    /// Make every future `verb` call on `name` fail. Empty `name` matches all.
    pub fn fail_on(&self, verb: Verb, name: &str) {
        self.lock().failures.push((verb, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Replace an object's status and broadcast `Modified`.
    pub fn set_status(&self, target: &ObjectRef, status: Value) -> ClusterResult<()> {
        let mut inner = self.lock();
        let mut object = inner
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(target.clone()))?;
        object.set_status(status);
        let stored = inner.store(object);
        let _ = inner.events.send(WatchEvent::Modified(stored));
        Ok(())
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.lock().events = broadcast::channel(EVENT_CAPACITY).0;
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn reset_writes(&self) {
        self.lock().writes.clear();
    }

    /// All stored objects ordered by reference.
    pub fn objects(&self) -> Vec<ClusterObject> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn object(&self, target: &ObjectRef) -> Option<ClusterObject> {
        self.lock().objects.get(target).cloned()
    }

    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.lock().objects.contains_key(target)
    }
}

impl Inner {
    fn check(&self, verb: Verb, name: &str) -> ClusterResult<()> {
        let injected = self
            .failures
            .iter()
            .any(|(v, n)| *v == verb && (n.is_empty() || n == name));
        if injected {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected {verb:?} failure for '{name}'"),
            });
        }
        Ok(())
    }

    fn store(&mut self, mut object: ClusterObject) -> ClusterObject {
        self.revision += 1;
        object.set_resource_version(&self.revision.to_string());
        self.objects.insert(object.object_ref(), object.clone());
        object
    }

    fn record(&mut self, verb: Verb, target: ObjectRef, force: bool) {
        self.writes.push(Write {
            verb,
            target,
            force,
        });
    }
}

fn selects(gvk: &Gvk, namespace: &str, selector: &LabelSelector, object: &ClusterObject) -> bool {
    object.gvk() == gvk
        && (namespace.is_empty() || object.namespace() == namespace)
        && selector.matches(&object.labels())
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn create(&self, object: &ClusterObject) -> ClusterResult<ClusterObject> {
        let mut inner = self.lock();
        inner.check(Verb::Create, object.name())?;
        let target = object.object_ref();
        if inner.objects.contains_key(&target) {
            return Err(ClusterError::AlreadyExists(target));
        }
        inner.record(Verb::Create, target, false);
        let stored = inner.store(object.clone());
        let _ = inner.events.send(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn get(&self, target: &ObjectRef) -> ClusterResult<ClusterObject> {
        let inner = self.lock();
        inner.check(Verb::Get, &target.name)?;
        inner
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(target.clone()))
    }

    async fn update(&self, object: &ClusterObject) -> ClusterResult<ClusterObject> {
        let mut inner = self.lock();
        inner.check(Verb::Update, object.name())?;
        let target = object.object_ref();
        let current = inner
            .objects
            .get(&target)
            .ok_or_else(|| ClusterError::NotFound(target.clone()))?;
        if let Some(version) = object.resource_version() {
            if current.resource_version() != Some(version) {
                return Err(ClusterError::Conflict {
                    target,
                    message: format!("stale resourceVersion {version}"),
                });
            }
        }
        inner.record(Verb::Update, target, false);
        let stored = inner.store(object.clone());
        let _ = inner.events.send(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, target: &ObjectRef, options: DeleteOptions) -> ClusterResult<()> {
        let mut inner = self.lock();
        inner.check(Verb::Delete, &target.name)?;
        let removed = inner
            .objects
            .remove(target)
            .ok_or_else(|| ClusterError::NotFound(target.clone()))?;
        inner.record(Verb::Delete, target.clone(), options.force);
        let _ = inner.events.send(WatchEvent::Deleted(removed));
        Ok(())
    }

    async fn list(&self, gvk: &Gvk, namespace: &str, selector: &str) -> ClusterResult<ObjectList> {
        let selector = LabelSelector::parse(selector)?;
        let inner = self.lock();
        inner.check(Verb::List, "")?;
        let items = inner
            .objects
            .values()
            .filter(|o| selects(gvk, namespace, &selector, o))
            .cloned()
            .collect();
        Ok(ObjectList {
            items,
            resource_version: Some(inner.revision.to_string()),
        })
    }

    async fn watch(
        &self,
        gvk: &Gvk,
        namespace: &str,
        selector: &str,
        resource_version: Option<&str>,
    ) -> ClusterResult<WatchStream> {
        let selector = LabelSelector::parse(selector)?;
        let (initial, rx) = {
            let inner = self.lock();
            inner.check(Verb::Watch, "")?;
            // Subscribe under the lock so nothing slips between snapshot and stream.
            let rx = inner.events.subscribe();
            let initial: Vec<WatchEvent> = match resource_version {
                Some(_) => Vec::new(),
                None => inner
                    .objects
                    .values()
                    .filter(|o| selects(gvk, namespace, &selector, o))
                    .cloned()
                    .map(WatchEvent::Added)
                    .collect(),
            };
            (initial, rx)
        };

        let gvk = gvk.clone();
        let namespace = namespace.to_string();
        let live = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| {
            let keep = match event {
                WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => {
                    selects(&gvk, &namespace, &selector, o)
                }
                WatchEvent::Bookmark | WatchEvent::Error(_) => true,
            };
            futures::future::ready(keep)
        });

        Ok(stream::iter(initial).chain(live).map(Ok).boxed())
    }
}
