//! An [`ObjectStore`] that keeps every object in process memory.
//!
//! It emulates the parts of the API server the reconcilers rely on:
//! resource versions with optimistic concurrency, the status subresource,
//! finalizer-gated deletion, owner-reference garbage collection and
//! namespace-scoped cleanup. Every successful write is logged so callers
//! can assert on what a reconcile actually changed.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    store::{name_of, ObjectStore},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Only used for fault injection; reads are not logged as writes.
    List,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.map(Into::into),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct Fault {
    kind: String,
    verb: Verb,
    once: bool,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    version: u64,
    faults: Vec<Fault>,
    writes: Vec<Write>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check_fault(&mut self, kind: &str, verb: Verb, name: &str) -> Result<()> {
        let position = self
            .faults
            .iter()
            .position(|fault| fault.kind == kind && fault.verb == verb);
        match position {
            Some(index) if self.faults[index].once => {
                self.faults.remove(index);
                Err(Error::Conflict(conflict_message(kind, name)))
            }
            Some(_) => Err(Error::from_response(
                500,
                "InternalError",
                format!("injected failure on {verb:?} {kind} {name:?}"),
            )),
            None => Ok(()),
        }
    }

    fn check_version(&self, key: &Key, current: &DynamicObject, given: &DynamicObject) -> Result<()> {
        match &given.metadata.resource_version {
            Some(version) if Some(version) != current.metadata.resource_version.as_ref() => {
                Err(Error::Conflict(conflict_message(&key.kind, &key.name)))
            }
            _ => Ok(()),
        }
    }

    fn record(&mut self, verb: Verb, key: &Key) {
        self.writes.push(Write {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    /// Deletes an object the way the platform does: objects holding
    /// finalizers are only marked, the rest are removed along with their
    /// dependents.
    fn delete(&mut self, key: &Key) {
        let Some(object) = self.objects.get(key) else {
            return;
        };

        let has_finalizers = object
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty());
        if has_finalizers {
            if object.metadata.deletion_timestamp.is_none() {
                let version = self.next_version();
                if let Some(object) = self.objects.get_mut(key) {
                    object.metadata.deletion_timestamp = Some(Time(Utc::now()));
                    object.metadata.resource_version = Some(version);
                }
            }
        } else {
            self.remove(key);
        }
    }

    fn remove(&mut self, key: &Key) {
        let Some(object) = self.objects.remove(key) else {
            return;
        };

        let uid = object.metadata.uid.unwrap_or_default();
        let is_namespace = key.api_version == "v1" && key.kind == "Namespace";
        let dependents: Vec<_> = self
            .objects
            .iter()
            .filter(|(child, value)| {
                let owned = value
                    .metadata
                    .owner_references
                    .iter()
                    .flatten()
                    .any(|owner| owner.uid == uid);
                let contained = is_namespace && child.namespace.as_ref() == Some(&key.name);
                owned || contained
            })
            .map(|(child, _)| child.clone())
            .collect();

        for child in dependents {
            self.delete(&child);
        }
    }
}

fn conflict_message(kind: &str, name: &str) -> String {
    format!(
        "Operation cannot be fulfilled on {kind} {name:?}: the object has been modified; please apply your changes to the latest version and try again"
    )
}

fn status_of(object: &DynamicObject) -> Option<&Value> {
    object.data.get("status")
}

fn without_status(object: &DynamicObject) -> Value {
    let mut data = object.data.clone();
    if let Some(data) = data.as_object_mut() {
        data.remove("status");
    }
    data
}

fn set_status(object: &mut DynamicObject, status: Option<Value>) {
    if !object.data.is_object() {
        object.data = Value::Object(Default::default());
    }
    if let Some(data) = object.data.as_object_mut() {
        match status {
            Some(status) => {
                data.insert("status".into(), status);
            }
            None => {
                data.remove("status");
            }
        }
    }
}

/// An in-memory [`ObjectStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every successful write since the store was created or last cleared.
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear()
    }

    /// Makes every `verb` on `kind` fail with an internal server error until
    /// [`MemoryStore::clear_faults`] is called.
    pub fn inject_failure(&self, kind: &str, verb: Verb) {
        self.lock().faults.push(Fault {
            kind: kind.into(),
            verb,
            once: false,
        })
    }

    /// Makes the next `verb` on `kind` fail with a version conflict.
    pub fn inject_conflict(&self, kind: &str, verb: Verb) {
        self.lock().faults.push(Fault {
            kind: kind.into(),
            verb,
            once: true,
        })
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let key = Key::new(resource, namespace, name);
        Ok(self.lock().objects.get(&key).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.lock();
        state.check_fault(&resource.kind, Verb::List, "")?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| {
                key.api_version == resource.api_version
                    && key.kind == resource.kind
                    && (namespace.is_none() || key.namespace.as_deref() == namespace)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, &name);

        let mut state = self.lock();
        state.check_fault(&resource.kind, Verb::Create, &name)?;
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "{} {name:?} already exists",
                resource.kind,
            )));
        }

        let mut created = object.clone();
        created.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        created.metadata.namespace = namespace.map(Into::into);
        created.metadata.resource_version = Some(state.next_version());
        created.metadata.uid = Some(format!("uid-{:08}", state.version));
        created.metadata.generation = Some(1);
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        created.metadata.deletion_timestamp = None;
        // status is owned by the status subresource
        set_status(&mut created, None);

        state.objects.insert(key.clone(), created.clone());
        state.record(Verb::Create, &key);
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, &name);

        let mut state = self.lock();
        state.check_fault(&resource.kind, Verb::Replace, &name)?;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} {name:?} not found", resource.kind)))?;
        state.check_version(&key, &current, object)?;

        let mut replaced = object.clone();
        replaced.types = current.types.clone();
        replaced.metadata.namespace = current.metadata.namespace.clone();
        replaced.metadata.uid = current.metadata.uid.clone();
        replaced.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        replaced.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        let generation = current.metadata.generation.unwrap_or(1);
        replaced.metadata.generation = Some(if without_status(&current) == without_status(&replaced) {
            generation
        } else {
            generation + 1
        });
        set_status(&mut replaced, status_of(&current).cloned());

        let released = replaced.metadata.deletion_timestamp.is_some()
            && replaced
                .metadata
                .finalizers
                .as_ref()
                .map_or(true, |finalizers| finalizers.is_empty());

        state.objects.insert(key.clone(), replaced.clone());
        state.record(Verb::Replace, &key);
        if released {
            state.remove(&key);
        }
        Ok(replaced)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        let key = Key::new(resource, namespace, &name);

        let mut state = self.lock();
        state.check_fault(&resource.kind, Verb::ReplaceStatus, &name)?;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} {name:?} not found", resource.kind)))?;
        state.check_version(&key, &current, object)?;

        let mut replaced = current;
        replaced.metadata.resource_version = Some(state.next_version());
        set_status(&mut replaced, status_of(object).cloned());

        state.objects.insert(key.clone(), replaced.clone());
        state.record(Verb::ReplaceStatus, &key);
        Ok(replaced)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let key = Key::new(resource, namespace, name);

        let mut state = self.lock();
        state.check_fault(&resource.kind, Verb::Delete, name)?;
        if !state.objects.contains_key(&key) {
            return Err(Error::NotFound(format!(
                "{} {name:?} not found",
                resource.kind,
            )));
        }

        state.delete(&key);
        state.record(Verb::Delete, &key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Namespace},
    };
    use kube::core::{ObjectMeta, Resource};
    use serde_json::json;

    use super::*;

    fn resource<K>() -> ApiResource
    where
        K: Resource<DynamicType = ()>,
    {
        ApiResource::erase::<K>(&())
    }

    fn object(name: &str, data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data,
        }
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryStore::new();
        let ar = resource::<ConfigMap>();

        let created = store
            .create(&ar, Some("default"), &object("cm", json!({"data": {"a": "1"}})))
            .await
            .unwrap();

        let mut first = created.clone();
        first.data = json!({"data": {"a": "2"}});
        store.replace(&ar, Some("default"), &first).await.unwrap();

        let mut second = created;
        second.data = json!({"data": {"a": "3"}});
        let error = store.replace(&ar, Some("default"), &second).await.unwrap_err();
        assert!(error.is_conflict());
    }

    #[tokio::test]
    async fn status_is_written_through_its_subresource_only() {
        let store = MemoryStore::new();
        let ar = resource::<Deployment>();

        let created = store
            .create(
                &ar,
                Some("default"),
                &object("deploy", json!({"spec": {"replicas": 1}, "status": {"replicas": 9}})),
            )
            .await
            .unwrap();
        assert!(created.data.get("status").is_none());

        let mut status = created.clone();
        status.data = json!({"spec": {"replicas": 5}, "status": {"availableReplicas": 1}});
        let updated = store
            .replace_status(&ar, Some("default"), &status)
            .await
            .unwrap();
        assert_eq!(updated.data["spec"]["replicas"], 1);
        assert_eq!(updated.data["status"]["availableReplicas"], 1);

        let mut spec = updated.clone();
        spec.data = json!({"spec": {"replicas": 2}});
        let updated = store.replace(&ar, Some("default"), &spec).await.unwrap();
        assert_eq!(updated.data["spec"]["replicas"], 2);
        assert_eq!(updated.data["status"]["availableReplicas"], 1);
        assert_eq!(updated.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn finalizers_gate_deletion() {
        let store = MemoryStore::new();
        let ar = resource::<ConfigMap>();

        let mut cm = object("cm", json!({}));
        cm.metadata.finalizers = Some(vec!["test/finalizer".into()]);
        store.create(&ar, Some("default"), &cm).await.unwrap();

        store.delete(&ar, Some("default"), "cm").await.unwrap();
        let mut deleting = store
            .get(&ar, Some("default"), "cm")
            .await
            .unwrap()
            .expect("object is kept while finalizers remain");
        assert!(deleting.metadata.deletion_timestamp.is_some());

        deleting.metadata.finalizers = Some(vec![]);
        store.replace(&ar, Some("default"), &deleting).await.unwrap();
        assert!(store
            .get(&ar, Some("default"), "cm")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn removal_collects_dependents() {
        let store = MemoryStore::new();
        let ns = resource::<Namespace>();
        let cm = resource::<ConfigMap>();

        let owner = store.create(&cm, Some("a"), &object("owner", json!({}))).await.unwrap();
        let mut owned = object("owned", json!({}));
        owned.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
                name: "owner".into(),
                uid: owner.metadata.uid.clone().unwrap(),
                ..Default::default()
            },
        ]);
        store.create(&cm, Some("a"), &owned).await.unwrap();

        store.delete(&cm, Some("a"), "owner").await.unwrap();
        assert!(store.get(&cm, Some("a"), "owned").await.unwrap().is_none());

        store.create(&ns, None, &object("b", json!({}))).await.unwrap();
        store.create(&cm, Some("b"), &object("inner", json!({}))).await.unwrap();
        store.delete(&ns, None, "b").await.unwrap();
        assert!(store.list(&cm, Some("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_faults() {
        let store = MemoryStore::new();
        let ar = resource::<ConfigMap>();

        store.inject_conflict("ConfigMap", Verb::Create);
        let error = store
            .create(&ar, Some("default"), &object("cm", json!({})))
            .await
            .unwrap_err();
        assert!(error.is_conflict());
        store
            .create(&ar, Some("default"), &object("cm", json!({})))
            .await
            .unwrap();

        store.inject_failure("ConfigMap", Verb::Delete);
        for _ in 0..2 {
            let error = store.delete(&ar, Some("default"), "cm").await.unwrap_err();
            assert!(matches!(error, Error::Api(_)));
        }
        store.clear_faults();
        store.delete(&ar, Some("default"), "cm").await.unwrap();

        let verbs: Vec<_> = store.writes().into_iter().map(|write| write.verb).collect();
        assert_eq!(verbs, [Verb::Create, Verb::Delete]);
    }

    #[tokio::test]
    async fn list_failures_leave_other_kinds_readable() {
        let store = MemoryStore::new();
        let cm = resource::<ConfigMap>();
        let ns = resource::<Namespace>();
        store.create(&ns, None, &object("a", json!({}))).await.unwrap();

        store.inject_failure("ConfigMap", Verb::List);
        let error = store.list(&cm, None).await.unwrap_err();
        assert!(matches!(error, Error::Api(_)));
        assert_eq!(store.list(&ns, None).await.unwrap().len(), 1);

        store.clear_faults();
        assert!(store.list(&cm, None).await.unwrap().is_empty());
    }
}
