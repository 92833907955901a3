use std::{fmt, sync::Arc};

use kube::{core::DynamicObject, Resource};
use serde::{de::DeserializeOwned, Serialize};

use crate::{error::Result, registry::Registry, store::ObjectStore};

/// A kind the reconcilers can read and write through a [`Cluster`].
pub trait Object
where
    Self: 'static
        + Send
        + Sync
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Resource<DynamicType = ()>,
{
}

impl<T> Object for T where
    T: 'static
        + Send
        + Sync
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Resource<DynamicType = ()>
{
}

/// Typed access to an [`ObjectStore`], restricted to the kinds of a
/// [`Registry`].
#[derive(Clone)]
pub struct Cluster {
    store: Arc<dyn ObjectStore>,
    registry: Arc<Registry>,
}

impl Cluster {
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        match self.store.get(resource, namespace, name).await? {
            Some(object) => from_dynamic(object).map(Some),
            None => Ok(None),
        }
    }

    pub async fn list<K>(&self, namespace: Option<&str>) -> Result<Vec<K>>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        self.store
            .list(resource, namespace)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn create<K>(&self, object: &K) -> Result<K>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        let namespace = object.meta().namespace.as_deref();
        let object = to_dynamic(object)?;
        from_dynamic(self.store.create(resource, namespace, &object).await?)
    }

    pub async fn replace<K>(&self, object: &K) -> Result<K>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        let namespace = object.meta().namespace.as_deref();
        let object = to_dynamic(object)?;
        from_dynamic(self.store.replace(resource, namespace, &object).await?)
    }

    pub async fn replace_status<K>(&self, object: &K) -> Result<K>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        let namespace = object.meta().namespace.as_deref();
        let object = to_dynamic(object)?;
        from_dynamic(
            self.store
                .replace_status(resource, namespace, &object)
                .await?,
        )
    }

    pub async fn delete<K>(&self, namespace: Option<&str>, name: &str) -> Result<()>
    where
        K: Object,
    {
        let resource = self.registry.resolve::<K>()?;
        self.store.delete(resource, namespace, name).await
    }
}

fn to_dynamic<K>(object: &K) -> Result<DynamicObject>
where
    K: Object,
{
    let mut value = ::serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.entry("apiVersion")
            .or_insert_with(|| K::api_version(&()).into());
        map.entry("kind").or_insert_with(|| K::kind(&()).into());
    }
    ::serde_json::from_value(value).map_err(Into::into)
}

fn from_dynamic<K>(object: DynamicObject) -> Result<K>
where
    K: Object,
{
    ::serde_json::to_value(object)
        .and_then(::serde_json::from_value)
        .map_err(Into::into)
}
