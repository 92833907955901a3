use std::collections::BTreeMap;

use kube::{core::ApiResource, Resource};

use crate::error::{Error, Result};

/// The set of kinds a reconciler may touch.
///
/// Built once at process start and shared by reference; lookups for a kind
/// that was never registered fail instead of guessing an endpoint.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    resources: BTreeMap<String, ApiResource>,
}

impl Registry {
    pub fn with<K>(mut self) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        self.register::<K>();
        self
    }

    pub fn register<K>(&mut self)
    where
        K: Resource<DynamicType = ()>,
    {
        self.resources
            .insert(key::<K>(), ApiResource::erase::<K>(&()));
    }

    pub fn contains<K>(&self) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        self.resources.contains_key(&key::<K>())
    }

    pub fn resolve<K>(&self) -> Result<&ApiResource>
    where
        K: Resource<DynamicType = ()>,
    {
        let key = key::<K>();
        self.resources
            .get(&key)
            .ok_or(Error::UnregisteredKind(key))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn key<K>() -> String
where
    K: Resource<DynamicType = ()>,
{
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}
