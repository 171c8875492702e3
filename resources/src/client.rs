// Copyright 2023 The Amphitheatre Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{pinned_kind, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::{Error, Result};

/// The operations the reconcilers need from the Kubernetes API.
///
/// Objects travel as [`DynamicObject`]s keyed by their kind, so arbitrary
/// kinds (e.g. objects expanded from a Template) go through the same
/// path as the typed ones. The typed helpers in this module convert
/// between both representations.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>>;

    /// Lists objects, optionally restricted to a namespace and a label selector.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replaces the object, the server rejects a stale resource version.
    async fn update(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<bool>;
}

/// A [`KubeClient`] backed by the API server.
pub struct Cluster {
    client: Client,
    resources: Mutex<HashMap<String, (ApiResource, bool)>>,
}

impl Cluster {
    pub fn new(client: Client) -> Self {
        Cluster { client, resources: Mutex::new(HashMap::new()) }
    }

    /// Resolves the API resource and whether it is namespaced.
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(found) = self.resources.lock().ok().and_then(|cache| cache.get(&key).cloned()) {
            return Ok(found);
        }

        let (resource, capabilities) = pinned_kind(&self.client, gvk).await.map_err(|err| match err {
            kube::Error::Discovery(_) => Error::UnknownKind(key.clone()),
            kube::Error::Api(response) if response.code == 404 => Error::UnknownKind(key.clone()),
            err => Error::KubeError(err),
        })?;
        let resolved = (resource, matches!(capabilities.scope, Scope::Namespaced));
        debug!("Resolved API resource for {}: {:?}", key, resolved);

        if let Ok(mut cache) = self.resources.lock() {
            cache.insert(key, resolved.clone());
        }
        Ok(resolved)
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (resource, namespaced) = self.resolve(gvk).await?;
        Ok(match namespace {
            Some(namespace) if namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

#[async_trait]
impl KubeClient for Cluster {
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        let api = self.api(gvk, namespace).await?;
        api.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(gvk, namespace).await?;
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await.map_err(Error::KubeError)?.items)
    }

    async fn create(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self.api(gvk, object.metadata.namespace.as_deref()).await?;
        api.create(&PostParams::default(), object).await.map_err(Error::KubeError)
    }

    async fn update(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self.api(gvk, object.metadata.namespace.as_deref()).await?;
        api.replace(&object.name_any(), &PostParams::default(), object)
            .await
            .map_err(Error::KubeError)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<bool> {
        let api = self.api(gvk, namespace).await?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(err) => Err(Error::KubeError(err)),
        }
    }
}

/// The kind of a statically typed resource.
pub fn gvk<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// The kind recorded in an object's type metadata.
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object.types.as_ref().ok_or(Error::MissingObjectKey(".apiVersion"))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

pub fn to_dynamic<K: Serialize>(resource: &K) -> Result<DynamicObject> {
    serde_json::to_value(resource)
        .and_then(serde_json::from_value)
        .map_err(Error::SerializationError)
}

pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(Error::SerializationError)
}

pub async fn get<K>(client: &dyn KubeClient, namespace: Option<&str>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match client.get(&gvk::<K>(), namespace, name).await? {
        Some(object) => Ok(Some(from_dynamic(object)?)),
        None => Ok(None),
    }
}

pub async fn list<K>(client: &dyn KubeClient, namespace: Option<&str>, selector: Option<&str>) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&gvk::<K>(), namespace, selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

pub async fn create<K>(client: &dyn KubeClient, resource: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let object = client.create(&gvk::<K>(), &to_dynamic(resource)?).await?;
    from_dynamic(object)
}

pub async fn update<K>(client: &dyn KubeClient, resource: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let object = client.update(&gvk::<K>(), &to_dynamic(resource)?).await?;
    from_dynamic(object)
}

pub async fn delete<K>(client: &dyn KubeClient, namespace: Option<&str>, name: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    client.delete(&gvk::<K>(), namespace, name).await
}
