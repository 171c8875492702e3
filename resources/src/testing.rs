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

//! An in-memory stand-in for the API server, used by the reconciler tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::{DynamicObject, ErrorResponse, GroupVersionKind, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::{from_dynamic, gvk, gvk_of, to_dynamic, KubeClient};
use crate::error::{Error, Result};

/// Stores objects by kind, namespace and name, assigning a fresh
/// resource version on every write like the API server does.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<String, DynamicObject>>,
    revision: AtomicU64,
    failing: Mutex<BTreeSet<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites an object regardless of its resource version.
    pub fn apply<K: Serialize>(&self, resource: &K) -> DynamicObject {
        let object = to_dynamic(resource).expect("serializable resource");
        let gvk = gvk_of(&object).expect("resource with type meta");
        let key = key(&gvk, object.metadata.namespace.as_deref(), &object.name_any());
        let stored = self.stamp(&gvk, object);
        self.objects.lock().unwrap().insert(key, stored.clone());
        stored
    }

    /// Makes every later create of an object named `name` fail with a
    /// server error.
    pub fn fail_on_create(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn fetch<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key(&gvk::<K>(), namespace, name))
            .map(|object| from_dynamic(object.clone()).expect("deserializable resource"))
    }

    pub fn fetch_dynamic(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(&key(gvk, namespace, name)).cloned()
    }

    pub fn remove<K: Resource<DynamicType = ()>>(&self, namespace: Option<&str>, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .remove(&key(&gvk::<K>(), namespace, name))
            .is_some()
    }

    fn stamp(&self, gvk: &GroupVersionKind, mut object: DynamicObject) -> DynamicObject {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        object.types = Some(TypeMeta { api_version: gvk.api_version(), kind: gvk.kind.clone() });
        object.metadata.resource_version = Some(revision.to_string());
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(format!("uid-{revision}"));
        }
        object
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.fetch_dynamic(gvk, namespace, name))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let prefix = match namespace {
            Some(namespace) => format!("{}/{}/{}/{}/", gvk.group, gvk.version, gvk.kind, namespace),
            None => format!("{}/{}/{}/", gvk.group, gvk.version, gvk.kind),
        };
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, object)| object)
            .filter(|object| selector.map_or(true, |selector| matches(selector, object)))
            .cloned()
            .collect())
    }

    async fn create(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject> {
        let key = key(gvk, object.metadata.namespace.as_deref(), &object.name_any());
        if self.failing.lock().unwrap().contains(&object.name_any()) {
            return Err(api_error(500, "InternalError", format!("{key} can't be created")));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{key} already exists")));
        }

        let mut object = object.clone();
        object.metadata.resource_version = None;
        let stored = self.stamp(gvk, object);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<DynamicObject> {
        let key = key(gvk, object.metadata.namespace.as_deref(), &object.name_any());
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{key} not found")))?;

        if object.metadata.resource_version.is_some() && object.metadata.resource_version != current.metadata.resource_version {
            return Err(api_error(409, "Conflict", format!("{key} has been modified")));
        }

        let mut object = object.clone();
        object.metadata.uid = current.metadata.uid.clone();
        let stored = self.stamp(gvk, object);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().remove(&key(gvk, namespace, name)).is_some())
    }
}

fn key(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}/{}/{}/{}", gvk.group, gvk.version, gvk.kind, namespace.unwrap_or_default(), name)
}

/// Equality-based selectors (`a=b`, `a==b`) and existence (`a`) only.
fn matches(selector: &str, object: &DynamicObject) -> bool {
    let labels = object.labels();
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|requirement| {
        match requirement.split_once("==").or_else(|| requirement.split_once('=')) {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(requirement),
        }
    })
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    }))
}
