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
use std::sync::Arc;

use che_resources::client::{gvk, KubeClient};
use che_resources::error::Result;
use che_resources::labels::{
    CHE_ECLIPSE_ORG, CHE_NAMESPACE_LABEL, CHE_NAME_LABEL, COMPONENT_LABEL, PART_OF_LABEL, USERNAME_ANNOTATION,
    WORKSPACES_NAMESPACE_COMPONENT, WORKSPACE_NAMESPACE_OWNER_UID_LABEL,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::core::{GroupVersionKind, ObjectMeta};
use tokio::sync::Mutex;
use tracing::debug;

/// What is known about a namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub is_workspace_namespace: bool,
    pub username: String,
    /// The `CheCluster` that should manage the namespace, empty parts
    /// match the sole existing `CheCluster`.
    pub checluster: CheClusterRef,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheClusterRef {
    pub name: String,
    pub namespace: String,
}

impl NamespaceInfo {
    pub fn from_metadata(meta: &ObjectMeta) -> NamespaceInfo {
        let label = |key: &str| meta.labels.as_ref().and_then(|l| l.get(key)).cloned().unwrap_or_default();
        let annotation = |key: &str| meta.annotations.as_ref().and_then(|a| a.get(key)).cloned().unwrap_or_default();

        let is_workspace_namespace = !label(WORKSPACE_NAMESPACE_OWNER_UID_LABEL).is_empty()
            || (label(PART_OF_LABEL) == CHE_ECLIPSE_ORG && label(COMPONENT_LABEL) == WORKSPACES_NAMESPACE_COMPONENT);

        NamespaceInfo {
            is_workspace_namespace,
            username: annotation(USERNAME_ANNOTATION),
            checluster: CheClusterRef { name: label(CHE_NAME_LABEL), namespace: label(CHE_NAMESPACE_LABEL) },
        }
    }
}

/// The process-wide answer to "what do we know about this namespace?".
///
/// Every operation holds a single lock, which is only ever held across one
/// read of the namespace (or project on OpenShift).
pub struct NamespaceCache {
    client: Arc<dyn KubeClient>,
    openshift: bool,
    known: Mutex<HashMap<String, NamespaceInfo>>,
}

impl NamespaceCache {
    pub fn new(client: Arc<dyn KubeClient>, openshift: bool) -> Self {
        NamespaceCache { client, openshift, known: Mutex::new(HashMap::new()) }
    }

    /// Reads the namespace from the cluster and refreshes the cached record.
    /// Returns `None` once the namespace is gone or being deleted.
    pub async fn examine(&self, namespace: &str) -> Result<Option<NamespaceInfo>> {
        let mut known = self.known.lock().await;
        self.examine_locked(&mut known, namespace).await
    }

    /// The cached record, examining the namespace on a miss.
    pub async fn get(&self, namespace: &str) -> Result<Option<NamespaceInfo>> {
        let mut known = self.known.lock().await;
        if let Some(info) = known.get(namespace) {
            return Ok(Some(info.clone()));
        }
        self.examine_locked(&mut known, namespace).await
    }

    pub async fn list_known(&self) -> Vec<String> {
        let known = self.known.lock().await;
        let mut names: Vec<String> = known.keys().cloned().collect();
        names.sort();
        names
    }

    async fn examine_locked(
        &self,
        known: &mut HashMap<String, NamespaceInfo>,
        namespace: &str,
    ) -> Result<Option<NamespaceInfo>> {
        let object = self.client.get(&self.namespace_kind(), None, namespace).await?;

        match object {
            Some(object) if object.metadata.deletion_timestamp.is_none() => {
                let info = NamespaceInfo::from_metadata(&object.metadata);
                debug!("Examined namespace {}: {:?}", namespace, info);
                known.insert(namespace.to_string(), info.clone());
                Ok(Some(info))
            }
            _ => {
                known.remove(namespace);
                Ok(None)
            }
        }
    }

    fn namespace_kind(&self) -> GroupVersionKind {
        if self.openshift {
            GroupVersionKind::gvk("project.openshift.io", "v1", "Project")
        } else {
            gvk::<Namespace>()
        }
    }
}
