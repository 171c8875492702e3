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

//! Turns events on watched objects into the namespaces to reconcile.

use std::collections::BTreeMap;
use std::sync::Arc;

use che_crds::CheCluster;
use che_resources::error::Result;
use che_resources::labels::{
    has_workspaces_config_labels, is_user_settings, CA_BUNDLE_MERGED_CONFIGMAP, SELF_SIGNED_CERTIFICATE_SECRET,
    SYNC_RECORD_CONFIGMAP,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::Resource as _;
use kube::core::ObjectMeta;
use kube::runtime::reflector::Store;
use kube::{Resource, ResourceExt};
use tracing::{debug, error};

use crate::namespace_cache::NamespaceCache;

/// `CheCluster`s are looked up in the reflector store fed by the
/// `CheCluster` watch.
pub struct EventRouter {
    namespaces: Arc<NamespaceCache>,
    checlusters: Store<CheCluster>,
}

impl EventRouter {
    pub fn new(namespaces: Arc<NamespaceCache>, checlusters: Store<CheCluster>) -> Self {
        EventRouter { namespaces, checlusters }
    }

    /// The namespaces to reconcile after an event on an object of `kind`.
    /// Failures are logged and yield no namespace.
    pub async fn route(&self, kind: &str, meta: &ObjectMeta) -> Vec<String> {
        match self.try_route(kind, meta).await {
            Ok(namespaces) => {
                debug!("Routed {} {:?} to {:?}", kind, meta.name, namespaces);
                namespaces
            }
            Err(err) => {
                error!("Failed to route an event on {} {:?}: {}", kind, meta.name, err);
                vec![]
            }
        }
    }

    async fn try_route(&self, kind: &str, meta: &ObjectMeta) -> Result<Vec<String>> {
        let empty = BTreeMap::new();
        let labels = meta.labels.as_ref().unwrap_or(&empty);
        let name = meta.name.as_deref().unwrap_or_default();
        let namespace = meta.namespace.as_deref().unwrap_or_default();

        // User settings tampered with in a workspace namespace.
        if is_user_settings(labels) && self.is_workspace_namespace(namespace).await? {
            return Ok(vec![namespace.to_string()]);
        }

        // A source every workspace namespace derives objects from.
        if self.is_well_known_source(kind, name, namespace) {
            return Ok(self.namespaces.list_known().await);
        }

        if has_workspaces_config_labels(labels) {
            // An admin-authored source.
            if self.hosts_checluster(namespace) {
                return Ok(self.namespaces.list_known().await);
            }
            // A propagated target.
            if name != SYNC_RECORD_CONFIGMAP && self.is_workspace_namespace(namespace).await? {
                return Ok(vec![namespace.to_string()]);
            }
        }

        if kind == CheCluster::kind(&()) {
            return Ok(self.namespaces.list_known().await);
        }

        Ok(vec![])
    }

    async fn is_workspace_namespace(&self, namespace: &str) -> Result<bool> {
        if namespace.is_empty() {
            return Ok(false);
        }
        let info = self.namespaces.get(namespace).await?;
        Ok(info.map_or(false, |info| info.is_workspace_namespace))
    }

    fn checlusters(&self, namespace: &str) -> Vec<Arc<CheCluster>> {
        if namespace.is_empty() {
            return vec![];
        }
        self.checlusters
            .state()
            .into_iter()
            .filter(|checluster| checluster.namespace().as_deref() == Some(namespace))
            .collect()
    }

    fn hosts_checluster(&self, namespace: &str) -> bool {
        !self.checlusters(namespace).is_empty()
    }

    fn is_well_known_source(&self, kind: &str, name: &str, namespace: &str) -> bool {
        if kind == Secret::KIND {
            return name == SELF_SIGNED_CERTIFICATE_SECRET && self.hosts_checluster(namespace);
        }

        if kind == ConfigMap::KIND {
            return self.checlusters(namespace).iter().any(|che| {
                name == CA_BUNDLE_MERGED_CONFIGMAP || che.git_trusted_certs_config_map_name() == Some(name)
            });
        }

        false
    }
}
