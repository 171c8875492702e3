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

//! The per-namespace record of the versions observed for each synced
//! source and target object.
//!
//! Keys read `<group>_<version>_<kind>.<name>.<namespace>` where the dots
//! of the group are replaced by dashes and an empty group is left out
//! together with its separator, e.g. `v1_ConfigMap.config.eclipse-che`.

use std::collections::{BTreeMap, BTreeSet};

use che_resources::client::{self, KubeClient};
use che_resources::error::Result;
use che_resources::labels::{workspaces_config, SYNC_RECORD_CONFIGMAP};
use che_resources::object;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::{GroupVersionKind, ObjectMeta};

pub fn key(gvk: &GroupVersionKind, name: &str, namespace: &str) -> String {
    if gvk.group.is_empty() {
        format!("{}_{}.{}.{}", gvk.version, gvk.kind, name, namespace)
    } else {
        format!("{}_{}_{}.{}.{}", gvk.group.replace('.', "-"), gvk.version, gvk.kind, name, namespace)
    }
}

/// Splits a key back into its kind, object name and namespace.
///
/// Dashes of the group are all turned back into dots, so a group which
/// had dashes of its own doesn't survive the round trip.
pub fn parse_key(key: &str) -> Option<(GroupVersionKind, String, String)> {
    let (kind, rest) = key.split_once('.')?;
    let (name, namespace) = rest.rsplit_once('.')?;

    let parts: Vec<&str> = kind.split('_').collect();
    let gvk = match parts.as_slice() {
        [version, kind] => GroupVersionKind::gvk("", version, kind),
        [group, version, kind] => GroupVersionKind::gvk(&group.replace('-', "."), version, kind),
        _ => return None,
    };

    if name.is_empty() || namespace.is_empty() {
        return None;
    }
    Some((gvk, name.to_string(), namespace.to_string()))
}

/// The key of the same object in another namespace.
pub fn retarget(key: &str, namespace: &str) -> Option<String> {
    key.rsplit_once('.').map(|(object, _)| format!("{}.{}", object, namespace))
}

fn key_namespace(key: &str) -> Option<&str> {
    key.rsplit_once('.').map(|(_, namespace)| namespace)
}

#[derive(Debug, Default)]
pub struct SyncRecord {
    versions: BTreeMap<String, String>,
    synced: BTreeSet<String>,
}

impl SyncRecord {
    /// Reads the record of `namespace`, a missing record is empty.
    pub async fn load(client: &dyn KubeClient, namespace: &str) -> Result<SyncRecord> {
        let found = client::get::<ConfigMap>(client, Some(namespace), SYNC_RECORD_CONFIGMAP).await?;
        let versions = found.and_then(|cm| cm.data).unwrap_or_default();
        Ok(SyncRecord { versions, synced: BTreeSet::new() })
    }

    pub async fn save(&self, client: &dyn KubeClient, namespace: &str) -> Result<()> {
        let resource = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SYNC_RECORD_CONFIGMAP.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(workspaces_config()),
                ..Default::default()
            },
            data: (!self.versions.is_empty()).then(|| self.versions.clone()),
            ..Default::default()
        };
        object::sync(client, &resource).await?;
        Ok(())
    }

    pub fn version(&self, key: &str) -> Option<&str> {
        self.versions.get(key).map(String::as_str)
    }

    pub fn record(&mut self, key: &str, version: &str) {
        self.versions.insert(key.to_string(), version.to_string());
    }

    pub fn forget(&mut self, key: &str) {
        self.versions.remove(key);
    }

    pub fn mark_synced(&mut self, key: &str) {
        self.synced.insert(key.to_string());
    }

    /// The recorded source keys, i.e. those of `control_namespace`, that
    /// were not synced in this run.
    pub fn obsolete(&self, control_namespace: &str) -> Vec<String> {
        self.versions
            .keys()
            .filter(|key| key_namespace(key) == Some(control_namespace))
            .filter(|key| !self.synced.contains(*key))
            .cloned()
            .collect()
    }
}
