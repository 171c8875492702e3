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

//! Fixtures shared by the reconciler tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use che_crds::{CheCluster, CheClusterSpec};
use che_resources::labels::{CHE_ECLIPSE_ORG, COMPONENT_LABEL, PART_OF_LABEL, USERNAME_ANNOTATION, WORKSPACES_NAMESPACE_COMPONENT};
use che_resources::testing::FakeCluster;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;

pub const CONTROL_NAMESPACE: &str = "eclipse-che";
pub const USER_NAMESPACE: &str = "user-che";
pub const USERNAME: &str = "user";

pub fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn meta(namespace: Option<&str>, name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(String::from),
        labels: Some(map(labels)),
        ..Default::default()
    }
}

pub fn namespace(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Namespace {
    let mut metadata = meta(None, name, labels);
    metadata.annotations = Some(map(annotations));
    Namespace { metadata, ..Default::default() }
}

pub fn workspace_namespace(name: &str, username: &str) -> Namespace {
    namespace(
        name,
        &[(PART_OF_LABEL, CHE_ECLIPSE_ORG), (COMPONENT_LABEL, WORKSPACES_NAMESPACE_COMPONENT)],
        &[(USERNAME_ANNOTATION, username)],
    )
}

pub fn checluster(namespace: &str, spec: CheClusterSpec) -> CheCluster {
    let mut che = CheCluster::new("eclipse-che", spec);
    che.metadata.namespace = Some(namespace.into());
    che
}

pub fn config_map(namespace: &str, name: &str, labels: &[(&str, &str)], data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap { metadata: meta(Some(namespace), name, labels), data: Some(map(data)), ..Default::default() }
}

pub fn secret(namespace: &str, name: &str, labels: &[(&str, &str)], data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(Some(namespace), name, labels),
        type_: Some("Opaque".into()),
        data: Some(data.iter().map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec()))).collect()),
        ..Default::default()
    }
}

pub fn workspaces_config_labels() -> Vec<(&'static str, &'static str)> {
    vec![(PART_OF_LABEL, CHE_ECLIPSE_ORG), (COMPONENT_LABEL, "workspaces-config")]
}

/// A cluster with the control namespace, its `CheCluster` and one
/// workspace namespace owned by [`USERNAME`].
pub fn cluster(spec: CheClusterSpec) -> Arc<FakeCluster> {
    let cluster = Arc::new(FakeCluster::new());
    cluster.apply(&namespace(CONTROL_NAMESPACE, &[], &[]));
    cluster.apply(&checluster(CONTROL_NAMESPACE, spec));
    cluster.apply(&workspace_namespace(USER_NAMESPACE, USERNAME));
    cluster
}

/// A reflector store holding the given `CheCluster`s.
pub fn store(checlusters: &[CheCluster]) -> Store<CheCluster> {
    let (store, mut writer) = reflector::store();
    writer.apply_watcher_event(&watcher::Event::Restarted(checlusters.to_vec()));
    store
}
