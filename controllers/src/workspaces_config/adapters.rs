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

//! How each kind of source object is turned into its target.

use std::collections::BTreeMap;

use che_resources::client::gvk;
use che_resources::diff::{differs, differs_unstructured};
use che_resources::labels::{
    workspaces_config, MOUNT_TO_DEVWORKSPACE_LABEL, WATCH_CONFIGMAP_LABEL, WATCH_SECRET_LABEL,
};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret};
use kube::core::{DynamicObject, GroupVersionKind, ObjectMeta};
use kube::ResourceExt;

/// A source object in the control namespace and the way to reproduce it
/// in a workspace namespace.
pub trait Syncable: Send + Sync {
    fn source_kind(&self) -> &GroupVersionKind;

    fn source_object(&self) -> &DynamicObject;

    /// The version kept in the sync record for the source.
    fn source_version(&self) -> String {
        self.source_object().resource_version().unwrap_or_default()
    }

    fn build_target(&self, namespace: &str) -> DynamicObject;

    /// Whether the spec of an existing target can't be changed.
    fn is_read_only_spec(&self) -> bool {
        false
    }

    fn differs_from(&self, candidate: &DynamicObject, existing: &DynamicObject) -> bool {
        differs(candidate, existing)
    }
}

pub struct ConfigMapSource {
    kind: GroupVersionKind,
    object: DynamicObject,
}

impl ConfigMapSource {
    pub fn new(object: DynamicObject) -> Self {
        ConfigMapSource { kind: gvk::<ConfigMap>(), object }
    }
}

impl Syncable for ConfigMapSource {
    fn source_kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    fn source_object(&self) -> &DynamicObject {
        &self.object
    }

    fn build_target(&self, namespace: &str) -> DynamicObject {
        target(&self.object, namespace)
    }
}

pub struct SecretSource {
    kind: GroupVersionKind,
    object: DynamicObject,
}

impl SecretSource {
    pub fn new(object: DynamicObject) -> Self {
        SecretSource { kind: gvk::<Secret>(), object }
    }
}

impl Syncable for SecretSource {
    fn source_kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    fn source_object(&self) -> &DynamicObject {
        &self.object
    }

    fn build_target(&self, namespace: &str) -> DynamicObject {
        target(&self.object, namespace)
    }
}

/// Claims can't be resized or rebound in place, their spec is only used
/// when the target gets created.
pub struct PersistentVolumeClaimSource {
    kind: GroupVersionKind,
    object: DynamicObject,
}

impl PersistentVolumeClaimSource {
    pub fn new(object: DynamicObject) -> Self {
        PersistentVolumeClaimSource { kind: gvk::<PersistentVolumeClaim>(), object }
    }
}

impl Syncable for PersistentVolumeClaimSource {
    fn source_kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    fn source_object(&self) -> &DynamicObject {
        &self.object
    }

    fn build_target(&self, namespace: &str) -> DynamicObject {
        target(&self.object, namespace)
    }

    fn is_read_only_spec(&self) -> bool {
        true
    }
}

/// An object rendered from a Template, of any kind.
pub struct TemplateObjectSource {
    kind: GroupVersionKind,
    object: DynamicObject,
    version: String,
}

impl TemplateObjectSource {
    pub fn new(kind: GroupVersionKind, object: DynamicObject, version: String) -> Self {
        TemplateObjectSource { kind, object, version }
    }
}

impl Syncable for TemplateObjectSource {
    fn source_kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    fn source_object(&self) -> &DynamicObject {
        &self.object
    }

    fn source_version(&self) -> String {
        self.version.clone()
    }

    fn build_target(&self, namespace: &str) -> DynamicObject {
        target(&self.object, namespace)
    }

    fn is_read_only_spec(&self) -> bool {
        is_claim(&self.kind)
    }

    fn differs_from(&self, candidate: &DynamicObject, existing: &DynamicObject) -> bool {
        differs_unstructured(candidate, existing)
    }
}

fn is_claim(kind: &GroupVersionKind) -> bool {
    *kind == gvk::<PersistentVolumeClaim>()
}

/// Labels workspaces need to mount an object of the given kind.
fn mount_labels(kind: &str) -> &'static [(&'static str, &'static str)] {
    match kind {
        "ConfigMap" => &[(WATCH_CONFIGMAP_LABEL, "true"), (MOUNT_TO_DEVWORKSPACE_LABEL, "true")],
        "Secret" => &[(WATCH_SECRET_LABEL, "true"), (MOUNT_TO_DEVWORKSPACE_LABEL, "true")],
        _ => &[],
    }
}

/// Annotations the control plane sets on bound claims.
const CLAIM_BINDING_ANNOTATIONS: [&str; 3] = ["pv.kubernetes.io/", "volume.kubernetes.io/", "volume.beta.kubernetes.io/"];

/// A copy of `source` for `namespace`, reduced to its name, labels,
/// annotations and payload.
fn target(source: &DynamicObject, namespace: &str) -> DynamicObject {
    let kind = source.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();

    let mut labels = source.labels().clone();
    labels.extend(workspaces_config());
    labels.extend(mount_labels(kind).iter().map(|(k, v)| (k.to_string(), v.to_string())));

    let mut annotations: BTreeMap<String, String> = source.annotations().clone();
    let mut data = source.data.clone();
    if let Some(fields) = data.as_object_mut() {
        fields.remove("status");
    }

    if kind == "PersistentVolumeClaim" {
        annotations.retain(|key, _| !CLAIM_BINDING_ANNOTATIONS.iter().any(|prefix| key.starts_with(prefix)));
        if let Some(spec) = data.get_mut("spec").and_then(|spec| spec.as_object_mut()) {
            spec.remove("volumeName");
        }
    }

    DynamicObject {
        types: source.types.clone(),
        metadata: ObjectMeta {
            name: source.metadata.name.clone(),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: if annotations.is_empty() { None } else { Some(annotations) },
            ..Default::default()
        },
        data,
    }
}
