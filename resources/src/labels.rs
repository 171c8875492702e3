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

//! Well-known label, annotation and object names shared by the operator.

use std::collections::BTreeMap;

pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const CHE_ECLIPSE_ORG: &str = "che.eclipse.org";
pub const OPERATOR_NAME: &str = "che-operator";

pub const WORKSPACES_CONFIG_COMPONENT: &str = "workspaces-config";
pub const WORKSPACES_NAMESPACE_COMPONENT: &str = "workspaces-namespace";
pub const USER_SETTINGS_COMPONENT: &str = "user-settings";

/// Namespace labels and annotations used to recognize workspace namespaces.
pub const WORKSPACE_NAMESPACE_OWNER_UID_LABEL: &str = "che.eclipse.org/workspace-namespace-owner-uid";
pub const CHE_NAME_LABEL: &str = "che.eclipse.org/che-name";
pub const CHE_NAMESPACE_LABEL: &str = "che.eclipse.org/che-namespace";
pub const USERNAME_ANNOTATION: &str = "che.eclipse.org/username";

pub const NODE_SELECTOR_ANNOTATION: &str = "che.eclipse.org/node-selector";
pub const POD_TOLERATIONS_ANNOTATION: &str = "che.eclipse.org/pod-tolerations";

/// DevWorkspace mounting contract.
pub const MOUNT_TO_DEVWORKSPACE_LABEL: &str = "controller.devfile.io/mount-to-devworkspace";
pub const WATCH_CONFIGMAP_LABEL: &str = "controller.devfile.io/watch-configmap";
pub const WATCH_SECRET_LABEL: &str = "controller.devfile.io/watch-secret";
pub const GIT_TLS_LABEL: &str = "controller.devfile.io/git-tls-credential";
pub const MOUNT_AS_ANNOTATION: &str = "controller.devfile.io/mount-as";
pub const MOUNT_PATH_ANNOTATION: &str = "controller.devfile.io/mount-path";

/// Sources living beside a `CheCluster`.
pub const SELF_SIGNED_CERTIFICATE_SECRET: &str = "self-signed-certificate";
pub const CA_BUNDLE_MERGED_CONFIGMAP: &str = "ca-certs-merged";

/// Per-namespace record of synchronized versions.
pub const SYNC_RECORD_CONFIGMAP: &str = "sync-workspaces-config";

/// Label selector matching propagated workspaces configuration.
pub fn workspaces_config_selector() -> String {
    format!("{PART_OF_LABEL}={CHE_ECLIPSE_ORG},{COMPONENT_LABEL}={WORKSPACES_CONFIG_COMPONENT}")
}

pub fn has_workspaces_config_labels(labels: &BTreeMap<String, String>) -> bool {
    labels.get(PART_OF_LABEL).map(String::as_str) == Some(CHE_ECLIPSE_ORG)
        && labels.get(COMPONENT_LABEL).map(String::as_str) == Some(WORKSPACES_CONFIG_COMPONENT)
}

pub fn is_user_settings(labels: &BTreeMap<String, String>) -> bool {
    labels.get(COMPONENT_LABEL).map(String::as_str) == Some(USER_SETTINGS_COMPONENT)
}

/// Labels carried by every object derived from a `CheCluster`.
pub fn user_settings() -> BTreeMap<String, String> {
    BTreeMap::from([
        (PART_OF_LABEL.into(), CHE_ECLIPSE_ORG.into()),
        (COMPONENT_LABEL.into(), USER_SETTINGS_COMPONENT.into()),
        (MANAGED_BY_LABEL.into(), OPERATOR_NAME.into()),
    ])
}

/// Labels carried by every propagated workspaces configuration object.
pub fn workspaces_config() -> BTreeMap<String, String> {
    BTreeMap::from([
        (PART_OF_LABEL.into(), CHE_ECLIPSE_ORG.into()),
        (COMPONENT_LABEL.into(), WORKSPACES_CONFIG_COMPONENT.into()),
        (MANAGED_BY_LABEL.into(), OPERATOR_NAME.into()),
    ])
}
