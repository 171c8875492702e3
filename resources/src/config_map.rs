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

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::ObjectMeta;
use serde_json::to_string;

use crate::client::{self, KubeClient};
use crate::error::Result;
use crate::labels::{
    user_settings, GIT_TLS_LABEL, MOUNT_AS_ANNOTATION, MOUNT_TO_DEVWORKSPACE_LABEL, WATCH_CONFIGMAP_LABEL,
};

pub const USER_SETTINGS_CONFIGMAP: &str = "che-user-settings";
pub const TRUSTED_CA_CERTS_CONFIGMAP: &str = "che-trusted-ca-certs";
pub const GIT_TLS_CONFIGMAP: &str = "che-git-tls-creds";

/// The per-kind settings ConfigMaps replaced by [`USER_SETTINGS_CONFIGMAP`].
pub const LEGACY_SETTINGS_CONFIGMAPS: [&str; 3] = ["che-editor-settings", "che-idle-settings", "che-proxy-settings"];

/// Builds the ConfigMap whose entries are exposed to workspaces as
/// environment variables.
pub fn user_settings_env(namespace: &str, data: BTreeMap<String, String>) -> ConfigMap {
    let mut labels = user_settings();
    labels.insert(MOUNT_TO_DEVWORKSPACE_LABEL.into(), "true".into());
    labels.insert(WATCH_CONFIGMAP_LABEL.into(), "true".into());

    let resource = ConfigMap {
        metadata: ObjectMeta {
            name: Some(USER_SETTINGS_CONFIGMAP.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(MOUNT_AS_ANNOTATION.to_string(), "env".to_string())])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    tracing::debug!("The configmap resource:\n {:?}\n", to_string(&resource));

    resource
}

/// Builds the Git TLS credentials picked up by the workspace's Git client.
pub fn git_tls_credentials(namespace: &str, certificate: String, host: Option<String>) -> ConfigMap {
    let mut labels = user_settings();
    labels.insert(GIT_TLS_LABEL.into(), "true".into());
    labels.insert(WATCH_CONFIGMAP_LABEL.into(), "true".into());

    let mut data = BTreeMap::from([("certificate".to_string(), certificate)]);
    if let Some(host) = host {
        data.insert("host".to_string(), host);
    }

    let resource = ConfigMap {
        metadata: ObjectMeta {
            name: Some(GIT_TLS_CONFIGMAP.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    tracing::debug!("The configmap resource:\n {:?}\n", to_string(&resource));

    resource
}

/// Reads the data of a ConfigMap, `None` when the ConfigMap is missing.
pub async fn data(client: &dyn KubeClient, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>> {
    let found = client::get::<ConfigMap>(client, Some(namespace), name).await?;
    Ok(found.map(|cm| cm.data.unwrap_or_default()))
}
