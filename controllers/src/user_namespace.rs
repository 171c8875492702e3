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

//! Converges the objects every workspace namespace derives from the
//! managing `CheCluster` and its control namespace.

use std::collections::BTreeMap;

use che_crds::checluster::Capability;
use che_crds::CheCluster;
use che_resources::client::KubeClient;
use che_resources::config_map::{
    self, GIT_TLS_CONFIGMAP, LEGACY_SETTINGS_CONFIGMAPS, TRUSTED_CA_CERTS_CONFIGMAP, USER_SETTINGS_CONFIGMAP,
};
use che_resources::error::Error as ResourceError;
use che_resources::labels::{NODE_SELECTOR_ANNOTATION, POD_TOLERATIONS_ANNOTATION, SELF_SIGNED_CERTIFICATE_SECRET};
use che_resources::proxy::{self, Proxy};
use che_resources::secret::{self, CA_CERT_KEY, SERVER_CERT_SECRET};
use che_resources::{finalizer, object, role_binding};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};

const GIT_HOST_KEY: &str = "githost";

/// Converges the derived objects of `namespace`. Every step runs even when
/// the user is unknown, which is reported once all of them are done.
pub async fn reconcile(
    client: &dyn KubeClient,
    checluster: &CheCluster,
    namespace: &str,
    username: &str,
    openshift: bool,
) -> Result<()> {
    info!("Reconciling derived objects of namespace {}", namespace);

    sync_server_cert(client, checluster, namespace).await?;
    delete_trusted_ca_certs(client, checluster, namespace).await?;
    sync_user_settings(client, checluster, namespace, openshift).await?;
    sync_git_tls_credentials(client, checluster, namespace).await?;
    sync_namespace_annotations(client, checluster, namespace).await?;

    if openshift {
        sync_capabilities(client, checluster, namespace, username).await?;
    }

    Ok(())
}

/// The name an object had when derived objects were prefixed by their
/// installation, e.g. `eclipse-che-eclipse-che-server-cert`.
fn legacy_name(checluster: &CheCluster, name: &str) -> String {
    format!(
        "{}-{}-{}",
        checluster.name_any(),
        checluster.namespace().unwrap_or_default(),
        name.trim_start_matches("che-")
    )
}

async fn sync_server_cert(client: &dyn KubeClient, checluster: &CheCluster, namespace: &str) -> Result<()> {
    object::delete::<Secret>(client, Some(namespace), &legacy_name(checluster, SERVER_CERT_SECRET)).await?;

    let control = checluster.namespace().unwrap_or_default();
    match secret::entry(client, &control, SELF_SIGNED_CERTIFICATE_SECRET, CA_CERT_KEY).await? {
        Some(ca_crt) => {
            object::sync(client, &secret::server_cert(namespace, ca_crt)).await?;
        }
        None => object::delete::<Secret>(client, Some(namespace), SERVER_CERT_SECRET).await?,
    }

    Ok(())
}

async fn delete_trusted_ca_certs(client: &dyn KubeClient, checluster: &CheCluster, namespace: &str) -> Result<()> {
    object::delete::<ConfigMap>(client, Some(namespace), &legacy_name(checluster, TRUSTED_CA_CERTS_CONFIGMAP)).await?;
    object::delete::<ConfigMap>(client, Some(namespace), TRUSTED_CA_CERTS_CONFIGMAP).await?;
    Ok(())
}

async fn sync_user_settings(
    client: &dyn KubeClient,
    checluster: &CheCluster,
    namespace: &str,
    openshift: bool,
) -> Result<()> {
    for name in LEGACY_SETTINGS_CONFIGMAPS {
        object::delete::<ConfigMap>(client, Some(namespace), name).await?;
    }
    let legacy = legacy_name(checluster, "che-proxy-settings");
    object::delete::<ConfigMap>(client, Some(namespace), &legacy).await?;

    let proxy = proxy::read(client, checluster, openshift).await?;
    let data = user_settings(checluster, proxy.as_ref());

    if data.is_empty() {
        debug!("No user settings configured for namespace {}", namespace);
        object::delete::<ConfigMap>(client, Some(namespace), USER_SETTINGS_CONFIGMAP).await?;
    } else {
        object::sync(client, &config_map::user_settings_env(namespace, data)).await?;
    }

    Ok(())
}

/// The environment variables exposed to workspaces.
fn user_settings(checluster: &CheCluster, proxy: Option<&Proxy>) -> BTreeMap<String, String> {
    let dev = &checluster.spec.dev_environments;
    let mut data = BTreeMap::new();

    for download in &dev.editors_download_urls {
        let editor = download.editor.to_uppercase().replace(|c: char| c == '-' || c == '/', "_");
        data.insert(format!("EDITOR_DOWNLOAD_URL_{}", editor), download.url.clone());
    }

    if let Some(seconds) = dev.seconds_of_inactivity_before_idling {
        data.insert("SECONDS_OF_DW_INACTIVITY_BEFORE_IDLING".to_string(), seconds.to_string());
    }
    if let Some(seconds) = dev.seconds_of_run_before_idling {
        data.insert("SECONDS_OF_DW_RUN_BEFORE_IDLING".to_string(), seconds.to_string());
    }

    if let Some(proxy) = proxy {
        for (key, value) in [
            ("HTTP_PROXY", &proxy.http_proxy),
            ("HTTPS_PROXY", &proxy.https_proxy),
            ("NO_PROXY", &proxy.no_proxy),
        ] {
            if !value.is_empty() {
                data.insert(key.to_string(), value.clone());
                data.insert(key.to_lowercase(), value.clone());
            }
        }
    }

    data
}

async fn sync_git_tls_credentials(client: &dyn KubeClient, checluster: &CheCluster, namespace: &str) -> Result<()> {
    object::delete::<ConfigMap>(client, Some(namespace), &legacy_name(checluster, GIT_TLS_CONFIGMAP)).await?;

    let control = checluster.namespace().unwrap_or_default();
    let source = match checluster.git_trusted_certs_config_map_name() {
        Some(name) => config_map::data(client, &control, name).await?,
        None => None,
    };

    let credentials = source.and_then(|mut data| {
        let certificate = data.remove(CA_CERT_KEY).filter(|cert| !cert.is_empty())?;
        Some((certificate, data.remove(GIT_HOST_KEY)))
    });

    match credentials {
        Some((certificate, host)) => {
            object::sync(client, &config_map::git_tls_credentials(namespace, certificate, host)).await?;
        }
        None => object::delete::<ConfigMap>(client, Some(namespace), GIT_TLS_CONFIGMAP).await?,
    }

    Ok(())
}

async fn sync_namespace_annotations(client: &dyn KubeClient, checluster: &CheCluster, namespace: &str) -> Result<()> {
    let dev = &checluster.spec.dev_environments;

    let node_selector = match dev.node_selector.as_ref().filter(|s| !s.is_empty()) {
        Some(selector) => Some(serde_json::to_string(selector).map_err(ResourceError::SerializationError)?),
        None => None,
    };
    let tolerations = match dev.tolerations.as_ref().filter(|t| !t.is_empty()) {
        Some(tolerations) => Some(serde_json::to_string(tolerations).map_err(ResourceError::SerializationError)?),
        None => None,
    };

    let changes = BTreeMap::from([(NODE_SELECTOR_ANNOTATION, node_selector), (POD_TOLERATIONS_ANNOTATION, tolerations)]);
    che_resources::namespace::annotate(client, namespace, &changes).await?;

    Ok(())
}

/// The RoleBinding (and ClusterRole) granting a capability's security
/// context constraint to the workspace user.
fn capability_role_binding(capability: Capability) -> String {
    format!("che-user-{}", capability.id())
}

fn capability_finalizer(capability: Capability) -> String {
    format!("{}.finalizers.che.eclipse.org", capability.id())
}

async fn sync_capabilities(
    client: &dyn KubeClient,
    checluster: &CheCluster,
    namespace: &str,
    username: &str,
) -> Result<()> {
    let mut unknown_user = false;

    for capability in Capability::all() {
        let name = capability_role_binding(capability);
        let finalizer = capability_finalizer(capability);

        if !checluster.is_enabled(capability) {
            object::delete::<RoleBinding>(client, Some(namespace), &name).await?;
            finalizer::remove(client, checluster, &finalizer).await?;
            continue;
        }

        if checluster.security_context_constraint(capability).is_none() {
            warn!("The {} capability has no security context constraint configured, skip it", capability.id());
            continue;
        }

        if username.is_empty() {
            error!("Unknown user of namespace {}, can't grant the {} capability", namespace, capability.id());
            object::delete::<RoleBinding>(client, Some(namespace), &name).await?;
            unknown_user = true;
            continue;
        }

        object::sync(client, &role_binding::for_user(namespace, &name, username)).await?;
        finalizer::append(client, checluster, &finalizer).await?;
    }

    if unknown_user {
        return Err(Error::UnknownUser(namespace.to_string()));
    }

    Ok(())
}

/// Removes the capability RoleBindings of `namespace`.
pub async fn revoke_capabilities(client: &dyn KubeClient, namespace: &str) -> Result<()> {
    for capability in Capability::all() {
        object::delete::<RoleBinding>(client, Some(namespace), &capability_role_binding(capability)).await?;
    }
    Ok(())
}

/// Drops the capability finalizers, letting a deleted `CheCluster` go.
pub async fn release_capabilities(client: &dyn KubeClient, checluster: &CheCluster) -> Result<()> {
    for capability in Capability::all() {
        finalizer::remove(client, checluster, &capability_finalizer(capability)).await?;
    }
    Ok(())
}
