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

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The subset of the `CheCluster` custom resource that drives the
/// propagation of workspace configuration into user namespaces.
#[derive(CustomResource, Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(group = "org.eclipse.che", version = "v2", kind = "CheCluster", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct CheClusterSpec {
    /// Development environment default configuration options.
    #[serde(default)]
    pub dev_environments: DevEnvironments,
    /// Che components configuration.
    #[serde(default)]
    pub components: Components,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevEnvironments {
    /// The node selector limits the nodes that can run the workspace pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    /// The pod tolerations of the workspace pods limit where the workspace pods can run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    /// Idle timeout for workspaces in seconds, `-1` disables idling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_of_inactivity_before_idling: Option<i32>,
    /// Run timeout for workspaces in seconds, `-1` disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_of_run_before_idling: Option<i32>,
    /// Trusted certificate settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_certs: Option<TrustedCerts>,
    /// Download URLs for editors, keyed by the editor id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editors_download_urls: Vec<EditorDownloadUrl>,
    /// Disables the container build capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_container_build_capabilities: Option<bool>,
    /// Container build configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_build_configuration: Option<ContainerConfiguration>,
    /// Disables the container run capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_container_run_capabilities: Option<bool>,
    /// Container run configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_run_configuration: Option<ContainerConfiguration>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustedCerts {
    /// The ConfigMap that contains the certificate to propagate to the git config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_trusted_certs_config_map_name: Option<String>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct EditorDownloadUrl {
    /// The editor id, e.g. `che-incubator/che-code/latest`.
    pub editor: String,
    /// The download URL.
    pub url: String,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfiguration {
    /// OpenShift security context constraint granted to the workspace user.
    #[serde(rename = "openShiftSecurityContextConstraint", skip_serializing_if = "Option::is_none")]
    pub openshift_security_context_constraint: Option<String>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default)]
    pub che_server: CheServer,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct CheServer {
    /// Proxy server settings for Kubernetes cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    /// URL (protocol+hostname) of the proxy server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Proxy server port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// A list of hosts that can be reached directly, bypassing the proxy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_proxy_hosts: Vec<String>,
}

/// A capability granted to workspace users through an OpenShift
/// security context constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    ContainerBuild,
    ContainerRun,
}

impl Capability {
    pub fn all() -> [Capability; 2] {
        [Capability::ContainerBuild, Capability::ContainerRun]
    }

    /// The short name used for derived resource names, e.g. `container-build`.
    pub fn id(&self) -> &'static str {
        match self {
            Capability::ContainerBuild => "container-build",
            Capability::ContainerRun => "container-run",
        }
    }
}

impl CheCluster {
    /// Capabilities are opt-in: they count as enabled only when
    /// explicitly turned on (the `disable*` flag set to `false`).
    pub fn is_enabled(&self, capability: Capability) -> bool {
        let dev = &self.spec.dev_environments;
        let disabled = match capability {
            Capability::ContainerBuild => dev.disable_container_build_capabilities,
            Capability::ContainerRun => dev.disable_container_run_capabilities,
        };
        disabled == Some(false)
    }

    /// The security context constraint configured for a capability, if any.
    pub fn security_context_constraint(&self, capability: Capability) -> Option<&str> {
        let dev = &self.spec.dev_environments;
        let configuration = match capability {
            Capability::ContainerBuild => dev.container_build_configuration.as_ref(),
            Capability::ContainerRun => dev.container_run_configuration.as_ref(),
        };
        configuration
            .and_then(|c| c.openshift_security_context_constraint.as_deref())
            .filter(|scc| !scc.is_empty())
    }

    pub fn git_trusted_certs_config_map_name(&self) -> Option<&str> {
        self.spec
            .dev_environments
            .trusted_certs
            .as_ref()
            .and_then(|t| t.git_trusted_certs_config_map_name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checluster(build: Option<bool>, run: Option<bool>) -> CheCluster {
        let mut spec = CheClusterSpec::default();
        spec.dev_environments.disable_container_build_capabilities = build;
        spec.dev_environments.disable_container_run_capabilities = run;
        CheCluster::new("eclipse-che", spec)
    }

    #[test]
    fn test_capabilities_are_opt_in() {
        let che = checluster(None, None);
        assert!(!che.is_enabled(Capability::ContainerBuild));
        assert!(!che.is_enabled(Capability::ContainerRun));

        let che = checluster(Some(false), Some(true));
        assert!(che.is_enabled(Capability::ContainerBuild));
        assert!(!che.is_enabled(Capability::ContainerRun));
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let mut che = checluster(None, None);
        che.spec.dev_environments.trusted_certs =
            Some(TrustedCerts { git_trusted_certs_config_map_name: Some("".into()) });
        che.spec.dev_environments.container_build_configuration =
            Some(ContainerConfiguration { openshift_security_context_constraint: Some("".into()) });

        assert_eq!(che.git_trusted_certs_config_map_name(), None);
        assert_eq!(che.security_context_constraint(Capability::ContainerBuild), None);
    }

    #[test]
    fn test_deserialize_spec() {
        let spec: CheClusterSpec = serde_json::from_value(serde_json::json!({
            "devEnvironments": {
                "nodeSelector": {"disk": "ssd"},
                "secondsOfInactivityBeforeIdling": 1800,
                "editorsDownloadUrls": [{"editor": "che-incubator/che-code/latest", "url": "https://example.com"}],
                "containerBuildConfiguration": {"openShiftSecurityContextConstraint": "container-build"}
            },
            "components": {"cheServer": {"proxy": {"url": "http://proxy", "port": "3128"}}}
        }))
        .unwrap();

        assert_eq!(spec.dev_environments.seconds_of_inactivity_before_idling, Some(1800));
        assert_eq!(spec.dev_environments.editors_download_urls.len(), 1);
        assert_eq!(
            spec.dev_environments.container_build_configuration.unwrap().openshift_security_context_constraint,
            Some("container-build".into())
        );
        assert_eq!(spec.components.che_server.proxy.unwrap().port, Some("3128".into()));
    }
}
