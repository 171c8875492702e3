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

//! Resolves the proxy settings workspaces should use.

use std::collections::HashSet;

use che_crds::CheCluster;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::debug;

use crate::client::KubeClient;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Proxy {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

/// Reads the proxy configuration for `checluster`, on OpenShift combined
/// with the cluster-wide proxy object. Returns `None` when no proxy is set.
pub async fn read(client: &dyn KubeClient, checluster: &CheCluster, openshift: bool) -> Result<Option<Proxy>> {
    let cluster_proxy = if openshift {
        let gvk = GroupVersionKind::gvk("config.openshift.io", "v1", "Proxy");
        match client.get(&gvk, None, "cluster").await {
            Ok(object) => object,
            Err(Error::UnknownKind(kind)) => {
                debug!("The cluster proxy kind {} is not served", kind);
                None
            }
            Err(err) => return Err(err),
        }
    } else {
        None
    };

    Ok(resolve(checluster, cluster_proxy.as_ref()))
}

/// Values configured in the `CheCluster` win over the cluster-wide ones,
/// the no-proxy lists of both are merged.
pub fn resolve(checluster: &CheCluster, cluster_proxy: Option<&DynamicObject>) -> Option<Proxy> {
    let mut proxy = Proxy::default();
    let mut no_proxy: Vec<String> = vec![];

    if let Some(status) = cluster_proxy.and_then(|p| p.data.get("status")) {
        let field = |name: &str| status.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        proxy.http_proxy = field("httpProxy");
        proxy.https_proxy = field("httpsProxy");
        no_proxy.extend(field("noProxy").split(',').map(str::trim).filter(|h| !h.is_empty()).map(String::from));
    }

    if let Some(che) = &checluster.spec.components.che_server.proxy {
        if let Some(url) = che.url.as_deref().filter(|url| !url.is_empty()) {
            let url = match che.port.as_deref().filter(|port| !port.is_empty()) {
                Some(port) => format!("{}:{}", url.trim_end_matches('/'), port),
                None => url.to_string(),
            };
            proxy.http_proxy = url.clone();
            proxy.https_proxy = url;
        }
        no_proxy.extend(che.non_proxy_hosts.iter().filter(|h| !h.is_empty()).cloned());
    }

    let mut seen = HashSet::new();
    no_proxy.retain(|host| seen.insert(host.clone()));
    proxy.no_proxy = no_proxy.join(",");

    if proxy == Proxy::default() {
        None
    } else {
        Some(proxy)
    }
}
