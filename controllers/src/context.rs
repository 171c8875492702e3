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

use std::sync::Arc;

use che_crds::CheCluster;
use che_resources::client::{Cluster, KubeClient};
use kube::runtime::reflector::Store;
use kube::Client;
use tracing::info;

use crate::config::{Config, Infrastructure};
use crate::event_router::EventRouter;
use crate::namespace_cache::NamespaceCache;

/// The core type through which the controllers access common state.
pub struct Context {
    pub k8s: Client,
    pub client: Arc<dyn KubeClient>,
    pub namespaces: Arc<NamespaceCache>,
    pub router: Arc<EventRouter>,
    pub config: Config,
    pub openshift: bool,
}

impl Context {
    /// `checlusters` is the reader side of the store the `CheCluster`
    /// watch writes to.
    pub async fn new(config: Config, checlusters: Store<CheCluster>) -> anyhow::Result<Context> {
        let k8s = Client::try_default().await?;
        let openshift = match config.infrastructure {
            Infrastructure::Auto => is_openshift(&k8s).await?,
            Infrastructure::Kubernetes => false,
            Infrastructure::Openshift => true,
        };
        info!("Running on {}", if openshift { "OpenShift" } else { "Kubernetes" });

        let client: Arc<dyn KubeClient> = Arc::new(Cluster::new(k8s.clone()));
        let namespaces = Arc::new(NamespaceCache::new(client.clone(), openshift));
        let router = Arc::new(EventRouter::new(namespaces.clone(), checlusters));

        Ok(Context { k8s, client, namespaces, router, config, openshift })
    }
}

async fn is_openshift(client: &Client) -> kube::Result<bool> {
    let groups = client.list_api_groups().await?;
    Ok(groups.groups.iter().any(|group| group.name == "project.openshift.io"))
}
