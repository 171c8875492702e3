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

//! Appends and removes finalizers on a `CheCluster` by name.
//!
//! The `CheCluster` travels as a [`DynamicObject`](kube::core::DynamicObject)
//! so the fields the typed resource doesn't model are written back as read.

use che_crds::CheCluster;
use kube::ResourceExt;
use tracing::info;

use crate::client::{gvk, KubeClient};
use crate::error::Result;

pub async fn append(client: &dyn KubeClient, checluster: &CheCluster, finalizer: &str) -> Result<()> {
    let kind = gvk::<CheCluster>();
    let namespace = checluster.namespace();
    let Some(mut current) = client.get(&kind, namespace.as_deref(), &checluster.name_any()).await? else {
        return Ok(());
    };

    if current.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }

    current.finalizers_mut().push(finalizer.to_string());
    client.update(&kind, &current).await?;
    info!("Added finalizer {} to CheCluster {}", finalizer, current.name_any());

    Ok(())
}

pub async fn remove(client: &dyn KubeClient, checluster: &CheCluster, finalizer: &str) -> Result<()> {
    let kind = gvk::<CheCluster>();
    let namespace = checluster.namespace();
    let Some(mut current) = client.get(&kind, namespace.as_deref(), &checluster.name_any()).await? else {
        return Ok(());
    };

    let before = current.finalizers().len();
    current.finalizers_mut().retain(|f| f != finalizer);
    if current.finalizers().len() == before {
        return Ok(());
    }

    client.update(&kind, &current).await?;
    info!("Removed finalizer {} from CheCluster {}", finalizer, current.name_any());

    Ok(())
}
