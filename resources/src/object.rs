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

//! Create-or-update and delete of whole objects.

use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::client::{from_dynamic, gvk, to_dynamic, KubeClient};
use crate::diff::differs;
use crate::error::Result;

/// Makes the cluster hold `resource`: creates it when missing, updates it
/// when [`differs`] reports a change. Labels and annotations added to the
/// existing object by users are kept.
pub async fn sync<K>(client: &dyn KubeClient, resource: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let gvk = gvk::<K>();
    let name = resource.name_any();
    let namespace = resource.namespace();
    let candidate = to_dynamic(resource)?;

    let found = client.get(&gvk, namespace.as_deref(), &name).await?;
    let ns = namespace.as_deref().unwrap_or_default();

    let object = match found {
        None => {
            let created = client.create(&gvk, &candidate).await?;
            info!("Created {} {}/{}", gvk.kind, ns, name);
            created
        }
        Some(existing) if differs(&candidate, &existing) => {
            let updated = client.update(&gvk, &merge(candidate, &existing)).await?;
            info!("Updated {} {}/{}", gvk.kind, ns, name);
            updated
        }
        Some(existing) => {
            debug!("The {} {}/{} is already up-to-date", gvk.kind, ns, name);
            existing
        }
    };

    from_dynamic(object)
}

/// Prepares `candidate` to replace `existing`: the labels and annotations
/// of both are united (candidate values win) and the resource version of
/// `existing` is carried over.
pub fn merge(mut candidate: DynamicObject, existing: &DynamicObject) -> DynamicObject {
    let mut labels = existing.labels().clone();
    labels.extend(candidate.labels().clone());
    *candidate.labels_mut() = labels;

    let mut annotations = existing.annotations().clone();
    annotations.extend(candidate.annotations().clone());
    *candidate.annotations_mut() = annotations;

    candidate.metadata.resource_version = existing.metadata.resource_version.clone();
    candidate
}

/// Deletes an object, a missing object is not an error.
pub async fn delete<K>(client: &dyn KubeClient, namespace: Option<&str>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let gvk = gvk::<K>();
    if client.delete(&gvk, namespace, name).await? {
        info!("Deleted {} {}/{}", gvk.kind, namespace.unwrap_or_default(), name);
    }
    Ok(())
}
