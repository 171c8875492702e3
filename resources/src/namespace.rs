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

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::{self, KubeClient};
use crate::error::Result;

/// Sets (`Some`) or removes (`None`) annotations on a namespace, writing
/// only when something changes. A missing namespace is left alone.
pub async fn annotate(client: &dyn KubeClient, name: &str, changes: &BTreeMap<&str, Option<String>>) -> Result<()> {
    let Some(mut namespace) = client::get::<Namespace>(client, None, name).await? else {
        debug!("The namespace {} is gone, skip annotating", name);
        return Ok(());
    };

    let annotations = namespace.annotations_mut();
    let mut changed = false;
    for (key, value) in changes {
        changed |= match value {
            Some(value) => annotations.insert(key.to_string(), value.clone()).as_ref() != Some(value),
            None => annotations.remove(*key).is_some(),
        };
    }

    if changed {
        client::update(client, &namespace).await?;
        info!("Updated annotations of namespace {}", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;

    use super::*;
    use crate::testing::FakeCluster;

    fn namespace(annotations: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("user-che".into()),
                annotations: Some(annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_annotate_sets_and_removes() {
        let cluster = FakeCluster::new();
        cluster.apply(&namespace(&[("old", "value"), ("user", "kept")]));

        let changes = BTreeMap::from([("old", None), ("new", Some("value".to_string()))]);
        annotate(&cluster, "user-che", &changes).await.unwrap();

        let ns = cluster.fetch::<Namespace>(None, "user-che").unwrap();
        let annotations = ns.metadata.annotations.unwrap();
        assert_eq!(annotations.get("new").map(String::as_str), Some("value"));
        assert_eq!(annotations.get("user").map(String::as_str), Some("kept"));
        assert!(!annotations.contains_key("old"));
    }

    #[tokio::test]
    async fn test_annotate_without_changes_does_not_write() {
        let cluster = FakeCluster::new();
        let before = cluster.apply(&namespace(&[("new", "value")]));

        let changes = BTreeMap::from([("new", Some("value".to_string())), ("absent", None)]);
        annotate(&cluster, "user-che", &changes).await.unwrap();

        let after = cluster.fetch::<Namespace>(None, "user-che").unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }
}
