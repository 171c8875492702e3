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

//! Propagates the objects labeled as workspaces configuration in the
//! control namespace into a workspace namespace.

use che_crds::CheCluster;
use che_resources::client::{gvk, KubeClient};
use che_resources::config_map::{GIT_TLS_CONFIGMAP, TRUSTED_CA_CERTS_CONFIGMAP, USER_SETTINGS_CONFIGMAP};
use che_resources::diff::includes;
use che_resources::error::Error as ResourceError;
use che_resources::labels::{workspaces_config_selector, SYNC_RECORD_CONFIGMAP};
use che_resources::object::merge;
use che_resources::secret::SERVER_CERT_SECRET;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use self::adapters::{ConfigMapSource, PersistentVolumeClaimSource, SecretSource, Syncable};
use self::sync_record::{key, parse_key, retarget, SyncRecord};
use self::template::template_kind;
use crate::errors::Result;

pub mod adapters;
pub mod sync_record;
pub mod template;

/// Syncs the workspaces configuration into `namespace`.
///
/// The sync record is written back whatever the outcome, so the progress
/// made before a failure is kept.
pub async fn sync(
    client: &dyn KubeClient,
    checluster: &CheCluster,
    namespace: &str,
    username: &str,
    openshift: bool,
) -> Result<()> {
    let control = checluster.namespace().unwrap_or_default();
    if namespace == control {
        debug!("Skip syncing workspaces config into the control namespace {}", namespace);
        return Ok(());
    }

    let mut record = SyncRecord::load(client, namespace).await?;
    let synchronizer = Synchronizer { client, control: &control, namespace, username, openshift };
    let result = synchronizer.run(&mut record).await;

    if let Err(err) = record.save(client, namespace).await {
        error!("Failed to save the sync record of namespace {}: {}", namespace, err);
    }

    result
}

struct Synchronizer<'a> {
    client: &'a dyn KubeClient,
    control: &'a str,
    namespace: &'a str,
    username: &'a str,
    openshift: bool,
}

impl Synchronizer<'_> {
    async fn run(&self, record: &mut SyncRecord) -> Result<()> {
        let (sources, complete) = self.sources().await?;

        for source in &sources {
            let kind = source.source_kind();
            let name = source.source_object().name_any();
            if is_reserved(kind, &name) {
                warn!("The {} {} is managed by the operator itself, skip syncing it", kind.kind, name);
                continue;
            }
            self.sync_object(source.as_ref(), record).await?;
        }

        if complete {
            self.delete_obsolete(record).await?;
        } else {
            warn!("Not all templates could be rendered, keep the objects of namespace {}", self.namespace);
        }

        Ok(())
    }

    /// Lists the sources of every kind. The flag is unset when a template
    /// could not be rendered, its objects are unknown in that case.
    async fn sources(&self) -> Result<(Vec<Box<dyn Syncable>>, bool)> {
        let selector = workspaces_config_selector();
        let mut sources: Vec<Box<dyn Syncable>> = vec![];

        for object in self.list(&gvk::<ConfigMap>(), &selector).await? {
            sources.push(Box::new(ConfigMapSource::new(object)));
        }
        for object in self.list(&gvk::<Secret>(), &selector).await? {
            sources.push(Box::new(SecretSource::new(object)));
        }
        for object in self.list(&gvk::<PersistentVolumeClaim>(), &selector).await? {
            sources.push(Box::new(PersistentVolumeClaimSource::new(object)));
        }

        let mut complete = true;
        if self.openshift {
            let templates = match self.list(&template_kind(), &selector).await {
                Ok(templates) => templates,
                Err(ResourceError::UnknownKind(kind)) => {
                    warn!("The {} kind is not served, skip templates", kind);
                    vec![]
                }
                Err(err) => return Err(err.into()),
            };

            for template in templates {
                match template::expand(&template, self.namespace, self.username) {
                    Ok(objects) => {
                        for object in objects {
                            sources.push(Box::new(object));
                        }
                    }
                    Err(err) => {
                        error!("Failed to render template {}: {}", template.name_any(), err);
                        complete = false;
                    }
                }
            }
        }

        Ok((sources, complete))
    }

    async fn list(&self, kind: &GroupVersionKind, selector: &str) -> Result<Vec<DynamicObject>, ResourceError> {
        self.client.list(kind, Some(self.control), Some(selector)).await
    }

    async fn sync_object(&self, source: &dyn Syncable, record: &mut SyncRecord) -> Result<()> {
        let kind = source.source_kind();
        let name = source.source_object().name_any();
        let src_key = key(kind, &name, self.control);
        let dst_key = key(kind, &name, self.namespace);
        let src_version = source.source_version();
        let candidate = source.build_target(self.namespace);

        let existing = match self.client.get(kind, Some(self.namespace), &name).await {
            Ok(existing) => existing,
            Err(ResourceError::UnknownKind(unknown)) => {
                warn!("The {} kind is not served, skip syncing {}", unknown, name);
                record.mark_synced(&src_key);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match existing {
            None => {
                let created = self.client.create(kind, &candidate).await?;
                info!("Created {} {}/{}", kind.kind, self.namespace, name);
                record.record(&src_key, &src_version);
                record.record(&dst_key, &created.resource_version().unwrap_or_default());
            }
            Some(existing) => {
                let source_changed = record.version(&src_key) != Some(src_version.as_str());
                let target_changed = record.version(&dst_key) != existing.resource_version().as_deref();

                if source_changed || target_changed {
                    let current = if source.is_read_only_spec() {
                        if source_changed {
                            info!(
                                "The spec of {} {}/{} can't be updated, delete it to apply the changes",
                                kind.kind, self.namespace, name
                            );
                        }
                        self.sync_metadata(kind, &candidate, existing).await?
                    } else if source.differs_from(&candidate, &existing) {
                        let updated = self.client.update(kind, &merge(candidate, &existing)).await?;
                        info!("Updated {} {}/{}", kind.kind, self.namespace, name);
                        updated
                    } else {
                        debug!("The {} {}/{} is already up-to-date", kind.kind, self.namespace, name);
                        existing
                    };

                    record.record(&src_key, &src_version);
                    record.record(&dst_key, &current.resource_version().unwrap_or_default());
                }
            }
        }

        record.mark_synced(&src_key);
        Ok(())
    }

    /// Brings in missing labels and annotations, leaving the spec alone.
    async fn sync_metadata(
        &self,
        kind: &GroupVersionKind,
        candidate: &DynamicObject,
        existing: DynamicObject,
    ) -> Result<DynamicObject> {
        if includes(candidate.labels(), existing.labels()) && includes(candidate.annotations(), existing.annotations()) {
            return Ok(existing);
        }

        let mut updated = existing;
        updated.labels_mut().extend(candidate.labels().clone());
        updated.annotations_mut().extend(candidate.annotations().clone());

        let updated = self.client.update(kind, &updated).await?;
        info!("Updated metadata of {} {}/{}", kind.kind, self.namespace, updated.name_any());
        Ok(updated)
    }

    /// Deletes the targets whose source is gone and forgets the pair.
    async fn delete_obsolete(&self, record: &mut SyncRecord) -> Result<()> {
        for src_key in record.obsolete(self.control) {
            if let Some(dst_key) = retarget(&src_key, self.namespace) {
                record.forget(&dst_key);
            }
            record.forget(&src_key);

            let Some((kind, name, _)) = parse_key(&src_key) else {
                warn!("Dropped the malformed sync record key {}", src_key);
                continue;
            };
            if is_reserved(&kind, &name) {
                continue;
            }

            match self.client.delete(&kind, Some(self.namespace), &name).await {
                Ok(true) => info!("Deleted obsolete {} {}/{}", kind.kind, self.namespace, name),
                Ok(false) => debug!("The obsolete {} {}/{} is already gone", kind.kind, self.namespace, name),
                Err(ResourceError::UnknownKind(unknown)) => {
                    warn!("The {} kind is not served, can't delete {}", unknown, name)
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

/// Names owned by the derived objects and the sync record.
fn is_reserved(kind: &GroupVersionKind, name: &str) -> bool {
    if *kind == gvk::<Secret>() {
        name == SERVER_CERT_SECRET
    } else if *kind == gvk::<ConfigMap>() {
        [USER_SETTINGS_CONFIGMAP, TRUSTED_CA_CERTS_CONFIGMAP, GIT_TLS_CONFIGMAP, SYNC_RECORD_CONFIGMAP].contains(&name)
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use che_crds::CheClusterSpec;
    use che_resources::labels::{COMPONENT_LABEL, MOUNT_TO_DEVWORKSPACE_LABEL, WATCH_CONFIGMAP_LABEL, WATCH_SECRET_LABEL};
    use che_resources::testing::FakeCluster;
    use k8s_openapi::api::core::v1::LimitRange;
    use kube::core::ApiResource;
    use serde_json::json;

    use super::*;
    use crate::testing::{
        self, config_map, secret, workspaces_config_labels, CONTROL_NAMESPACE, USERNAME, USER_NAMESPACE,
    };

    const NAME: &str = "che-workspaces-config";
    const SOURCE_KEY: &str = "v1_ConfigMap.che-workspaces-config.eclipse-che";
    const TARGET_KEY: &str = "v1_ConfigMap.che-workspaces-config.user-che";

    fn setup() -> Arc<FakeCluster> {
        let cluster = testing::cluster(CheClusterSpec::default());
        cluster.apply(&config_map(CONTROL_NAMESPACE, NAME, &workspaces_config_labels(), &[("a", "b")]));
        cluster
    }

    async fn run(cluster: &Arc<FakeCluster>, openshift: bool) {
        let che = cluster.fetch::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che").unwrap();
        sync(cluster.as_ref(), &che, USER_NAMESPACE, USERNAME, openshift).await.unwrap();
    }

    fn target(cluster: &FakeCluster) -> Option<ConfigMap> {
        cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), NAME)
    }

    fn record(cluster: &FakeCluster) -> BTreeMap<String, String> {
        cluster
            .fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP)
            .and_then(|cm| cm.data)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_and_propagate_config_map() {
        let cluster = setup();

        run(&cluster, false).await;

        let target = target(&cluster).unwrap();
        assert_eq!(target.data, Some(BTreeMap::from([("a".to_string(), "b".to_string())])));
        let labels = target.labels();
        assert_eq!(labels["app.kubernetes.io/component"], "workspaces-config");
        assert_eq!(labels["app.kubernetes.io/part-of"], "che.eclipse.org");
        assert_eq!(labels[WATCH_CONFIGMAP_LABEL], "true");
        assert_eq!(labels[MOUNT_TO_DEVWORKSPACE_LABEL], "true");

        let record = record(&cluster);
        assert_eq!(record.len(), 2);
        assert_eq!(record[TARGET_KEY], target.resource_version().unwrap());
        assert!(record.contains_key(SOURCE_KEY));
    }

    #[tokio::test]
    async fn test_revert_config_map_data() {
        let cluster = setup();
        run(&cluster, false).await;

        let mut tampered = target(&cluster).unwrap();
        tampered.data = Some(BTreeMap::from([("a".to_string(), "new-c".to_string())]));
        cluster.apply(&tampered);

        run(&cluster, false).await;

        assert_eq!(target(&cluster).unwrap().data.unwrap()["a"], "b");
    }

    #[tokio::test]
    async fn test_preserve_user_labels_and_annotations() {
        let cluster = setup();
        run(&cluster, false).await;

        let mut tampered = target(&cluster).unwrap();
        tampered.labels_mut().insert("new-label".into(), "new-test".into());
        tampered.annotations_mut().insert("new-annotation".into(), "new-test".into());
        tampered.data = Some(BTreeMap::from([("a".to_string(), "new-c".to_string())]));
        cluster.apply(&tampered);

        run(&cluster, false).await;

        let target = target(&cluster).unwrap();
        assert_eq!(target.labels()["new-label"], "new-test");
        assert_eq!(target.annotations()["new-annotation"], "new-test");
        assert_eq!(target.labels()[WATCH_CONFIGMAP_LABEL], "true");
        assert_eq!(target.data.unwrap()["a"], "b");
    }

    #[tokio::test]
    async fn test_delete_source_cascades() {
        let cluster = setup();
        run(&cluster, false).await;

        cluster.remove::<ConfigMap>(Some(CONTROL_NAMESPACE), NAME);
        run(&cluster, false).await;

        assert!(target(&cluster).is_none());
        assert!(record(&cluster).is_empty());
    }

    fn limits_template() -> DynamicObject {
        let mut template = DynamicObject::new("limits", &ApiResource::from_gvk(&template_kind()))
            .within(CONTROL_NAMESPACE)
            .data(json!({
                "objects": [{
                    "apiVersion": "v1",
                    "kind": "LimitRange",
                    "metadata": {
                        "name": NAME,
                        "labels": {"user": "${PROJECT_REQUESTING_USER}", "namespace": "${PROJECT_NAME}"}
                    },
                    "spec": {"limits": [{"type": "Container", "default": {"cpu": "1"}}]}
                }]
            }));
        *template.labels_mut() = testing::map(&workspaces_config_labels());
        template
    }

    #[tokio::test]
    async fn test_template_with_limit_range() {
        let cluster = testing::cluster(CheClusterSpec::default());
        cluster.apply(&limits_template());

        run(&cluster, true).await;

        let limits = cluster.fetch::<LimitRange>(Some(USER_NAMESPACE), NAME).unwrap();
        assert_eq!(limits.labels()["user"], USERNAME);
        assert_eq!(limits.labels()["namespace"], USER_NAMESPACE);
        assert!(record(&cluster).contains_key("v1_LimitRange.che-workspaces-config.eclipse-che"));

        // Templates are only looked at on OpenShift.
        cluster.remove::<LimitRange>(Some(USER_NAMESPACE), NAME);
        run(&cluster, false).await;
        assert!(cluster.fetch::<LimitRange>(Some(USER_NAMESPACE), NAME).is_none());
    }

    #[tokio::test]
    async fn test_broken_template_keeps_rendered_objects() {
        let cluster = testing::cluster(CheClusterSpec::default());
        cluster.apply(&limits_template());
        run(&cluster, true).await;

        let mut broken = limits_template();
        broken.data["objects"] = json!({"not": "a list"});
        cluster.apply(&broken);
        run(&cluster, true).await;

        assert!(cluster.fetch::<LimitRange>(Some(USER_NAMESPACE), NAME).is_some());
        assert_eq!(record(&cluster).len(), 2);
    }

    fn claim(namespace: &str, storage: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data", "namespace": namespace, "labels": testing::map(&workspaces_config_labels())},
            "spec": {"accessModes": ["ReadWriteOnce"], "resources": {"requests": {"storage": storage}}}
        })
    }

    fn claim_storage(cluster: &FakeCluster) -> Option<String> {
        let claim = cluster.fetch_dynamic(&gvk::<PersistentVolumeClaim>(), Some(USER_NAMESPACE), "data")?;
        claim.data["spec"]["resources"]["requests"]["storage"].as_str().map(String::from)
    }

    #[tokio::test]
    async fn test_claim_spec_is_read_only() {
        let cluster = testing::cluster(CheClusterSpec::default());
        cluster.apply(&claim(CONTROL_NAMESPACE, "1Gi"));
        run(&cluster, false).await;
        assert_eq!(claim_storage(&cluster).as_deref(), Some("1Gi"));

        cluster.apply(&claim(CONTROL_NAMESPACE, "2Gi"));
        run(&cluster, false).await;
        assert_eq!(claim_storage(&cluster).as_deref(), Some("1Gi"));

        cluster.remove::<PersistentVolumeClaim>(Some(USER_NAMESPACE), "data");
        run(&cluster, false).await;
        assert_eq!(claim_storage(&cluster).as_deref(), Some("2Gi"));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let cluster = setup();
        run(&cluster, false).await;
        let first = (target(&cluster).unwrap(), cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP));

        run(&cluster, false).await;
        let second = (target(&cluster).unwrap(), cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP));

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_source_change_propagates() {
        let cluster = setup();
        run(&cluster, false).await;
        let before = record(&cluster);

        cluster.apply(&config_map(CONTROL_NAMESPACE, NAME, &workspaces_config_labels(), &[("a", "c")]));
        run(&cluster, false).await;

        assert_eq!(target(&cluster).unwrap().data.unwrap()["a"], "c");
        let after = record(&cluster);
        assert_ne!(before[SOURCE_KEY], after[SOURCE_KEY]);
        assert_ne!(before[TARGET_KEY], after[TARGET_KEY]);
    }

    #[tokio::test]
    async fn test_deleted_target_is_recreated() {
        let cluster = setup();
        run(&cluster, false).await;

        cluster.remove::<ConfigMap>(Some(USER_NAMESPACE), NAME);
        run(&cluster, false).await;

        assert!(target(&cluster).is_some());
    }

    #[tokio::test]
    async fn test_reserved_names_are_skipped() {
        let cluster = testing::cluster(CheClusterSpec::default());
        let labels = workspaces_config_labels();
        cluster.apply(&config_map(CONTROL_NAMESPACE, USER_SETTINGS_CONFIGMAP, &labels, &[("a", "b")]));
        cluster.apply(&config_map(USER_NAMESPACE, USER_SETTINGS_CONFIGMAP, &[], &[("A", "derived")]));

        run(&cluster, false).await;

        let settings = cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), USER_SETTINGS_CONFIGMAP).unwrap();
        assert_eq!(settings.data.unwrap()["A"], "derived");
        assert!(record(&cluster).is_empty());
    }

    #[tokio::test]
    async fn test_control_namespace_is_skipped() {
        let cluster = setup();
        let che = cluster.fetch::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che").unwrap();

        sync(cluster.as_ref(), &che, CONTROL_NAMESPACE, USERNAME, false).await.unwrap();

        assert!(cluster.fetch::<ConfigMap>(Some(CONTROL_NAMESPACE), SYNC_RECORD_CONFIGMAP).is_none());
    }

    #[tokio::test]
    async fn test_failed_item_keeps_synced_pairs() {
        let cluster = setup();
        cluster.apply(&secret(CONTROL_NAMESPACE, "broken", &workspaces_config_labels(), &[("a", "b")]));
        cluster.fail_on_create("broken");
        let che = cluster.fetch::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che").unwrap();

        assert!(sync(cluster.as_ref(), &che, USER_NAMESPACE, USERNAME, false).await.is_err());

        assert!(target(&cluster).is_some());
        assert!(cluster.fetch::<Secret>(Some(USER_NAMESPACE), "broken").is_none());
        let record = record(&cluster);
        assert_eq!(record.len(), 2);
        assert_eq!(record[TARGET_KEY], target(&cluster).unwrap().resource_version().unwrap());
        assert!(record.contains_key(SOURCE_KEY));
    }

    #[tokio::test]
    async fn test_secret_is_propagated_and_reverted() {
        let cluster = testing::cluster(CheClusterSpec::default());
        let source = secret(CONTROL_NAMESPACE, "git-credentials", &workspaces_config_labels(), &[("token", "s3cr3t")]);
        cluster.apply(&source);

        run(&cluster, false).await;

        let target = cluster.fetch::<Secret>(Some(USER_NAMESPACE), "git-credentials").unwrap();
        assert_eq!(target.labels()[WATCH_SECRET_LABEL], "true");
        assert_eq!(target.labels()[MOUNT_TO_DEVWORKSPACE_LABEL], "true");
        assert_eq!(target.type_.as_deref(), Some("Opaque"));
        assert_eq!(target.data.as_ref().unwrap()["token"].0, b"s3cr3t".to_vec());
        assert!(record(&cluster).contains_key("v1_Secret.git-credentials.eclipse-che"));

        let mut tampered = target;
        tampered.data = Some(BTreeMap::from([("token".to_string(), k8s_openapi::ByteString(b"leaked".to_vec()))]));
        cluster.apply(&tampered);
        run(&cluster, false).await;

        let target = cluster.fetch::<Secret>(Some(USER_NAMESPACE), "git-credentials").unwrap();
        assert_eq!(target.data.unwrap()["token"].0, b"s3cr3t".to_vec());
    }

    #[tokio::test]
    async fn test_template_config_map_gets_mount_labels() {
        let cluster = testing::cluster(CheClusterSpec::default());
        let mut template = DynamicObject::new("settings", &ApiResource::from_gvk(&template_kind()))
            .within(CONTROL_NAMESPACE)
            .data(json!({
                "objects": [{
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": NAME},
                    "data": {"namespace": "${PROJECT_NAME}"}
                }]
            }));
        *template.labels_mut() = testing::map(&workspaces_config_labels());
        cluster.apply(&template);

        run(&cluster, true).await;

        let target = target(&cluster).unwrap();
        assert_eq!(target.labels()[WATCH_CONFIGMAP_LABEL], "true");
        assert_eq!(target.labels()[MOUNT_TO_DEVWORKSPACE_LABEL], "true");
        assert_eq!(target.data.unwrap()["namespace"], USER_NAMESPACE);
    }

    #[tokio::test]
    async fn test_claim_labels_are_restored() {
        let cluster = testing::cluster(CheClusterSpec::default());
        cluster.apply(&claim(CONTROL_NAMESPACE, "1Gi"));
        run(&cluster, false).await;

        let mut tampered = cluster.fetch::<PersistentVolumeClaim>(Some(USER_NAMESPACE), "data").unwrap();
        tampered.labels_mut().remove(COMPONENT_LABEL);
        tampered.labels_mut().insert("new-label".into(), "new-test".into());
        cluster.apply(&tampered);

        run(&cluster, false).await;

        let restored = cluster.fetch::<PersistentVolumeClaim>(Some(USER_NAMESPACE), "data").unwrap();
        assert_eq!(restored.labels()[COMPONENT_LABEL], "workspaces-config");
        assert_eq!(restored.labels()["new-label"], "new-test");
        assert_eq!(claim_storage(&cluster).as_deref(), Some("1Gi"));
        assert_eq!(
            record(&cluster)["v1_PersistentVolumeClaim.data.user-che"],
            restored.resource_version().unwrap()
        );
    }
}
