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

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use che_crds::CheCluster;
use che_resources::client::{self, KubeClient};
use che_resources::labels::{workspaces_config_selector, CHE_ECLIPSE_ORG, PART_OF_LABEL};
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use k8s_openapi::api::core::v1::{
    ConfigMap, LimitRange, Namespace, PersistentVolumeClaim, ResourceQuota, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::controller::Action;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{watcher, Controller, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::event_router::EventRouter;
use crate::namespace_cache::{CheClusterRef, NamespaceCache};
use crate::workspaces_config::template::template_kind;
use crate::{user_namespace, workspaces_config};

pub async fn new(ctx: &Arc<Context>, checlusters: Writer<CheCluster>) {
    let api = Api::<CheCluster>::all(ctx.k8s.clone());

    // Ensure CheCluster CRD is installed before loop-watching
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("CheCluster CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: install the Eclipse Che operator bundle first");
        std::process::exit(1);
    }

    Controller::new(Api::<Namespace>::all(ctx.k8s.clone()), watcher::Config::default())
        .reconcile_on(stream::select_all(triggers(ctx, checlusters)))
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|_| future::ready(()))
        .await
}

/// Watches every kind whose events may require reconciling namespaces.
/// The `CheCluster` watch also keeps the router's store current.
fn triggers(ctx: &Arc<Context>, checlusters: Writer<CheCluster>) -> Vec<BoxStream<'static, ObjectRef<Namespace>>> {
    let owned = watcher::Config::default().labels(&format!("{PART_OF_LABEL}={CHE_ECLIPSE_ORG}"));
    let everything = watcher::Config::default();

    let mut triggers = vec![
        trigger(Api::<Secret>::all(ctx.k8s.clone()), everything.clone(), ctx),
        trigger(Api::<ConfigMap>::all(ctx.k8s.clone()), everything.clone(), ctx),
        route(
            reflector::reflector(checlusters, watcher(Api::<CheCluster>::all(ctx.k8s.clone()), everything)),
            CheCluster::kind(&()).to_string(),
            ctx.router.clone(),
        ),
        trigger(Api::<PersistentVolumeClaim>::all(ctx.k8s.clone()), owned.clone(), ctx),
        trigger(Api::<ResourceQuota>::all(ctx.k8s.clone()), owned.clone(), ctx),
        trigger(Api::<LimitRange>::all(ctx.k8s.clone()), owned.clone(), ctx),
        trigger(Api::<ServiceAccount>::all(ctx.k8s.clone()), owned.clone(), ctx),
        trigger(Api::<Role>::all(ctx.k8s.clone()), owned.clone(), ctx),
        trigger(Api::<RoleBinding>::all(ctx.k8s.clone()), owned, ctx),
    ];

    if ctx.openshift {
        let resource = ApiResource::from_gvk(&template_kind());
        let api = Api::<DynamicObject>::all_with(ctx.k8s.clone(), &resource);
        let config = watcher::Config::default().labels(&workspaces_config_selector());
        triggers.push(route(watcher(api, config), resource.kind, ctx.router.clone()));
    }

    triggers
}

fn trigger<K>(api: Api<K>, config: watcher::Config, ctx: &Arc<Context>) -> BoxStream<'static, ObjectRef<Namespace>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    route(watcher(api, config), K::kind(&()).to_string(), ctx.router.clone())
}

/// Maps the objects touched by a watch onto the namespaces to reconcile.
fn route<K, S>(events: S, kind: String, router: Arc<EventRouter>) -> BoxStream<'static, ObjectRef<Namespace>>
where
    K: Resource + Clone + Debug + Send + Sync + 'static,
    S: futures::Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
{
    events
        .default_backoff()
        .touched_objects()
        .filter_map(move |object| {
            let kind = kind.clone();
            future::ready(match object {
                Ok(object) => Some((kind, object)),
                Err(err) => {
                    error!("Failed to watch {}: {}", kind, err);
                    None
                }
            })
        })
        .then(move |(kind, object)| {
            let router = router.clone();
            async move { router.route(&kind, object.meta()).await }
        })
        .flat_map(|namespaces| stream::iter(namespaces.into_iter().map(|name| ObjectRef::new(&name))))
        .boxed()
}

/// The reconciler that will be called when a namespace, or an object
/// routed to it, changes.
pub async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action> {
    let name = namespace.name_any();
    let outcome = reconcile_namespace(ctx.client.as_ref(), &ctx.namespaces, &name, ctx.openshift).await?;

    Ok(match outcome {
        Outcome::Done => Action::await_change(),
        Outcome::RequeueNow => Action::requeue(Duration::from_secs(1)),
        Outcome::RequeueLater => Action::requeue(ctx.config.requeue_after()),
    })
}

/// an error handler that will be called when the reconciler fails with access to both the
/// object that caused the failure and the actual error
pub fn error_policy(namespace: Arc<Namespace>, error: &Error, ctx: Arc<Context>) -> Action {
    error!("Failed to reconcile namespace {}: {:?}", namespace.name_any(), error);
    Action::requeue(ctx.config.error_requeue_after())
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The managing `CheCluster` is not known yet.
    RequeueNow,
    /// No `CheCluster` is installed.
    RequeueLater,
}

pub async fn reconcile_namespace(
    client: &dyn KubeClient,
    namespaces: &NamespaceCache,
    name: &str,
    openshift: bool,
) -> Result<Outcome> {
    let Some(info) = namespaces.examine(name).await? else {
        debug!("The namespace {} is gone", name);
        return Ok(Outcome::Done);
    };
    if !info.is_workspace_namespace {
        debug!("The namespace {} is not a workspace namespace", name);
        return Ok(Outcome::Done);
    }

    let checlusters = client::list::<CheCluster>(client, None, None).await?;
    let sole = checlusters.len() == 1;
    let checluster = match select(checlusters, &info.checluster) {
        Selection::Managed(checluster) => checluster,
        Selection::NoneInstalled => {
            info!("No CheCluster installed yet, retry namespace {} later", name);
            return Ok(Outcome::RequeueLater);
        }
        Selection::Unmatched => {
            debug!("No CheCluster matches {:?} of namespace {}", info.checluster, name);
            return Ok(Outcome::RequeueNow);
        }
    };

    if checluster.meta().deletion_timestamp.is_some() {
        finalize(client, namespaces, &checluster, sole).await?;
        return Ok(Outcome::Done);
    }

    info!("Reconciling workspace namespace {}", name);

    // An unknown user doesn't hold back the workspaces config.
    let derived = match user_namespace::reconcile(client, &checluster, name, &info.username, openshift).await {
        Ok(()) => None,
        Err(Error::UnknownUser(namespace)) => Some(Error::UnknownUser(namespace)),
        Err(err) => return Err(err),
    };

    workspaces_config::sync(client, &checluster, name, &info.username, openshift).await?;

    match derived {
        Some(err) => Err(err),
        None => Ok(Outcome::Done),
    }
}

/// Revokes the capabilities in every workspace namespace the deleted
/// `checluster` manages, then releases its finalizers.
async fn finalize(client: &dyn KubeClient, namespaces: &NamespaceCache, checluster: &CheCluster, sole: bool) -> Result<()> {
    info!("CheCluster {} is being deleted, revoking capabilities", checluster.name_any());

    for name in namespaces.list_known().await {
        let Some(info) = namespaces.get(&name).await? else {
            continue;
        };
        if info.is_workspace_namespace && (sole || refers_to(&info.checluster, checluster)) {
            user_namespace::revoke_capabilities(client, &name).await?;
        }
    }

    user_namespace::release_capabilities(client, checluster).await
}

#[derive(Debug)]
enum Selection {
    Managed(Box<CheCluster>),
    NoneInstalled,
    Unmatched,
}

/// A sole `CheCluster` manages every workspace namespace, otherwise the
/// one referenced by the namespace does.
fn select(checlusters: Vec<CheCluster>, owner: &CheClusterRef) -> Selection {
    let mut iter = checlusters.into_iter();
    let (first, second) = match (iter.next(), iter.next()) {
        (None, _) => return Selection::NoneInstalled,
        (Some(checluster), None) => return Selection::Managed(Box::new(checluster)),
        (Some(first), Some(second)) => (first, second),
    };

    let mut matching = [first, second].into_iter().chain(iter).filter(|checluster| refers_to(owner, checluster));

    match (matching.next(), matching.next()) {
        (Some(checluster), None) => Selection::Managed(Box::new(checluster)),
        _ => Selection::Unmatched,
    }
}

/// Empty parts of the reference match anything.
fn refers_to(owner: &CheClusterRef, checluster: &CheCluster) -> bool {
    (owner.name.is_empty() || checluster.name_any() == owner.name)
        && (owner.namespace.is_empty() || checluster.namespace().as_deref() == Some(owner.namespace.as_str()))
}

#[cfg(test)]
mod tests {
    use che_crds::checluster::ContainerConfiguration;
    use che_crds::CheClusterSpec;
    use che_resources::config_map::USER_SETTINGS_CONFIGMAP;
    use che_resources::labels::{CHE_NAMESPACE_LABEL, CHE_NAME_LABEL, SYNC_RECORD_CONFIGMAP};
    use che_resources::testing::FakeCluster;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::core::GroupVersionKind;

    use super::*;
    use crate::testing::{
        self, checluster, config_map, workspaces_config_labels, CONTROL_NAMESPACE, USERNAME, USER_NAMESPACE,
    };

    fn owner(name: &str, namespace: &str) -> CheClusterRef {
        CheClusterRef { name: name.into(), namespace: namespace.into() }
    }

    fn checlusters() -> Vec<CheCluster> {
        vec![checluster(CONTROL_NAMESPACE, Default::default()), checluster("other-che", Default::default())]
    }

    #[test]
    fn test_select_sole_checluster() {
        let selected = select(vec![checluster(CONTROL_NAMESPACE, Default::default())], &owner("x", "y"));
        assert!(matches!(selected, Selection::Managed(che) if che.namespace().as_deref() == Some(CONTROL_NAMESPACE)));

        assert!(matches!(select(vec![], &owner("", "")), Selection::NoneInstalled));
    }

    #[test]
    fn test_select_by_owner() {
        let selected = select(checlusters(), &owner("eclipse-che", "other-che"));
        assert!(matches!(selected, Selection::Managed(che) if che.namespace().as_deref() == Some("other-che")));

        let selected = select(checlusters(), &owner("", CONTROL_NAMESPACE));
        assert!(matches!(selected, Selection::Managed(che) if che.namespace().as_deref() == Some(CONTROL_NAMESPACE)));

        assert!(matches!(select(checlusters(), &owner("eclipse-che", "")), Selection::Unmatched));
        assert!(matches!(select(checlusters(), &owner("", "nowhere")), Selection::Unmatched));
    }

    fn setup() -> Arc<FakeCluster> {
        let mut spec = CheClusterSpec::default();
        spec.dev_environments.seconds_of_inactivity_before_idling = Some(1800);

        let cluster = testing::cluster(spec);
        cluster.apply(&config_map(CONTROL_NAMESPACE, "config", &workspaces_config_labels(), &[("a", "b")]));
        cluster
    }

    async fn run(cluster: &Arc<FakeCluster>, name: &str, openshift: bool) -> Result<Outcome> {
        let namespaces = NamespaceCache::new(cluster.clone(), openshift);
        reconcile_namespace(cluster.as_ref(), &namespaces, name, openshift).await
    }

    #[tokio::test]
    async fn test_reconcile_workspace_namespace() {
        let cluster = setup();

        assert_eq!(run(&cluster, USER_NAMESPACE, false).await.unwrap(), Outcome::Done);

        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), USER_SETTINGS_CONFIGMAP).is_some());
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), "config").is_some());
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP).is_some());
    }

    #[tokio::test]
    async fn test_skip_other_namespaces() {
        let cluster = setup();
        cluster.apply(&testing::namespace("default", &[], &[]));

        assert_eq!(run(&cluster, "default", false).await.unwrap(), Outcome::Done);
        assert_eq!(run(&cluster, "missing", false).await.unwrap(), Outcome::Done);

        assert!(cluster.fetch::<ConfigMap>(Some("default"), "config").is_none());
    }

    #[tokio::test]
    async fn test_requeue_without_checluster() {
        let cluster = setup();
        cluster.remove::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che");

        assert_eq!(run(&cluster, USER_NAMESPACE, false).await.unwrap(), Outcome::RequeueLater);
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP).is_none());
    }

    #[tokio::test]
    async fn test_requeue_when_no_checluster_matches() {
        let cluster = setup();
        cluster.apply(&checluster("other-che", Default::default()));
        let mut namespace = testing::workspace_namespace(USER_NAMESPACE, USERNAME);
        namespace.labels_mut().insert(CHE_NAMESPACE_LABEL.into(), "nowhere".into());
        cluster.apply(&namespace);

        assert_eq!(run(&cluster, USER_NAMESPACE, false).await.unwrap(), Outcome::RequeueNow);
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), "config").is_none());
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), SYNC_RECORD_CONFIGMAP).is_none());
    }

    #[tokio::test]
    async fn test_namespace_picks_its_checluster() {
        let cluster = setup();
        cluster.apply(&checluster("other-che", Default::default()));
        let mut namespace = testing::workspace_namespace(USER_NAMESPACE, USERNAME);
        namespace.labels_mut().insert(CHE_NAME_LABEL.into(), "eclipse-che".into());
        namespace.labels_mut().insert(CHE_NAMESPACE_LABEL.into(), CONTROL_NAMESPACE.into());
        cluster.apply(&namespace);

        assert_eq!(run(&cluster, USER_NAMESPACE, false).await.unwrap(), Outcome::Done);
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), "config").is_some());
    }

    fn project(cluster: &FakeCluster, username: &str) {
        let project = GroupVersionKind::gvk("project.openshift.io", "v1", "Project");
        let mut object = DynamicObject::new(USER_NAMESPACE, &ApiResource::from_gvk(&project));
        object.metadata.labels = testing::workspace_namespace(USER_NAMESPACE, username).metadata.labels;
        object.metadata.annotations = testing::workspace_namespace(USER_NAMESPACE, username).metadata.annotations;
        cluster.apply(&object);
    }

    #[tokio::test]
    async fn test_deleted_checluster_releases_capabilities() {
        let mut spec = CheClusterSpec::default();
        spec.dev_environments.disable_container_build_capabilities = Some(false);
        spec.dev_environments.container_build_configuration =
            Some(ContainerConfiguration { openshift_security_context_constraint: Some("container-build".into()) });
        let cluster = testing::cluster(spec);
        cluster.apply(&config_map(CONTROL_NAMESPACE, "config", &workspaces_config_labels(), &[("a", "b")]));
        project(&cluster, USERNAME);

        assert_eq!(run(&cluster, USER_NAMESPACE, true).await.unwrap(), Outcome::Done);
        assert!(cluster.fetch::<RoleBinding>(Some(USER_NAMESPACE), "che-user-container-build").is_some());

        let mut che = cluster.fetch::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che").unwrap();
        assert_eq!(che.finalizers(), ["container-build.finalizers.che.eclipse.org"]);
        che.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        cluster.apply(&che);

        assert_eq!(run(&cluster, USER_NAMESPACE, true).await.unwrap(), Outcome::Done);

        assert!(cluster.fetch::<RoleBinding>(Some(USER_NAMESPACE), "che-user-container-build").is_none());
        let che = cluster.fetch::<CheCluster>(Some(CONTROL_NAMESPACE), "eclipse-che").unwrap();
        assert!(che.finalizers().is_empty());
        assert!(che.metadata.deletion_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_unknown_user_still_syncs_workspaces_config() {
        let mut spec = CheClusterSpec::default();
        spec.dev_environments.disable_container_run_capabilities = Some(false);
        spec.dev_environments.container_run_configuration =
            Some(ContainerConfiguration { openshift_security_context_constraint: Some("container-run".into()) });
        let cluster = testing::cluster(spec);
        cluster.apply(&config_map(CONTROL_NAMESPACE, "config", &workspaces_config_labels(), &[("a", "b")]));

        project(&cluster, "");

        let err = run(&cluster, USER_NAMESPACE, true).await.unwrap_err();

        assert!(matches!(err, Error::UnknownUser(_)));
        assert!(cluster.fetch::<ConfigMap>(Some(USER_NAMESPACE), "config").is_some());
    }
}
