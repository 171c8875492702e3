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

use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::core::ObjectMeta;
use serde_json::to_string;

use crate::labels::user_settings;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Grants the ClusterRole of the same name to a single user.
pub fn for_user(namespace: &str, name: &str, username: &str) -> RoleBinding {
    let resource = RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(user_settings()),
            ..Default::default()
        },
        role_ref: RoleRef { api_group: RBAC_GROUP.to_string(), kind: "ClusterRole".to_string(), name: name.to_string() },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_GROUP.to_string()),
            kind: "User".to_string(),
            name: username.to_string(),
            ..Default::default()
        }]),
    };
    tracing::debug!("The role binding resource:\n {:?}\n", to_string(&resource));

    resource
}
