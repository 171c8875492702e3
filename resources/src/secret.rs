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

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use serde_json::to_string;

use crate::client::{self, KubeClient};
use crate::error::Result;
use crate::labels::{
    user_settings, MOUNT_AS_ANNOTATION, MOUNT_PATH_ANNOTATION, MOUNT_TO_DEVWORKSPACE_LABEL, WATCH_SECRET_LABEL,
};

/// The server certificate mounted into workspaces.
pub const SERVER_CERT_SECRET: &str = "che-server-cert";
pub const SERVER_CERT_MOUNT_PATH: &str = "/tmp/che/secret/";
pub const CA_CERT_KEY: &str = "ca.crt";

/// Builds the Secret carrying the single `ca.crt` entry of the server's
/// self-signed certificate.
pub fn server_cert(namespace: &str, ca_crt: ByteString) -> Secret {
    let mut labels = user_settings();
    labels.insert(MOUNT_TO_DEVWORKSPACE_LABEL.into(), "true".into());
    labels.insert(WATCH_SECRET_LABEL.into(), "true".into());

    let annotations = BTreeMap::from([
        (MOUNT_AS_ANNOTATION.to_string(), "file".to_string()),
        (MOUNT_PATH_ANNOTATION.to_string(), SERVER_CERT_MOUNT_PATH.to_string()),
    ]);

    let resource = Secret {
        metadata: ObjectMeta {
            name: Some(SERVER_CERT_SECRET.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(CA_CERT_KEY.to_string(), ca_crt)])),
        ..Default::default()
    };
    tracing::debug!("The secret resource:\n {:?}\n", to_string(&resource));

    resource
}

/// Reads one entry of a Secret, `None` when the Secret or the entry is
/// missing or empty.
pub async fn entry(client: &dyn KubeClient, namespace: &str, name: &str, key: &str) -> Result<Option<ByteString>> {
    let secret = client::get::<Secret>(client, Some(namespace), name).await?;
    Ok(secret
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(key))
        .filter(|value| !value.0.is_empty()))
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::testing::FakeCluster;

    #[test]
    fn test_server_cert_is_mounted_as_file() {
        let secret = server_cert("user-che", ByteString(b"cert".to_vec()));

        assert_eq!(secret.name_any(), SERVER_CERT_SECRET);
        assert_eq!(secret.annotations()[MOUNT_AS_ANNOTATION], "file");
        assert_eq!(secret.annotations()[MOUNT_PATH_ANNOTATION], SERVER_CERT_MOUNT_PATH);
        assert_eq!(secret.labels()[MOUNT_TO_DEVWORKSPACE_LABEL], "true");
        assert_eq!(secret.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entry_ignores_missing_and_empty() {
        let cluster = FakeCluster::new();
        assert_eq!(entry(&cluster, "eclipse-che", "self-signed-certificate", CA_CERT_KEY).await.unwrap(), None);

        cluster.apply(&Secret {
            metadata: ObjectMeta {
                name: Some("self-signed-certificate".into()),
                namespace: Some("eclipse-che".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (CA_CERT_KEY.to_string(), ByteString(b"cert".to_vec())),
                ("empty".to_string(), ByteString(vec![])),
            ])),
            ..Default::default()
        });

        let found = entry(&cluster, "eclipse-che", "self-signed-certificate", CA_CERT_KEY).await.unwrap();
        assert_eq!(found, Some(ByteString(b"cert".to_vec())));
        assert_eq!(entry(&cluster, "eclipse-che", "self-signed-certificate", "empty").await.unwrap(), None);
    }
}
