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

//! Decides whether a target object has to be updated from its source.
//!
//! The comparison is asymmetric on labels and annotations: every source
//! key must be present in the target with the same value, but keys added
//! to the target by users are allowed and kept.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::{Map, Value};

/// Compares typed objects (ConfigMap, Secret, PVC, RoleBinding, ...).
pub fn differs(src: &DynamicObject, dst: &DynamicObject) -> bool {
    !includes(src.labels(), dst.labels())
        || !includes(src.annotations(), dst.annotations())
        || payload(src) != payload(dst)
}

/// Compares generic objects on everything but their metadata and status.
pub fn differs_unstructured(src: &DynamicObject, dst: &DynamicObject) -> bool {
    src.types != dst.types || payload(src) != payload(dst)
}

/// Whether all entries of `expected` are present in `actual`.
pub fn includes(expected: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    expected.iter().all(|(key, value)| actual.get(key) == Some(value))
}

fn payload(object: &DynamicObject) -> Map<String, Value> {
    let mut payload = match &object.data {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    payload.remove("status");
    // The API server leaves out empty fields.
    payload.retain(|_, value| match value {
        Value::Null => false,
        Value::Object(fields) => !fields.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    });
    payload
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::client::to_dynamic;

    fn config_map(labels: &[(&str, &str)], data: &[(&str, &str)]) -> DynamicObject {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("test".into()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        };
        to_dynamic(&cm).unwrap()
    }

    #[test]
    fn test_extra_target_labels_do_not_differ() {
        let src = config_map(&[("a", "b")], &[("key", "value")]);
        let dst = config_map(&[("a", "b"), ("new-label", "new-test")], &[("key", "value")]);

        assert!(!differs(&src, &dst));
        assert!(differs(&dst, &src));
    }

    #[test]
    fn test_changed_label_value_differs() {
        let src = config_map(&[("a", "b")], &[]);
        let dst = config_map(&[("a", "c")], &[]);

        assert!(differs(&src, &dst));
    }

    #[test]
    fn test_changed_data_differs() {
        let src = config_map(&[], &[("a", "b")]);
        let dst = config_map(&[], &[("a", "new-c")]);

        assert!(differs(&src, &dst));
        assert!(differs(&config_map(&[], &[]), &dst));
    }

    #[test]
    fn test_metadata_and_status_are_ignored() {
        let src = config_map(&[], &[("a", "b")]);
        let mut dst = src.clone();
        dst.metadata.resource_version = Some("42".into());
        dst.metadata.uid = Some("uid".into());
        dst.data["status"] = serde_json::json!({"phase": "Bound"});

        assert!(!differs(&src, &dst));
        assert!(!differs_unstructured(&src, &dst));
    }

    #[test]
    fn test_unstructured_ignores_labels() {
        let src = config_map(&[("a", "b")], &[("key", "value")]);
        let dst = config_map(&[("a", "c")], &[("key", "value")]);

        assert!(!differs_unstructured(&src, &dst));
        assert!(differs_unstructured(&src, &config_map(&[], &[("key", "other")])));
    }

    #[test]
    fn test_empty_data_matches_missing_data() {
        let src = config_map(&[("a", "b")], &[]);
        let mut dst = config_map(&[("a", "b")], &[]);
        dst.data.as_object_mut().unwrap().remove("data");

        assert!(!differs(&src, &dst));
        assert!(differs(&config_map(&[], &[("key", "value")]), &dst));
    }
}
