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

//! Expansion of OpenShift Templates into the objects they describe.

use che_resources::client::gvk_of;
use che_resources::error::{Error, Result};
use che_resources::hash;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::debug;

use super::adapters::TemplateObjectSource;

pub fn template_kind() -> GroupVersionKind {
    GroupVersionKind::gvk("template.openshift.io", "v1", "Template")
}

/// Replaces the project parameters, as known from project request
/// templates, with the target namespace and user.
pub fn substitute(text: &str, namespace: &str, username: &str) -> String {
    text.replace("${PROJECT_NAME}", namespace)
        .replace("${PROJECT_ADMIN_USER}", username)
        .replace("${PROJECT_REQUESTING_USER}", username)
        .replace("${PROJECT_USER}", username)
}

/// Renders the objects of `template` for a namespace and its user.
///
/// The parameters are substituted in the YAML text of each object before
/// it is parsed, and each object is versioned by the hash of its text as
/// written in the template.
pub fn expand(template: &DynamicObject, namespace: &str, username: &str) -> Result<Vec<TemplateObjectSource>> {
    let Some(objects) = template.data.get("objects") else {
        return Ok(vec![]);
    };
    let objects = objects.as_array().ok_or(Error::MissingObjectKey(".objects"))?;

    let mut sources = Vec::with_capacity(objects.len());
    for object in objects {
        let text = serde_yaml::to_string(object).map_err(Error::YamlError)?;
        let version = hash(&text)?;

        let rendered = substitute(&text, namespace, username);
        debug!("The rendered template object:\n {}\n", rendered);

        let object: DynamicObject = serde_yaml::from_str(&rendered).map_err(Error::YamlError)?;
        let kind = gvk_of(&object)?;
        if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::MissingObjectKey(".metadata.name"));
        }

        sources.push(TemplateObjectSource::new(kind, object, version));
    }

    Ok(sources)
}
