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

use std::time::Duration;

use clap::ValueEnum;

/// The configuration parameters for the application.
///
/// These can either be passed on the command line, or pulled from environment variables.
/// The latter is preferred as environment variables are one of the recommended ways to
/// get configuration from Kubernetes Secrets in deployment.
///
/// For development convenience, these can also be read from a `.env` file in the working
/// directory where the application is started.
#[derive(clap::Parser)]
pub struct Config {
    /// The infrastructure the operator runs on, `auto` detects OpenShift
    /// by the presence of the `project.openshift.io` API group.
    #[clap(long, env = "CHE_INFRASTRUCTURE", value_enum, default_value = "auto")]
    pub infrastructure: Infrastructure,

    /// Seconds to wait before retrying a namespace while no CheCluster exists.
    #[clap(long, env = "CHE_REQUEUE_AFTER_SECONDS", default_value = "5")]
    pub requeue_after: u64,

    /// Seconds to wait before retrying a namespace whose reconciliation failed.
    #[clap(long, env = "CHE_ERROR_REQUEUE_AFTER_SECONDS", default_value = "60")]
    pub error_requeue_after: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Infrastructure {
    Auto,
    Kubernetes,
    Openshift,
}

impl Config {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after)
    }

    pub fn error_requeue_after(&self) -> Duration {
        Duration::from_secs(self.error_requeue_after)
    }
}
