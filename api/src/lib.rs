pub mod admin;
pub(crate) mod arn;
mod clusters;
mod dispatch;
mod error;
mod pagination;
mod services;
mod settings;
mod task_definitions;
mod task_sets;
mod tasks;
mod view;

use std::time::Duration;

pub use dispatch::{SUPPORTED_ACTIONS, router};
pub use error::ApiError;

use kecs_operator::{IntentSender, OperatorHealth};
use kecs_storage::Storage;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub intents: IntentSender,
    pub kube: Option<kube::Client>,
    pub operator_health: OperatorHealth,
    pub reconcile_interval: Duration,
    arns: arn::ArnBuilder,
}

impl AppState {
    pub fn new(
        storage: Storage,
        intents: IntentSender,
        kube: Option<kube::Client>,
        operator_health: OperatorHealth,
        reconcile_interval: Duration,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        AppState {
            storage,
            intents,
            kube,
            operator_health,
            reconcile_interval,
            arns: arn::ArnBuilder::new(region, account_id),
        }
    }

    pub fn region(&self) -> &str {
        &self.arns.region
    }

    pub fn account_id(&self) -> &str {
        &self.arns.account_id
    }
}

#[cfg(test)]
mod tests;
