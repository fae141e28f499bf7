//! Operator glue for the KubeVirt machine actuator
//!
//! [`controller`] holds the reconcile and error policy functions;
//! [`run_controller`] wires them into a kube-runtime controller over Machines.

#![deny(missing_docs)]

pub mod controller;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use kubevirt_actuator_common::crd::Machine;

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Which Machines the controller watches
#[derive(Clone, Debug, Default)]
pub struct WatchScope {
    /// Restrict to one namespace; all namespaces when unset
    pub namespace: Option<String>,
    /// Restrict to Machines matching this label selector
    pub label_selector: Option<String>,
}

/// Run the Machine controller until shutdown is signalled
pub async fn run_controller(client: Client, ctx: Arc<Context>, scope: WatchScope) {
    let machines: Api<Machine> = match &scope.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };
    let mut watcher = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    if let Some(selector) = &scope.label_selector {
        watcher = watcher.labels(selector);
    }

    tracing::info!(
        namespace = ?scope.namespace,
        label_selector = ?scope.label_selector,
        "starting Machine controller"
    );

    Controller::new(machines, watcher)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((machine, action)) => {
                    tracing::debug!(machine = %machine.name, ?action, "reconciliation completed")
                }
                Err(e) => tracing::error!(error = ?e, "reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
}
