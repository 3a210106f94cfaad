//! Process-level runner for a set of operators
//!
//! The entrypoint connects to the cluster, resolves the watched namespace,
//! detects OpenShift, starts every enabled operator and then drives the
//! periodic full reconciliation until SIGINT or SIGTERM arrives.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroupList;
use kube::Client;
use tokio::signal;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::entity::EntityInfo;
use crate::error::Result;
use crate::metrics;
use crate::operator::Operator;

/// API group only served by OpenShift clusters
pub const OPENSHIFT_API_GROUP: &str = "route.openshift.io";

/// Type-erased view of an operator, so operators over different entity
/// types can be run together
#[async_trait]
pub trait ManagedOperator: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Hand over the cluster connection and scope before `start`
    fn configure(&mut self, client: Client, namespace: &str, is_openshift: bool);

    /// Start watching; `false` when the operator refused to start
    async fn start(&mut self) -> Result<bool>;

    async fn full_reconciliation(&self) -> Result<()>;

    fn set_full_reconciliation_run(&self, run: bool);

    fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: EntityInfo> ManagedOperator for Operator<T> {
    fn name(&self) -> &str {
        Operator::name(self)
    }

    fn is_enabled(&self) -> bool {
        Operator::is_enabled(self)
    }

    fn configure(&mut self, client: Client, namespace: &str, is_openshift: bool) {
        self.set_client(client);
        self.set_namespace(namespace);
        self.set_openshift(is_openshift);
    }

    async fn start(&mut self) -> Result<bool> {
        Ok(Operator::start(self).await?.is_some())
    }

    async fn full_reconciliation(&self) -> Result<()> {
        Operator::full_reconciliation(self).await
    }

    fn set_full_reconciliation_run(&self, run: bool) {
        Operator::set_full_reconciliation_run(self, run)
    }

    fn stop(&mut self) -> Result<()> {
        Operator::stop(self)
    }
}

struct Slot {
    operator: Box<dyn ManagedOperator>,
    running: bool,
}

/// Runs registered operators for the lifetime of the process
pub struct Entrypoint {
    config: RuntimeConfig,
    slots: Vec<Slot>,
}

impl Entrypoint {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
        }
    }

    /// Add an operator to be started by `run`
    pub fn register(mut self, operator: impl ManagedOperator + 'static) -> Self {
        self.add(Box::new(operator));
        self
    }

    pub fn add(&mut self, operator: Box<dyn ManagedOperator>) {
        self.slots.push(Slot {
            operator,
            running: false,
        });
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Names of the operators currently watching
    pub fn running(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| slot.running)
            .map(|slot| slot.operator.name())
            .collect()
    }

    /// Connect with the ambient kubeconfig and run until a shutdown signal
    pub async fn run(self) -> Result<()> {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes API server");
        self.run_with_client(client).await
    }

    pub async fn run_with_client(self, client: Client) -> Result<()> {
        let namespace = self
            .config
            .namespace
            .clone()
            .unwrap_or_else(|| client.default_namespace().to_string());
        let is_openshift = detect_openshift(&client).await;
        self.run_until(client, &namespace, is_openshift, shutdown_signal())
            .await
    }

    /// Start everything, reconcile periodically, stop when `shutdown` completes
    pub async fn run_until<F>(
        mut self,
        client: Client,
        namespace: &str,
        is_openshift: bool,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.config.metrics {
            let port = self.config.metrics_port;
            tokio::spawn(async move {
                if let Err(e) = metrics::serve(port).await {
                    error!(error = %e, "Metrics server exited");
                }
            });
        }

        let started = self.start_all(client, namespace, is_openshift).await;
        info!(
            namespace = %namespace,
            openshift = is_openshift,
            started,
            registered = self.slots.len(),
            "Operators started"
        );

        tokio::pin!(shutdown);
        match self.reconciliation_period() {
            Some(period) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = ticker.tick() => self.reconcile_all().await,
                    }
                }
            }
            None => shutdown.await,
        }

        info!("Received shutdown signal, stopping operators");
        self.stop_all();
        Ok(())
    }

    fn reconciliation_period(&self) -> Option<Duration> {
        match self.config.full_reconciliation_interval_s {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Start every enabled operator, returning how many are running
    pub async fn start_all(&mut self, client: Client, namespace: &str, is_openshift: bool) -> usize {
        for slot in &mut self.slots {
            if !slot.operator.is_enabled() {
                info!(operator = %slot.operator.name(), "Operator disabled, skipping");
                continue;
            }

            slot.operator
                .configure(client.clone(), namespace, is_openshift);
            match slot.operator.start().await {
                Ok(running) => slot.running = running,
                Err(e) => {
                    error!(
                        operator = %slot.operator.name(),
                        namespace = %namespace,
                        error = %e,
                        "Failed to start operator"
                    );
                }
            }
        }

        self.slots.iter().filter(|slot| slot.running).count()
    }

    /// One full reconciliation pass over every running operator
    pub async fn reconcile_all(&self) {
        for slot in self.slots.iter().filter(|slot| slot.running) {
            let operator = &slot.operator;
            operator.set_full_reconciliation_run(true);
            if let Err(e) = operator.full_reconciliation().await {
                warn!(operator = %operator.name(), error = %e, "Full reconciliation failed");
            }
            operator.set_full_reconciliation_run(false);
        }
    }

    /// Stop every running operator
    pub fn stop_all(&mut self) {
        for slot in self.slots.iter_mut().filter(|slot| slot.running) {
            if let Err(e) = slot.operator.stop() {
                warn!(operator = %slot.operator.name(), error = %e, "Failed to stop operator");
            }
            slot.running = false;
        }
    }
}

/// Whether the cluster serves the OpenShift route API
pub async fn detect_openshift(client: &Client) -> bool {
    match client.list_api_groups().await {
        Ok(groups) => serves_openshift(&groups),
        Err(e) => {
            warn!(error = %e, "Unable to list API groups, assuming plain Kubernetes");
            false
        }
    }
}

fn serves_openshift(groups: &APIGroupList) -> bool {
    groups
        .groups
        .iter()
        .any(|group| group.name == OPENSHIFT_API_GROUP)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
