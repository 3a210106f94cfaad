//! Operator coordinator
//!
//! `Operator<T>` owns the lifecycle of one operator: it resolves identity,
//! runs the integrity check, initialises its resource kind, starts the
//! watch and routes events into the author's [`OperatorHandler`].

mod dispatch;
mod handler;

pub use dispatch::{Action, Dispatcher};
pub use handler::{OperatorContext, OperatorHandler};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kube::Client;
use tracing::{error, info, instrument, warn};

use crate::config::{OperatorConfig, ALL_NAMESPACES};
use crate::entity::{EntityInfo, InfoType};
use crate::error::{Error, Result};
use crate::identity::OperatorIdentity;
use crate::kinds::ResourceKind;
use crate::metrics;
use crate::watcher::AbstractWatcher;

/// Lifecycle state of an operator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorState {
    Created,
    Initializing,
    Watching,
    Stopped,
}

/// Coordinator for one operator definition
pub struct Operator<T: EntityInfo> {
    config: OperatorConfig,
    info_type: Option<InfoType>,
    identity: OperatorIdentity,
    kind: Arc<dyn ResourceKind<T>>,
    handler: Arc<dyn OperatorHandler<T>>,
    client: Option<Client>,
    is_openshift: bool,
    namespace: String,
    full_reconciliation_run: AtomicBool,
    watch: Option<Arc<dyn AbstractWatcher>>,
    dispatcher: Option<Arc<Dispatcher<T>>>,
    state: OperatorState,
}

impl<T: EntityInfo> Operator<T> {
    /// Operator for entities of type `T`, backed by `kind`, reacting through `handler`
    pub fn new(
        config: OperatorConfig,
        kind: impl ResourceKind<T>,
        handler: impl OperatorHandler<T>,
    ) -> Self {
        let info_type = Some(InfoType::of::<T>());
        let identity = OperatorIdentity::resolve(&config, info_type.as_ref());
        Self {
            config,
            info_type,
            identity,
            kind: Arc::new(kind),
            handler: Arc::new(handler),
            client: None,
            is_openshift: false,
            namespace: ALL_NAMESPACES.to_string(),
            full_reconciliation_run: AtomicBool::new(false),
            watch: None,
            dispatcher: None,
            state: OperatorState::Created,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the entity type tag, `None` makes the integrity check fail
    pub fn with_info_type(mut self, info_type: Option<InfoType>) -> Self {
        self.info_type = info_type;
        self.resolve_identity();
        self
    }

    pub fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }

    pub fn set_openshift(&mut self, is_openshift: bool) {
        self.is_openshift = is_openshift;
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    /// Identity configuration, applied on the next `start`
    pub fn config_mut(&mut self) -> &mut OperatorConfig {
        &mut self.config
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn identity(&self) -> &OperatorIdentity {
        &self.identity
    }

    /// Display name, `'<entityName>' operator`
    pub fn name(&self) -> &str {
        self.identity.operator_name()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_openshift(&self) -> bool {
        self.is_openshift
    }

    /// Disabled operators are never started
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Active watch, set by a successful `start`
    pub fn watch(&self) -> Option<&Arc<dyn AbstractWatcher>> {
        self.watch.as_ref()
    }

    pub fn is_full_reconciliation_run(&self) -> bool {
        self.full_reconciliation_run.load(Ordering::SeqCst)
    }

    fn resolve_identity(&mut self) {
        self.identity = OperatorIdentity::resolve(&self.config, self.info_type.as_ref());
    }

    /// Identity check plus the resource kind's own rules
    pub fn check_integrity(&self) -> bool {
        self.identity.check_integrity() && self.kind.check_integrity(&self.identity)
    }

    /// Start the operator and its watch.
    ///
    /// Returns `Ok(None)` when the identity fails the integrity check; the
    /// operator is then stopped without touching the cluster. A watch that
    /// cannot be established yields `Error::WatchEstablishment` and is not
    /// retried. Starting an operator that is already watching is an error;
    /// `stop` it first.
    pub async fn start(&mut self) -> Result<Option<Arc<dyn AbstractWatcher>>> {
        if self.watch.is_some() {
            return Err(Error::config(format!("{} is already started", self.name())));
        }

        self.resolve_identity();
        if !self.check_integrity() {
            warn!(
                operator = %self.name(),
                "Unable to initialize the operator correctly, some compulsory fields are missing"
            );
            self.state = OperatorState::Stopped;
            return Ok(None);
        }

        let Some(client) = self.client.clone() else {
            self.state = OperatorState::Stopped;
            return Err(Error::config(format!(
                "Kubernetes client not set for {}",
                self.name()
            )));
        };

        info!(operator = %self.name(), namespace = %self.namespace, "Starting operator");
        self.state = OperatorState::Initializing;

        match self.initialize(client).await {
            Ok((watch, dispatcher)) => {
                self.watch = Some(watch.clone());
                self.dispatcher = Some(dispatcher);
                self.state = OperatorState::Watching;
                metrics::RUNNING_OPERATORS.inc();
                info!(
                    operator = %self.name(),
                    namespace = %self.namespace,
                    kind = self.kind.kind_name(),
                    "Operator running"
                );
                Ok(Some(watch))
            }
            Err(e) => {
                self.state = OperatorState::Stopped;
                error!(
                    operator = %self.name(),
                    namespace = %self.namespace,
                    error = %e,
                    "Operator startup failed"
                );
                Err(Error::WatchEstablishment {
                    operator: self.name().to_string(),
                    namespace: self.namespace.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn initialize(
        &self,
        client: Client,
    ) -> Result<(Arc<dyn AbstractWatcher>, Arc<Dispatcher<T>>)> {
        self.kind
            .on_init(&client, &self.identity, self.is_openshift)
            .await?;

        let dispatcher = Arc::new(Dispatcher::new(
            self.handler.clone(),
            self.kind.clone(),
            client.clone(),
            self.identity.clone(),
            self.namespace.clone(),
        ));

        self.handler
            .on_init(&dispatcher.context(&self.namespace))
            .await
            .map_err(Error::Handler)?;

        let watch = self
            .kind
            .watch(&client, &self.identity, &self.namespace, dispatcher.clone())
            .await?;
        Ok((watch, dispatcher))
    }

    /// Close the watch and release the client.
    ///
    /// Only valid after a successful `start`.
    pub fn stop(&mut self) -> Result<()> {
        let watch = self.watch.take().ok_or_else(|| {
            Error::NotStarted(format!("{} has no active watch", self.name()))
        })?;

        info!(operator = %self.name(), namespace = %self.namespace, "Stopping operator");
        watch.close();
        self.dispatcher = None;
        self.client = None;
        self.state = OperatorState::Stopped;
        metrics::RUNNING_OPERATORS.dec();
        Ok(())
    }

    fn dispatcher(&self) -> Result<&Arc<Dispatcher<T>>> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| Error::NotStarted(self.name().to_string()))
    }

    /// Deliver a creation in the operator's own namespace
    pub async fn on_add(&self, entity: &T) -> Result<()> {
        self.dispatcher()?.on_add(entity, None).await
    }

    /// Deliver a removal in the operator's own namespace
    pub async fn on_delete(&self, entity: &T) -> Result<()> {
        self.dispatcher()?.on_delete(entity, None).await
    }

    /// Deliver a change in the operator's own namespace
    pub async fn on_modify(&self, entity: &T) -> Result<()> {
        self.dispatcher()?.on_modify(entity, None).await
    }

    /// Deliver a creation that happened in `namespace`
    pub async fn on_add_in(&self, entity: &T, namespace: &str) -> Result<()> {
        self.dispatcher()?.on_add(entity, Some(namespace)).await
    }

    /// Deliver a removal that happened in `namespace`
    pub async fn on_delete_in(&self, entity: &T, namespace: &str) -> Result<()> {
        self.dispatcher()?.on_delete(entity, Some(namespace)).await
    }

    /// Deliver a change that happened in `namespace`
    pub async fn on_modify_in(&self, entity: &T, namespace: &str) -> Result<()> {
        self.dispatcher()?.on_modify(entity, Some(namespace)).await
    }

    /// Every entity currently in scope
    pub async fn desired_set(&self) -> Result<HashSet<T>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::NotStarted(self.name().to_string()))?;
        self.kind
            .desired_set(client, &self.identity, &self.namespace)
            .await
    }

    /// Run the handler's full reconciliation once
    #[instrument(skip(self), fields(operator = %self.name(), namespace = %self.namespace))]
    pub async fn full_reconciliation(&self) -> Result<()> {
        let dispatcher = self.dispatcher()?;
        let _timer = metrics::FULL_RECONCILIATION_DURATION
            .with_label_values(&[self.name()])
            .start_timer();
        metrics::FULL_RECONCILIATIONS
            .with_label_values(&[self.name()])
            .inc();

        self.handler
            .full_reconciliation(&dispatcher.context(&self.namespace))
            .await
            .map_err(Error::Handler)
    }

    /// Flag the operator, and its watch, as running a full reconciliation
    pub fn set_full_reconciliation_run(&self, run: bool) {
        self.full_reconciliation_run.store(run, Ordering::SeqCst);
        if let Some(watch) = &self.watch {
            watch.set_full_reconciliation_run(run);
        }
    }

    /// Set `{state, lastTransitionTime}` on a custom resource, no-op if it is gone
    pub async fn set_cr_status(&self, status: &str, namespace: &str, name: &str) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::NotStarted(self.name().to_string()))?;
        self.kind
            .set_status(client, &self.identity, status, namespace, name)
            .await
    }
}
