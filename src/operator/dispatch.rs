//! Event dispatch into operator handlers
//!
//! The effective namespace of an event is passed to the handler through
//! its context instead of being written into operator state, so the
//! operator's own namespace never changes while a handler runs.

use std::sync::Arc;

use kube::Client;
use tracing::error;

use super::handler::{OperatorContext, OperatorHandler};
use crate::config::ALL_NAMESPACES;
use crate::entity::EntityInfo;
use crate::error::{Error, Result};
use crate::identity::OperatorIdentity;
use crate::kinds::ResourceKind;
use crate::metrics;

/// Lifecycle action delivered to a handler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Modify,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

/// Routes converted entities to the operator's handler
pub struct Dispatcher<T: EntityInfo> {
    handler: Arc<dyn OperatorHandler<T>>,
    kind: Arc<dyn ResourceKind<T>>,
    client: Client,
    identity: OperatorIdentity,
    namespace: String,
}

impl<T: EntityInfo> Dispatcher<T> {
    pub fn new(
        handler: Arc<dyn OperatorHandler<T>>,
        kind: Arc<dyn ResourceKind<T>>,
        client: Client,
        identity: OperatorIdentity,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            kind,
            client,
            identity,
            namespace: namespace.into(),
        }
    }

    pub fn operator_name(&self) -> &str {
        self.identity.operator_name()
    }

    /// Namespace the operator watches
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace a handler sees for an event from `event_namespace`
    pub fn effective_namespace<'a>(&'a self, event_namespace: Option<&'a str>) -> &'a str {
        if self.namespace == ALL_NAMESPACES {
            event_namespace.unwrap_or(ALL_NAMESPACES)
        } else {
            &self.namespace
        }
    }

    /// Context for a handler invocation in `namespace`
    pub fn context<'a>(&'a self, namespace: &'a str) -> OperatorContext<'a, T> {
        OperatorContext::new(
            namespace,
            &self.namespace,
            &self.identity,
            &self.client,
            self.kind.as_ref(),
        )
    }

    pub async fn on_add(&self, entity: &T, event_namespace: Option<&str>) -> Result<()> {
        self.dispatch(Action::Add, entity, event_namespace).await
    }

    pub async fn on_modify(&self, entity: &T, event_namespace: Option<&str>) -> Result<()> {
        self.dispatch(Action::Modify, entity, event_namespace).await
    }

    pub async fn on_delete(&self, entity: &T, event_namespace: Option<&str>) -> Result<()> {
        self.dispatch(Action::Delete, entity, event_namespace).await
    }

    /// Invoke the handler for `action`, counting the event and any failure
    pub async fn dispatch(
        &self,
        action: Action,
        entity: &T,
        event_namespace: Option<&str>,
    ) -> Result<()> {
        let namespace = self.effective_namespace(event_namespace);
        let ctx = self.context(namespace);
        let operator = self.operator_name();

        metrics::EVENTS
            .with_label_values(&[operator, action.as_str()])
            .inc();

        let result = match action {
            Action::Add => self.handler.on_add(entity, &ctx).await,
            Action::Modify => self.handler.on_modify(entity, &ctx).await,
            Action::Delete => self.handler.on_delete(entity, &ctx).await,
        };

        result.map_err(|e| {
            metrics::HANDLER_ERRORS
                .with_label_values(&[operator, action.as_str()])
                .inc();
            error!(
                operator = %operator,
                namespace = %namespace,
                action = action.as_str(),
                error = %e,
                "Handler failed"
            );
            Error::Handler(e)
        })
    }
}
