//! Lifecycle hooks implemented by operator authors

use std::collections::HashSet;

use async_trait::async_trait;
use kube::Client;

use crate::config::ALL_NAMESPACES;
use crate::entity::EntityInfo;
use crate::error::Result;
use crate::identity::OperatorIdentity;
use crate::kinds::ResourceKind;

/// Domain reaction to entity lifecycle events.
///
/// `on_add` and `on_delete` are required. `on_modify` replaces the entity by
/// default (delete, then add). Every hook receives an [`OperatorContext`]
/// carrying the namespace the event belongs to.
#[async_trait]
pub trait OperatorHandler<T: EntityInfo>: Send + Sync + 'static {
    /// Runs once after the resource kind is initialised, before the watch starts
    async fn on_init(&self, _ctx: &OperatorContext<'_, T>) -> anyhow::Result<()> {
        Ok(())
    }

    /// A resource of this kind was created
    async fn on_add(&self, entity: &T, ctx: &OperatorContext<'_, T>) -> anyhow::Result<()>;

    /// A resource of this kind was removed
    async fn on_delete(&self, entity: &T, ctx: &OperatorContext<'_, T>) -> anyhow::Result<()>;

    /// A resource of this kind changed
    async fn on_modify(&self, entity: &T, ctx: &OperatorContext<'_, T>) -> anyhow::Result<()> {
        self.on_delete(entity, ctx).await?;
        self.on_add(entity, ctx).await
    }

    /// Bring managed state back in line with [`OperatorContext::desired_set`].
    ///
    /// Called periodically by the entrypoint, never by the watch.
    async fn full_reconciliation(&self, _ctx: &OperatorContext<'_, T>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-invocation view of the operator handed to handlers
pub struct OperatorContext<'a, T: EntityInfo> {
    namespace: &'a str,
    watch_namespace: &'a str,
    identity: &'a OperatorIdentity,
    client: &'a Client,
    kind: &'a dyn ResourceKind<T>,
}

impl<'a, T: EntityInfo> OperatorContext<'a, T> {
    pub(crate) fn new(
        namespace: &'a str,
        watch_namespace: &'a str,
        identity: &'a OperatorIdentity,
        client: &'a Client,
        kind: &'a dyn ResourceKind<T>,
    ) -> Self {
        Self {
            namespace,
            watch_namespace,
            identity,
            client,
            kind,
        }
    }

    /// Namespace of the current event.
    ///
    /// Equals the watched namespace unless the operator watches all namespaces,
    /// in which case it is the namespace the event came from.
    pub fn namespace(&self) -> &str {
        self.namespace
    }

    /// Namespace scope of the operator, `*` for all namespaces
    pub fn watch_namespace(&self) -> &str {
        self.watch_namespace
    }

    pub fn is_all_namespaces(&self) -> bool {
        self.watch_namespace == ALL_NAMESPACES
    }

    pub fn operator_name(&self) -> &str {
        self.identity.operator_name()
    }

    pub fn identity(&self) -> &OperatorIdentity {
        self.identity
    }

    pub fn client(&self) -> &Client {
        self.client
    }

    /// Every entity currently in scope, listed fresh from the API server
    pub async fn desired_set(&self) -> Result<HashSet<T>> {
        self.kind
            .desired_set(self.client, self.identity, self.watch_namespace)
            .await
    }

    /// Set `{state, lastTransitionTime}` on a custom resource.
    ///
    /// No-op when the resource no longer exists, and for ConfigMap operators.
    pub async fn set_cr_status(&self, status: &str, namespace: &str, name: &str) -> Result<()> {
        self.kind
            .set_status(self.client, self.identity, status, namespace, name)
            .await
    }
}
