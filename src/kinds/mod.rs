//! Resource kinds an operator can be backed by
//!
//! A resource kind knows how to register itself, watch its source objects,
//! convert them into entities and list the desired set. Two kinds ship with
//! the crate:
//! - `ConfigMapKind`: ConfigMaps labelled `<prefix>kind=<entityName>`
//! - `CustomResourceKind`: instances of a CRD registered for the entity

mod config_map;
mod custom_resource;

pub use config_map::*;
pub use custom_resource::*;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use tracing::warn;

use crate::entity::EntityInfo;
use crate::error::Result;
use crate::identity::OperatorIdentity;
use crate::metrics;
use crate::operator::Dispatcher;
use crate::watcher::AbstractWatcher;

/// Converts a raw object into an entity
pub type ConvertFn<R, T> = Arc<dyn Fn(&R) -> Result<T> + Send + Sync>;

/// Deep filter applied before conversion
pub type PredicateFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// What `desired_set` does when an object fails to convert
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConversionErrorPolicy {
    /// Log the failure and leave the object out
    #[default]
    Skip,
    /// Return the first conversion error
    FailFast,
}

/// Strategy backing an operator with one kind of cluster resource
#[async_trait]
pub trait ResourceKind<T: EntityInfo>: Send + Sync + 'static {
    /// Short kind label used in logs
    fn kind_name(&self) -> &'static str;

    /// Extra integrity rules on top of the identity check
    fn check_integrity(&self, _identity: &OperatorIdentity) -> bool {
        true
    }

    /// Runs once before the watch is created
    async fn on_init(
        &self,
        _client: &Client,
        _identity: &OperatorIdentity,
        _is_openshift: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Build and start a watch delivering events to `dispatcher`
    async fn watch(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
        dispatcher: Arc<Dispatcher<T>>,
    ) -> Result<Arc<dyn AbstractWatcher>>;

    /// Every entity of this kind currently in scope
    async fn desired_set(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
    ) -> Result<HashSet<T>>;

    /// Write `{state, lastTransitionTime}` into the status of a resource.
    ///
    /// Kinds without a status subresource ignore the call.
    async fn set_status(
        &self,
        _client: &Client,
        _identity: &OperatorIdentity,
        _status: &str,
        _namespace: &str,
        _name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Convert listed objects into a desired set.
///
/// Objects rejected by `predicate` are left out. Conversion failures are
/// logged and skipped, or returned when `policy` is `FailFast`.
pub fn collect_desired<R, T>(
    items: impl IntoIterator<Item = R>,
    predicate: &(dyn Fn(&R) -> bool + Send + Sync),
    convert: &(dyn Fn(&R) -> Result<T> + Send + Sync),
    policy: ConversionErrorPolicy,
    operator_name: &str,
) -> Result<HashSet<T>>
where
    R: ResourceExt,
    T: EntityInfo,
{
    let mut desired = HashSet::new();
    for item in items.into_iter().filter(|item| predicate(item)) {
        match convert(&item) {
            Ok(entity) => {
                desired.insert(entity);
            }
            Err(e) => {
                metrics::CONVERSION_FAILURES
                    .with_label_values(&[operator_name])
                    .inc();
                if policy == ConversionErrorPolicy::FailFast {
                    return Err(e);
                }
                warn!(
                    operator = %operator_name,
                    name = %item.name_any(),
                    namespace = item.namespace().as_deref().unwrap_or(""),
                    error = %e,
                    "Skipping resource that failed conversion"
                );
            }
        }
    }
    Ok(desired)
}
