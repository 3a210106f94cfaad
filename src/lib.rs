//! Entity operator runtime
//!
//! Builds Kubernetes operators over a typed entity `T` that is backed either
//! by labelled ConfigMaps or by a custom resource. An [`Operator`] resolves
//! its identity, validates it, registers what the cluster needs, watches the
//! matching resources and turns every change into `on_add`, `on_modify` or
//! `on_delete` calls on an [`OperatorHandler`].

pub mod config;
pub mod crd;
pub mod entity;
pub mod entrypoint;
pub mod error;
pub mod identity;
pub mod kinds;
pub mod metrics;
pub mod operator;
pub mod watcher;

pub use config::{AdditionalPrinterColumns, OperatorConfig, RuntimeConfig, ALL_NAMESPACES};
pub use entity::{EntityInfo, InfoType};
pub use entrypoint::{Entrypoint, ManagedOperator};
pub use error::{Error, Result};
pub use identity::{OperatorIdentity, Selector};
pub use kinds::{ConfigMapKind, ConversionErrorPolicy, CustomResourceKind, ResourceKind};
pub use operator::{Operator, OperatorContext, OperatorHandler, OperatorState};
pub use watcher::AbstractWatcher;
