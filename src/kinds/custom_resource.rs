//! Custom-resource backed resource kind
//!
//! Registers a CRD for the entity on init, watches its instances and maps
//! each instance's `spec` onto the entity type.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use kube::{
    api::{DynamicObject, ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use schemars::JsonSchema;
use serde_json::{json, Value};
use tracing::debug;

use super::{collect_desired, ConversionErrorPolicy, ConvertFn, ResourceKind};
use crate::config::ALL_NAMESPACES;
use crate::crd::{spec_schema, CrStatus, CrdDeployer, CrdHandle, CrdRequest, KubeCrdDeployer};
use crate::entity::EntityInfo;
use crate::error::{Error, Result};
use crate::identity::OperatorIdentity;
use crate::operator::Dispatcher;
use crate::watcher::{AbstractWatcher, WatcherBuilder};

/// Field manager used for status writes
pub const FIELD_MANAGER: &str = "entity-operator";

/// Deserialize the `spec` of a custom resource into `T`.
///
/// A resource without `spec` converts like an empty object.
pub fn parse_custom_resource<T: EntityInfo>(cr: &DynamicObject) -> Result<T> {
    let name = cr.name_any();
    let spec = cr
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    let mut entity: T = serde_json::from_value(spec)
        .map_err(|e| Error::conversion(&name, format!("invalid spec: {}", e)))?;
    entity.set_identity(&name, cr.namespace().as_deref());
    Ok(entity)
}

/// Operator backing that watches instances of a generated CRD
pub struct CustomResourceKind<T> {
    convert: ConvertFn<DynamicObject, T>,
    policy: ConversionErrorPolicy,
    deployer: Arc<dyn CrdDeployer>,
    crd: RwLock<Option<CrdHandle>>,
}

impl<T: EntityInfo + JsonSchema> Default for CustomResourceKind<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityInfo + JsonSchema> CustomResourceKind<T> {
    /// Custom resource kind deploying its CRD through the Kubernetes API
    pub fn new() -> Self {
        Self {
            convert: Arc::new(parse_custom_resource::<T>),
            policy: ConversionErrorPolicy::default(),
            deployer: Arc::new(KubeCrdDeployer::default()),
            crd: RwLock::new(None),
        }
    }

    pub fn with_deployer(mut self, deployer: impl CrdDeployer + 'static) -> Self {
        self.deployer = Arc::new(deployer);
        self
    }

    /// Replace the custom resource to entity conversion
    pub fn with_convert<F>(mut self, convert: F) -> Self
    where
        F: Fn(&DynamicObject) -> Result<T> + Send + Sync + 'static,
    {
        self.convert = Arc::new(convert);
        self
    }

    pub fn with_conversion_error_policy(mut self, policy: ConversionErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle of the registered CRD, once `on_init` ran
    pub fn crd(&self) -> Option<CrdHandle> {
        self.crd
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_crd(&self, identity: &OperatorIdentity) -> Result<CrdHandle> {
        self.crd().ok_or_else(|| {
            Error::NotStarted(format!(
                "CRD of {} has not been registered",
                identity.operator_name()
            ))
        })
    }

    fn api(client: &Client, handle: &CrdHandle, namespace: &str) -> Api<DynamicObject> {
        if namespace == ALL_NAMESPACES {
            Api::all_with(client.clone(), &handle.api_resource)
        } else {
            Api::namespaced_with(client.clone(), namespace, &handle.api_resource)
        }
    }
}

#[async_trait]
impl<T: EntityInfo + JsonSchema> ResourceKind<T> for CustomResourceKind<T> {
    fn kind_name(&self) -> &'static str {
        "CustomResource"
    }

    fn check_integrity(&self, identity: &OperatorIdentity) -> bool {
        identity
            .additional_printer_columns
            .as_ref()
            .map_or(true, |columns| columns.is_consistent())
    }

    async fn on_init(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        is_openshift: bool,
    ) -> Result<()> {
        let request = CrdRequest::new(identity, spec_schema::<T>()?, is_openshift);
        let handle = self.deployer.init_crds(client, &request).await?;
        debug!(
            operator = %identity.operator_name(),
            crd = %handle.name,
            "Custom resource definition ready"
        );
        *self.crd.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn watch(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
        dispatcher: Arc<Dispatcher<T>>,
    ) -> Result<Arc<dyn AbstractWatcher>> {
        let handle = self.require_crd(identity)?;
        let watch = WatcherBuilder::new(Self::api(client, &handle, namespace))
            .with_convert(self.convert.clone())
            .with_dispatcher(dispatcher)
            .watch()
            .await?;
        Ok(Arc::new(watch))
    }

    async fn desired_set(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
    ) -> Result<HashSet<T>> {
        let handle = self.require_crd(identity)?;
        let list = Self::api(client, &handle, namespace)
            .list(&ListParams::default())
            .await?;
        collect_desired(
            list.items,
            &|_: &DynamicObject| true,
            self.convert.as_ref(),
            self.policy,
            identity.operator_name(),
        )
    }

    async fn set_status(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        status: &str,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let handle = self.require_crd(identity)?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), namespace, &handle.api_resource);

        if api.get_opt(name).await?.is_none() {
            debug!(name = %name, namespace = %namespace, "Resource gone, skipping status update");
            return Ok(());
        }

        let patch = json!({ "status": CrStatus::now(status) });
        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // deleted between read and write
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(name = %name, namespace = %namespace, "Resource gone, skipping status update");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;
    use kube::discovery::ApiResource;
    use serde::Deserialize;

    use super::*;
    use crate::config::{AdditionalPrinterColumns, OperatorConfig};
    use crate::entity::InfoType;

    #[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
    struct JobInfo {
        #[serde(skip)]
        name: String,
        #[serde(default)]
        image: String,
    }

    impl EntityInfo for JobInfo {
        fn set_identity(&mut self, name: &str, _namespace: Option<&str>) {
            self.name = name.to_string();
        }
    }

    fn resource(name: &str, spec: Option<Value>) -> DynamicObject {
        let ar = ApiResource {
            group: "example.com".into(),
            version: "v1".into(),
            api_version: "example.com/v1".into(),
            kind: "Job".into(),
            plural: "jobs".into(),
        };
        let mut obj = DynamicObject::new(name, &ar);
        obj.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns1".to_string()),
            ..Default::default()
        };
        if let Some(spec) = spec {
            obj.data = json!({ "spec": spec });
        }
        obj
    }

    fn identity(columns: Option<AdditionalPrinterColumns>) -> OperatorIdentity {
        let mut config = OperatorConfig::new("Job").with_prefix("example.com/");
        config.additional_printer_columns = columns;
        OperatorIdentity::resolve(&config, Some(&InfoType::of::<JobInfo>()))
    }

    #[test]
    fn test_parse_custom_resource_reads_spec() {
        let job: JobInfo =
            parse_custom_resource(&resource("job-a", Some(json!({ "image": "busybox" })))).unwrap();
        assert_eq!(job.name, "job-a");
        assert_eq!(job.image, "busybox");
    }

    #[test]
    fn test_parse_custom_resource_without_spec() {
        let job: JobInfo = parse_custom_resource(&resource("job-b", None)).unwrap();
        assert_eq!(job.name, "job-b");
        assert_eq!(job.image, "");
    }

    #[test]
    fn test_parse_custom_resource_malformed_spec() {
        let result = parse_custom_resource::<JobInfo>(&resource("job-c", Some(json!({ "image": 7 }))));
        assert!(matches!(result, Err(Error::Conversion { .. })));
    }

    #[test]
    fn test_integrity_accepts_absent_columns() {
        let kind = CustomResourceKind::<JobInfo>::new();
        assert!(kind.check_integrity(&identity(None)));
    }

    #[test]
    fn test_integrity_rejects_mismatched_columns() {
        let kind = CustomResourceKind::<JobInfo>::new();
        let columns = AdditionalPrinterColumns {
            names: vec!["Image".into()],
            paths: Some(vec![".spec.image".into(), ".spec.other".into()]),
            types: None,
        };
        assert!(!kind.check_integrity(&identity(Some(columns))));

        let columns = AdditionalPrinterColumns {
            names: vec!["Image".into()],
            paths: None,
            types: None,
        };
        assert!(!kind.check_integrity(&identity(Some(columns))));
    }

    #[test]
    fn test_crd_unset_before_init() {
        let kind = CustomResourceKind::<JobInfo>::new();
        assert!(kind.crd().is_none());
        assert!(matches!(
            kind.require_crd(&identity(None)),
            Err(Error::NotStarted(_))
        ));
    }
}
