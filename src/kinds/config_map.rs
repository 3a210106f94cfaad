//! ConfigMap-backed resource kind
//!
//! Watches ConfigMaps carrying the operator's kind label and parses the
//! YAML document stored under the `config` key into the entity type.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::ListParams, Api, Client, ResourceExt};
use tracing::debug;

use super::{collect_desired, ConversionErrorPolicy, ConvertFn, PredicateFn, ResourceKind};
use crate::config::ALL_NAMESPACES;
use crate::entity::EntityInfo;
use crate::error::{Error, Result};
use crate::identity::OperatorIdentity;
use crate::operator::Dispatcher;
use crate::watcher::{AbstractWatcher, WatcherBuilder};

/// Data key holding the embedded configuration
pub const CONFIG_KEY: &str = "config";

/// Parse the `config` entry of a ConfigMap into `T`
pub fn parse_config_map<T: EntityInfo>(cm: &ConfigMap) -> Result<T> {
    let name = cm.name_any();
    let payload = cm
        .data
        .as_ref()
        .and_then(|data| data.get(CONFIG_KEY))
        .ok_or_else(|| Error::conversion(&name, format!("missing '{}' key", CONFIG_KEY)))?;

    let mut entity: T = serde_yaml::from_str(payload)
        .map_err(|e| Error::conversion(&name, format!("invalid '{}' payload: {}", CONFIG_KEY, e)))?;
    entity.set_identity(&name, cm.namespace().as_deref());
    Ok(entity)
}

/// Operator backing that watches labelled ConfigMaps
pub struct ConfigMapKind<T> {
    convert: ConvertFn<ConfigMap, T>,
    predicate: PredicateFn<ConfigMap>,
    policy: ConversionErrorPolicy,
}

impl<T: EntityInfo> Default for ConfigMapKind<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityInfo> ConfigMapKind<T> {
    /// ConfigMap kind with the default `config` key parser
    pub fn new() -> Self {
        Self {
            convert: Arc::new(parse_config_map::<T>),
            predicate: Arc::new(|_: &ConfigMap| true),
            policy: ConversionErrorPolicy::default(),
        }
    }

    /// Replace the ConfigMap to entity conversion
    pub fn with_convert<F>(mut self, convert: F) -> Self
    where
        F: Fn(&ConfigMap) -> Result<T> + Send + Sync + 'static,
    {
        self.convert = Arc::new(convert);
        self
    }

    /// Accept only ConfigMaps passing `predicate`, on top of the label selector
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConfigMap) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn with_conversion_error_policy(mut self, policy: ConversionErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Convert one ConfigMap with the configured function
    pub fn convert(&self, cm: &ConfigMap) -> Result<T> {
        (self.convert)(cm)
    }

    /// Whether a ConfigMap passes the deep filter
    pub fn is_supported(&self, cm: &ConfigMap) -> bool {
        (self.predicate)(cm)
    }

    fn api(client: &Client, namespace: &str) -> Api<ConfigMap> {
        if namespace == ALL_NAMESPACES {
            Api::all(client.clone())
        } else {
            Api::namespaced(client.clone(), namespace)
        }
    }
}

#[async_trait]
impl<T: EntityInfo> ResourceKind<T> for ConfigMapKind<T> {
    fn kind_name(&self) -> &'static str {
        "ConfigMap"
    }

    async fn on_init(
        &self,
        _client: &Client,
        identity: &OperatorIdentity,
        _is_openshift: bool,
    ) -> Result<()> {
        debug!(
            operator = %identity.operator_name(),
            selector = %identity.selector().to_label_selector(),
            "Watching ConfigMaps by label"
        );
        Ok(())
    }

    async fn watch(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
        dispatcher: Arc<Dispatcher<T>>,
    ) -> Result<Arc<dyn AbstractWatcher>> {
        let handle = WatcherBuilder::new(Self::api(client, namespace))
            .with_labels(&identity.selector().to_label_selector())
            .with_convert(self.convert.clone())
            .with_predicate(self.predicate.clone())
            .with_dispatcher(dispatcher)
            .watch()
            .await?;
        Ok(Arc::new(handle))
    }

    async fn desired_set(
        &self,
        client: &Client,
        identity: &OperatorIdentity,
        namespace: &str,
    ) -> Result<HashSet<T>> {
        let params = ListParams::default().labels(&identity.selector().to_label_selector());
        let list = Self::api(client, namespace).list(&params).await?;
        collect_desired(
            list.items,
            self.predicate.as_ref(),
            self.convert.as_ref(),
            self.policy,
            identity.operator_name(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;
    use serde::Deserialize;

    use super::*;

    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
    struct JobInfo {
        #[serde(default)]
        name: String,
        #[serde(default)]
        namespace: Option<String>,
        image: String,
        #[serde(default)]
        replicas: u32,
    }

    impl EntityInfo for JobInfo {
        fn set_identity(&mut self, name: &str, namespace: Option<&str>) {
            self.name = name.to_string();
            self.namespace = namespace.map(str::to_string);
        }
    }

    fn config_map(data: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("job-a".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            data: data.map(|d| BTreeMap::from([(CONFIG_KEY.to_string(), d.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_config_map_sets_identity() {
        let job: JobInfo = parse_config_map(&config_map(Some("image: busybox\nreplicas: 2\n"))).unwrap();
        assert_eq!(job.name, "job-a");
        assert_eq!(job.namespace.as_deref(), Some("ns1"));
        assert_eq!(job.image, "busybox");
        assert_eq!(job.replicas, 2);
    }

    #[test]
    fn test_identity_keeps_equal_payloads_apart() {
        let mut other = config_map(Some("image: busybox\n"));
        other.metadata.name = Some("job-b".to_string());

        let desired = collect_desired(
            vec![config_map(Some("image: busybox\n")), other],
            &|_: &ConfigMap| true,
            &parse_config_map::<JobInfo>,
            ConversionErrorPolicy::Skip,
            "'Job' operator",
        )
        .unwrap();
        assert_eq!(desired.len(), 2);
    }

    #[test]
    fn test_parse_config_map_missing_payload() {
        let err = parse_config_map::<JobInfo>(&config_map(None)).unwrap_err();
        assert!(err.to_string().contains("missing 'config' key"));
    }

    #[test]
    fn test_parse_config_map_malformed_payload() {
        let err = parse_config_map::<JobInfo>(&config_map(Some("replicas: [oops"))).unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));
    }

    #[test]
    fn test_default_predicate_accepts_everything() {
        let kind = ConfigMapKind::<JobInfo>::new();
        assert!(kind.is_supported(&config_map(None)));

        let kind = kind.with_predicate(|cm| cm.data.is_some());
        assert!(!kind.is_supported(&config_map(None)));
    }

    #[test]
    fn test_custom_convert_is_used() {
        let kind = ConfigMapKind::<JobInfo>::new().with_convert(|cm| {
            Ok(JobInfo {
                name: cm.name_any(),
                image: "fixed".to_string(),
                ..Default::default()
            })
        });
        let job = kind.convert(&config_map(None)).unwrap();
        assert_eq!(job.image, "fixed");
    }
}
