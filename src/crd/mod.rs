//! Custom Resource Definitions for custom-resource backed operators
//!
//! An operator whose entities live in custom resources registers a CRD
//! derived from its identity: group from the prefix, kind from the entity
//! name, and the entity type's JSON schema as the `spec`.

mod deployer;

pub use deployer::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::schema::StructuralSchemaRewriter;
use kube::discovery::ApiResource;
use kube::Client;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AdditionalPrinterColumns;
use crate::entity::InfoType;
use crate::error::{Error, Result};
use crate::identity::{OperatorIdentity, OPERATOR_KIND_LABEL};

/// API version served by generated CRDs
pub const CRD_VERSION: &str = "v1";

/// Printer column type used when none is declared
pub const DEFAULT_COLUMN_TYPE: &str = "string";

/// Status block written by `set_cr_status`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrStatus {
    /// Operator-defined state, e.g. `Running`
    pub state: String,

    /// When the state was written
    pub last_transition_time: DateTime<Utc>,
}

impl CrStatus {
    /// Status with the given state stamped now
    pub fn now(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Everything a deployer needs to register the CRD of one operator
#[derive(Clone, Debug)]
pub struct CrdRequest {
    pub prefix: String,
    pub entity_name: String,
    pub short_names: Vec<String>,
    pub plural_name: String,
    pub printer_columns: Option<AdditionalPrinterColumns>,
    pub info_type: Option<InfoType>,
    pub spec_schema: Value,
    pub is_openshift: bool,
}

impl CrdRequest {
    /// Request for a resolved identity with the given `spec` schema
    pub fn new(identity: &OperatorIdentity, spec_schema: Value, is_openshift: bool) -> Self {
        Self {
            prefix: identity.prefix.clone(),
            entity_name: identity.entity_name.clone(),
            short_names: identity.short_names.clone(),
            plural_name: identity.plural(),
            printer_columns: identity.additional_printer_columns.clone(),
            info_type: identity.info_type.clone(),
            spec_schema,
            is_openshift,
        }
    }

    /// API group, the prefix without its trailing `/`
    pub fn group(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    /// CRD object name, `<plural>.<group>`
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural_name, self.group())
    }
}

/// Handle to a registered CRD, used to build dynamic APIs
#[derive(Clone, Debug)]
pub struct CrdHandle {
    pub name: String,
    pub api_resource: ApiResource,
}

impl CrdHandle {
    /// Handle for the CRD a request would produce
    pub fn from_request(request: &CrdRequest) -> Self {
        let group = request.group().to_string();
        Self {
            name: request.crd_name(),
            api_resource: ApiResource {
                api_version: format!("{}/{}", group, CRD_VERSION),
                group,
                version: CRD_VERSION.to_string(),
                kind: request.entity_name.clone(),
                plural: request.plural_name.clone(),
            },
        }
    }

    /// Handle for a CRD already present in the cluster
    pub fn from_crd(crd: &CustomResourceDefinition) -> Result<Self> {
        let spec = &crd.spec;
        let version = spec
            .versions
            .iter()
            .find(|v| v.storage)
            .or_else(|| spec.versions.iter().find(|v| v.served))
            .ok_or_else(|| Error::crd(format!("CRD {} serves no version", spec.names.plural)))?;

        Ok(Self {
            name: crd.metadata.name.clone().unwrap_or_default(),
            api_resource: ApiResource {
                api_version: format!("{}/{}", spec.group, version.name),
                group: spec.group.clone(),
                version: version.name.clone(),
                kind: spec.names.kind.clone(),
                plural: spec.names.plural.clone(),
            },
        })
    }
}

/// Registers the CRD backing a custom-resource operator
#[async_trait]
pub trait CrdDeployer: Send + Sync {
    async fn init_crds(&self, client: &Client, request: &CrdRequest) -> Result<CrdHandle>;
}

/// OpenAPI v3 schema of `T`, rewritten into a structural schema
pub fn spec_schema<T: JsonSchema>() -> Result<Value> {
    let generator = SchemaSettings::openapi3()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .with_visitor(StructuralSchemaRewriter)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    Ok(serde_json::to_value(schema)?)
}

/// Schema accepting any `spec`
pub fn schemaless_spec() -> Value {
    json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

fn status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "state": { "type": "string" },
            "lastTransitionTime": { "type": "string", "format": "date-time" }
        }
    })
}

fn printer_columns(columns: Option<&AdditionalPrinterColumns>) -> Vec<Value> {
    let mut out = vec![json!({
        "name": "State",
        "type": "string",
        "jsonPath": ".status.state"
    })];

    if let Some(columns) = columns {
        let paths = columns.paths.as_deref().unwrap_or_default();
        for (i, name) in columns.names.iter().enumerate() {
            let Some(path) = paths.get(i) else {
                continue;
            };
            let column_type = columns
                .types
                .as_ref()
                .and_then(|types| types.get(i))
                .map(String::as_str)
                .unwrap_or(DEFAULT_COLUMN_TYPE);
            out.push(json!({
                "name": name,
                "type": column_type,
                "jsonPath": path
            }));
        }
    }

    out.push(json!({
        "name": "Age",
        "type": "date",
        "jsonPath": ".metadata.creationTimestamp"
    }));
    out
}

/// Build the CRD manifest for a request
pub fn build_crd(request: &CrdRequest) -> Result<CustomResourceDefinition> {
    // older OpenShift API servers reject generated structural schemas
    let spec_schema = if request.is_openshift {
        schemaless_spec()
    } else {
        request.spec_schema.clone()
    };

    let kind_label = format!("{}{}", request.prefix, OPERATOR_KIND_LABEL);
    let manifest = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": request.crd_name(),
            "labels": { kind_label: request.entity_name }
        },
        "spec": {
            "group": request.group(),
            "names": {
                "kind": request.entity_name,
                "listKind": format!("{}List", request.entity_name),
                "plural": request.plural_name,
                "singular": request.entity_name.to_lowercase(),
                "shortNames": request.short_names
            },
            "scope": "Namespaced",
            "versions": [{
                "name": CRD_VERSION,
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": spec_schema,
                            "status": status_schema()
                        }
                    }
                },
                "subresources": { "status": {} },
                "additionalPrinterColumns": printer_columns(request.printer_columns.as_ref())
            }]
        }
    });

    Ok(serde_json::from_value(manifest)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct JobSpec {
        image: String,
        replicas: Option<i32>,
    }

    fn request(columns: Option<AdditionalPrinterColumns>, is_openshift: bool) -> CrdRequest {
        let mut config = OperatorConfig::new("Job")
            .with_prefix("example.com/")
            .with_short_names(["jb"]);
        config.additional_printer_columns = columns;
        let identity = OperatorIdentity::resolve(&config, Some(&InfoType::of::<JobSpec>()));
        CrdRequest::new(&identity, spec_schema::<JobSpec>().unwrap(), is_openshift)
    }

    #[test]
    fn test_build_crd_names() {
        let crd = build_crd(&request(None, false)).unwrap();
        assert_eq!(crd.metadata.name.as_deref(), Some("jobs.example.com"));
        assert_eq!(crd.spec.group, "example.com");
        assert_eq!(crd.spec.names.kind, "Job");
        assert_eq!(crd.spec.names.plural, "jobs");
        assert_eq!(crd.spec.names.short_names, Some(vec!["jb".to_string()]));
        assert_eq!(crd.spec.scope, "Namespaced");
        assert!(crd.spec.versions[0].subresources.is_some());
    }

    #[test]
    fn test_build_crd_printer_columns() {
        let columns = AdditionalPrinterColumns {
            names: vec!["Image".into(), "Replicas".into()],
            paths: Some(vec![".spec.image".into(), ".spec.replicas".into()]),
            types: None,
        };
        let crd = build_crd(&request(Some(columns), false)).unwrap();
        let printed = crd.spec.versions[0]
            .additional_printer_columns
            .clone()
            .unwrap();
        let names: Vec<_> = printed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["State", "Image", "Replicas", "Age"]);
        assert_eq!(printed[1].json_path, ".spec.image");
        assert_eq!(printed[2].type_, DEFAULT_COLUMN_TYPE);
    }

    #[test]
    fn test_build_crd_embeds_spec_schema() {
        let crd = build_crd(&request(None, false)).unwrap();
        let value = serde_json::to_value(&crd).unwrap();
        let spec = &value["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"];
        assert_eq!(spec["properties"]["image"]["type"], "string");
    }

    #[test]
    fn test_build_crd_openshift_relaxes_schema() {
        let crd = build_crd(&request(None, true)).unwrap();
        let value = serde_json::to_value(&crd).unwrap();
        let spec = &value["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"];
        assert_eq!(spec["x-kubernetes-preserve-unknown-fields"], true);
    }

    #[test]
    fn test_handle_from_request_and_crd_agree() {
        let request = request(None, false);
        let crd = build_crd(&request).unwrap();
        let from_request = CrdHandle::from_request(&request);
        let from_crd = CrdHandle::from_crd(&crd).unwrap();
        assert_eq!(from_request.name, from_crd.name);
        assert_eq!(from_request.api_resource, from_crd.api_resource);
        assert_eq!(from_crd.api_resource.api_version, "example.com/v1");
    }
}
