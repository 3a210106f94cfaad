//! CRD registration against the Kubernetes API

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::PostParams,
    runtime::wait::{await_condition, conditions},
    Api, Client,
};
use tracing::{info, warn};

use super::{build_crd, CrdDeployer, CrdHandle, CrdRequest};
use crate::error::{Error, Result};

/// How long to wait for a new CRD to become established
pub const DEFAULT_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Deployer that creates the CRD unless it is already installed
#[derive(Clone, Debug)]
pub struct KubeCrdDeployer {
    establish_timeout: Duration,
}

impl Default for KubeCrdDeployer {
    fn default() -> Self {
        Self {
            establish_timeout: DEFAULT_ESTABLISH_TIMEOUT,
        }
    }
}

impl KubeCrdDeployer {
    pub fn with_establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }
}

#[async_trait]
impl CrdDeployer for KubeCrdDeployer {
    async fn init_crds(&self, client: &Client, request: &CrdRequest) -> Result<CrdHandle> {
        let api: Api<CustomResourceDefinition> = Api::all(client.clone());
        let name = request.crd_name();

        if let Some(existing) = api.get_opt(&name).await? {
            info!(crd = %name, "CustomResourceDefinition already installed, reusing it");
            return CrdHandle::from_crd(&existing);
        }

        let crd = build_crd(request)?;
        info!(crd = %name, openshift = request.is_openshift, "Creating CustomResourceDefinition");

        match api.create(&PostParams::default(), &crd).await {
            Ok(_) => {}
            // created concurrently by another replica
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(crd = %name, "CustomResourceDefinition created concurrently");
            }
            Err(kube::Error::Api(e)) if e.code == 403 && request.is_openshift => {
                return Err(Error::crd(format!(
                    "not allowed to create {}, it must be installed by a cluster administrator: {}",
                    name, e.message
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let established = await_condition(api, &name, conditions::is_crd_established());
        match tokio::time::timeout(self.establish_timeout, established).await {
            Ok(Ok(_)) => {
                info!(crd = %name, "CustomResourceDefinition established");
                Ok(CrdHandle::from_request(request))
            }
            Ok(Err(e)) => Err(Error::crd(format!("waiting for {} failed: {}", name, e))),
            Err(_) => Err(Error::crd(format!(
                "{} not established after {:?}",
                name, self.establish_timeout
            ))),
        }
    }
}
