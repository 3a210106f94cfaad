//! Entity operator
//!
//! Runs an "echo" operator that logs the lifecycle of its entities. Entities
//! are ConfigMaps labelled `<prefix>kind=<entity>` by default, or custom
//! resources of kind `<entity>` with `--crd`.

use clap::Parser;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use entity_operator::{
    config::LogFormat, ConfigMapKind, CustomResourceKind, EntityInfo, Entrypoint, Operator,
    OperatorConfig, OperatorContext, OperatorHandler, RuntimeConfig,
};

#[derive(Debug, Parser)]
#[command(name = "entity-operator", version, about)]
struct Args {
    #[command(flatten)]
    runtime: RuntimeConfig,

    /// Kind of the echoed entity
    #[arg(long, env = "ENTITY_NAME", default_value = "Echo")]
    entity_name: String,

    /// Label prefix and CRD group
    #[arg(long, env = "ENTITY_PREFIX", default_value = "entity-operator.io/")]
    prefix: String,

    /// Watch custom resources instead of ConfigMaps
    #[arg(long, env = "CRD")]
    crd: bool,
}

/// Free-form entity echoed back to the log
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
struct EchoInfo {
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    name: String,

    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    namespace: Option<String>,

    #[serde(default)]
    message: String,
}

impl EntityInfo for EchoInfo {
    fn set_identity(&mut self, name: &str, namespace: Option<&str>) {
        self.name = name.to_string();
        self.namespace = namespace.map(str::to_string);
    }
}

struct EchoHandler;

#[async_trait::async_trait]
impl OperatorHandler<EchoInfo> for EchoHandler {
    async fn on_add(&self, echo: &EchoInfo, ctx: &OperatorContext<'_, EchoInfo>) -> anyhow::Result<()> {
        info!(
            operator = %ctx.operator_name(),
            namespace = %ctx.namespace(),
            name = %echo.name,
            message = %echo.message,
            "Added"
        );
        let namespace = echo.namespace.as_deref().unwrap_or(ctx.namespace());
        ctx.set_cr_status("Echoed", namespace, &echo.name).await?;
        Ok(())
    }

    async fn on_modify(&self, echo: &EchoInfo, ctx: &OperatorContext<'_, EchoInfo>) -> anyhow::Result<()> {
        info!(
            operator = %ctx.operator_name(),
            namespace = %ctx.namespace(),
            name = %echo.name,
            message = %echo.message,
            "Modified"
        );
        Ok(())
    }

    async fn on_delete(&self, echo: &EchoInfo, ctx: &OperatorContext<'_, EchoInfo>) -> anyhow::Result<()> {
        info!(
            operator = %ctx.operator_name(),
            namespace = %ctx.namespace(),
            name = %echo.name,
            "Deleted"
        );
        Ok(())
    }

    async fn full_reconciliation(&self, ctx: &OperatorContext<'_, EchoInfo>) -> anyhow::Result<()> {
        let desired = ctx.desired_set().await?;
        info!(
            operator = %ctx.operator_name(),
            namespace = %ctx.watch_namespace(),
            entities = desired.len(),
            "Full reconciliation"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.runtime.log_format);

    info!("Starting entity operator");

    let config = OperatorConfig::new(&args.entity_name).with_prefix(&args.prefix);
    let entrypoint = Entrypoint::new(args.runtime);
    let entrypoint = if args.crd {
        entrypoint.register(Operator::new(config, CustomResourceKind::<EchoInfo>::new(), EchoHandler))
    } else {
        entrypoint.register(Operator::new(config, ConfigMapKind::<EchoInfo>::new(), EchoHandler))
    };

    entrypoint.run().await?;

    info!("Entity operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
