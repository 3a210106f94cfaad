//! CRD YAML Generator
//!
//! Prints the CustomResourceDefinition an operator registers for an entity,
//! with a schemaless `spec`.
//!
//! Usage: cargo run --bin crdgen -- --entity-name Job --prefix example.com/ > deploy/crds/job.yaml

use clap::Parser;

use entity_operator::crd::{build_crd, schemaless_spec, CrdRequest};
use entity_operator::{Error, OperatorConfig, OperatorIdentity};

#[derive(Debug, Parser)]
#[command(name = "crdgen", version, about)]
struct Args {
    /// Kind of the custom resource, e.g. `Job`
    #[arg(long)]
    entity_name: String,

    /// API group followed by `/`, e.g. `example.com/`
    #[arg(long)]
    prefix: String,

    /// Plural name, defaults to the lowercase kind plus `s`
    #[arg(long)]
    plural: Option<String>,

    /// Short name, may be repeated
    #[arg(long = "short-name")]
    short_names: Vec<String>,

    /// Generate the OpenShift flavour
    #[arg(long)]
    openshift: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = OperatorConfig::new(args.entity_name)
        .with_prefix(args.prefix)
        .with_short_names(args.short_names);
    if let Some(plural) = args.plural {
        config = config.with_plural_name(plural);
    }

    let identity = OperatorIdentity::resolve(&config, None);
    if identity.entity_name.is_empty() || identity.prefix.is_empty() {
        return Err(Error::integrity("entity name and prefix must not be empty").into());
    }
    let request = CrdRequest::new(&identity, schemaless_spec(), args.openshift);
    let crd = build_crd(&request)?;

    println!("---");
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
