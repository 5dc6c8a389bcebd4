//! Prints the ClusterPolicy CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds/clusterpolicy.yaml`

use crds::ClusterPolicy;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ClusterPolicy::crd())?);
    Ok(())
}
