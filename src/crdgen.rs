use kube::CustomResourceExt;

use controller::controller::{FrontProxy, RootShard};

/// Prints the CustomResourceDefinitions owned by the operator as a multi-document YAML stream.
fn main() -> anyhow::Result<()> {
    for crd in [RootShard::crd(), FrontProxy::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
