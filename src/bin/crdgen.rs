use kube::CustomResourceExt;
use uptime_k8s::crd::{MaintenanceWindow, Monitor};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Monitor::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&MaintenanceWindow::crd())?);
    Ok(())
}
