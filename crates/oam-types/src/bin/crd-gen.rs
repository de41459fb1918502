use kube::CustomResourceExt;
use oam_types::Application;

fn main() {
    let crd = Application::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD");
    println!("{}", yaml);
}
