use datalogger_operator::crd::DataLogger;
use kube::core::CustomResourceExt;

fn main() {
    let crd = DataLogger::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
