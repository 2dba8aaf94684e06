use std::collections::{BTreeMap, HashMap};

use envconfig::Envconfig;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeStatus, Pod, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use driftrs::config::Settings;

/// A worker node with the labels the adapter requires. `spot` switches
/// the lifecycle label.
pub fn worker_node(name: &str, instance_type: &str, spot: bool, cpu: &str, memory: &str) -> Node {
    let mut labels = BTreeMap::from([
        (
            "node.kubernetes.io/instance-type".to_string(),
            instance_type.to_string(),
        ),
        (
            "topology.kubernetes.io/region".to_string(),
            "eu-central-1".to_string(),
        ),
    ]);
    if spot {
        labels.insert("node.kubernetes.io/lifecycle".to_string(), "spot".to_string());
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(NodeStatus {
            allocatable: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.into())),
                ("memory".to_string(), Quantity(memory.into())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A Running, ReplicaSet-owned pod placed on `node`.
pub fn running_pod(ns: &str, name: &str, rs: &str, node: &str, cpu: &str, memory: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            uid: Some(format!("uid-{ns}-{name}")),
            labels: Some(BTreeMap::from([("app".to_string(), rs.to_string())])),
            owner_references: Some(vec![OwnerReference {
                kind: "ReplicaSet".into(),
                name: rs.into(),
                api_version: "apps/v1".into(),
                uid: format!("uid-rs-{rs}"),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.into()),
            containers: vec![Container {
                name: "main".into(),
                image: Some("busybox".into()),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity(cpu.into())),
                        ("memory".to_string(), Quantity(memory.into())),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A pod the scheduler cannot place, for the safety gate.
pub fn unschedulable_pod(ns: &str, name: &str) -> Pod {
    let mut pod = running_pod(ns, name, "stuck", "", "100m", "128Mi");
    pod.status.as_mut().unwrap().phase = Some("Pending".into());
    pod.spec.as_mut().unwrap().node_name = None;
    pod
}

/// A disruption budget selecting `app=<rs>` pods in `ns`.
pub fn disruption_budget(ns: &str, rs: &str, max_unavailable: i32) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(format!("{rs}-pdb")),
            namespace: Some(ns.into()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([("app".to_string(), rs.to_string())])),
                match_expressions: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Settings sized for tests, with per-test overrides on top.
pub fn settings(overrides: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = HashMap::from([
        ("DRIFT_POPULATION_SIZE".to_string(), "60".to_string()),
        ("DRIFT_MAX_GENERATIONS".to_string(), "30".to_string()),
    ]);
    for &(k, v) in overrides {
        env.insert(k.to_string(), v.to_string());
    }
    Settings::init_from_hashmap(&env).expect("test settings")
}
