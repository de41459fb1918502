use kube::CustomResourceExt;
use oam_types::{AppStatus, Application, ApplicationComponent, ApplicationSpec, ApplicationTrait, StepPhase, WorkflowRunPhase};
use serde_json::json;

#[test]
fn spec_uses_wire_field_names() {
    let original = ApplicationSpec {
        components: vec![ApplicationComponent {
            name: "web".into(),
            component_type: "webservice".into(),
            properties: Some(json!({"image": "nginx"})),
            depends_on: vec!["db".into()],
            traits: vec![ApplicationTrait { trait_type: "scaler".into(), properties: Some(json!({"replicas": 1})) }],
            ..Default::default()
        }],
        ..Default::default()
    };
    let j = serde_json::to_value(&original).unwrap();
    assert_eq!(
        j,
        json!({"components": [{
            "name": "web",
            "type": "webservice",
            "properties": {"image": "nginx"},
            "dependsOn": ["db"],
            "traits": [{"type": "scaler", "properties": {"replicas": 1}}]
        }]})
    );
    let back: ApplicationSpec = serde_json::from_value(j).unwrap();
    assert_eq!(back, original);
}

#[test]
fn status_parses_flattened_step_status() {
    let st: AppStatus = serde_json::from_value(json!({
        "workflow": {
            "appRevision": "demo:v1",
            "mode": "StepByStep",
            "phase": "executing",
            "suspend": false,
            "terminated": false,
            "finished": false,
            "steps": [{"id": "a1", "name": "deploy", "type": "deploy", "phase": "running",
                        "subStepsStatus": [{"name": "inner", "phase": "pending"}]}]
        }
    }))
    .unwrap();
    let wf = st.workflow.unwrap();
    assert_eq!(wf.phase, WorkflowRunPhase::Executing);
    assert_eq!(wf.steps[0].step.phase, Some(StepPhase::Running));
    assert_eq!(wf.steps[0].sub_steps_status[0].name, "inner");
}

#[test]
fn crd_targets_core_oam_group() {
    let crd = Application::crd();
    assert_eq!(crd.spec.group, "core.oam.dev");
    assert_eq!(crd.spec.names.kind, "Application");
    let yaml = serde_yaml::to_string(&crd).unwrap();
    assert!(yaml.contains("x-kubernetes-preserve-unknown-fields"));
}
