use dreamteam::registry::{AgentChanges, AgentRegistry, RegistryError};
use dreamteam::{AgentKind, AgentSpec, TeamConfig};

#[test]
fn test_restore_defaults_yields_the_four_builtins_in_order() {
    let mut registry = AgentRegistry::new();
    registry.add(AgentSpec::custom("Poet", "Write verse.", "Writes poems")).unwrap();
    registry.restore_defaults();

    let names: Vec<&str> = registry.specs().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Coder", "Executor", "FileSurfer", "WebSurfer"]);
    assert!(registry.specs().iter().all(|s| s.kind.is_builtin()));
}

#[test]
fn test_builtins_can_be_deleted_but_not_edited() {
    let mut registry = AgentRegistry::new();
    registry.restore_defaults();
    let coder_id = registry.find_by_name("Coder").unwrap().id.clone();

    let before = registry.specs().to_vec();
    let edit = registry.edit(
        &coder_id,
        AgentChanges {
            system_prompt: Some("Be lazy.".to_string()),
            ..AgentChanges::default()
        },
    );
    assert_eq!(edit, Err(RegistryError::ImmutableAgent("Coder".to_string())));
    assert_eq!(registry.specs(), before.as_slice());

    let removed = registry.remove(&coder_id).unwrap();
    assert_eq!(removed.kind, AgentKind::BuiltinCoder);
    assert_eq!(registry.specs().len(), 3);
}

#[test]
fn test_custom_agent_edit_and_remove() {
    let mut registry = AgentRegistry::new();
    let spec = AgentSpec::custom("Poet", "Write verse.", "Writes poems");
    let id = spec.id.clone();
    registry.add(spec).unwrap();

    let edited = registry
        .edit(
            &id,
            AgentChanges {
                description: Some("Writes haiku".to_string()),
                ..AgentChanges::default()
            },
        )
        .unwrap();
    assert_eq!(edited.description, "Writes haiku");
    assert_eq!(edited.system_prompt, "Write verse.");

    assert!(matches!(registry.remove("missing"), Err(RegistryError::NotFound(_))));
    registry.remove(&id).unwrap();
    assert!(registry.specs().is_empty());
}

#[test]
fn test_registry_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agents.json");
    let mut registry = AgentRegistry::new();
    registry.restore_defaults();
    registry
        .add(AgentSpec::retrieval("PolicyBot", "docs-index"))
        .unwrap();
    registry.save_to(&path).unwrap();

    let loaded = AgentRegistry::load_from(&path).unwrap();
    assert_eq!(loaded.specs(), registry.specs());
    assert_eq!(
        loaded.find_by_name("PolicyBot").unwrap().index_name.as_deref(),
        Some("docs-index")
    );
}

#[test]
fn test_loading_a_corrupt_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agents.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(
        AgentRegistry::load_from(&path),
        Err(RegistryError::Persistence(_))
    ));
}

#[test]
fn test_registry_specs_make_a_valid_team() {
    let mut registry = AgentRegistry::new();
    registry.restore_defaults();
    registry
        .add(AgentSpec::retrieval("PolicyBot", "docs-index"))
        .unwrap();
    let team = TeamConfig::new(registry.specs().to_vec());
    assert!(team.validate().is_ok());
}
