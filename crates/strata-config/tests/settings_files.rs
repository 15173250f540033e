//! Integration tests for editing settings files and loading them back

use serde_json::{json, Value};
use std::collections::BTreeSet;
use strata_config::editing::{write_value, WriteLocation};
use strata_config::loader::{FolderSettings, UserSettings, WorkspaceSettings};
use strata_config::{DiskFileSystem, EditingErrorCode};
use tempfile::TempDir;

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_folder_writes_land_in_the_right_files() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join(".strata");
    let folder = FolderSettings::new(&config, "settings.json");
    let fs = DiskFileSystem::new();

    let settings = WriteLocation::Settings {
        path: folder.settings_path(),
        section: None,
    };
    write_value(&fs, &settings, "editor.wrap", Some(json!("on")), None)
        .await
        .unwrap();
    write_value(&fs, &settings, "editor.tabSize", Some(json!(2)), Some("rust"))
        .await
        .unwrap();

    let tasks = WriteLocation::Nested {
        path: config.join("tasks.json"),
        strip: Some("tasks"),
    };
    write_value(&fs, &tasks, "tasks.version", Some(json!("2.0.0")), None)
        .await
        .unwrap();

    assert_eq!(
        read_json(&folder.settings_path()),
        json!({"editor.wrap": "on", "[rust]": {"editor.tabSize": 2}})
    );
    assert_eq!(read_json(&config.join("tasks.json")), json!({"version": "2.0.0"}));

    let model = folder.load(&fs, &BTreeSet::new()).await;
    assert_eq!(model.get_value("editor.wrap"), Some(&json!("on")));
    assert_eq!(model.get_value("tasks.version"), Some(&json!("2.0.0")));
    assert_eq!(model.get_override_value("rust", "editor.tabSize"), Some(json!(2)));
}

#[tokio::test]
async fn test_workspace_file_settings_section_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.strata-workspace");
    std::fs::write(&path, r#"{"folders": [{"path": "a"}]}"#).unwrap();
    let fs = DiskFileSystem::new();

    let location = WriteLocation::Settings {
        path: path.clone(),
        section: Some("settings"),
    };
    write_value(&fs, &location, "files.autoSave", Some(json!("afterDelay")), None)
        .await
        .unwrap();

    let written = read_json(&path);
    assert_eq!(written["folders"], json!([{"path": "a"}]));
    assert_eq!(written["settings"], json!({"files.autoSave": "afterDelay"}));

    let document = WorkspaceSettings::new(&path).load(&fs, &BTreeSet::new()).await;
    assert_eq!(document.folders.len(), 1);
    assert_eq!(
        document.model.get_value("files.autoSave"),
        Some(&json!("afterDelay"))
    );

    write_value(&fs, &location, "files.autoSave", None, None)
        .await
        .unwrap();
    assert_eq!(read_json(&path)["settings"], json!({}));
}

#[tokio::test]
async fn test_malformed_user_settings_are_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    let broken = "{ \"editor.wrap\": \"on\", ";
    std::fs::write(&path, broken).unwrap();
    let fs = DiskFileSystem::new();

    let err = write_value(
        &fs,
        &WriteLocation::Settings {
            path: path.clone(),
            section: None,
        },
        "editor.wrap",
        Some(json!("off")),
        None,
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), Some(EditingErrorCode::InvalidConfiguration));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
    // the layer degrades to empty instead of failing
    assert!(UserSettings::new(&path)
        .load(&fs, &BTreeSet::new())
        .await
        .is_empty());
}
