use octobridge::persistence::PersistenceManager;

#[test]
fn discovered_accounts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("octobridge_state.json");
    let path_str = path.to_str().unwrap();

    let mut manager = PersistenceManager::new(path_str);
    manager.load().unwrap();
    assert!(manager.accounts().is_empty());

    manager.set_accounts(vec!["A-B1C2D3E4".to_string()]);
    manager.save().unwrap();

    let mut restarted = PersistenceManager::new(path_str);
    restarted.load().unwrap();
    assert_eq!(restarted.accounts(), ["A-B1C2D3E4"]);
}

#[test]
fn state_file_is_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut manager = PersistenceManager::new(path.to_str().unwrap());
    manager.set_accounts(vec!["A-1".to_string(), "A-2".to_string()]);
    manager.save().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["accounts"][1], "A-2");
    assert!(parsed["discovered_at"].is_string());
}
