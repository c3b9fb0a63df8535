use ota_config::load_config;
use std::path::Path;

#[test]
fn load_valid_fixture() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/device.yml");
    let config = load_config(&path).expect("should load without error");

    assert_eq!(config.device_type, "qemux86-64");
    assert_eq!(config.servers, vec!["https://device.example.invalid".to_string()]);
    assert_eq!(config.tenant_token.as_deref(), Some("test-tenant-token"));
    assert!(!config.static_key);
    assert_eq!(config.data_store_path(), Path::new("/var/lib/ota/ota-store.redb"));
}

#[test]
fn missing_file_returns_error() {
    let path = Path::new("/nonexistent/path/does/not/exist.yml");
    assert!(load_config(path).is_err());
}

#[test]
fn empty_servers_list_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("device.yml");
    std::fs::write(&path, "servers: []\ndevice_type: qemux86-64\n").unwrap();
    assert!(load_config(&path).is_err());
}
