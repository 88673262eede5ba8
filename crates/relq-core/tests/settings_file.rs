//! Loading settings from disk and feeding them into logging setup.

use relq_core::logging::setup_logging;
use relq_core::settings_loader;

#[test]
fn test_toml_file_with_env_overrides() {
    let dir = std::env::temp_dir().join("relq_core_it_settings");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("relq.toml");
    std::fs::write(
        &path,
        "debug = false\nlog_level = \"error\"\n[database]\nengine = \"postgresql\"\n",
    )
    .unwrap();

    std::env::set_var("RELQ_LOG_LEVEL", "relq_db=trace");
    let settings = settings_loader::from_toml_file_with_env(&path).unwrap();
    std::env::remove_var("RELQ_LOG_LEVEL");

    assert_eq!(settings.log_level, "relq_db=trace");
    assert_eq!(settings.database.engine, "postgresql");
    assert_eq!(settings.database.name, ":memory:");

    // Installing twice must not panic.
    let _ = setup_logging(&settings);
    let _ = setup_logging(&settings);

    std::fs::remove_file(&path).ok();
    std::fs::remove_dir(&dir).ok();
}
