//! Logger initialisation writes to the configured file

use fanout::core::logging::init_logging;
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn test_json_log_file_honours_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fanout.log");

    init_logging(
        Some("info"),
        Some("json"),
        Some(path.to_str().unwrap()),
        false,
    )
    .unwrap();

    log::debug!("below the configured level");
    log::warn!("dead-letter queue unavailable");
    log::logger().flush();
    std::thread::sleep(Duration::from_millis(50));

    let mut contents = String::new();
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        contents.push_str(&std::fs::read_to_string(entry.unwrap().path()).unwrap());
    }

    assert!(!contents.contains("below the configured level"));
    let line = contents
        .lines()
        .find(|line| line.contains("dead-letter queue unavailable"))
        .expect("warn line written to the log file");
    let record: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(record["level"], "WRN");

    // A second logger cannot be installed over the first
    assert!(init_logging(Some("debug"), None, None, false).is_err());
}
