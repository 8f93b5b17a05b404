mod check_command;
mod config_loading;
mod logging;

use std::io::Write;
use tempfile::NamedTempFile;

pub const TOPOLOGY: &str = r#"
[server]
listen_addr = "127.0.0.1:0"

[[topic]]
name = "order-events"
subscriptions = ["orders", "audit"]

[[queue]]
name = "orders"
visibility_timeout_seconds = 30
max_receive_count = 5
redrive_target = "orders-dlq"

[[queue]]
name = "audit"
max_depth = 1000

[[queue]]
name = "orders-dlq"
"#;

pub fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}
