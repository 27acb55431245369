#![allow(dead_code, unused_imports)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use agent::{AgentConfig, AgentError};
pub use revealer::{Dumper, DumperConfig, SymbolKind};

pub const TEST_PACKAGE: &str = "com.example.demo";
pub const TEST_PID: u32 = 777;

pub fn test_config(data_root: &Path) -> AgentConfig {
    AgentConfig {
        data_root: data_root.to_path_buf(),
        ..AgentConfig::default()
    }
}

/// Dumper for `TEST_PACKAGE` under `data_root` with a fixed file prefix.
pub fn start_dumper(data_root: &Path) -> Arc<Dumper> {
    let mut config = test_config(data_root).dumper_config(TEST_PACKAGE, TEST_PID);
    config.random_prefix = Some("000042".to_string());
    Dumper::start(config).expect("dumper start should succeed")
}

pub fn write_package_file(data_root: &Path, name: &str, contents: &str) {
    let dir = data_root.join(TEST_PACKAGE);
    std::fs::create_dir_all(&dir).expect("package dir should be created");
    std::fs::write(dir.join(name), contents).expect("package file write should succeed");
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
