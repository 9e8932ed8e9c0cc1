//! Exercises the config-file watcher end to end: editing the file on disk
//! should flow through to `DnsCore`'s live upstream set without a restart
//! (spec §4.8 hot reload).

use std::io::Write;
use std::time::Duration;

use heimdall_forwarder::config::Config;
use heimdall_forwarder::config_watcher::ConfigWatcher;
use heimdall_forwarder::core::DnsCore;
use heimdall_forwarder::managers::Managers;
use heimdall_forwarder::metrics::Metrics;

const INITIAL: &str = r#"
[listen]
udp = "127.0.0.1:0"
tcp = "127.0.0.1:0"

[[upstreams]]
name = "primary"
address = "127.0.0.1:15300"
weight = 10
"#;

const UPDATED: &str = r#"
[listen]
udp = "127.0.0.1:0"
tcp = "127.0.0.1:0"

[[upstreams]]
name = "primary"
address = "127.0.0.1:15300"
weight = 10

[[upstreams]]
name = "secondary"
address = "127.0.0.1:15301"
weight = 5
"#;

#[tokio::test]
async fn editing_the_config_file_updates_the_live_upstream_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heimdall.toml");
    std::fs::write(&path, INITIAL).unwrap();

    let config = Config::load(&path).unwrap();
    let metrics = std::sync::Arc::new(Metrics::new().unwrap());
    let managers = Managers::new(config, Some(path.clone()), metrics.clone(), None).unwrap();
    let core = DnsCore::new(managers, metrics);

    assert_eq!(core.get_upstreams().len(), 1);

    ConfigWatcher::new(path.clone(), core.clone()).spawn();

    // Give the watcher a moment to install before the edit, then rewrite
    // the file in place (truncate + write, not rename, so the same path
    // stays watched).
    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(UPDATED.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if core.get_upstreams().len() == 2 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "config reload did not apply within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
