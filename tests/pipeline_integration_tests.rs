// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests wiring real receivers, processors and exporters through
//! the supervisor from a configuration document.

use httpmock::prelude::*;
use std::path::Path;
use std::time::Duration;
use telemeter::init::config::{build_registry, parse_config};
use telemeter::record::Record;
use telemeter::topology::supervisor::PipelineSupervisor;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn config_for(log: &Path, debug: &Path, http_url: &str) -> String {
    format!(
        r#"
[[receivers.file_tail]]
name = "app-log"
file_path = "{log}"
poll_interval = "20ms"

[[processors.multiline]]
name = "stack"
timeout = "1s"

[[processors.transform]]
name = "mask"
field_pattern = 'user=(?P<user>\w+)'

[[processors.transform.mask_rules]]
pattern = 'password=\S+'
replacement = "password=***"

[[exporters.debug_file]]
name = "debug"
path = "{debug}"

[[exporters.http]]
name = "collector"
endpoint = "{http_url}"
timeout = "2s"

[[pipelines]]
name = "logs"
receiver = "app-log"
processors = ["stack", "mask"]
exporters = ["debug", "collector", "missing"]

[pipelines.backpressure]
channel_capacity = 100
batch_size = 10
flush_interval = "50ms"
drop_policy = "block"
"#,
        log = log.display(),
        debug = debug.display(),
    )
}

async fn read_records(path: &Path, want: usize) -> Vec<Record> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let records: Vec<Record> = std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        if records.len() >= want || tokio::time::Instant::now() > deadline {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn file_to_masked_debug_and_http() {
    let server = MockServer::start();
    let collector = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/metrics")
            .body_contains("password=***");
        then.status(200);
    });

    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let debug = dir.path().join("out/debug.log");
    std::fs::write(
        &log,
        "login user=alice password=hunter2\nException: boom\n  at handler()\n",
    )
    .unwrap();

    let cfg = parse_config(&config_for(&log, &debug, &server.url("/v1/metrics"))).unwrap();
    let registry = build_registry(&cfg).unwrap();
    let cancel = CancellationToken::new();
    let supervisor = PipelineSupervisor::new(registry, cancel.clone());
    assert_eq!(1, supervisor.reload(&cfg.pipelines));

    let records = read_records(&debug, 1).await;
    assert!(!records.is_empty());
    let login = &records[0];
    assert_eq!(Some("login user=alice password=***"), login.message());
    assert_eq!(Some("alice"), login.tags["user"].as_str());

    // the stack trace is still open in the multiline buffer; stopping drains it
    cancel.cancel();
    supervisor.shutdown().await.unwrap();

    let records = read_records(&debug, 2).await;
    assert_eq!(2, records.len());
    assert_eq!(Some("Exception: boom\n  at handler()"), records[1].message());

    let position = std::fs::read_to_string(dir.path().join(".position")).unwrap();
    let expected = std::fs::metadata(&log).unwrap().len();
    assert_eq!(expected.to_string(), position.trim());

    assert!(collector.hits() >= 1);
}

#[tokio::test]
async fn reload_replaces_running_pipelines() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let first = dir.path().join("first.log");
    let second = dir.path().join("second.log");
    std::fs::write(&log, "").unwrap();

    let doc = format!(
        r#"
[[receivers.file_tail]]
name = "app-log"
file_path = "{log}"
poll_interval = "20ms"

[[exporters.debug_file]]
name = "first"
path = "{first}"

[[exporters.debug_file]]
name = "second"
path = "{second}"

[[pipelines]]
name = "logs"
receiver = "app-log"
exporters = ["first"]

[pipelines.backpressure]
batch_size = 1
flush_interval = "20ms"
"#,
        log = log.display(),
        first = first.display(),
        second = second.display(),
    );
    let cfg = parse_config(&doc).unwrap();
    let registry = build_registry(&cfg).unwrap();
    let cancel = CancellationToken::new();
    let supervisor = PipelineSupervisor::new(registry, cancel.clone());

    supervisor.reload(&cfg.pipelines);
    let before = supervisor.snapshot().last_reload.unwrap();

    std::fs::write(&log, "one\n").unwrap();
    assert_eq!(1, read_records(&first, 1).await.len());

    let mut swapped = cfg.pipelines.clone();
    swapped[0].exporters = vec!["second".to_string()];
    supervisor.reload(&swapped);
    assert!(supervisor.snapshot().last_reload.unwrap() >= before);
    assert_eq!(1, supervisor.snapshot().pipeline_count);

    // let the retired runner finish stopping, the new one resumes from the
    // persisted offset
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
    std::io::Write::write_all(&mut f, b"two\n").unwrap();

    let records = read_records(&second, 1).await;
    assert_eq!(vec![Some("two")], records.iter().map(|r| r.message()).collect::<Vec<_>>());

    cancel.cancel();
    supervisor.shutdown().await.unwrap();
}
