use std::time::Duration;

use serde_json::{Value, json};
use similar_asserts::assert_eq;
use sketchrelay_config::{Config, TargetList};
use sketchrelay_server::services::scrape::ScrapeError;
use sketchrelay_server::{Pipeline, PipelineState};
use sketchrelay_test::MockUpstream;

/// Renders one gauge sample per series index.
fn exposition(indexes: impl IntoIterator<Item = usize>) -> String {
    let mut body = String::from("# HELP cpu Load of the machine.\n# TYPE cpu gauge\n");
    for index in indexes {
        body.push_str(&format!("cpu{{machineid=\"machine_{index}\",core=\"0\"}} {index}\n"));
    }
    body
}

/// Configuration that sends everything to `shards`, starting at its first port.
fn config_json(shards: &MockUpstream) -> Value {
    json!({
        "relay": {"control_url": shards.url()},
        "routing": {
            "base_port": shards.port(),
            "machines_per_port": 200,
            "port_blocklist": [],
        },
        "scrape": {"timeout": 0.2},
        "dispatch": {
            "timeout": 0.2,
            "retries": 2,
            "backoff": 0.01,
            "batch_interval": 0.0,
        },
        "registration": {"timeout": 1.0, "grace": 0.0},
    })
}

fn targets(upstreams: &[&MockUpstream]) -> TargetList {
    let list = upstreams
        .iter()
        .map(|u| format!("\"{}\"", u.target()))
        .collect::<Vec<_>>()
        .join(", ");

    TargetList::from_yaml_str(&format!(
        "scrape_configs:\n  - scrape_interval: 1s\n    static_configs:\n      - targets: [{list}]\n"
    ))
    .unwrap()
}

fn pipeline(config: Value, targets: TargetList) -> Pipeline {
    let config = Config::from_json_value(config).unwrap();
    Pipeline::new(&config, targets).unwrap()
}

#[tokio::test]
async fn test_partial_target_failure_shares_timestamp() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let first = MockUpstream::builder()
        .metrics_body(exposition(0..2))
        .start()
        .await;
    let second = MockUpstream::builder()
        .metrics_body(exposition(2..4))
        .start()
        .await;
    let hung = MockUpstream::builder()
        .metrics_body(exposition(4..6))
        .metrics_delay(Duration::from_secs(5))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&first, &second, &hung]));
    let report = pipeline.run_cycle().await;

    assert_eq!(report.failed_targets(), 1);
    assert!(matches!(report.scrapes[2].error, Some(ScrapeError::Timeout)));
    assert_eq!(report.scraped_samples(), 4);
    assert_eq!(report.dispatch.delivered_samples(), 4);

    let ingests = shards.ingests();
    assert_eq!(ingests.len(), 1);
    assert_eq!(ingests[0].timestamp(), report.timestamp.as_millis());
    assert_eq!(
        ingests[0].label_values("machineid"),
        ["machine_0", "machine_1", "machine_2", "machine_3"]
    );
}

#[tokio::test]
async fn test_failed_scrape_statuses() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let broken = MockUpstream::builder().metrics_status(503).start().await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&broken]));
    let report = pipeline.run_cycle().await;

    assert!(matches!(
        report.scrapes[0].error,
        Some(ScrapeError::BadStatus(status)) if status.as_u16() == 503
    ));
    assert!(report.dispatch.outcomes.is_empty());
    assert_eq!(shards.ingest_attempts(), 0);
}

#[tokio::test]
async fn test_invalid_lines_are_skipped() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let target = MockUpstream::builder()
        .metrics_body(format!("{}this is {{ not valid\n", exposition([7])))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let report = pipeline.run_cycle().await;

    assert_eq!(report.invalid_lines(), 1);
    assert_eq!(report.scraped_samples(), 1);
    assert_eq!(shards.ingests().len(), 1);
}

#[tokio::test]
async fn test_bounded_retry_against_hung_shard() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder()
        .ingest_delay(Duration::from_secs(2))
        .start()
        .await;
    let target = MockUpstream::builder()
        .metrics_body(exposition(0..3))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let report = pipeline.run_cycle().await;

    let outcome = &report.dispatch.outcomes[0];
    assert_eq!(outcome.attempts, 3);
    assert!(!outcome.is_delivered());
    assert_eq!(report.dispatch.dropped_samples(), 3);
    assert_eq!(shards.ingest_attempts(), 3);
    assert_eq!(pipeline.sent_counter().get(), 0);
}

#[tokio::test]
async fn test_rejected_batch_is_not_retried() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().ingest_status(500).start().await;
    let target = MockUpstream::builder()
        .metrics_body(exposition(0..3))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let report = pipeline.run_cycle().await;

    let outcome = &report.dispatch.outcomes[0];
    assert_eq!(outcome.attempts, 1);
    assert_eq!(
        outcome.error.as_ref().unwrap().to_string(),
        "shard rejected batch with status 500 Internal Server Error: shard rejected the batch"
    );
    assert_eq!(shards.ingest_attempts(), 1);
    assert_eq!(pipeline.sent_counter().get(), 0);
}

#[tokio::test]
async fn test_counter_grows_by_delivered_samples() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start_range(2).await;
    let target = MockUpstream::builder()
        .metrics_body(exposition([0, 1, 2, 3, 200]))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let counter = pipeline.sent_counter();

    pipeline.run_cycle().await;
    assert_eq!(counter.get(), 5);

    let mut ports: Vec<_> = shards.ingests().iter().map(|i| (i.port, i.len())).collect();
    ports.sort();
    assert_eq!(ports, [(shards.ports()[0], 4), (shards.ports()[1], 1)]);

    shards.set_ingest_status(400);
    pipeline.run_cycle().await;
    assert_eq!(counter.get(), 5);

    shards.set_ingest_status(200);
    pipeline.run_cycle().await;
    assert_eq!(counter.get(), 10);
}

#[tokio::test]
async fn test_blocklisted_shard_receives_nothing() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start_range(2).await;
    let blocked = shards.ports()[1];
    let target = MockUpstream::builder()
        .metrics_body(exposition([0, 200, 201, 399]))
        .start()
        .await;

    let mut config = config_json(&shards);
    config["routing"]["port_blocklist"] = json!([blocked]);

    let mut pipeline = pipeline(config, targets(&[&target]));
    let report = pipeline.run_cycle().await;

    assert_eq!(report.dispatch.blocked_samples(), 3);
    assert_eq!(report.dispatch.delivered_samples(), 1);
    assert!(shards.ingests().iter().all(|i| i.port != blocked));
    assert_eq!(shards.ingest_attempts(), 1);
}

#[tokio::test]
async fn test_batches_are_split_in_order() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let target = MockUpstream::builder()
        .metrics_body(exposition(0..5))
        .start()
        .await;

    let mut config = config_json(&shards);
    config["dispatch"]["batch_max_size"] = json!(2);

    let mut pipeline = pipeline(config, targets(&[&target]));
    let report = pipeline.run_cycle().await;

    let sizes: Vec<_> = report.dispatch.outcomes.iter().map(|o| o.samples).collect();
    assert_eq!(sizes, [2, 2, 1]);

    let ingests = shards.ingests();
    let keys: Vec<_> = ingests
        .iter()
        .flat_map(|i| i.label_values("machineid"))
        .collect();
    assert_eq!(
        keys,
        ["machine_0", "machine_1", "machine_2", "machine_3", "machine_4"]
    );
    assert!(ingests.iter().all(|i| i.timestamp() == report.timestamp.as_millis()));
}

#[tokio::test]
async fn test_registration_precedes_dispatch() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let first = MockUpstream::builder()
        .metrics_body(exposition([1]))
        .start()
        .await;
    let second = MockUpstream::builder()
        .metrics_body(exposition([2]))
        .start()
        .await;

    let mut config = config_json(&shards);
    config["scrape"]["series_per_target_hint"] = json!(100);

    let mut pipeline = pipeline(config, targets(&[&first, &second]));
    assert_eq!(pipeline.state(), PipelineState::Bootstrapping);

    let reports = pipeline.run_cycles(1).await;
    assert_eq!(pipeline.state(), PipelineState::Cycling);
    assert_eq!(reports.len(), 1);

    assert_eq!(
        shards.registrations(),
        [json!({
            "num_targets": 2,
            "estimated_timeseries": 200,
            "machines_per_port": 200,
            "start_port": shards.port(),
        })]
    );
    assert_eq!(shards.ingests().len(), 1);
}

#[tokio::test]
async fn test_failed_registration_is_not_fatal() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().register_status(503).start().await;
    let target = MockUpstream::builder()
        .metrics_body(exposition([1]))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let outcome = pipeline.bootstrap().await;
    assert!(!outcome.is_registered());

    let report = pipeline.run_cycle().await;
    assert_eq!(report.dispatch.delivered_samples(), 1);
}

#[tokio::test]
async fn test_empty_target_list() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let targets = TargetList::from_yaml_str(
        "scrape_configs:\n  - static_configs:\n      - targets: []\n",
    )
    .unwrap();

    let mut pipeline = pipeline(config_json(&shards), targets);
    let reports = pipeline.run_cycles(1).await;

    assert!(reports[0].scrapes.is_empty());
    assert_eq!(shards.registrations()[0]["num_targets"], json!(0));
    assert_eq!(shards.ingest_attempts(), 0);
}

#[tokio::test]
async fn test_hung_shard_does_not_block_other_shards() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start_range(2).await;
    let (healthy, hung) = (shards.ports()[0], shards.ports()[1]);
    shards.set_port_ingest_delay(hung, Duration::from_secs(2));

    let target = MockUpstream::builder()
        .metrics_body(exposition([0, 200]))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    let report = pipeline.run_cycle().await;

    assert_eq!(report.dispatch.delivered_samples(), 1);
    assert_eq!(report.dispatch.dropped_samples(), 1);

    let ingests = shards.ingests();
    assert_eq!(ingests.len(), 1);
    assert_eq!(ingests[0].port, healthy);
    assert_eq!(ingests[0].label_values("machineid"), ["machine_0"]);

    assert_eq!(shards.ingest_attempts_on(healthy), 1);
    assert_eq!(shards.ingest_attempts_on(hung), 3);
    assert_eq!(pipeline.sent_counter().get(), 1);
}

#[tokio::test]
async fn test_every_cycle_scrapes_fresh_samples() {
    sketchrelay_test::setup();

    let shards = MockUpstream::builder().start().await;
    let target = MockUpstream::builder()
        .metrics_body(exposition([0]))
        .start()
        .await;

    let mut pipeline = pipeline(config_json(&shards), targets(&[&target]));
    pipeline.run_cycle().await;

    target.set_metrics_body(exposition([1, 2]));
    let report = pipeline.run_cycle().await;

    assert_eq!(report.scraped_samples(), 2);
    assert_eq!(target.metrics_requests(), 2);

    let ingests = shards.ingests();
    assert_eq!(ingests.len(), 2);
    assert_eq!(ingests[0].label_values("machineid"), ["machine_0"]);
    assert_eq!(ingests[1].label_values("machineid"), ["machine_1", "machine_2"]);
}
