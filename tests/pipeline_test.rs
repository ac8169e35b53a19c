//! NDJSON pipeline tests: input handling, dead-letter output and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use docfeed::{Pipeline, PipelineStats};
use docfeed_core::{DeadLetterSink, TestClock};
use docfeed_delivery::{
    dead_letter::{DeadLetterRecord, JsonLinesDeadLetterSink},
    DeliveryConfig, DeliveryEngine, Url,
};
use docfeed_testing::{init_test_tracing, MockDocumentStore, RecordingDeadLetterSink};
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

fn engine(store: &MockDocumentStore, sink: Arc<dyn DeadLetterSink>) -> Result<DeliveryEngine> {
    let config = DeliveryConfig::new(Url::parse(&store.url())?, "news", "article");
    Ok(DeliveryEngine::with_clock(config, sink, Arc::new(TestClock::new()))?)
}

#[tokio::test]
async fn malformed_and_blank_lines_are_skipped() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.respond_always(200, "{}").await;
    let sink = Arc::new(RecordingDeadLetterSink::new());

    let input = concat!(
        "{\"id\":\"a\",\"text\":\"first\"}\n",
        "\n",
        "not json\n",
        "   \n",
        "[1,2,3]\n",
        "{\"id\":\"b\",\"text\":\"second\"}",
    );
    let pipeline = Pipeline::new(engine(&store, sink.clone())?, 4, CancellationToken::new());
    let stats = pipeline.run(input.as_bytes()).await?;

    assert_eq!(
        stats,
        PipelineStats { received: 2, rejected: 2, delivered: 2, dead_lettered: 0 }
    );
    assert!(sink.is_empty());

    let mut ids: Vec<String> = store
        .received_writes()
        .await
        .iter()
        .map(|write| write.document_id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, ["a", "b"]);

    Ok(())
}

#[tokio::test]
async fn invalid_utf8_line_skipped_without_stopping_input() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.respond_always(200, "{}").await;
    let sink = Arc::new(RecordingDeadLetterSink::new());

    let lines: [&[u8]; 5] = [
        b"{\"id\":\"a\"}\n",
        b"{\"id\":\"\xff\"}\n",
        b"\xfe\xfe\r\n",
        b"{\"id\":\"b\"}\r\n",
        b"{\"id\":\"c\"}\n",
    ];
    let input = lines.concat();
    let pipeline = Pipeline::new(engine(&store, sink.clone())?, 2, CancellationToken::new());
    let stats = pipeline.run(input.as_slice()).await?;

    assert_eq!(
        stats,
        PipelineStats { received: 3, rejected: 2, delivered: 3, dead_lettered: 0 }
    );

    let mut ids: Vec<String> = store
        .received_writes()
        .await
        .iter()
        .map(|write| write.document_id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, ["a", "b", "c"]);
    assert!(sink.is_empty());

    Ok(())
}

#[tokio::test]
async fn rejected_documents_reach_the_dead_letter_sink() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.sequence().then(400, "bad field").mount().await;
    store.respond_always(200, "{}").await;
    let sink = Arc::new(RecordingDeadLetterSink::new());

    let input = "{\"id\":\"a\"}\n{\"id\":\"b\"}\n{\"id\":\"c\"}\n";
    let pipeline = Pipeline::new(engine(&store, sink.clone())?, 1, CancellationToken::new());
    let stats = pipeline.run(input.as_bytes()).await?;

    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dead_lettered, 1);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0.get("id"), Some(&json!("a")));
    assert_eq!(records[0].1, "HTTP 400: bad field");

    Ok(())
}

#[tokio::test]
async fn dead_letter_file_gets_one_record_per_event() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.respond_always(404, "no such document type").await;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dead-letters.jsonl");
    let sink = Arc::new(JsonLinesDeadLetterSink::open(&path).await?);

    let input = "{\"id\":\"a\",\"n\":1}\n{\"id\":\"b\",\"n\":2}\n";
    let pipeline = Pipeline::new(engine(&store, sink)?, 2, CancellationToken::new());
    let stats = pipeline.run(input.as_bytes()).await?;
    assert_eq!(stats.dead_lettered, 2);

    let contents = tokio::fs::read_to_string(&path).await?;
    let mut records = contents
        .lines()
        .map(serde_json::from_str::<DeadLetterRecord>)
        .collect::<Result<Vec<_>, _>>()?;
    records.sort_by_key(|record| record.event.get("n").and_then(serde_json::Value::as_u64));

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].event.get("id"), Some(&json!("a")));
    assert_eq!(records[1].event.get("id"), Some(&json!("b")));
    assert!(records.iter().all(|record| record.reason == "HTTP 404: no such document type"));

    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_reads_nothing() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.respond_always(200, "{}").await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let sink = Arc::new(RecordingDeadLetterSink::new());
    let pipeline = Pipeline::new(engine(&store, sink)?, 4, shutdown);
    let stats = pipeline.run("{\"id\":\"a\"}\n".as_bytes()).await?;

    assert_eq!(stats, PipelineStats::default());
    assert_eq!(store.write_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn shutdown_drains_in_flight_deliveries() -> Result<()> {
    init_test_tracing();
    let store = MockDocumentStore::start().await;
    store.respond_slowly(200, Duration::from_millis(300)).await;

    let (reader, mut writer) = tokio::io::duplex(1024);
    writer.write_all(b"{\"id\":\"a\"}\n{\"id\":\"b\"}\n").await?;

    let shutdown = CancellationToken::new();
    let sink = Arc::new(RecordingDeadLetterSink::new());
    let pipeline = Pipeline::new(engine(&store, sink.clone())?, 4, shutdown.clone());
    let run = tokio::spawn(async move { pipeline.run(BufReader::new(reader)).await });

    // Input stays open, so only the shutdown ends the read loop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let stats = run.await??;

    assert_eq!(stats.received, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(store.write_count().await, 2);
    assert!(sink.is_empty());

    drop(writer);
    Ok(())
}
