mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkdown::core::task::{OutputTarget, ProgressEvent, ProgressFn};
use chunkdown::core::{ChunkedTransfer, TransferContext, TransferError, TransferOptions};
use common::{options, sample, temp_dir, temp_files, MemoryClient, URL};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn round_trip_reproduces_remote_bytes() {
    let root = tempdir().unwrap();
    let output = root.path().join("out/data.bin");
    let data = sample(1000);
    let client = Arc::new(MemoryClient::new(data.clone()));

    let report = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(&root.path().join("tmp"), 4, 64))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert_eq!(report.total_size, 1000);
    assert_eq!(report.fetched_bytes, 1000);
    assert_eq!(client.requests().len(), 16);
    assert_eq!(client.head_calls(), 1);
    assert!(!temp_dir(&root.path().join("tmp"), &output).exists());
}

#[tokio::test]
async fn reference_size_splits_into_three_segments() {
    let root = tempdir().unwrap();
    let output = root.path().join("big.bin");
    let data = sample(25_165_824);
    let client = Arc::new(MemoryClient::new(data.clone()));

    let report = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 3, 10_485_760))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(
        client.requests(),
        vec![(0, 10_485_759), (10_485_760, 20_971_519), (20_971_520, 25_165_823)]
    );
    assert_eq!(report.total_size, 25_165_824);
    assert_eq!(std::fs::metadata(&output).unwrap().len(), 25_165_824);
    assert!(std::fs::read(&output).unwrap() == data);
    assert!(!temp_dir(root.path(), &output).exists());
}

#[tokio::test]
async fn completed_temp_segment_is_not_fetched_again() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    let dir = temp_dir(root.path(), &output);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("temp-10-19"), &data[10..20]).unwrap();

    let client = Arc::new(MemoryClient::new(data.clone()));
    let report = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 2, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(client.requests(), vec![(0, 9), (20, 29)]);
    assert_eq!(report.fetched_bytes, 20);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert!(!dir.exists());
}

#[tokio::test]
async fn merged_prefix_resumes_from_output_size() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    std::fs::write(&output, &data[..15]).unwrap();
    // 已经合并过的分片残留，应当被清理
    let dir = temp_dir(root.path(), &output);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("temp-0-9"), &data[..10]).unwrap();

    let client = Arc::new(MemoryClient::new(data.clone()));
    ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 2, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(client.requests(), vec![(15, 24), (25, 29)]);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn corrupt_temp_segment_is_refetched() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    let dir = temp_dir(root.path(), &output);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("temp-10-19"), &data[10..15]).unwrap();

    let client = Arc::new(MemoryClient::new(data.clone()));
    ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 3, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(client.requests(), vec![(0, 9), (10, 19), (20, 29)]);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    let client = Arc::new(MemoryClient::new(data.clone()).failing(10, 2));

    ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(TransferOptions { max_retry: 3, ..options(root.path(), 3, 10) })
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(client.requests_for(10), 3);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn retry_exhaustion_fails_and_keeps_completed_segments() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let client = Arc::new(
        MemoryClient::new(sample(30))
            .failing(0, usize::MAX)
            .with_delay(0, Duration::from_millis(20)),
    );

    let err = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(TransferOptions { max_retry: 2, ..options(root.path(), 3, 10) })
        .run(&TransferContext::new(), None)
        .await
        .unwrap_err();

    match err {
        TransferError::MaxRetriesExceeded { index, start, attempts, source, .. } => {
            assert_eq!(index, 0);
            assert_eq!(start, 0);
            assert_eq!(attempts, 3);
            assert!(matches!(*source, TransferError::HttpStatus { status: 503, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.requests_for(0), 3);

    let dir = temp_dir(root.path(), &output);
    let remaining = temp_files(&dir);
    assert!(remaining.contains(&"temp-10-19".to_string()));
    assert!(remaining.contains(&"temp-20-29".to_string()));
    assert_eq!(std::fs::metadata(dir.join("temp-20-29")).unwrap().len(), 10);
    assert_eq!(std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0), 0);
}

#[tokio::test]
async fn merge_order_is_independent_of_completion_order() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(40);
    let client = Arc::new(
        MemoryClient::new(data.clone())
            .with_delay(0, Duration::from_millis(60))
            .with_delay(10, Duration::from_millis(30)),
    );

    ChunkedTransfer::new(URL, client, OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 4, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn caller_cancellation_keeps_finished_segment() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let client = Arc::new(
        MemoryClient::new(sample(30))
            .with_delay(0, Duration::from_secs(30))
            .with_delay(20, Duration::from_secs(30)),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let on_progress: ProgressFn = Arc::new(move |e: &ProgressEvent| {
        if e.operated >= 10 {
            trigger.cancel();
        }
    });

    let ctx = TransferContext::new();
    let result = tokio::time::timeout(
        TIMEOUT,
        ChunkedTransfer::new(URL, client, OutputTarget::File(output.clone()))
            .with_options(options(root.path(), 3, 10))
            .on_progress(on_progress)
            .run(&ctx, Some(cancel)),
    )
    .await
    .expect("取消后应当很快返回");

    assert!(matches!(result, Err(TransferError::Cancelled)));
    let dir = temp_dir(root.path(), &output);
    assert_eq!(std::fs::metadata(dir.join("temp-10-19")).unwrap().len(), 10);
    assert_eq!(std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0), 0);
    assert!(ctx.running().is_empty());
    assert!(!ctx.is_shutdown());
}

#[tokio::test]
async fn shutdown_stops_running_transfers() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let client = Arc::new(MemoryClient::new(sample(30)).with_delay(0, Duration::from_secs(30)));

    let ctx = TransferContext::new();
    let handle = tokio::spawn({
        let ctx = ctx.clone();
        let transfer = ChunkedTransfer::new(URL, client, OutputTarget::File(output))
            .with_options(options(root.path(), 3, 10));
        async move { transfer.run(&ctx, None).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.running().len(), 1);

    tokio::time::timeout(TIMEOUT, ctx.shutdown()).await.expect("shutdown 应当等到传输结束");
    assert!(ctx.running().is_empty());
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(TransferError::Shutdown)));
}

#[tokio::test]
async fn merges_into_caller_writer() {
    let root = tempdir().unwrap();
    let sink_path = root.path().join("sink.bin");
    let data = sample(100);
    let client = Arc::new(MemoryClient::new(data.clone()));

    let target = OutputTarget::Writer {
        name: root.path().join("virtual.bin"),
        writer: Box::new(tokio::fs::File::create(&sink_path).await.unwrap()),
    };
    ChunkedTransfer::new(URL, client, target)
        .with_options(options(root.path(), 2, 32))
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&sink_path).unwrap(), data);
    assert!(!root.path().join("virtual.bin").exists());
}

#[tokio::test]
async fn complete_output_is_skipped() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    std::fs::write(&output, &data).unwrap();
    // 上一次运行残留的临时目录
    let stale = temp_dir(root.path(), &output);
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("temp-0-9"), &data[..10]).unwrap();
    let client = Arc::new(MemoryClient::new(data.clone()));

    let report = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 2, 10))
        .with_total_size(30)
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(report.fetched_bytes, 0);
    assert!(client.requests().is_empty());
    assert_eq!(client.head_calls(), 0);
    assert!(!stale.exists());
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn overwrite_discards_existing_output() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(30);
    std::fs::write(&output, vec![0u8; 30]).unwrap();
    let client = Arc::new(MemoryClient::new(data.clone()));

    ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(TransferOptions { overwrite: true, ..options(root.path(), 2, 10) })
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert_eq!(client.requests().len(), 3);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn larger_local_file_is_rejected() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    std::fs::write(&output, vec![0u8; 40]).unwrap();
    let client = Arc::new(MemoryClient::new(sample(30)));

    let err = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output))
        .with_options(options(root.path(), 2, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::OutputTooLarge { local: 40, remote: 30 }));
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn in_flight_cap_is_independent_of_worker_count() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let data = sample(60);
    let mut client = MemoryClient::new(data.clone());
    for start in (0..60).step_by(10) {
        client = client.with_delay(start, Duration::from_millis(30));
    }
    let client = Arc::new(client);

    ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(TransferOptions { max_in_flight: 2, ..options(root.path(), 6, 10) })
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    assert!(client.peak_concurrency() <= 2);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn progress_is_monotonic_and_finishes_done() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
    let sink_events = events.clone();
    let on_progress: ProgressFn = Arc::new(move |e: &ProgressEvent| sink_events.lock().unwrap().push(e.clone()));
    let segment_events = Arc::new(Mutex::new(0usize));
    let counter = segment_events.clone();
    let on_segment: ProgressFn = Arc::new(move |_: &ProgressEvent| *counter.lock().unwrap() += 1);

    ChunkedTransfer::new(URL, Arc::new(MemoryClient::new(sample(100))), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 4, 10))
        .on_progress(on_progress)
        .on_segment_progress(on_segment)
        .run(&TransferContext::new(), None)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 10);
    assert!(events.windows(2).all(|w| w[0].operated <= w[1].operated));
    let last = events.last().unwrap();
    assert!(last.done);
    assert_eq!(last.operated, 100);
    assert_eq!(last.percent, 100.0);
    assert!(last.file_name.ends_with("data.bin"));
    assert_eq!(*segment_events.lock().unwrap(), 10);
}

#[tokio::test]
async fn invalid_url_is_rejected_before_registration() {
    let root = tempdir().unwrap();
    let ctx = TransferContext::new();
    let err = ChunkedTransfer::new(
        "not a url",
        Arc::new(MemoryClient::new(sample(10))),
        OutputTarget::File(root.path().join("x.bin")),
    )
    .run(&ctx, None)
    .await
    .unwrap_err();

    assert!(matches!(err, TransferError::InvalidUrl(_)));
    assert!(ctx.running().is_empty());
}

#[tokio::test]
async fn panicking_worker_fails_the_transfer() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let ctx = TransferContext::new();
    let on_segment: ProgressFn = Arc::new(|e: &ProgressEvent| {
        if e.file_name.ends_with("temp-10-19") {
            panic!("分片回调崩溃");
        }
    });

    let result = tokio::time::timeout(
        TIMEOUT,
        ChunkedTransfer::new(URL, Arc::new(MemoryClient::new(sample(30))), OutputTarget::File(output))
            .with_options(options(root.path(), 3, 10))
            .on_segment_progress(on_segment)
            .run(&ctx, None),
    )
    .await
    .expect("工作例程崩溃后传输应当结束");

    assert!(matches!(result, Err(TransferError::Join(_))));
    assert!(ctx.running().is_empty());
}

#[tokio::test]
async fn zero_length_remote_is_rejected() {
    let root = tempdir().unwrap();
    let output = root.path().join("data.bin");
    let client = Arc::new(MemoryClient::new(Vec::new()));
    let ctx = TransferContext::new();

    let err = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(output.clone()))
        .with_options(options(root.path(), 2, 10))
        .run(&ctx, None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::BadContentLength(0)));
    assert_eq!(client.head_calls(), 1);
    assert!(client.requests().is_empty());
    assert!(!output.exists());
    assert!(ctx.running().is_empty());
}

#[tokio::test]
async fn missing_length_is_reported() {
    let root = tempdir().unwrap();
    let client = Arc::new(MemoryClient::new(sample(30)).without_length());

    let err = ChunkedTransfer::new(URL, client.clone(), OutputTarget::File(root.path().join("data.bin")))
        .with_options(options(root.path(), 2, 10))
        .run(&TransferContext::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::ContentLengthMissing(ref url) if url == URL));
    assert!(client.requests().is_empty());
}
