#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use pipeline_core::traits::{perf, NullSink};
    use pipeline_core::{Message, MessageKind, Pipeline, PipelineError, StageInfo};
    use pipeline_infrastructure::{send_message, write_message};
    use pipeline_testing_utils::{MessageCollector, RecordingSink};
    use pipeline_worker::{ExitReason, WorkerOptions, WorkerPhase, WorkerRuntime};
    use serde_json::json;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn options(id: &str, position: usize, master: &str) -> WorkerOptions {
        let mut options = WorkerOptions::new(id, position, master);
        options.bind_host = "127.0.0.1".to_string();
        options.stats_interval = Duration::from_millis(50);
        options.registration_timeout = Duration::from_millis(500);
        options
    }

    fn three_stages() -> Pipeline {
        Pipeline::source(|| 0_u64)
            .then(|n: u64| {
                std::thread::sleep(Duration::from_millis(20));
                n + 1
            })
            .then(|n: u64| n)
            .build()
    }

    async fn registered_address(master: &mut MessageCollector, id: &str) -> String {
        let message = master.expect(MessageKind::StageInfo).await;
        assert_eq!(message.sender, id);
        let info: StageInfo = message.contents_as().unwrap();
        assert_eq!(info.pid, std::process::id());
        info.address
    }

    #[tokio::test]
    async fn test_drain_forwards_queued_items_then_notifies_exit() {
        let mut master = MessageCollector::bind().await;
        let mut downstream = MessageCollector::bind().await;

        let runtime =
            WorkerRuntime::new(&three_stages(), options("7", 1, master.address()), Arc::new(NullSink))
                .unwrap();
        let handle = runtime.drain_handle();
        let phase = runtime.phase();
        let worker = tokio::spawn(runtime.run());

        let address = registered_address(&mut master, "7").await;
        send_message(&address, &Message::add_next_stage_addr(downstream.address()), TIMEOUT)
            .await
            .unwrap();

        let mut upstream = TcpStream::connect(&address).await.unwrap();
        for n in 0..5_u64 {
            write_message(&mut upstream, &Message::stage_result("3", json!(n)))
                .await
                .unwrap();
        }

        let mut received = HashSet::new();
        for message in downstream.expect_many(MessageKind::StageResult, 2).await {
            assert_eq!(message.sender, "7");
            received.insert(message.contents.as_u64().unwrap());
        }
        assert_eq!(*phase.borrow(), WorkerPhase::Running);

        handle.drain();
        let reason = timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, ExitReason::Drained);

        for message in downstream.drain_received() {
            received.insert(message.contents.as_u64().unwrap());
        }
        assert_eq!(received, (1..=5).collect::<HashSet<u64>>());

        let exit = master.expect(MessageKind::NotifyExit).await;
        assert_eq!(exit.sender, "7");
        assert_eq!(exit.contents, json!("7"));
        assert_eq!(*phase.borrow(), WorkerPhase::Exited);
    }

    #[tokio::test]
    async fn test_first_stage_waits_for_start_command() {
        let mut master = MessageCollector::bind().await;
        let mut downstream = MessageCollector::bind().await;

        let counter = Arc::new(AtomicU64::new(0));
        let source = {
            let counter = counter.clone();
            move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst)
            }
        };
        let pipeline = Pipeline::source(source).then(|n: u64| n).build();

        let runtime =
            WorkerRuntime::new(&pipeline, options("1", 0, master.address()), Arc::new(NullSink))
                .unwrap();
        let handle = runtime.drain_handle();
        let mut phase = runtime.phase();
        let worker = tokio::spawn(runtime.run());

        let address = registered_address(&mut master, "1").await;
        send_message(&address, &Message::add_next_stage_addr(downstream.address()), TIMEOUT)
            .await
            .unwrap();
        timeout(TIMEOUT, phase.wait_for(|p| *p == WorkerPhase::AwaitingStart))
            .await
            .unwrap()
            .unwrap();

        assert!(downstream.next(Duration::from_millis(100)).await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        send_message(&address, &Message::start_worker(), TIMEOUT)
            .await
            .unwrap();
        let started = master.expect(MessageKind::StartFirstStage).await;
        assert!(started.timestamp().is_ok());

        let first = downstream.expect(MessageKind::StageResult).await;
        assert_eq!(first.contents, json!(0));

        handle.terminate();
        let reason = timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, ExitReason::Terminated);
    }

    #[tokio::test]
    async fn test_last_stage_reports_completions() {
        let mut master = MessageCollector::bind().await;
        let pipeline = Pipeline::source(|| 1_u64).then(|n: u64| n * 10).build();

        let runtime =
            WorkerRuntime::new(&pipeline, options("4", 1, master.address()), Arc::new(NullSink))
                .unwrap();
        let handle = runtime.drain_handle();
        let worker = tokio::spawn(runtime.run());
        let address = registered_address(&mut master, "4").await;

        let mut upstream = TcpStream::connect(&address).await.unwrap();
        for n in 0..3_u64 {
            write_message(&mut upstream, &Message::stage_result("2", json!(n)))
                .await
                .unwrap();
        }

        let completions = master.expect_many(MessageKind::EndExecution, 3).await;
        for message in &completions {
            assert_eq!(message.sender, "4");
            assert!(message.timestamp().is_ok());
        }

        handle.drain();
        let reason = timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, ExitReason::Drained);
        master.expect(MessageKind::NotifyExit).await;
    }

    #[tokio::test]
    async fn test_perf_log_records_start_and_each_execution() {
        let mut master = MessageCollector::bind().await;
        let sink = RecordingSink::new();
        let pipeline = Pipeline::source(|| 1_u64).then(|n: u64| n + 1).build();

        let runtime =
            WorkerRuntime::new(&pipeline, options("6", 1, master.address()), Arc::new(sink.clone()))
                .unwrap();
        let handle = runtime.drain_handle();
        let worker = tokio::spawn(runtime.run());
        let address = registered_address(&mut master, "6").await;

        let mut upstream = TcpStream::connect(&address).await.unwrap();
        for n in 0..2_u64 {
            write_message(&mut upstream, &Message::stage_result("2", json!(n)))
                .await
                .unwrap();
        }
        master.expect_many(MessageKind::EndExecution, 2).await;

        handle.terminate();
        timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();

        let records = sink.records();
        assert_eq!(records[0], (perf::WORKER_STARTED.to_string(), address));
        assert_eq!(sink.count(perf::WORKER_STARTED), 1);
        assert_eq!(sink.count(perf::STAGE_EXECUTION_STARTED), 2);
        assert_eq!(sink.count(perf::STAGE_EXECUTION_ENDED), 2);

        let kinds: Vec<&str> = records[1..].iter().map(|(kind, _)| kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                perf::STAGE_EXECUTION_STARTED,
                perf::STAGE_EXECUTION_ENDED,
                perf::STAGE_EXECUTION_STARTED,
                perf::STAGE_EXECUTION_ENDED,
            ]
        );
        for (_, detail) in records.iter().filter(|(k, _)| k == perf::STAGE_EXECUTION_ENDED) {
            assert!(detail.parse::<f64>().unwrap() >= 0.0);
        }
    }

    #[tokio::test]
    async fn test_last_stage_ignores_downstream_address() {
        let mut master = MessageCollector::bind().await;
        let downstream = MessageCollector::bind().await;
        let pipeline = Pipeline::source(|| 1_u64).then(|n: u64| n).build();

        let runtime =
            WorkerRuntime::new(&pipeline, options("5", 1, master.address()), Arc::new(NullSink))
                .unwrap();
        let handle = runtime.drain_handle();
        let worker = tokio::spawn(runtime.run());
        let address = registered_address(&mut master, "5").await;

        send_message(&address, &Message::add_next_stage_addr(downstream.address()), TIMEOUT)
            .await
            .unwrap();
        send_message(&address, &Message::stage_result("2", json!(9)), TIMEOUT)
            .await
            .unwrap();
        master.expect(MessageKind::EndExecution).await;

        handle.terminate();
        timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_message_keeps_connection_open() {
        let mut master = MessageCollector::bind().await;
        let pipeline = Pipeline::source(|| 1_u64).then(|n: u64| n).build();

        let runtime =
            WorkerRuntime::new(&pipeline, options("6", 1, master.address()), Arc::new(NullSink))
                .unwrap();
        let handle = runtime.drain_handle();
        let worker = tokio::spawn(runtime.run());
        let address = registered_address(&mut master, "6").await;

        let mut upstream = TcpStream::connect(&address).await.unwrap();
        let unknown = Message::signal("2", MessageKind::Unknown);
        write_message(&mut upstream, &unknown).await.unwrap();
        write_message(&mut upstream, &Message::stage_result("2", json!(3)))
            .await
            .unwrap();
        master.expect(MessageKind::EndExecution).await;

        handle.terminate();
        timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_master_is_registration_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master = listener.local_addr().unwrap().to_string();
        drop(listener);

        let runtime =
            WorkerRuntime::new(&three_stages(), options("9", 1, &master), Arc::new(NullSink))
                .unwrap();
        let result = timeout(TIMEOUT, runtime.run()).await.unwrap();
        assert!(matches!(result, Err(PipelineError::RegistrationTimeout(_))));
    }

    #[test]
    fn test_unknown_position_is_rejected() {
        let result = WorkerRuntime::new(
            &three_stages(),
            options("9", 3, "127.0.0.1:1"),
            Arc::new(NullSink),
        );
        assert!(matches!(result, Err(PipelineError::StageNotFound { position: 3 })));
    }
}
