#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pipeline_core::traits::NullSink;
    use pipeline_core::{AppConfig, LaunchSignal, MessageKind, PipelineError};
    use pipeline_dispatcher::{Master, Registry};
    use pipeline_testing_utils::{MockLauncher, MockMessenger};
    use tokio::sync::broadcast;
    use tokio::time::{sleep, timeout, Instant};

    fn config(nodes: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.cluster.nodes = nodes.iter().map(|n| n.to_string()).collect();
        config.cluster.program = Some("demo".to_string());
        config.master.bind_address = "127.0.0.1:0".to_string();
        config.scheduler.registration_timeout_seconds = 2;
        config.scheduler.tick_interval_ms = 20;
        config.scheduler.scaling_enabled = false;
        config.scheduler.consolidation_enabled = false;
        config
    }

    fn auto_register(launcher: &MockLauncher, registry: Arc<Registry>) {
        let mut launches = launcher.subscribe();
        tokio::spawn(async move {
            while let Some(request) = launches.recv().await {
                let n: u32 = request.worker_id.parse().unwrap();
                let _ = registry.register(
                    &request.worker_id,
                    format!("{}:{}", request.node, 6000 + n),
                    3000 + n,
                );
            }
        });
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "条件在超时前没有满足");
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_master_places_wires_starts_and_terminates() {
        let launcher = MockLauncher::new();
        let messenger = MockMessenger::new();
        let (shutdown_tx, _) = broadcast::channel(4);

        let master = Arc::new(
            Master::new(
                3,
                &config(&["n1", "n2"]),
                Arc::new(launcher.clone()),
                Arc::new(messenger.clone()),
                Arc::new(NullSink),
                shutdown_tx.clone(),
            )
            .unwrap(),
        );
        auto_register(&launcher, master.registry().clone());

        let running = {
            let master = master.clone();
            tokio::spawn(async move { master.run().await })
        };

        wait_until(|| !messenger.sent_of_kind(MessageKind::StartWorker).is_empty()).await;

        let launches = launcher.launches();
        assert_eq!(launches.len(), 3);
        let nodes: Vec<_> = launches.iter().map(|l| l.node.as_str()).collect();
        assert_eq!(nodes, vec!["n1", "n1", "n2"]);
        assert!(launches[0].command.starts_with("demo --log-level info"));

        let wiring = messenger.sent_of_kind(MessageKind::AddNextStageAddr);
        let edges: Vec<(String, String)> = wiring
            .iter()
            .map(|(to, m)| (to.clone(), m.address().unwrap()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("n1:6001".to_string(), "n1:6002".to_string()),
                ("n1:6002".to_string(), "n2:6003".to_string()),
            ]
        );
        let starts = messenger.sent_of_kind(MessageKind::StartWorker);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].0, "n1:6001");

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let terminated: Vec<u32> = launcher
            .signals_of(LaunchSignal::Terminate)
            .iter()
            .map(|s| s.pid)
            .collect();
        assert_eq!(terminated, vec![3001, 3002, 3003]);
    }

    #[tokio::test]
    async fn test_stage_without_workers_is_fatal() {
        let launcher = MockLauncher::new();
        launcher.fail_worker("2");
        let messenger = MockMessenger::new();
        let (shutdown_tx, _) = broadcast::channel(4);

        let master = Master::new(
            2,
            &config(&["n1", "n2"]),
            Arc::new(launcher.clone()),
            Arc::new(messenger.clone()),
            Arc::new(NullSink),
            shutdown_tx,
        )
        .unwrap();
        auto_register(&launcher, master.registry().clone());

        let result = timeout(Duration::from_secs(3), master.run()).await.unwrap();
        assert!(matches!(result, Err(PipelineError::WorkerStartFailed { .. })));
        assert!(messenger.sent().is_empty());

        let terminated = launcher.signals_of(LaunchSignal::Terminate);
        assert_eq!(terminated.len(), 1);
        assert_eq!(terminated[0].pid, 3001);
    }

    #[tokio::test]
    async fn test_more_stages_than_nodes_still_places_everything() {
        let launcher = MockLauncher::new();
        let (shutdown_tx, _) = broadcast::channel(4);
        let master = Master::new(
            5,
            &config(&["n1"]),
            Arc::new(launcher.clone()),
            Arc::new(MockMessenger::new()),
            Arc::new(NullSink),
            shutdown_tx.clone(),
        )
        .unwrap();
        auto_register(&launcher, master.registry().clone());

        let registry = master.registry().clone();
        let running = tokio::spawn(async move { master.run().await });
        wait_until(|| registry.lock().all_registered() && launcher.launch_count() == 5).await;

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(launcher.signals_of(LaunchSignal::Terminate).len(), 5);
    }
}
