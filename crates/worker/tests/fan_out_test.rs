#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pipeline_core::Message;
    use pipeline_infrastructure::read_message;
    use pipeline_worker::Connections;
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    async fn connections_with(peers: &[&str]) -> (Connections, Vec<DuplexStream>) {
        let connections = Connections::new(Duration::from_secs(1));
        let mut readers = Vec::new();
        for peer in peers {
            let (writer, reader) = tokio::io::duplex(64 * 1024);
            connections.add(peer.to_string(), Box::new(writer)).await;
            readers.push(reader);
        }
        (connections, readers)
    }

    fn result(n: u64) -> Message {
        Message::stage_result("1", json!(n))
    }

    #[tokio::test]
    async fn test_round_robin_is_even_and_rotating() {
        let (connections, mut readers) = connections_with(&["a", "b", "c"]).await;

        let mut used = Vec::new();
        for n in 0..9 {
            used.push(connections.send_round_robin(&result(n)).await.unwrap());
        }
        assert_eq!(used, vec!["a", "b", "c", "a", "b", "c", "a", "b", "c"]);

        for (index, reader) in readers.iter_mut().enumerate() {
            for round in 0..3_u64 {
                let message = read_message(reader).await.unwrap().unwrap();
                assert_eq!(message.contents, json!(round * 3 + index as u64));
            }
        }
    }

    #[tokio::test]
    async fn test_connection_removed_mid_stream_is_skipped() {
        let (connections, mut readers) = connections_with(&["a", "b", "c"]).await;

        let mut used = Vec::new();
        for n in 0..4 {
            used.push(connections.send_round_robin(&result(n)).await.unwrap());
        }
        assert!(connections.remove("b").await);
        assert!(!connections.remove("b").await);
        for n in 4..9 {
            used.push(connections.send_round_robin(&result(n)).await.unwrap());
        }
        assert_eq!(used, vec!["a", "b", "c", "a", "c", "a", "c", "a", "c"]);

        let reader_b = &mut readers[1];
        assert_eq!(read_message(reader_b).await.unwrap().unwrap().contents, json!(1));
        assert!(read_message(reader_b).await.unwrap().is_none());

        let reader_c = &mut readers[2];
        for expected in [2_u64, 4, 6, 8] {
            let message = read_message(reader_c).await.unwrap().unwrap();
            assert_eq!(message.contents, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_removing_next_in_turn_continues_rotation() {
        let (connections, _readers) = connections_with(&["a", "b", "c"]).await;

        assert_eq!(connections.send_round_robin(&result(0)).await.unwrap(), "a");
        assert_eq!(connections.send_round_robin(&result(1)).await.unwrap(), "b");
        assert!(connections.remove("c").await);

        let mut used = Vec::new();
        for n in 2..6 {
            used.push(connections.send_round_robin(&result(n)).await.unwrap());
        }
        assert_eq!(used, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_send_waits_for_first_connection() {
        let (connections, _) = connections_with(&[]).await;
        let connections = std::sync::Arc::new(connections);

        let sender = {
            let connections = connections.clone();
            tokio::spawn(async move { connections.send_round_robin(&result(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        let (writer, mut reader) = tokio::io::duplex(1024);
        connections.add("late".to_string(), Box::new(writer)).await;

        let address = timeout(Duration::from_secs(2), sender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(address, "late");
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message.contents, json!(1));
    }

    #[tokio::test]
    async fn test_broken_connection_is_removed_and_message_rerouted() {
        let (connections, mut readers) = connections_with(&["a", "b"]).await;
        let reader_b = readers.pop().unwrap();
        drop(reader_b);

        assert_eq!(connections.send_round_robin(&result(1)).await.unwrap(), "a");
        assert_eq!(connections.send_round_robin(&result(2)).await.unwrap(), "a");
        assert!(!connections.contains("b").await);
        assert_eq!(connections.len().await, 1);

        let reader_a = &mut readers[0];
        assert_eq!(read_message(reader_a).await.unwrap().unwrap().contents, json!(1));
        assert_eq!(read_message(reader_a).await.unwrap().unwrap().contents, json!(2));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (connections, _readers) = connections_with(&["a"]).await;
        connections.close_all().await;
        assert!(connections.is_empty().await);
        assert!(connections.send_round_robin(&result(1)).await.is_err());
    }
}
