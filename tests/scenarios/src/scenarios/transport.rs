//! Request and broadcast behaviour across the process boundary.

#[cfg(test)]
mod tests {
    use crate::assertions::{eventually, settle};
    use crate::harness::{fast_config, pod_event, pods, Harness, LinkKind, RecordingStore};
    use link_ipc::IpcError;
    use link_types::{ClusterId, ClusterStatus, FrameId, WatchEventType};
    use link_watch::{ResourceStore, SubscribeOptions, Subscriber};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn c1() -> ClusterId {
        ClusterId::new("c1")
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// A handler that never answers in time fails the request with a
    /// timeout; its late reply is dropped and the endpoint keeps working.
    #[tokio::test]
    async fn slow_handler_times_out_once() {
        for kind in LinkKind::ALL {
            let mut config = fast_config();
            config.ipc.request_timeout_ms = 50;
            let harness = Harness::with_config(config).unwrap();
            harness
                .host()
                .endpoint()
                .handle("request:diagnostics", |_args| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("late"))
                })
                .unwrap();
            let display = harness.display(kind);

            let err = display
                .endpoint
                .request("request:diagnostics", vec![])
                .await
                .unwrap_err();
            assert!(matches!(err, IpcError::Timeout { .. }), "{err}");
            assert_eq!(display.endpoint.pending_requests(), 0);

            // Late reply arrives and finds nothing waiting
            tokio::time::sleep(Duration::from_millis(250)).await;
            assert_eq!(display.endpoint.pending_requests(), 0);

            let report = display.control.status(&c1()).await.unwrap();
            assert_eq!(report.status, ClusterStatus::Disconnected);
        }
    }

    /// Requests to a channel nobody handles fail without waiting for the
    /// timeout.
    #[tokio::test]
    async fn unhandled_channel_fails_fast() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let display = harness.display(kind);

            let started = tokio::time::Instant::now();
            let err = display.endpoint.request("request:nope", vec![]).await.unwrap_err();
            assert!(matches!(err, IpcError::NotHandled { ref channel } if channel == "request:nope"));
            assert!(started.elapsed() < Duration::from_secs(1));
        }
    }

    /// Malformed arguments are rejected by the handler, not dropped.
    #[tokio::test]
    async fn malformed_arguments_are_reported() {
        let harness = Harness::new().unwrap();
        let display = harness.display(LinkKind::Stream);

        let err = display
            .endpoint
            .request(link_types::channels::CLUSTER_ACTIVATE, vec![json!(42)])
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Remote { .. }), "{err}");
        assert_eq!(harness.connector().connects(), 0);
    }

    /// Detaching a display leaves the others attached.
    #[tokio::test]
    async fn detached_display_stops_receiving() {
        let harness = Harness::new().unwrap();
        let gone = harness.display(LinkKind::Memory);
        let stays = harness.display(LinkKind::Stream);
        eventually("both attached", || harness.host().endpoint().peer_count() == 2)
            .await
            .unwrap();

        assert!(harness.detach(&gone).await);
        assert_eq!(harness.host().endpoint().peer_count(), 1);

        stays.activate(&c1()).await.unwrap();
        stays.status.wait_for(&c1(), ClusterStatus::Ready).await.unwrap();
        settle().await;
        assert_eq!(gone.status.status(&c1()), ClusterStatus::Disconnected);
    }

    /// Broadcasts a display makes on its own channels reach the owner's
    /// listeners and are not relayed to other displays.
    #[tokio::test]
    async fn display_broadcasts_are_not_relayed() {
        let harness = Harness::new().unwrap();
        let sender = harness.display(LinkKind::Memory);
        let other = harness.display(LinkKind::Stream);
        let channel = "cluster-warning-event-count:c1";

        let seen_by_owner = Arc::new(AtomicUsize::new(0));
        let seen_by_other = Arc::new(AtomicUsize::new(0));
        let owner_count = seen_by_owner.clone();
        let _owner_sub = harness
            .host()
            .endpoint()
            .subscribe_to_broadcast(channel, move |_| {
                owner_count.fetch_add(1, Ordering::SeqCst);
            });
        let other_count = seen_by_other.clone();
        let _other_sub = other.endpoint.subscribe_to_broadcast(channel, move |_| {
            other_count.fetch_add(1, Ordering::SeqCst);
        });

        sender.endpoint.broadcast(channel, json!(3));
        eventually("owner saw the count", || seen_by_owner.load(Ordering::SeqCst) == 1)
            .await
            .unwrap();
        settle().await;
        assert_eq!(seen_by_other.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Broadcast ordering
    // =========================================================================

    /// Events reach a store in the order the cluster produced them.
    #[tokio::test]
    async fn events_arrive_in_upstream_order() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);
            display.activate(&c1()).await.unwrap();
            display.show(FrameId::new(1), &c1()).await.unwrap();

            let store = RecordingStore::new(pods());
            let recorded: Arc<dyn ResourceStore> = store.clone();
            let _sub = display
                .mux
                .subscribe(
                    c1(),
                    pods(),
                    Subscriber::new(FrameId::new(1), recorded),
                    SubscribeOptions::default(),
                )
                .await
                .unwrap();
            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

            for version in 1..=200 {
                let event_type = if version == 1 {
                    WatchEventType::Add
                } else {
                    WatchEventType::Update
                };
                api.emit(&pods(), pod_event(event_type, "p1", version));
            }

            eventually("all events applied", || store.versions().len() == 200)
                .await
                .unwrap();
            assert_eq!(store.versions(), (1..=200).collect::<Vec<_>>());
            assert_eq!(store.reloads(), 0);
        }
    }
}
