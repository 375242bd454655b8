//! Activation lifecycle seen from display processes.

#[cfg(test)]
mod tests {
    use crate::assertions::{eventually, settle};
    use crate::harness::{pod_event, pod_key, pods, Harness, LinkKind};
    use link_ipc::IpcError;
    use link_types::{ClusterId, ClusterStatus, FrameId, WatchEventType};
    use link_watch::ControlError;
    use std::time::Duration;

    fn c1() -> ClusterId {
        ClusterId::new("c1")
    }

    // =========================================================================
    // Deduplication
    // =========================================================================

    /// Concurrent activations from several displays share one connection
    /// attempt and all see Ready.
    #[tokio::test]
    async fn concurrent_activations_connect_once() {
        let harness = Harness::new().unwrap();
        harness.connector().set_connect_delay(Duration::from_millis(30));
        let displays: Vec<_> = (0..4)
            .map(|i| harness.display(LinkKind::ALL[i % 2]))
            .collect();

        let mut handles = Vec::new();
        for display in &displays {
            for _ in 0..2 {
                let control = display.control.clone();
                handles.push(tokio::spawn(async move { control.activate(&c1()).await }));
            }
        }
        let local = harness.host().manager().activate(&c1()).await.unwrap();
        assert_eq!(local.status, ClusterStatus::Ready);

        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            assert_eq!(report.status, ClusterStatus::Ready);
        }
        assert_eq!(harness.connector().connects(), 1);

        // Already ready: no new attempt
        displays[0].activate(&c1()).await.unwrap();
        assert_eq!(harness.connector().connects(), 1);
    }

    /// Every display's status board follows the owner's transitions.
    #[tokio::test]
    async fn status_reaches_every_display() {
        let harness = Harness::new().unwrap();
        let left = harness.display(LinkKind::Memory);
        let right = harness.display(LinkKind::Stream);

        left.activate(&c1()).await.unwrap();
        for display in [&left, &right] {
            let report = display.status.wait_for(&c1(), ClusterStatus::Ready).await.unwrap();
            assert!(report.last_error.is_none());
        }

        right.control.disconnect(&c1()).await.unwrap();
        for display in [&left, &right] {
            display.status.wait_for(&c1(), ClusterStatus::Disconnected).await.unwrap();
        }
    }

    // =========================================================================
    // Failure
    // =========================================================================

    /// A failed attempt reports Error with the cause and is not retried
    /// until someone asks again.
    #[tokio::test]
    async fn failed_activation_waits_for_explicit_retry() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let display = harness.display(kind);
            harness.connector().fail_next_connect("connection refused");

            let err = display.activate(&c1()).await.unwrap_err();
            assert!(err.to_string().contains("connection refused"), "{err}");

            let report = display.status.wait_for(&c1(), ClusterStatus::Error).await.unwrap();
            assert!(report.last_error.unwrap().contains("connection refused"));

            settle().await;
            assert_eq!(harness.connector().connects(), 1);

            let report = display.activate(&c1()).await.unwrap();
            assert_eq!(report.status, ClusterStatus::Ready);
            assert!(report.last_error.is_none());
            assert_eq!(harness.connector().connects(), 2);
        }
    }

    /// Watches cannot be opened before the cluster is Ready.
    #[tokio::test]
    async fn subscribe_before_ready_fails() {
        let harness = Harness::new().unwrap();
        let display = harness.display(LinkKind::Memory);

        let store = display.store(&c1(), pods());
        let err = display.subscribe(FrameId::new(1), store).await.unwrap_err();
        assert!(err.to_string().contains("not ready"), "{err}");
        assert!(!display.mux.is_watching(&c1(), &pods()));
        assert_eq!(harness.api("c1").watch_starts(&pods()), 0);
    }

    /// Unknown clusters are rejected by the owner.
    #[tokio::test]
    async fn activating_unknown_cluster_fails() {
        let harness = Harness::new().unwrap();
        let display = harness.display(LinkKind::Stream);

        let err = display.control.activate(&ClusterId::new("nope")).await.unwrap_err();
        assert!(matches!(err, ControlError::Ipc(IpcError::Remote { .. })));
        assert_eq!(harness.connector().connects(), 0);
    }

    // =========================================================================
    // Disconnect and restart
    // =========================================================================

    /// Disconnect resets stores and ends subscriptions; the next activation
    /// is a fresh attempt and old events never arrive.
    #[tokio::test]
    async fn disconnect_then_activate_starts_fresh() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);

            display.activate(&c1()).await.unwrap();
            display.show(FrameId::new(1), &c1()).await.unwrap();
            let store = display.store(&c1(), pods());
            let sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

            api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
            eventually("p1 applied", || store.get(&pod_key("p1")).is_some()).await.unwrap();

            let report = display.control.disconnect(&c1()).await.unwrap();
            assert_eq!(report.status, ClusterStatus::Disconnected);
            eventually("store reset", || store.is_invalid()).await.unwrap();
            assert!(store.is_empty());
            assert!(!sub.is_active());
            eventually("stream released", || api.open_streams(&pods()) == 0).await.unwrap();

            // Nothing is listening upstream any more
            assert_eq!(api.emit(&pods(), pod_event(WatchEventType::Add, "p-old", 2)), 0);
            settle().await;
            assert!(store.get(&pod_key("p-old")).is_none());

            // Releasing after invalidation is a no-op
            sub.release().await.unwrap();

            display.activate(&c1()).await.unwrap();
            assert_eq!(harness.connector().connects(), 2);
            let _sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
            eventually("stream reopened", || api.open_streams(&pods()) == 1).await.unwrap();

            api.emit(&pods(), pod_event(WatchEventType::Add, "p2", 3));
            eventually("p2 applied", || store.get(&pod_key("p2")).is_some()).await.unwrap();
            assert!(store.get(&pod_key("p1")).is_none());
        }
    }

    /// Removing a cluster disconnects it and forgets its frames.
    #[tokio::test]
    async fn removed_cluster_disappears_from_frames() {
        let harness = Harness::new().unwrap();
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();
        display.show(FrameId::new(7), &c1()).await.unwrap();

        harness.host().manager().remove_cluster(&c1()).unwrap();
        display.status.wait_for(&c1(), ClusterStatus::Disconnected).await.unwrap();
        assert!(harness.host().manager().frames().frames_for(&c1()).is_empty());
        assert!(display.control.status(&c1()).await.is_err());
    }
}
