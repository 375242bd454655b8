//! Upstream stream failures.
//!
//! The owner restarts a broken stream with backoff and tells displays to
//! reload; after too many failures in a row it gives the kind up.

#[cfg(test)]
mod tests {
    use crate::assertions::eventually;
    use crate::harness::{pod, pod_event, pod_key, pods, Harness, LinkKind};
    use link_host::HostMetrics;
    use link_types::{ClusterId, ClusterStatus, FrameId, WatchEventType};
    use link_watch::{ResyncReason, WatchNotice};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn c1() -> ClusterId {
        ClusterId::new("c1")
    }

    async fn next_notice(notices: &mut broadcast::Receiver<WatchNotice>) -> WatchNotice {
        tokio::time::timeout(Duration::from_secs(2), notices.recv())
            .await
            .unwrap()
            .unwrap()
    }

    // =========================================================================
    // Restart
    // =========================================================================

    /// A broken stream is restarted and subscribed stores reload.
    #[tokio::test]
    async fn broken_stream_restarts_and_resyncs() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);
            display.activate(&c1()).await.unwrap();
            display.show(FrameId::new(1), &c1()).await.unwrap();

            let store = display.store(&c1(), pods());
            let _sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();
            let mut notices = display.mux.notices();

            // Upstream state moved on while the stream was down
            api.set_list(&pods(), vec![pod("survivor")]);
            api.break_stream(&pods(), "connection reset");

            let notice = next_notice(&mut notices).await;
            assert!(matches!(
                notice,
                WatchNotice::Resynced {
                    reason: ResyncReason::StreamRestarted { attempt: 1 },
                    ..
                }
            ), "{notice:?}");
            eventually("reloaded", || store.get(&pod_key("survivor")).is_some())
                .await
                .unwrap();
            assert_eq!(api.watch_starts(&pods()), 2);

            // The new stream delivers
            api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
            eventually("p1 applied", || store.get(&pod_key("p1")).is_some())
                .await
                .unwrap();

            let metrics = harness.host().manager().metrics();
            assert_eq!(HostMetrics::get(&metrics.resyncs), 1);
            assert_eq!(HostMetrics::get(&metrics.stream_errors), 1);
            assert_eq!(display.status.status(&c1()), ClusterStatus::Ready);
        }
    }

    // =========================================================================
    // Giving up
    // =========================================================================

    /// When every restart fails the kind becomes unavailable; the cluster
    /// itself stays Ready and other kinds are unaffected.
    #[tokio::test]
    async fn exhausted_recovery_marks_kind_unavailable() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let display = harness.display(LinkKind::Stream);
        display.activate(&c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let _sub = display.subscribe(FrameId::new(1), store).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();
        let mut notices = display.mux.notices();

        api.fail_watches(10);
        api.break_stream(&pods(), "connection reset");

        let notice = next_notice(&mut notices).await;
        assert!(matches!(notice, WatchNotice::Unavailable { .. }), "{notice:?}");
        assert!(display.mux.is_unavailable(&c1(), &pods()));

        let session = harness.host().manager().session(&c1()).unwrap();
        assert!(session.watched_kinds().is_empty());
        assert_eq!(session.status(), ClusterStatus::Ready);
        let metrics = harness.host().manager().metrics();
        assert_eq!(HostMetrics::get(&metrics.unavailable), 1);

        // Another kind still opens normally
        api.fail_watches(0);
        let services = link_types::ResourceKind::new("services");
        let other = display.store(&c1(), services.clone());
        let _other = display.subscribe(FrameId::new(1), other).await.unwrap();
        eventually("services stream open", || api.open_streams(&services) == 1)
            .await
            .unwrap();
    }
}
