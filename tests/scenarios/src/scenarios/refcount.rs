//! Watch sharing.
//!
//! However many stores and displays subscribe to a (cluster, kind), the
//! cluster sees one upstream watch; it stops exactly once, when the last
//! subscriber leaves.

#[cfg(test)]
mod tests {
    use crate::assertions::{eventually, settle};
    use crate::harness::{pod_event, pod_key, pods, Harness, LinkKind};
    use link_host::HostMetrics;
    use link_types::{ClusterId, FrameId, WatchEventType};

    fn c1() -> ClusterId {
        ClusterId::new("c1")
    }

    // =========================================================================
    // One display, two stores
    // =========================================================================

    /// Two stores on one kind share a watch; the first release keeps it,
    /// the second stops it.
    #[tokio::test]
    async fn two_stores_share_one_watch() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);

            display.activate(&c1()).await.unwrap();
            display.show(FrameId::new(1), &c1()).await.unwrap();
            display.show(FrameId::new(2), &c1()).await.unwrap();

            let a = display.store(&c1(), pods());
            let b = display.store(&c1(), pods());
            let sub_a = display.subscribe(FrameId::new(1), a.clone()).await.unwrap();
            let sub_b = display.subscribe(FrameId::new(2), b.clone()).await.unwrap();

            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();
            assert_eq!(api.watch_starts(&pods()), 1);
            assert_eq!(display.mux.subscriber_count(&c1(), &pods()), 2);

            api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
            eventually("p1 in both stores", || {
                a.get(&pod_key("p1")).is_some() && b.get(&pod_key("p1")).is_some()
            })
            .await
            .unwrap();

            sub_a.release().await.unwrap();
            settle().await;
            assert!(display.mux.is_watching(&c1(), &pods()));
            assert_eq!(api.open_streams(&pods()), 1);

            sub_b.release().await.unwrap();
            eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();
            let metrics = harness.host().manager().metrics();
            assert_eq!(HostMetrics::get(&metrics.watch_starts), 1);
            assert_eq!(HostMetrics::get(&metrics.watch_stops), 1);
            assert_eq!(api.watch_starts(&pods()), 1);
        }
    }

    /// Dropping a subscription releases it like an explicit release.
    #[tokio::test]
    async fn dropped_subscription_closes_watch() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let sub = display.subscribe(FrameId::new(1), store).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

        drop(sub);
        eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();
        assert!(!display.mux.is_watching(&c1(), &pods()));
    }

    /// Subscribing again after the last release opens a fresh watch.
    #[tokio::test]
    async fn resubscribe_after_release_reopens() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();
        sub.release().await.unwrap();
        eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();

        let _sub = display.subscribe(FrameId::new(1), store).await.unwrap();
        eventually("stream reopened", || api.open_streams(&pods()) == 1).await.unwrap();
        assert_eq!(api.watch_starts(&pods()), 2);
    }

    // =========================================================================
    // Two displays
    // =========================================================================

    /// Displays each hold the owner's watch; it runs until both let go.
    #[tokio::test]
    async fn two_displays_share_one_watch() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let left = harness.display(LinkKind::Memory);
        let right = harness.display(LinkKind::Stream);

        left.activate(&c1()).await.unwrap();
        left.show(FrameId::new(1), &c1()).await.unwrap();
        right.show(FrameId::new(2), &c1()).await.unwrap();

        let left_store = left.store(&c1(), pods());
        let right_store = right.store(&c1(), pods());
        let left_sub = left.subscribe(FrameId::new(1), left_store.clone()).await.unwrap();
        let right_sub = right.subscribe(FrameId::new(2), right_store.clone()).await.unwrap();

        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();
        assert_eq!(api.watch_starts(&pods()), 1);

        api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
        eventually("p1 on both displays", || {
            left_store.get(&pod_key("p1")).is_some() && right_store.get(&pod_key("p1")).is_some()
        })
        .await
        .unwrap();

        left_sub.release().await.unwrap();
        settle().await;
        assert_eq!(api.open_streams(&pods()), 1);

        api.emit(&pods(), pod_event(WatchEventType::Add, "p2", 2));
        eventually("p2 on the remaining display", || right_store.get(&pod_key("p2")).is_some())
            .await
            .unwrap();

        right_sub.release().await.unwrap();
        eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();
        assert_eq!(api.watch_starts(&pods()), 1);
    }

    // =========================================================================
    // Displays that go away
    // =========================================================================

    /// A display detached by the owner gives up its holds; the watch keeps
    /// running for the display that remains and stops when that one leaves.
    #[tokio::test]
    async fn detached_display_releases_its_holds() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let gone = harness.display(LinkKind::Memory);
        let stays = harness.display(LinkKind::Stream);
        gone.activate(&c1()).await.unwrap();
        stays.show(FrameId::new(2), &c1()).await.unwrap();

        let _gone_sub = gone.subscribe(FrameId::new(1), gone.store(&c1(), pods())).await.unwrap();
        let stays_store = stays.store(&c1(), pods());
        let _stays_sub = stays.subscribe(FrameId::new(2), stays_store.clone()).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

        assert!(harness.detach(&gone).await);
        settle().await;
        assert_eq!(api.open_streams(&pods()), 1);
        api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
        eventually("p1 on the remaining display", || stays_store.get(&pod_key("p1")).is_some())
            .await
            .unwrap();

        assert!(harness.detach(&stays).await);
        eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();
        let session = harness.host().manager().session(&c1()).unwrap();
        assert!(session.watched_kinds().is_empty());
        let metrics = harness.host().manager().metrics();
        assert_eq!(HostMetrics::get(&metrics.watch_stops), 1);
    }

    /// A display that drops its link without closing anything does not leak
    /// the upstream watch.
    #[tokio::test]
    async fn hung_up_display_releases_its_holds() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);
            display.activate(&c1()).await.unwrap();

            let _sub = display.subscribe(FrameId::new(1), display.store(&c1(), pods())).await.unwrap();
            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

            assert!(display.hang_up().await);
            eventually("stream closed", || api.open_streams(&pods()) == 0).await.unwrap();
            eventually("display forgotten", || harness.host().endpoint().peer_count() == 0)
                .await
                .unwrap();
            let session = harness.host().manager().session(&c1()).unwrap();
            assert!(session.watched_kinds().is_empty());
        }
    }
}
