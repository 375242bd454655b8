//! What stores end up holding.

#[cfg(test)]
mod tests {
    use crate::assertions::{eventually, settle};
    use crate::harness::{fast_config, pod, pod_event, pod_key, pods, Harness, LinkKind};
    use link_types::{ClusterId, FrameId, WatchEventType};
    use link_watch::{ResyncReason, WatchNotice};

    fn c1() -> ClusterId {
        ClusterId::new("c1")
    }

    fn c2() -> ClusterId {
        ClusterId::new("c2")
    }

    // =========================================================================
    // Store semantics
    // =========================================================================

    /// Add, update and delete of one object leaves nothing behind; a second
    /// add of the same object leaves one copy.
    #[tokio::test]
    async fn upserts_and_deletes_by_object_key() {
        for kind in LinkKind::ALL {
            let harness = Harness::new().unwrap();
            let api = harness.api("c1");
            let display = harness.display(kind);
            display.activate(&c1()).await.unwrap();
            display.show(FrameId::new(1), &c1()).await.unwrap();

            let store = display.store(&c1(), pods());
            let _sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
            eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

            api.emit(&pods(), pod_event(WatchEventType::Add, "gone", 1));
            api.emit(&pods(), pod_event(WatchEventType::Update, "gone", 2));
            api.emit(&pods(), pod_event(WatchEventType::Delete, "gone", 3));
            api.emit(&pods(), pod_event(WatchEventType::Add, "twice", 4));
            api.emit(&pods(), pod_event(WatchEventType::Add, "twice", 5));

            eventually("twice applied", || store.get(&pod_key("twice")).is_some())
                .await
                .unwrap();
            settle().await;
            assert!(store.get(&pod_key("gone")).is_none());
            assert_eq!(store.len(), 1);
        }
    }

    /// The owner drops events older than what it already published.
    #[tokio::test]
    async fn stale_events_never_reach_stores() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();
        display.show(FrameId::new(1), &c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let _sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

        api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 10));
        api.emit(&pods(), pod_event(WatchEventType::Delete, "p1", 9));
        api.emit(&pods(), pod_event(WatchEventType::Add, "fence", 11));

        eventually("fence applied", || store.get(&pod_key("fence")).is_some())
            .await
            .unwrap();
        assert!(store.get(&pod_key("p1")).is_some());
        let metrics = harness.host().manager().metrics();
        assert_eq!(link_host::HostMetrics::get(&metrics.stale_events), 1);
    }

    /// Subscribing with preload fills the store from a full listing.
    #[tokio::test]
    async fn preload_lists_through_the_owner() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        api.set_list(&pods(), vec![pod("a"), pod("b")]);
        let display = harness.display(LinkKind::Stream);
        display.activate(&c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let _sub = display
            .mux
            .subscribe(
                c1(),
                pods(),
                link_watch::Subscriber::new(FrameId::new(1), store.clone()),
                link_watch::SubscribeOptions::preload(),
            )
            .await
            .unwrap();

        assert!(store.is_loaded());
        assert_eq!(store.len(), 2);
        assert_eq!(api.list_calls(&pods()), 1);
    }

    // =========================================================================
    // Frame scoping
    // =========================================================================

    /// Events apply only while the subscriber's frame shows their cluster.
    #[tokio::test]
    async fn events_follow_the_frame() {
        let harness = Harness::new().unwrap();
        let api = harness.api("c1");
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();
        display.show(FrameId::new(1), &c1()).await.unwrap();
        display.show(FrameId::new(2), &c1()).await.unwrap();

        let moving = display.store(&c1(), pods());
        let fixed = display.store(&c1(), pods());
        let _moving = display.subscribe(FrameId::new(1), moving.clone()).await.unwrap();
        let _fixed = display.subscribe(FrameId::new(2), fixed.clone()).await.unwrap();
        eventually("stream open", || api.open_streams(&pods()) == 1).await.unwrap();

        api.emit(&pods(), pod_event(WatchEventType::Add, "p1", 1));
        eventually("p1 applied", || moving.get(&pod_key("p1")).is_some())
            .await
            .unwrap();

        // Frame 1 now shows another cluster
        display.show(FrameId::new(1), &c2()).await.unwrap();
        api.emit(&pods(), pod_event(WatchEventType::Add, "p2", 2));
        eventually("p2 on the fixed frame", || fixed.get(&pod_key("p2")).is_some())
            .await
            .unwrap();
        assert!(moving.get(&pod_key("p2")).is_none());

        // Unmapped frames receive nothing
        display.control.unset_frame_id(FrameId::new(2)).await.unwrap();
        display.show(FrameId::new(1), &c1()).await.unwrap();
        eventually("frame 2 unmapped", || display.frames.resolve(FrameId::new(2)).is_none())
            .await
            .unwrap();
        api.emit(&pods(), pod_event(WatchEventType::Add, "p3", 3));
        eventually("p3 on frame 1", || moving.get(&pod_key("p3")).is_some())
            .await
            .unwrap();
        assert!(fixed.get(&pod_key("p3")).is_none());
    }

    // =========================================================================
    // Backlog
    // =========================================================================

    /// Overflowing the backlog throws the queue away and reloads from a
    /// full listing before newer events apply.
    #[tokio::test]
    async fn backlog_overflow_reloads_from_listing() {
        let mut config = fast_config();
        config.watch.backlog_threshold = 4;
        let harness = Harness::with_config(config).unwrap();
        let api = harness.api("c1");
        api.set_list(&pods(), vec![pod("p0")]);
        let display = harness.display(LinkKind::Memory);
        display.activate(&c1()).await.unwrap();
        display.show(FrameId::new(1), &c1()).await.unwrap();

        let store = display.store(&c1(), pods());
        let _sub = display.subscribe(FrameId::new(1), store.clone()).await.unwrap();
        let mut notices = display.mux.notices();

        // No await in between: the drain task cannot run
        for version in 1..=9 {
            let name = format!("p{version}");
            display.mux.dispatch(
                pod_event(WatchEventType::Add, &name, version).scoped(c1(), pods()),
            );
        }

        eventually("reloaded plus newer events", || store.len() == 5)
            .await
            .unwrap();
        assert!(store.get(&pod_key("p0")).is_some());
        for name in ["p1", "p2", "p3", "p4", "p5"] {
            assert!(store.get(&pod_key(name)).is_none(), "{name} should be discarded");
        }
        for name in ["p6", "p7", "p8", "p9"] {
            assert!(store.get(&pod_key(name)).is_some(), "{name} should apply");
        }
        assert_eq!(api.list_calls(&pods()), 1);
        assert_eq!(display.mux.stats().overflows, 1);
        assert!(matches!(
            notices.recv().await.unwrap(),
            WatchNotice::Resynced {
                reason: ResyncReason::Backlog { discarded: 5 },
                ..
            }
        ));
    }
}
