//! # Delivery Integration Tests
//!
//! Exercises the strategy matrix end to end: synchronous delivery order,
//! fire-once suppression, deferred FIFO draining, buffered late-join
//! replay, and the deferred+buffered interleaving.

#[cfg(test)]
mod tests {
    use message_dispatch::{Message, MessageDispatcher, MessageKey, PostOutcome};
    use std::cell::RefCell;
    use std::rc::Rc;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// A visual agent entered the session; late subscribers need to hear
    /// about every agent already present.
    #[derive(Debug)]
    struct AgentSpawned {
        agent: u32,
    }
    impl Message for AgentSpawned {
        const BUFFERED: bool = true;
    }

    /// Combat result applied on the next tick.
    #[derive(Debug)]
    struct DamageDealt {
        amount: u32,
    }
    impl Message for DamageDealt {
        const DEFERRED: bool = true;
    }

    /// Physics step applied on the next tick, independent of combat.
    #[derive(Debug)]
    struct ForceApplied {
        magnitude: u32,
    }
    impl Message for ForceApplied {
        const DEFERRED: bool = true;
    }

    /// Announced once per process run.
    struct SessionStarted;
    impl Message for SessionStarted {
        const FIRE_ONCE: bool = true;
    }

    /// Scene announcement: applied next tick, retained for late joiners.
    #[derive(Debug)]
    struct SceneReady {
        scene: &'static str,
    }
    impl Message for SceneReady {
        const DEFERRED: bool = true;
        const BUFFERED: bool = true;
    }

    /// Plain immediate refresh request.
    struct HudRefresh;
    impl Message for HudRefresh {}

    type Log = Rc<RefCell<Vec<String>>>;

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    // =============================================================================
    // SYNCHRONOUS DELIVERY
    // =============================================================================

    #[test]
    fn test_immediate_delivery_order_exactly_once() {
        crate::init_tracing();
        let dispatcher = MessageDispatcher::new();
        let seen = log();

        for index in 1..=5 {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |_: &HudRefresh| {
                seen.borrow_mut().push(format!("h{index}"));
            });
        }

        let outcome = dispatcher.post(HudRefresh);

        assert_eq!(outcome, PostOutcome::Delivered(5));
        assert_eq!(*seen.borrow(), vec!["h1", "h2", "h3", "h4", "h5"]);
    }

    #[test]
    fn test_typed_handlers_run_before_runtime_typed() {
        let dispatcher = MessageDispatcher::new();
        let seen = log();

        {
            let seen = Rc::clone(&seen);
            dispatcher.add_any_listener(MessageKey::of::<HudRefresh>(), move |key, _| {
                seen.borrow_mut().push(format!("any:{key}"));
            });
        }
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |_: &HudRefresh| {
                seen.borrow_mut().push("typed".to_string());
            });
        }

        dispatcher.post(HudRefresh);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "typed", "typed chain is invoked first");
        assert!(seen[1].starts_with("any:"));
    }

    #[test]
    fn test_post_with_no_listeners_reaches_zero_receivers() {
        let dispatcher = MessageDispatcher::new();
        assert_eq!(dispatcher.post(HudRefresh), PostOutcome::Delivered(0));
    }

    // =============================================================================
    // FIRE-ONCE
    // =============================================================================

    #[test]
    fn test_fire_once_first_delivers_then_suppresses() {
        let dispatcher = MessageDispatcher::new();
        let count = Rc::new(RefCell::new(0u32));
        {
            let count = Rc::clone(&count);
            dispatcher.add_listener(move |_: &SessionStarted| *count.borrow_mut() += 1);
        }

        assert_eq!(dispatcher.post(SessionStarted), PostOutcome::Delivered(1));
        assert_eq!(dispatcher.post(SessionStarted), PostOutcome::Suppressed);
        assert_eq!(dispatcher.post(SessionStarted), PostOutcome::Suppressed);
        assert_eq!(*count.borrow(), 1);
    }

    // =============================================================================
    // DEFERRED DRAINING
    // =============================================================================

    #[test]
    fn test_deferred_fifo_within_one_drain() {
        let dispatcher = MessageDispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |m: &DamageDealt| seen.borrow_mut().push(m.amount));
        }

        dispatcher.post(DamageDealt { amount: 1 });
        dispatcher.post(DamageDealt { amount: 2 });
        dispatcher.post(DamageDealt { amount: 3 });
        assert!(seen.borrow().is_empty(), "nothing delivers before the drain");

        assert_eq!(dispatcher.drain_pending(), Ok(3));
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_each_shape_drains_contiguously() {
        let dispatcher = MessageDispatcher::new();
        let seen = log();
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |m: &DamageDealt| {
                seen.borrow_mut().push(format!("damage:{}", m.amount));
            });
        }
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |m: &ForceApplied| {
                seen.borrow_mut().push(format!("force:{}", m.magnitude));
            });
        }

        // Interleave posts of the two shapes.
        dispatcher.post(DamageDealt { amount: 1 });
        dispatcher.post(ForceApplied { magnitude: 1 });
        dispatcher.post(DamageDealt { amount: 2 });
        dispatcher.post(ForceApplied { magnitude: 2 });

        dispatcher.drain_pending().expect("drain");

        // Cross-shape order is unspecified, but each shape's queue is fully
        // drained, in FIFO order, before the next shape's begins.
        let seen = seen.borrow();
        let damage: Vec<&String> = seen.iter().filter(|e| e.starts_with("damage")).collect();
        let force: Vec<&String> = seen.iter().filter(|e| e.starts_with("force")).collect();
        assert_eq!(damage, vec!["damage:1", "damage:2"]);
        assert_eq!(force, vec!["force:1", "force:2"]);
        assert!(
            *seen == vec!["damage:1", "damage:2", "force:1", "force:2"]
                || *seen == vec!["force:1", "force:2", "damage:1", "damage:2"],
            "one shape's queue fully drains before the other's: {seen:?}"
        );
    }

    #[test]
    fn test_handler_enqueue_during_drain_waits_for_next_tick() {
        let dispatcher = Rc::new(MessageDispatcher::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            let chained = Rc::clone(&dispatcher);
            dispatcher.add_listener(move |m: &DamageDealt| {
                seen.borrow_mut().push(m.amount);
                if m.amount == 10 {
                    chained.post(DamageDealt { amount: 20 });
                }
            });
        }

        dispatcher.post(DamageDealt { amount: 10 });

        assert_eq!(dispatcher.drain_pending(), Ok(1), "first tick: original only");
        assert_eq!(*seen.borrow(), vec![10]);

        assert_eq!(dispatcher.drain_pending(), Ok(1), "second tick: the chained post");
        assert_eq!(*seen.borrow(), vec![10, 20]);

        assert_eq!(dispatcher.drain_pending(), Ok(0));
    }

    // =============================================================================
    // BUFFERED REPLAY
    // =============================================================================

    #[test]
    fn test_late_join_replay_before_live_messages() {
        let dispatcher = MessageDispatcher::new();

        dispatcher.post(AgentSpawned { agent: 1 });
        dispatcher.post(AgentSpawned { agent: 2 });

        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |m: &AgentSpawned| seen.borrow_mut().push(m.agent));
        }
        assert_eq!(
            *seen.borrow(),
            vec![1, 2],
            "history replays synchronously inside the add call"
        );

        dispatcher.post(AgentSpawned { agent: 3 });
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_replay_reaches_runtime_typed_listeners_too() {
        let dispatcher = MessageDispatcher::new();
        dispatcher.post(AgentSpawned { agent: 7 });

        let replayed = Rc::new(RefCell::new(0u32));
        {
            let replayed = Rc::clone(&replayed);
            dispatcher.add_any_listener(MessageKey::of::<AgentSpawned>(), move |_, payload| {
                let spawned = payload
                    .downcast_ref::<AgentSpawned>()
                    .expect("AgentSpawned payload");
                *replayed.borrow_mut() += spawned.agent;
            });
        }

        assert_eq!(*replayed.borrow(), 7);
    }

    #[test]
    fn test_existing_listener_is_not_replayed_on_new_subscription() {
        let dispatcher = MessageDispatcher::new();
        let first_calls = Rc::new(RefCell::new(0u32));
        {
            let first_calls = Rc::clone(&first_calls);
            dispatcher.add_listener(move |_: &AgentSpawned| *first_calls.borrow_mut() += 1);
        }

        dispatcher.post(AgentSpawned { agent: 1 });
        assert_eq!(*first_calls.borrow(), 1);

        // A second subscriber triggers replay for itself only.
        dispatcher.add_listener(|_: &AgentSpawned| {});
        assert_eq!(*first_calls.borrow(), 1);
    }

    // =============================================================================
    // DEFERRED + BUFFERED
    // =============================================================================

    #[test]
    fn test_deferred_buffered_is_not_buffered_until_drained() {
        let dispatcher = MessageDispatcher::new();
        let message = Rc::new(SceneReady { scene: "harbor" });

        assert_eq!(
            dispatcher.post_shared(Rc::clone(&message)),
            PostOutcome::Queued
        );
        assert!(
            !dispatcher.is_buffered(&message),
            "buffering waits for actual delivery"
        );
        assert_eq!(dispatcher.buffered_count(MessageKey::of::<SceneReady>()), 0);

        dispatcher.drain_pending().expect("drain");
        assert!(dispatcher.is_buffered(&message));

        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |m: &SceneReady| seen.borrow_mut().push(m.scene));
        }
        assert_eq!(*seen.borrow(), vec!["harbor"], "late joiner replays it");
    }

    #[test]
    fn test_subscriber_added_by_drain_handler_sees_message_in_history() {
        // Buffer-then-deliver: a handler that reacts to the delivery by
        // subscribing another listener must find the message already in the
        // replay history, with no gap.
        let dispatcher = Rc::new(MessageDispatcher::new());
        let replayed = Rc::new(RefCell::new(Vec::new()));
        {
            let replayed = Rc::clone(&replayed);
            let registrar = Rc::clone(&dispatcher);
            dispatcher.add_listener(move |_: &SceneReady| {
                let replayed = Rc::clone(&replayed);
                registrar.add_listener(move |m: &SceneReady| {
                    replayed.borrow_mut().push(m.scene);
                });
            });
        }

        dispatcher.post(SceneReady { scene: "harbor" });
        dispatcher.drain_pending().expect("drain");

        assert_eq!(*replayed.borrow(), vec!["harbor"]);
    }

    // =============================================================================
    // FORWARDING
    // =============================================================================

    #[test]
    fn test_forward_to_unknown_owner_invokes_nothing() {
        use message_dispatch::OwnerId;

        let dispatcher = MessageDispatcher::new();
        let seen = Rc::new(RefCell::new(0u32));
        {
            let seen = Rc::clone(&seen);
            dispatcher.add_listener(move |_: &HudRefresh| *seen.borrow_mut() += 1);
        }

        let outcome = dispatcher.forward(OwnerId::new(), HudRefresh);

        assert_eq!(outcome, None);
        assert_eq!(*seen.borrow(), 0, "no listener anywhere is invoked");
    }
}
