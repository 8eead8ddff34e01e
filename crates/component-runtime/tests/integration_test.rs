use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use component_runtime::mock::{EventRecorder, MockOperation, MockPlugin, MockService};
use component_runtime::{
    topics, Context, Envelope, ErrorKind, Event, EventBus, InMemoryRegistry, Registry,
    RuntimeBuilder, Service,
};
use serde_json::json;

// --- End-to-end flows ---

#[tokio::test]
async fn echo_round_trip_emits_one_executed_event() {
    let ctx = Context::background();
    let runtime = RuntimeBuilder::new()
        .with_system_id("e2e")
        .build(&ctx)
        .await
        .unwrap();
    runtime.start(&ctx).await.unwrap();

    let recorder = EventRecorder::new(runtime.events(), &[topics::OPERATION_EXECUTED]);
    runtime
        .register(MockOperation::echo("echo").handle())
        .unwrap();

    let out = runtime
        .execute_operation(&ctx, "echo", Envelope::new(json!({"x": 1})))
        .await
        .unwrap();

    assert_eq!(out.data, json!({"x": 1}));
    assert_eq!(recorder.count(topics::OPERATION_EXECUTED), 1);
    let event = recorder.last(topics::OPERATION_EXECUTED).unwrap();
    assert_eq!(event.get_str("operation_id"), Some("echo"));
    assert_eq!(event.source, "e2e");

    runtime.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn failing_plugin_leaves_no_components() {
    let ctx = Context::background();
    let runtime = RuntimeBuilder::new().build(&ctx).await.unwrap();
    let plugin = MockPlugin::new("flaky")
        .with_component(MockOperation::echo("a").handle())
        .with_component(MockService::new("b").handle())
        .failing_initialize();

    let err = runtime
        .load_plugin(&ctx, Arc::new(plugin.clone()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PluginLoadFailed);
    assert_eq!(plugin.initialize_count(), 1);
    assert!(!runtime.registry().has("a"));
    assert!(!runtime.registry().has("b"));
    assert!(runtime.plugin_manager().list().is_empty());
}

#[tokio::test]
async fn builder_fails_when_a_plugin_fails() {
    let err = RuntimeBuilder::new()
        .with_plugin(MockPlugin::new("ok").with_component(MockOperation::echo("x").handle()))
        .with_plugin(MockPlugin::new("bad").failing_initialize())
        .build(&Context::background())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PluginLoadFailed);
}

#[tokio::test]
async fn stop_service_on_unknown_or_plain_component() {
    let ctx = Context::background();
    let runtime = RuntimeBuilder::new().build(&ctx).await.unwrap();
    runtime
        .register(MockOperation::echo("not-a-service").handle())
        .unwrap();

    for id in ["missing", "not-a-service"] {
        let err = runtime.stop_service(&ctx, id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound, "id = {id}");
    }
}

#[tokio::test]
async fn execute_before_start_is_rejected() {
    let ctx = Context::background();
    let op = MockOperation::new("op");
    let runtime = RuntimeBuilder::new()
        .with_plugin(MockPlugin::new("p").with_component(op.handle()))
        .build(&ctx)
        .await
        .unwrap();
    let before = runtime.registry().count();

    let err = runtime
        .execute_operation(&ctx, "op", Envelope::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SystemNotStarted);
    assert_eq!(runtime.registry().count(), before);
    assert_eq!(op.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_all_land() {
    let ctx = Context::background();
    let runtime = Arc::new(RuntimeBuilder::new().build(&ctx).await.unwrap());

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .register(MockOperation::echo(format!("op-{i}")).handle())
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(runtime.registry().count(), 100);
}

#[tokio::test]
async fn stop_continues_past_failing_service() {
    let ctx = Context::background();
    let first = MockService::new("first");
    let stubborn = MockService::new("stubborn").failing_stop();
    let last = MockService::new("last");
    let runtime = RuntimeBuilder::new()
        .with_plugin(
            MockPlugin::new("svcs")
                .with_component(first.handle())
                .with_component(stubborn.handle())
                .with_component(last.handle()),
        )
        .build(&ctx)
        .await
        .unwrap();
    let recorder = EventRecorder::new(runtime.events(), &[topics::SYSTEM_STOPPED]);

    runtime.start(&ctx).await.unwrap();
    runtime.stop(&ctx).await.unwrap();

    assert!(!first.is_running());
    assert!(!last.is_running());
    assert_eq!(stubborn.stop_count(), 1);
    assert_eq!(recorder.count(topics::SYSTEM_STOPPED), 1);
}

#[tokio::test]
async fn builder_keeps_supplied_registry() {
    let registry: Arc<dyn Registry> = Arc::new(InMemoryRegistry::new());
    let runtime = RuntimeBuilder::new()
        .with_registry(registry.clone())
        .build(&Context::background())
        .await
        .unwrap();

    runtime
        .register(MockOperation::echo("shared").handle())
        .unwrap();
    assert!(registry.has("shared"));
}

#[tokio::test]
async fn unload_plugin_removes_its_components() {
    let ctx = Context::background();
    let plugin = MockPlugin::new("temp").with_component(MockOperation::echo("tmp-op").handle());
    let runtime = RuntimeBuilder::new()
        .with_plugin(plugin.clone())
        .build(&ctx)
        .await
        .unwrap();
    assert!(runtime.registry().has("tmp-op"));

    runtime.unload_plugin(&ctx, "temp").await.unwrap();
    assert!(!runtime.registry().has("tmp-op"));
    assert_eq!(plugin.dispose_count(), 1);

    let err = runtime.unload_plugin(&ctx, "temp").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PluginUnloadFailed);
}

// --- Event bus ---

#[tokio::test]
async fn panicking_handler_does_not_block_others() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let _bad = bus.subscribe("t", |_| panic!("handler bug"));
    let counter = hits.clone();
    let _good = bus.subscribe("t", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let counter = hits.clone();
    let _good_async = bus.subscribe_async("t", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.publish(Event::new("t", "test"));
    bus.wait_async().await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_handlers_are_drained_by_stop() {
    let ctx = Context::background();
    let runtime = RuntimeBuilder::new().build(&ctx).await.unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = runtime
        .events()
        .subscribe_async(topics::SYSTEM_STOPPED, move |_| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    runtime.start(&ctx).await.unwrap();
    runtime.stop(&ctx).await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.events().in_flight(), 0);
}
