mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use common::Harness;
use trellis::config::Config;
use trellis::demo::{self, LabelWidget, RootWidget};
use trellis::metadata::MetadataError;
use trellis::protocol::ServerBatch;
use trellis::protocol::wire::{decode_server_batch, encode_server_batch};

#[test_timeout::tokio_timeout_test]
async fn background_ticks_reach_the_client_in_order() {
    let Harness {
        session,
        demo: ids,
        mut client,
        ..
    } = Harness::new(10);
    let body = session
        .handle_message(&client.take_message().expect("message"))
        .expect("first response");
    client.apply_json(&body).expect("apply first response");

    let session = Arc::new(session);
    let ids = Arc::new(ids);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let pusher = {
        let session = Arc::clone(&session);
        let ids = Arc::clone(&ids);
        tokio::spawn(async move {
            for n in 1..=3 {
                session
                    .access(|ui| demo::tick(ui, &ids, n))
                    .expect("tick");
                let batch = session.push();
                tx.send(encode_server_batch(&batch).expect("encode push"))
                    .expect("receiver alive");
                tokio::task::yield_now().await;
            }
        })
    };

    let mut pushes = Vec::new();
    while let Some(body) = rx.recv().await {
        let batch: ServerBatch = decode_server_batch(&body).expect("decode push");
        pushes.push(batch.sync_id);
        client.apply(&batch);
    }
    pusher.await.expect("pusher finished");

    assert_eq!(pushes, vec![1, 2, 3]);
    let label = client.widget::<LabelWidget>(ids.label.as_str()).expect("label widget");
    assert_eq!(label.text, "tick 3");
    let root = client.widget::<RootWidget>(ids.root.as_str()).expect("root widget");
    assert_eq!(root.progress, Some(0.3));
    assert_eq!(root.notifications, vec!["tick 1".to_owned(), "tick 2".to_owned()]);

    let body = session
        .handle_message(&client.take_message().expect("message"))
        .expect("response after pushes");
    let batch = decode_server_batch(&body).expect("decode response");
    assert!(!batch.resynchronize);
    client.apply(&batch);
    let root = client.widget::<RootWidget>(ids.root.as_str()).expect("root widget");
    assert_eq!(root.notifications.len(), 3);
}

#[test_timeout::timeout]
fn deferred_access_runs_before_the_next_push() {
    let mut h = Harness::new(10);
    h.exchange();
    let label = h.demo.label.clone();

    std::thread::scope(|scope| {
        let session = &h.session;
        scope.spawn(move || {
            session.access_later(move |ui| {
                let _ = ui.tracker_mut().set_field(&label, "value", "from a worker");
            });
        });
    });

    let batch = h.session.push();
    h.client.apply(&batch);
    let widget = h.client.widget::<LabelWidget>(h.demo.label.as_str()).expect("label widget");
    assert_eq!(widget.text, "from a worker");
    assert_eq!(h.session.run_pending(), 0);
}

#[test_timeout::timeout]
fn empty_push_has_nothing_to_send() {
    let mut h = Harness::new(10);
    h.exchange();
    let batch = h.session.push();
    assert!(batch.is_empty());
}

#[test_timeout::timeout]
fn idle_sessions_expire() {
    let config = Config {
        session_timeout: Duration::from_secs(10),
        ..Config::default()
    };
    let mut h = Harness::with_config(config, 10);
    h.exchange();
    let now = Instant::now();
    assert!(!h.session.is_inactive(now));
    assert!(h.session.is_inactive(now + Duration::from_secs(11)));
}

#[test_timeout::timeout]
fn grid_metadata_loads_when_the_grid_first_arrives() {
    let mut h = Harness::new(10);
    assert!(!h.client_store.is_bundle_loaded(demo::GRID_BUNDLE));
    assert!(matches!(
        h.client_store.get_type(demo::GRID),
        Err(MetadataError::NotYetAvailable { .. })
    ));

    let (_, report) = h.exchange();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert!(h.client_store.is_bundle_loaded(demo::GRID_BUNDLE));
    assert_eq!(h.client.find_by_type(demo::GRID), vec![h.demo.grid.clone()]);
}
