mod common;

use serde_json::{Value, json};

use common::Harness;
use trellis::StateValue;
use trellis::data::{CLIENT_RPC, KEY_FIELD, RowCache, SELECTED_FIELD, SELECTION_RPC};
use trellis::protocol::{DATA_REQUEST_RPC, ServerBatch};

fn data_calls<'a>(batch: &'a ServerBatch, method: &str) -> Vec<&'a [Value]> {
    batch
        .rpc
        .iter()
        .filter(|call| call.interface() == CLIENT_RPC && call.method() == method)
        .map(|call| call.args())
        .collect()
}

fn request_rows(h: &mut Harness, first: i64, count: i64) {
    let grid = h.demo.grid.clone();
    h.client
        .call(&grid, DATA_REQUEST_RPC, "requestRows", vec![first.into(), count.into()])
        .expect("queue row request");
}

fn cache(h: &Harness) -> &RowCache {
    h.client.widget::<RowCache>(h.demo.grid.as_str()).expect("row cache")
}

fn name_at(h: &Harness, index: usize) -> Option<String> {
    cache(h)
        .row(index)
        .and_then(|row| row.get("name"))
        .and_then(StateValue::as_str)
        .map(str::to_owned)
}

#[test_timeout::timeout]
fn first_response_resets_and_pushes_the_initial_window() {
    let mut h = Harness::new(100);
    let (batch, _) = h.exchange();

    assert_eq!(data_calls(&batch, "reset"), vec![&[json!(100)][..]]);
    let set_data = data_calls(&batch, "setData");
    assert_eq!(set_data.len(), 1);
    assert_eq!(set_data[0][0], json!(0));
    assert_eq!(set_data[0][1].as_array().map(Vec::len), Some(40));

    assert_eq!(cache(&h).size(), 100);
    assert_eq!(cache(&h).cached(), 40);
    assert_eq!(name_at(&h, 0).as_deref(), Some("person-0"));
    assert_eq!(h.demo.data.active_count(), 40);
}

#[test_timeout::timeout]
fn overlapping_request_sends_keys_for_rows_already_held() {
    let mut h = Harness::new(100);
    h.exchange();
    assert!(h.demo.data.key_of("0").is_some());

    request_rows(&mut h, 30, 40);
    let (batch, report) = h.exchange();
    assert!(report.failed.is_empty(), "{:?}", report.failed);

    let set_data = data_calls(&batch, "setData");
    assert_eq!(set_data.len(), 1);
    assert_eq!(set_data[0][0], json!(30));
    let rows = set_data[0][1].as_array().expect("rows");
    assert_eq!(rows.len(), 40);
    let key_30 = h.demo.data.key_of("30").expect("row 30 is active");
    assert_eq!(rows[0], json!({ KEY_FIELD: key_30 }));
    assert_eq!(rows[10]["name"], json!("person-40"));

    assert_eq!(h.demo.data.active_count(), 40);
    assert_eq!(h.demo.data.key_of("0"), None);

    assert_eq!(name_at(&h, 30).as_deref(), Some("person-30"));
    assert_eq!(name_at(&h, 69).as_deref(), Some("person-69"));
    assert_eq!(cache(&h).row(0), None);
}

#[test_timeout::timeout]
fn refreshed_items_send_only_changed_fields() {
    let mut h = Harness::new(100);
    h.exchange();

    h.demo.people.update(|items| items[5].name = "renamed".into());
    let person = h.demo.people.get(5).expect("person 5");
    assert!(h.demo.data.refresh(&person));
    let outside = h.demo.people.get(80).expect("person 80");
    assert!(!h.demo.data.refresh(&outside));

    let (batch, _) = h.exchange();
    let key = h.demo.data.key_of("5").expect("row 5 is active");
    assert_eq!(data_calls(&batch, "updateData"), vec![&[json!([{ KEY_FIELD: key, "name": "renamed" }])][..]]);
    assert_eq!(name_at(&h, 5).as_deref(), Some("renamed"));
    assert_eq!(
        cache(&h).row(5).and_then(|row| row.get("age")),
        Some(&StateValue::Int(25))
    );
}

#[test_timeout::timeout]
fn selecting_a_released_key_does_nothing() {
    let mut h = Harness::new(100);
    h.exchange();
    let grid = h.demo.grid.clone();
    let released = h.demo.data.key_of("0").expect("row 0 is active");

    request_rows(&mut h, 50, 40);
    h.exchange();
    assert_eq!(h.demo.data.key_of("0"), None);

    let live = h.demo.data.key_of("60").expect("row 60 is active");
    h.client
        .call(&grid, SELECTION_RPC, "select", vec![released.into()])
        .expect("queue stale select");
    h.client
        .call(&grid, SELECTION_RPC, "select", vec![live.clone().into()])
        .expect("queue select");
    let (batch, _) = h.exchange();

    assert_eq!(h.demo.data.selected(), vec!["60".to_owned()]);
    assert!(h.errors.events().is_empty());
    assert_eq!(
        data_calls(&batch, "updateData"),
        vec![&[json!([{ KEY_FIELD: live, SELECTED_FIELD: true }])][..]]
    );
}

#[test_timeout::timeout]
fn selection_changes_reach_the_client_row() {
    let mut h = Harness::new(100);
    h.exchange();
    let grid = h.demo.grid.clone();
    let key = h.demo.data.key_of("3").expect("row 3 is active");

    h.client
        .call(&grid, SELECTION_RPC, "select", vec![key.clone().into()])
        .expect("queue select");
    let (batch, _) = h.exchange();
    assert_eq!(h.demo.data.selected(), vec!["3".to_owned()]);
    assert_eq!(
        data_calls(&batch, "updateData"),
        vec![&[json!([{ KEY_FIELD: key.clone(), SELECTED_FIELD: true }])][..]]
    );
    assert_eq!(
        cache(&h).row(3).and_then(|row| row.get(SELECTED_FIELD)),
        Some(&StateValue::Bool(true))
    );

    h.client
        .call(&grid, SELECTION_RPC, "select", vec![key.clone().into()])
        .expect("queue repeated select");
    let (batch, _) = h.exchange();
    assert!(data_calls(&batch, "updateData").is_empty());

    h.client
        .call(&grid, SELECTION_RPC, "deselect", vec![key.into()])
        .expect("queue deselect");
    h.exchange();
    assert!(h.demo.data.selected().is_empty());
    assert_eq!(cache(&h).row(3).and_then(|row| row.get(SELECTED_FIELD)), None);
    assert_eq!(name_at(&h, 3).as_deref(), Some("person-3"));
}

#[test_timeout::timeout]
fn disabled_grid_still_serves_rows_but_ignores_selection() {
    let mut h = Harness::new(100);
    h.exchange();
    let grid = h.demo.grid.clone();
    h.session
        .access(|ui| ui.tracker_mut().set_enabled(&grid, false))
        .expect("disable grid");

    let key = h.demo.data.key_of("1").expect("row 1 is active");
    request_rows(&mut h, 40, 20);
    h.client
        .call(&grid, SELECTION_RPC, "select", vec![key.into()])
        .expect("queue select");
    let (batch, _) = h.exchange();

    assert_eq!(data_calls(&batch, "setData").len(), 1);
    assert!(h.demo.data.selected().is_empty());
    assert_eq!(name_at(&h, 59).as_deref(), Some("person-59"));
}

#[test_timeout::timeout]
fn dropped_rows_are_released() {
    let mut h = Harness::new(100);
    h.exchange();
    let grid = h.demo.grid.clone();
    let keys: Vec<StateValue> = ["0", "1", "2"]
        .iter()
        .map(|id| StateValue::from(h.demo.data.key_of(id).expect("active row")))
        .collect();

    h.client
        .call(&grid, DATA_REQUEST_RPC, "dropRows", vec![StateValue::List(keys)])
        .expect("queue drop");
    h.exchange();

    assert_eq!(h.demo.data.active_count(), 37);
    assert_eq!(h.demo.data.key_of("1"), None);
}

#[test_timeout::timeout]
fn reset_clears_the_client_cache() {
    let mut h = Harness::new(100);
    h.exchange();

    h.demo.people.update(|items| items.truncate(20));
    h.demo.data.reset();
    let (batch, _) = h.exchange();
    assert_eq!(data_calls(&batch, "reset"), vec![&[json!(20)][..]]);
    assert!(data_calls(&batch, "setData").is_empty());
    assert_eq!(cache(&h).size(), 20);
    assert_eq!(cache(&h).cached(), 0);

    request_rows(&mut h, 0, 40);
    let (batch, _) = h.exchange();
    let set_data = data_calls(&batch, "setData");
    let rows = set_data[0][1].as_array().expect("rows");
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|row| row.get("name").is_some()));
    assert_eq!(cache(&h).cached(), 20);
    assert_eq!(h.demo.data.active_count(), 20);
}
