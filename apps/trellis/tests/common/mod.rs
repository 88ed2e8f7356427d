#![allow(dead_code)]

use std::sync::Arc;

use trellis::client::{ApplyReport, ClientProjection};
use trellis::config::Config;
use trellis::demo::{self, DemoUi};
use trellis::error::CollectingErrorHandler;
use trellis::metadata::TypeDataStore;
use trellis::protocol::ServerBatch;
use trellis::protocol::wire::decode_server_batch;
use trellis::session::Session;
use trellis::{ConnectorId, StateObject};

/// A demo session and a client projection talking JSON to each other.
pub struct Harness {
    pub session: Session,
    pub demo: DemoUi,
    pub client: ClientProjection,
    pub client_store: Arc<TypeDataStore>,
    pub errors: CollectingErrorHandler,
}

impl Harness {
    pub fn new(rows: u32) -> Self {
        Self::with_config(Config::default(), rows)
    }

    pub fn with_config(config: Config, rows: u32) -> Self {
        let errors = CollectingErrorHandler::new();
        let (ui, demo) = demo::build(config, demo::store().expect("server store"), rows).expect("demo ui");
        let session = Session::new(ui.with_error_handler(errors.clone()));
        let client_store = demo::store().expect("client store");
        let client = ClientProjection::new(Arc::clone(&client_store), Some(session.csrf_token()));
        Self {
            session,
            demo,
            client,
            client_store,
            errors,
        }
    }

    /// Sends the client's pending calls and applies the response.
    pub fn exchange(&mut self) -> (ServerBatch, ApplyReport) {
        let message = self.client.take_message().expect("client message");
        let body = self.session.handle_message(&message).expect("server response");
        let batch = decode_server_batch(&body).expect("server batch");
        let report = self.client.apply(&batch);
        (batch, report)
    }

    pub fn server_state(&self, id: &ConnectorId) -> StateObject {
        self.session
            .access(|ui| ui.tracker().state(id.as_str()).cloned())
            .expect("server connector")
    }

    pub fn client_state(&self, id: &ConnectorId) -> StateObject {
        self.client.state(id.as_str()).cloned().expect("client connector")
    }
}
