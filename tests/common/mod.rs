#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use webhook_relay::{
    Dispatcher, DispatcherConfig, FailureReason, InMemoryStorage, Pipeline, Transport,
};

/// Records every outbound call and answers from a script, then with `fallback`.
pub struct RecordingTransport {
    script: Mutex<VecDeque<Result<(), FailureReason>>>,
    fallback: Result<(), FailureReason>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingTransport {
    pub fn ok() -> Self {
        Self::scripted(Vec::new(), Ok(()))
    }

    pub fn failing(reason: FailureReason) -> Self {
        Self::scripted(Vec::new(), Err(reason))
    }

    pub fn scripted(script: Vec<Result<(), FailureReason>>, fallback: Result<(), FailureReason>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<(), FailureReason> {
        self.calls.lock().unwrap().push((url.to_string(), body.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn bad_gateway() -> FailureReason {
    FailureReason::Http {
        status: 502,
        status_text: "Bad Gateway".to_string(),
    }
}

pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub transport: Arc<RecordingTransport>,
    pub dispatcher: Arc<Dispatcher>,
    pub pipeline: Arc<Pipeline>,
}

pub fn harness(storage: Arc<InMemoryStorage>, transport: RecordingTransport) -> Harness {
    let transport = Arc::new(transport);
    let config = DispatcherConfig {
        worker_count: 2,
        queue_capacity: 16,
        request_timeout: Duration::from_secs(10),
    };
    let dispatcher = Arc::new(Dispatcher::new(config, storage.clone(), transport.clone()));
    let pipeline = Arc::new(Pipeline::new(storage.clone(), dispatcher.clone()));
    Harness {
        storage,
        transport,
        dispatcher,
        pipeline,
    }
}
