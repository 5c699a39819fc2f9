//! A stateful in-memory gist server for tests: GET serves the current
//! content, PATCH replaces it, writes are serialized.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Clone)]
pub(crate) struct InMemoryGist {
    content: Arc<Mutex<String>>,
}

impl InMemoryGist {
    pub(crate) async fn mount(server: &MockServer, id: &str, initial: &str) -> Self {
        let gist = Self {
            content: Arc::new(Mutex::new(initial.to_owned())),
        };
        Mock::given(method("GET"))
            .and(path(format!("/{id}")))
            .respond_with(ReadGist(gist.clone()))
            .mount(server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("/{id}")))
            .respond_with(WriteGist(gist.clone()))
            .mount(server)
            .await;
        gist
    }

    pub(crate) fn content(&self) -> String {
        self.content.lock().unwrap().clone()
    }

    pub(crate) fn set(&self, value: &str) {
        *self.content.lock().unwrap() = value.to_owned();
    }

    fn body(&self) -> serde_json::Value {
        json!({ "files": { "lock.json": { "content": self.content() } } })
    }
}

struct ReadGist(InMemoryGist);

impl Respond for ReadGist {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(self.0.body())
    }
}

struct WriteGist(InMemoryGist);

impl Respond for WriteGist {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("patch body is json");
        let content = body["files"]["lock.json"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_owned();
        self.0.set(&content);
        ResponseTemplate::new(200).set_body_json(self.0.body())
    }
}
