//! In-memory doubles for the external seams, shared across test modules.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::api::Transport;
use crate::identity::{AuthProvider, AuthUser};
use crate::resume::Navigator;
use crate::video_url::ObjectStore;

/// Records every request and serves canned responses. Paths marked failed
/// still record the attempt before erroring, so tests can assert on retry
/// traffic.
#[derive(Default)]
pub struct MockTransport {
    post_responses: Mutex<HashMap<String, Value>>,
    get_responses: Mutex<HashMap<String, Value>>,
    failed_paths: Mutex<HashSet<String>>,
    posts: Mutex<Vec<(String, Value)>>,
    gets: Mutex<Vec<(String, Vec<(String, String)>)>>,
    beacons: Mutex<Vec<String>>,
    beacon_supported: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_post_response(&self, path: &str, response: Value) {
        self.post_responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn set_get_response(&self, path: &str, response: Value) {
        self.get_responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn fail_path(&self, path: &str) {
        self.failed_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn unfail_path(&self, path: &str) {
        self.failed_paths.lock().unwrap().remove(path);
    }

    pub fn support_beacon(&self) {
        *self.beacon_supported.lock().unwrap() = true;
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.gets.lock().unwrap().clone()
    }

    pub fn beacons(&self) -> Vec<String> {
        self.beacons.lock().unwrap().clone()
    }

    fn is_failed(&self, path: &str) -> bool {
        self.failed_paths.lock().unwrap().contains(path)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        if self.is_failed(path) {
            bail!("mock transport failure for POST {path}");
        }
        Ok(self
            .post_responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let owned: Vec<(String, String)> = query
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        self.gets.lock().unwrap().push((path.to_string(), owned));
        if self.is_failed(path) {
            bail!("mock transport failure for GET {path}");
        }
        Ok(self
            .get_responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn send_beacon(&self, path: &str, _body: Vec<u8>) -> bool {
        if !*self.beacon_supported.lock().unwrap() {
            return false;
        }
        self.beacons.lock().unwrap().push(path.to_string());
        true
    }
}

enum AuthBehavior {
    User(AuthUser),
    SignedOut,
    Failing,
}

/// Scripted identity provider. `calls` counts lookups so cache behavior
/// can be asserted.
pub struct MockAuthProvider {
    behavior: AuthBehavior,
    pub calls: Arc<Mutex<usize>>,
}

impl MockAuthProvider {
    pub fn with_user(id: &str, email: Option<&str>) -> Self {
        Self {
            behavior: AuthBehavior::User(AuthUser {
                id: id.to_string(),
                email: email.map(str::to_string),
            }),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            behavior: AuthBehavior::SignedOut,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: AuthBehavior::Failing,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn current_user(&self) -> Result<Option<AuthUser>> {
        *self.calls.lock().unwrap() += 1;
        match &self.behavior {
            AuthBehavior::User(user) => Ok(Some(user.clone())),
            AuthBehavior::SignedOut => Ok(None),
            AuthBehavior::Failing => bail!("mock identity provider outage"),
        }
    }
}

/// Object store double with per-path canned URLs.
#[derive(Default)]
pub struct MockObjectStore {
    signed: Mutex<HashMap<String, String>>,
    public: Mutex<HashMap<String, String>>,
    fail_signing: Mutex<bool>,
    sign_calls: Mutex<usize>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signed(&self, object_path: &str, url: &str) {
        self.signed
            .lock()
            .unwrap()
            .insert(object_path.to_string(), url.to_string());
    }

    pub fn set_public(&self, object_path: &str, url: &str) {
        self.public
            .lock()
            .unwrap()
            .insert(object_path.to_string(), url.to_string());
    }

    pub fn fail_signing(&self) {
        *self.fail_signing.lock().unwrap() = true;
    }

    pub fn sign_calls(&self) -> usize {
        *self.sign_calls.lock().unwrap()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn create_signed_url(&self, object_path: &str, _ttl_seconds: u64) -> Result<String> {
        *self.sign_calls.lock().unwrap() += 1;
        if *self.fail_signing.lock().unwrap() {
            bail!("mock signing failure for {object_path}");
        }
        match self.signed.lock().unwrap().get(object_path) {
            Some(url) => Ok(url.clone()),
            None => bail!("no signed URL configured for {object_path}"),
        }
    }

    fn public_url(&self, object_path: &str) -> Option<String> {
        self.public.lock().unwrap().get(object_path).cloned()
    }
}

/// Records navigation requests instead of moving anywhere.
#[derive(Default)]
pub struct MockNavigator {
    replaced: Mutex<Vec<String>>,
    reopened: Mutex<Vec<String>>,
}

impl MockNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replaced(&self) -> Vec<String> {
        self.replaced.lock().unwrap().clone()
    }

    pub fn reopened(&self) -> Vec<String> {
        self.reopened.lock().unwrap().clone()
    }
}

impl Navigator for MockNavigator {
    fn replace(&self, route: &str) {
        self.replaced.lock().unwrap().push(route.to_string());
    }

    fn reopen_stream(&self, stream_id: &str) {
        self.reopened.lock().unwrap().push(stream_id.to_string());
    }
}
