//! Shared fixtures for apimodel integration tests.

#![allow(dead_code)]

use apimodel::mock::MockTransport;
use apimodel::{
    ClientConfig, EntityClient, EntityType, EntityTypeBuilder, ManualClock, Method, RelationSpec,
};
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Fixture {
    pub client: Arc<EntityClient>,
    pub mock: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_mock(MockTransport::new())
    }

    /// Replies are delayed so concurrent callers overlap.
    pub fn slow() -> Self {
        Self::with_mock(MockTransport::new().with_latency(Duration::from_millis(50)))
    }

    pub fn with_mock(mock: MockTransport) -> Self {
        init_tracing();
        let mock = Arc::new(mock);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let client = EntityClient::with_clock(mock.clone(), ClientConfig::default(), clock.clone());
        Self { client, mock, clock }
    }

    pub fn route(&self, path: &str, data: Value) {
        self.mock.respond_json(Method::Get, path, data);
    }

    pub fn gets(&self, path: &str) -> usize {
        self.mock.call_count(Method::Get, path)
    }
}

/// Users, posts written by users, and comments on posts.
pub struct Blog {
    pub users: Arc<EntityType>,
    pub posts: Arc<EntityType>,
    pub comments: Arc<EntityType>,
}

pub fn blog(fx: &Fixture) -> Blog {
    let users = fx.client.register(
        EntityTypeBuilder::new("User", "/users").relation("posts", RelationSpec::to("Post")),
    );
    let comments = fx.client.register(
        EntityTypeBuilder::new("Comment", "/comments").relation("post", RelationSpec::to("Post")),
    );
    let posts = fx.client.register(
        EntityTypeBuilder::new("Post", "/posts")
            .relation("author", RelationSpec::to("User"))
            .relation("comments", RelationSpec::to("Comment").batch_size(20)),
    );
    Blog {
        users,
        posts,
        comments,
    }
}

/// Routes `/comments/1..=n`.
pub fn route_comments(fx: &Fixture, n: usize) {
    for i in 1..=n {
        fx.route(
            &format!("/comments/{i}"),
            json!({"id": i, "body": format!("comment {i}")}),
        );
    }
}

pub fn ids(n: usize) -> Vec<Value> {
    (1..=n).map(|i| json!(i)).collect()
}
