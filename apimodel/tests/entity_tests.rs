mod common;

use apimodel::{
    Attribute, DetailOptions, EntityTypeBuilder, Error, Method, SaveOptions,
    TransportError,
};
use common::{blog, ids, route_comments, Fixture};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

fn object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().unwrap().clone()
}

// ── Attributes ──────────────────────────────────────────────────

#[test]
fn set_records_changes() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog.posts.from_data(object(json!({"id": 1, "title": "a"}))).unwrap();
    assert!(!post.has_changes());

    post.set("title", "b").unwrap();
    post.set("views", 3).unwrap();

    assert_eq!(post.value("title"), Some(json!("b")));
    assert_eq!(post.changes(), object(json!({"title": "b", "views": 3})));

    post.clear_changes();
    assert!(!post.has_changes());
}

#[test]
fn server_data_is_not_a_change() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog.posts.from_data(object(json!({"id": 1, "title": "a"}))).unwrap();

    assert!(post.changes().is_empty());
    assert!(!post.is_new());
    assert_eq!(post.key(), Some(blog.posts.key("1")));
}

#[test]
fn created_entities_are_new_and_get_defaults() {
    let fx = Fixture::new();
    let counter = Arc::new(AtomicI64::new(0));
    let seq = counter.clone();
    let notes = fx.client.register(
        EntityTypeBuilder::new("Note", "/notes")
            .default_value("status", "draft")
            .default_with("seq", move || json!(seq.fetch_add(1, Ordering::SeqCst))),
    );

    let a = notes.create(json!({"body": "x"})).unwrap();
    let b = notes.create(json!({"status": "published"})).unwrap();

    assert!(a.is_new());
    assert_eq!(a.key(), None);
    assert_eq!(a.value("status"), Some(json!("draft")));
    assert_eq!(b.value("status"), Some(json!("published")));
    assert_eq!(a.value("seq"), Some(json!(0)));
    assert_eq!(b.value("seq"), Some(json!(1)));
    assert_eq!(a.changes(), object(json!({"body": "x"})));
}

#[test]
fn defaults_fill_missing_server_fields() {
    let fx = Fixture::new();
    let notes = fx
        .client
        .register(EntityTypeBuilder::new("Note", "/notes").default_value("status", "draft"));

    let note = notes.from_data(object(json!({"id": 1}))).unwrap();
    assert_eq!(note.value("status"), Some(json!("draft")));
    assert!(!note.has_changes());
}

#[test]
fn creating_from_a_non_object_is_a_decode_error() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let err = blog.posts.create(json!([1, 2])).unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{err}");
}

#[test]
fn custom_unique_key_drives_identity() {
    let fx = Fixture::new();
    let pages = fx
        .client
        .register(EntityTypeBuilder::new("Page", "/pages").unique_key("slug"));

    let page = pages.from_data(object(json!({"id": 1, "slug": "home"}))).unwrap();
    assert_eq!(page.identity().as_deref(), Some("home"));
}

#[test]
fn empty_string_identity_counts_as_new() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog.posts.from_data(object(json!({"id": ""}))).unwrap();
    assert!(post.is_new());
}

// ── Paths ───────────────────────────────────────────────────────

#[test]
fn dotted_paths_walk_plain_json() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog
        .posts
        .from_data(object(json!({"id": 1, "meta": {"tags": ["a", "b"], "lang": "en"}})))
        .unwrap();

    let tag = post.get("meta.tags.1").unwrap().unwrap();
    assert_eq!(tag.as_value(), Some(&json!("b")));
    assert_eq!(post.get("meta.lang").unwrap().unwrap().to_value(), json!("en"));
    assert!(post.get("meta.missing").unwrap().is_none());
    assert!(post.get("nothing").unwrap().is_none());
}

#[tokio::test]
async fn dotted_path_through_resolved_relation() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "author": 5}));
    fx.route("/users/5", json!({"id": 5, "name": "ada"}));

    let post = blog
        .posts
        .detail("1", DetailOptions::new().resolve_related())
        .await
        .unwrap();

    let name = post.get("author.name").unwrap().unwrap();
    assert_eq!(name.to_value(), json!("ada"));
}

#[tokio::test]
async fn dotted_path_through_unresolved_relation_is_an_attribute_error() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "author": 5}));

    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    let err = post.get("author.name").unwrap_err();
    assert!(err.is_attribute(), "{err}");
}

#[tokio::test]
async fn dotted_path_maps_over_to_many_relations() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "comments": ids(3)}));
    route_comments(&fx, 3);

    let post = blog
        .posts
        .detail("1", DetailOptions::new().resolve_related())
        .await
        .unwrap();

    let bodies = post.get("comments.body").unwrap().unwrap();
    assert_eq!(
        bodies.to_value(),
        json!(["comment 1", "comment 2", "comment 3"])
    );
    assert!(matches!(post.get("comments").unwrap(), Some(Attribute::Relation(_))));
}

#[tokio::test]
async fn get_resolved_resolves_along_the_path() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "author": 5}));
    fx.route("/users/5", json!({"id": 5, "name": "ada", "posts": [1]}));

    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    let name = post.get_resolved("author.name").await.unwrap().unwrap();
    assert_eq!(name.to_value(), json!("ada"));

    let author = post.get_resolved("author").await.unwrap().unwrap();
    assert_eq!(author.as_entity().unwrap().identity().as_deref(), Some("5"));

    let post_ids = post.get_resolved("author.posts.id").await.unwrap().unwrap();
    assert_eq!(post_ids.to_value(), json!([1]));
    assert_eq!(fx.gets("/users/5"), 1);
}

#[tokio::test]
async fn get_resolved_passes_through_transport_errors() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "author": 404}));

    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();
    let err = post.get_resolved("author.name").await.unwrap_err();

    assert_eq!(err.status(), Some(404));
}

#[test]
fn attributes_view_reads_relations_through_managers() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog
        .posts
        .from_data(object(json!({"id": 1, "title": "t", "author": 5, "comments": []})))
        .unwrap();

    let attrs = post.attributes().unwrap();
    assert_eq!(attrs["title"].to_value(), json!("t"));
    assert!(matches!(attrs["author"], Attribute::Relation(_)));
    assert!(matches!(attrs["comments"], Attribute::Relation(_)));
}

// ── Relation wiring ─────────────────────────────────────────────

#[tokio::test]
async fn setting_a_relation_replaces_its_manager() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "author": 5}));
    fx.route("/users/5", json!({"id": 5}));

    let post = blog
        .posts
        .detail("1", DetailOptions::new().resolve_related())
        .await
        .unwrap();
    let before = post.relation("author").unwrap();
    assert!(before.is_resolved());

    post.set("author", 7).unwrap();

    let after = post.relation("author").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!after.is_resolved());
    assert_eq!(after.primary_keys().to_vec(), vec!["7".to_string()]);
    assert_eq!(post.changes(), object(json!({"author": 7})));
}

#[tokio::test]
async fn setting_a_live_entity_resolves_immediately() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/users/5", json!({"id": 5, "name": "ada"}));
    let user = blog.users.detail("5", DetailOptions::new()).await.unwrap();
    let post = blog.posts.create(json!({"title": "t"})).unwrap();

    post.set("author", &user).unwrap();

    let author = post.get("author").unwrap().unwrap();
    assert!(Arc::ptr_eq(author.as_entity().unwrap(), &user));
    assert_eq!(post.value("author"), Some(json!(5)));
    assert_eq!(post.get("author.name").unwrap().unwrap().to_value(), json!("ada"));
}

#[test]
fn setting_many_live_entities_stores_their_keys() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let c1 = blog.comments.from_data(object(json!({"id": 1}))).unwrap();
    let c2 = blog.comments.from_data(object(json!({"id": "x2"}))).unwrap();
    let post = blog.posts.create(json!({})).unwrap();

    post.set("comments", vec![c1, c2]).unwrap();

    let comments = post.relation("comments").unwrap();
    assert!(comments.is_resolved());
    assert_eq!(comments.entities().unwrap().len(), 2);
    assert_eq!(post.value("comments"), Some(json!([1, "x2"])));
}

#[test]
fn live_entities_without_identity_are_all_kept() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let c1 = blog.comments.create(json!({"body": "first"})).unwrap();
    let c2 = blog.comments.create(json!({"body": "second"})).unwrap();
    let post = blog.posts.create(json!({})).unwrap();

    post.set("comments", vec![c1.clone(), c2.clone()]).unwrap();

    let comments = post.relation("comments").unwrap();
    let loaded = comments.entities().unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(Arc::ptr_eq(&loaded[0], &c1));
    assert!(Arc::ptr_eq(&loaded[1], &c2));
    assert!(comments.loaded("").is_none());
}

#[test]
fn entity_on_a_plain_attribute_is_stored_as_json() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let user = blog.users.from_data(object(json!({"id": 5, "name": "ada"}))).unwrap();
    let post = blog.posts.create(json!({})).unwrap();

    post.set("snapshot", user).unwrap();

    assert_eq!(post.value("snapshot"), Some(json!({"id": 5, "name": "ada"})));
    assert!(post.relation("snapshot").is_none());
}

// ── JSON ────────────────────────────────────────────────────────

#[tokio::test]
async fn to_json_round_trips_wire_attributes() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let data = json!({
        "id": 1,
        "title": "hello",
        "author": 5,
        "comments": [1, 2, 3],
        "meta": {"lang": "en"}
    });

    let post = blog.posts.from_data(object(data.clone())).unwrap();
    assert_eq!(post.to_json(), data);

    let copy = blog.posts.from_data(object(post.to_json())).unwrap();
    assert_eq!(copy.to_json(), post.to_json());
}

// ── Validation ──────────────────────────────────────────────────

fn validated(fx: &Fixture) -> Arc<apimodel::EntityType> {
    fx.client.register(
        EntityTypeBuilder::new("Note", "/notes")
            .validator("title", |v| match v.as_str() {
                Some(s) if !s.is_empty() => Ok(()),
                _ => Err("is required".into()),
            })
            .validator("title", |v| match v.as_str() {
                Some(s) if s.len() > 10 => Err("is too long".into()),
                _ => Ok(()),
            })
            .validator("rating", |v| match v.as_i64() {
                Some(1..=5) | None => Ok(()),
                _ => Err("must be between 1 and 5".into()),
            }),
    )
}

#[test]
fn validate_reports_every_failure() {
    let fx = Fixture::new();
    let notes = validated(&fx);
    let note = notes.create(json!({"rating": 9})).unwrap();

    match note.validate().unwrap_err() {
        Error::Validation(errors) => {
            let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["rating", "title"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    note.set("title", "ok").unwrap();
    note.set("rating", 3).unwrap();
    note.validate().unwrap();
}

#[tokio::test]
async fn invalid_entities_are_not_sent() {
    let fx = Fixture::new();
    let notes = validated(&fx);
    let note = notes.create(json!({"title": ""})).unwrap();

    let err = note.save(SaveOptions::new()).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "{err}");
    assert_eq!(fx.mock.total_calls(), 0);
}

#[tokio::test]
async fn force_skips_validation() {
    let fx = Fixture::new();
    let notes = validated(&fx);
    fx.mock
        .respond_json(Method::Post, "/notes", json!({"id": 1, "title": ""}));
    let note = notes.create(json!({"title": ""})).unwrap();

    note.save(SaveOptions::new().force()).await.unwrap();

    assert_eq!(note.identity().as_deref(), Some("1"));
}

// ── Persistence ─────────────────────────────────────────────────

#[tokio::test]
async fn saving_a_new_entity_posts_and_caches_it() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.mock.respond_json(
        Method::Post,
        "/posts",
        json!({"id": 10, "title": "hello", "created": "now"}),
    );
    let post = blog.posts.create(json!({"title": "hello"})).unwrap();

    let saved = post.save(SaveOptions::new()).await.unwrap();

    let call = &fx.mock.calls()[0];
    assert_eq!(call.method, Method::Post);
    assert_eq!(call.body, Some(json!({"title": "hello"})));
    assert!(Arc::ptr_eq(&saved, &post));
    assert_eq!(post.identity().as_deref(), Some("10"));
    assert_eq!(post.value("created"), Some(json!("now")));
    assert!(!post.has_changes());
    assert!(Arc::ptr_eq(&blog.posts.get_cached("10").unwrap(), &post));
}

#[tokio::test]
async fn saving_changes_patches_only_the_changes() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "title": "a", "body": "long"}));
    fx.mock.respond_json(
        Method::Patch,
        "/posts/1",
        json!({"id": 1, "title": "b", "body": "long"}),
    );
    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    post.set("title", "b").unwrap();
    post.save(SaveOptions::new()).await.unwrap();

    assert_eq!(fx.mock.call_count(Method::Patch, "/posts/1"), 1);
    assert_eq!(fx.mock.calls()[1].body, Some(json!({"title": "b"})));
    assert!(!post.has_changes());
}

#[tokio::test]
async fn full_save_puts_every_attribute() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "title": "a"}));
    fx.mock.respond_json(Method::Put, "/posts/1", json!({"id": 1, "title": "a"}));
    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    post.save(SaveOptions::new().full()).await.unwrap();

    assert_eq!(fx.mock.calls()[1].body, Some(json!({"id": 1, "title": "a"})));
}

#[tokio::test]
async fn saving_without_changes_sends_nothing() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1}));
    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    post.save(SaveOptions::new()).await.unwrap();

    assert_eq!(fx.mock.total_calls(), 1);
}

#[tokio::test]
async fn fields_restrict_what_is_sent() {
    let fx = Fixture::new();
    let notes = fx
        .client
        .register(EntityTypeBuilder::new("Note", "/notes").fields(["title"]));
    fx.mock.respond_json(Method::Post, "/notes", json!({"id": 1}));
    let note = notes.create(json!({"title": "t", "computed": 42})).unwrap();

    note.save(SaveOptions::new()).await.unwrap();

    assert_eq!(fx.mock.calls()[0].body, Some(json!({"title": "t"})));
}

#[tokio::test]
async fn saving_a_second_instance_updates_the_cached_one() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "title": "a"}));
    fx.mock
        .respond_json(Method::Patch, "/posts/1", json!({"id": 1, "title": "b"}));
    let cached = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    let other = blog.posts.from_data(object(json!({"id": 1, "title": "a"}))).unwrap();
    other.set("title", "b").unwrap();
    let saved = other.save(SaveOptions::new()).await.unwrap();

    assert!(Arc::ptr_eq(&saved, &cached));
    assert_eq!(cached.value("title"), Some(json!("b")));
}

#[tokio::test]
async fn failed_save_keeps_changes() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1, "title": "a"}));
    fx.mock.fail(
        Method::Patch,
        "/posts/1",
        TransportError::Status {
            status: 400,
            body: json!({"title": ["too short"]}),
        },
    );
    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();
    post.set("title", "b").unwrap();

    let err = post.save(SaveOptions::new()).await.unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(post.changes(), object(json!({"title": "b"})));
}

#[tokio::test]
async fn destroy_deletes_and_evicts() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    fx.route("/posts/1", json!({"id": 1}));
    fx.mock.respond_json(Method::Delete, "/posts/1", Value::Null);
    let post = blog.posts.detail("1", DetailOptions::new()).await.unwrap();

    post.destroy().await.unwrap();

    assert_eq!(fx.mock.call_count(Method::Delete, "/posts/1"), 1);
    assert!(blog.posts.get_cached("1").is_none());
}

#[tokio::test]
async fn destroying_a_new_entity_is_an_error() {
    let fx = Fixture::new();
    let blog = blog(&fx);
    let post = blog.posts.create(json!({"title": "t"})).unwrap();

    let err = post.destroy().await.unwrap_err();

    assert!(matches!(err, Error::NotPersisted(_)), "{err}");
    assert_eq!(fx.mock.total_calls(), 0);
}

// ── Endpoint templates ──────────────────────────────────────────

#[tokio::test]
async fn endpoint_placeholders_are_filled_from_params() {
    let fx = Fixture::new();
    let replies = fx.client.register(
        EntityTypeBuilder::new("Reply", "/threads/{thread}/replies"),
    );
    fx.route("/threads/3/replies/1", json!({"id": 1}));

    let reply = replies
        .detail("1", DetailOptions::new().param("thread", 3))
        .await
        .unwrap();

    assert_eq!(reply.identity().as_deref(), Some("1"));
}

#[tokio::test]
async fn missing_endpoint_param_is_an_invalid_request() {
    let fx = Fixture::new();
    let replies = fx
        .client
        .register(EntityTypeBuilder::new("Reply", "/threads/{thread}/replies"));

    let err = replies.detail("1", DetailOptions::new()).await.unwrap_err();

    assert!(
        matches!(err, Error::Transport(TransportError::InvalidRequest(_))),
        "{err}"
    );
    assert_eq!(fx.mock.total_calls(), 0);
}
