//! Many-to-many synchronization: attach, detach, diff-based sync, and
//! direct pivot updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::json;

use quarry_orm::backends::memory::{row, MemoryConnection};
use quarry_orm::relations::{DefinitionRef, RelationDef};
use quarry_orm::{Entity, EntityDefinition};

fn roles_ref() -> DefinitionRef {
    Arc::new(|| ROLES.clone())
}

fn tags_ref() -> DefinitionRef {
    Arc::new(|| TAGS.clone())
}

static ROLES: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("roles").guarded(vec![]).build());

static TAGS: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("tags").guarded(vec![]).build());

static USERS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("users")
        .guarded(vec![])
        .relation(
            "roles",
            RelationDef::belongs_to_many(roles_ref(), "role_user", "user_id", "role_id"),
        )
        .relation(
            "badges",
            RelationDef::belongs_to_many(roles_ref(), "badge_user", "user_id", "badge_id")
                .with_pivot_timestamps(),
        )
        .build()
});

static POSTS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("posts")
        .guarded(vec![])
        .morph_class("posts")
        .relation(
            "tags",
            RelationDef::morph_to_many(tags_ref(), "taggable", "taggables", "taggable_id", "tag_id"),
        )
        .build()
});

fn user(id: i64) -> Entity {
    let mut attrs = BTreeMap::new();
    attrs.insert("id".to_string(), json!(id));
    Entity::hydrate(USERS.clone(), attrs)
}

fn post(id: i64) -> Entity {
    let mut attrs = BTreeMap::new();
    attrs.insert("id".to_string(), json!(id));
    Entity::hydrate(POSTS.clone(), attrs)
}

#[tokio::test]
async fn attach_inserts_one_pivot_row_per_id() {
    let conn = MemoryConnection::new();
    let relation = user(1).belongs_to_many("roles").unwrap();

    relation
        .attach(&conn, &[json!(2), json!(3)], &[])
        .await
        .unwrap();

    let log = conn.statements();
    assert_eq!(log.len(), 2);
    for statement in &log {
        assert_eq!(
            statement.sql,
            "INSERT INTO role_user (user_id, role_id) VALUES ($1, $2)"
        );
    }
}

#[tokio::test]
async fn attach_merges_extra_attributes() {
    let conn = MemoryConnection::new();
    let relation = user(1).belongs_to_many("roles").unwrap();

    relation
        .attach(&conn, &[json!(2)], &[("level".to_string(), json!(5))])
        .await
        .unwrap();

    let log = conn.statements();
    assert_eq!(
        log[0].sql,
        "INSERT INTO role_user (user_id, role_id, level) VALUES ($1, $2, $3)"
    );
}

#[tokio::test]
async fn attach_populates_pivot_timestamps_when_declared() {
    let conn = MemoryConnection::new();
    let relation = user(1).belongs_to_many("badges").unwrap();

    relation.attach(&conn, &[json!(9)], &[]).await.unwrap();

    let log = conn.statements();
    assert!(log[0].sql.contains("created_at"));
    assert!(log[0].sql.contains("updated_at"));
}

#[tokio::test]
async fn detach_without_ids_clears_the_parent() {
    let conn = MemoryConnection::new();
    let relation = user(1).belongs_to_many("roles").unwrap();

    relation.detach(&conn, None).await.unwrap();

    let log = conn.statements();
    assert_eq!(log[0].sql, "DELETE FROM role_user WHERE user_id = $1");
}

#[tokio::test]
async fn sync_computes_the_three_disjoint_sets() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![
        row([("role_id", 1i64)]),
        row([("role_id", 2i64)]),
        row([("role_id", 3i64)]),
    ]);

    let relation = user(1).belongs_to_many("roles").unwrap();
    let changes = relation
        .sync_ids(&conn, vec![json!(2), json!(3), json!(4)], true)
        .await
        .unwrap();

    assert_eq!(changes.attached, vec![json!(4)]);
    assert_eq!(changes.detached, vec![json!(1)]);
    assert!(changes.updated.is_empty());
    assert!(changes.has_changes());

    let log = conn.statements();
    // current-state read, one detach, one attach
    assert_eq!(log.len(), 3);
    assert!(log[0].sql.starts_with("SELECT role_id FROM role_user"));
    assert_eq!(
        log[1].sql,
        "DELETE FROM role_user WHERE user_id = $1 AND role_id IN ($2)"
    );
    assert_eq!(log[1].params.len(), 2);
    assert_eq!(
        log[2].sql,
        "INSERT INTO role_user (user_id, role_id) VALUES ($1, $2)"
    );
}

#[tokio::test]
async fn sync_without_detaching_keeps_missing_ids() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("role_id", 1i64)]), row([("role_id", 2i64)])]);

    let relation = user(1).belongs_to_many("roles").unwrap();
    let changes = relation
        .sync_ids(&conn, vec![json!(2)], false)
        .await
        .unwrap();

    assert!(changes.attached.is_empty());
    assert!(changes.detached.is_empty());
    assert_eq!(conn.statements_with_prefix("DELETE"), 0);
}

#[tokio::test]
async fn sync_updates_existing_rows_carrying_extra_attributes() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("role_id", 2i64)])]);

    let relation = user(1).belongs_to_many("roles").unwrap();
    let changes = relation
        .sync(
            &conn,
            &[(json!(2), vec![("level".to_string(), json!(9))])],
            true,
        )
        .await
        .unwrap();

    assert!(changes.attached.is_empty());
    assert!(changes.detached.is_empty());
    assert_eq!(changes.updated, vec![json!(2)]);

    let log = conn.statements();
    assert_eq!(
        log[1].sql,
        "UPDATE role_user SET level = $1 WHERE user_id = $2 AND role_id = $3"
    );
}

#[tokio::test]
async fn sync_tolerates_numeric_string_ids() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("role_id", 2i64)])]);

    let relation = user(1).belongs_to_many("roles").unwrap();
    let changes = relation
        .sync_ids(&conn, vec![json!("2")], true)
        .await
        .unwrap();

    // "2" and 2 are the same id; nothing to do
    assert!(changes.attached.is_empty());
    assert!(changes.detached.is_empty());
    assert!(changes.updated.is_empty());
}

#[tokio::test]
async fn update_existing_pivot_matches_both_keys() {
    let conn = MemoryConnection::new();
    let relation = user(1).belongs_to_many("roles").unwrap();

    relation
        .update_existing_pivot(&conn, &json!(2), &[("level".to_string(), json!(1))])
        .await
        .unwrap();

    let log = conn.statements();
    assert_eq!(
        log[0].sql,
        "UPDATE role_user SET level = $1 WHERE user_id = $2 AND role_id = $3"
    );
}

#[tokio::test]
async fn morph_to_many_scopes_by_discriminator() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("tag_id", 1i64)])]);

    let relation = post(10).belongs_to_many("tags").unwrap();
    let changes = relation
        .sync_ids(&conn, vec![json!(1), json!(2)], true)
        .await
        .unwrap();

    assert_eq!(changes.attached, vec![json!(2)]);

    let log = conn.statements();
    // current-state read filters on the discriminator
    assert!(log[0].sql.contains("taggable_type = $2"));
    // inserts carry the discriminator column automatically
    assert_eq!(
        log[1].sql,
        "INSERT INTO taggables (taggable_id, tag_id, taggable_type) VALUES ($1, $2, $3)"
    );
    assert_eq!(log[1].params.len(), 3);
}

#[tokio::test]
async fn pivot_operations_require_a_persisted_parent() {
    let conn = MemoryConnection::new();
    let relation = Entity::new(USERS.clone()).belongs_to_many("roles").unwrap();
    let err = relation.attach(&conn, &[json!(1)], &[]).await.unwrap_err();
    assert!(matches!(err, quarry_orm::ModelError::MissingPrimaryKey));
}
