//! Eager loading: batch constraints, dictionary matching, empty defaults,
//! nested paths, lazy/eager parity, and the per-type batching of morph-to.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::json;

use quarry_orm::backends::memory::{row, MemoryConnection, MemoryRow};
use quarry_orm::relations::{DefinitionRef, PivotRecord, RelationDef};
use quarry_orm::{EntityBuilder, EntityDefinition, ModelError};

fn users_ref() -> DefinitionRef {
    Arc::new(|| USERS.clone())
}

fn posts_ref() -> DefinitionRef {
    Arc::new(|| POSTS.clone())
}

fn comments_ref() -> DefinitionRef {
    Arc::new(|| COMMENTS.clone())
}

fn roles_ref() -> DefinitionRef {
    Arc::new(|| ROLES.clone())
}

static USERS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("users")
        .guarded(vec![])
        .relation("posts", RelationDef::has_many(posts_ref(), "user_id", "id"))
        .relation(
            "roles",
            RelationDef::belongs_to_many(roles_ref(), "role_user", "user_id", "role_id"),
        )
        .build()
});

static POSTS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("posts")
        .guarded(vec![])
        .relation("user", RelationDef::belongs_to(users_ref(), "user_id", "id"))
        .relation(
            "comments",
            RelationDef::has_many(comments_ref(), "post_id", "id"),
        )
        .build()
});

static COMMENTS: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("comments").guarded(vec![]).build());

static ROLES: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("roles").guarded(vec![]).build());

static IMAGES: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    let mut morph_map: HashMap<String, DefinitionRef> = HashMap::new();
    morph_map.insert("posts".to_string(), posts_ref());
    morph_map.insert("users".to_string(), users_ref());
    EntityDefinition::builder("images")
        .guarded(vec![])
        .relation("imageable", RelationDef::morph_to("imageable", morph_map))
        .build()
});

fn user_row(id: i64) -> MemoryRow {
    row([("id", id)]).set("name", format!("user-{}", id))
}

fn post_row(id: i64, user_id: i64) -> MemoryRow {
    row([("id", id), ("user_id", user_id)]).set("title", format!("post-{}", id))
}

#[tokio::test]
async fn unmatched_parents_get_empty_collections_never_null() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1), user_row(2), user_row(3)]);
    conn.push_rows(vec![post_row(10, 1), post_row(11, 1)]);

    let users = EntityBuilder::new(USERS.clone())
        .with("posts")
        .get(&conn)
        .await
        .unwrap();

    assert_eq!(users.len(), 3);
    for user in &users {
        let related = user.get_relation("posts").expect("relation initialized");
        assert!(related.is_collection());
    }
    assert_eq!(users[0].get_relation("posts").unwrap().as_many().unwrap().len(), 2);
    assert!(users[1].get_relation("posts").unwrap().as_many().unwrap().is_empty());
    assert!(users[2].get_relation("posts").unwrap().as_many().unwrap().is_empty());

    // one base query plus one batch query, never one per parent
    let log = conn.statements();
    assert_eq!(log.len(), 2);
    assert!(log[1].sql.contains("WHERE user_id IN ($1, $2, $3)"));
}

#[tokio::test]
async fn eager_and_lazy_loading_agree() {
    let eager_conn = MemoryConnection::new();
    eager_conn.push_rows(vec![user_row(1), user_row(2)]);
    eager_conn.push_rows(vec![post_row(10, 1), post_row(11, 2)]);

    let eager_users = EntityBuilder::new(USERS.clone())
        .with("posts")
        .get(&eager_conn)
        .await
        .unwrap();

    let lazy_conn = MemoryConnection::new();
    lazy_conn.push_rows(vec![user_row(1), user_row(2)]);
    let mut lazy_users = EntityBuilder::new(USERS.clone()).get(&lazy_conn).await.unwrap();
    lazy_conn.push_rows(vec![post_row(10, 1)]);
    lazy_conn.push_rows(vec![post_row(11, 2)]);

    for user in lazy_users.iter_mut() {
        user.load("posts", &lazy_conn).await.unwrap();
    }

    for (eager, lazy) in eager_users.iter().zip(lazy_users.iter()) {
        let eager_posts = eager.get_relation("posts").unwrap().as_many().unwrap();
        let lazy_posts = lazy.get_relation("posts").unwrap().as_many().unwrap();
        assert_eq!(eager_posts.len(), lazy_posts.len());
        for (a, b) in eager_posts.iter().zip(lazy_posts.iter()) {
            assert_eq!(a.attributes(), b.attributes());
        }
    }
}

#[tokio::test]
async fn lazy_loading_caches_per_entity() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1)]);
    let mut user = EntityBuilder::new(USERS.clone())
        .first(&conn)
        .await
        .unwrap()
        .unwrap();

    conn.push_rows(vec![post_row(10, 1)]);
    user.load("posts", &conn).await.unwrap();
    user.load("posts", &conn).await.unwrap();

    // initial select + one relation query, cache absorbed the second load
    assert_eq!(conn.statements().len(), 2);
}

#[tokio::test]
async fn dotted_paths_resolve_transitively() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1)]);
    conn.push_rows(vec![post_row(10, 1)]);
    conn.push_rows(vec![row([("id", 100i64), ("post_id", 10i64)]).set("body", "nice")]);

    let users = EntityBuilder::new(USERS.clone())
        .with("posts.comments")
        .get(&conn)
        .await
        .unwrap();

    let posts = users[0].get_relation("posts").unwrap().as_many().unwrap();
    let comments = posts[0].get_relation("comments").unwrap().as_many().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].get_attribute("body"), Some(json!("nice")));

    let log = conn.statements();
    assert_eq!(log.len(), 3);
    assert!(log[2].sql.contains("WHERE post_id IN ($1)"));
}

#[tokio::test]
async fn belongs_to_matches_through_owner_key() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![post_row(10, 2), post_row(11, 1)]);
    conn.push_rows(vec![user_row(1), user_row(2)]);

    let posts = EntityBuilder::new(POSTS.clone())
        .with("user")
        .get(&conn)
        .await
        .unwrap();

    let first_owner = posts[0].get_relation("user").unwrap().as_one().unwrap();
    let second_owner = posts[1].get_relation("user").unwrap().as_one().unwrap();
    assert_eq!(first_owner.get_attribute("id"), Some(json!(2)));
    assert_eq!(second_owner.get_attribute("id"), Some(json!(1)));

    let log = conn.statements();
    assert!(log[1].sql.contains("WHERE id IN ($1, $2)"));
}

#[tokio::test]
async fn eager_constraint_shapes_the_relation_query() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1)]);
    conn.push_rows(vec![post_row(10, 1)]);

    EntityBuilder::new(USERS.clone())
        .with_constrained("posts", |q| q.where_eq("published", true))
        .get(&conn)
        .await
        .unwrap();

    let log = conn.statements();
    assert!(log[1]
        .sql
        .contains("WHERE published = $1 AND user_id IN ($2)"));
}

#[tokio::test]
async fn morph_to_issues_one_query_per_distinct_type() {
    let conn = MemoryConnection::new();

    // 10 images across two discriminator values
    let mut image_rows = Vec::new();
    for i in 0..10i64 {
        let (kind, target) = if i % 2 == 0 {
            ("posts", 10 + i)
        } else {
            ("users", 1 + i)
        };
        image_rows.push(
            row([("id", 200 + i), ("imageable_id", target)]).set("imageable_type", kind),
        );
    }
    conn.push_rows(image_rows);

    // groups resolve in discriminator order: posts first, then users
    conn.push_rows(vec![
        post_row(10, 1),
        post_row(12, 1),
        post_row(14, 1),
        post_row(16, 1),
        post_row(18, 1),
    ]);
    conn.push_rows(vec![
        user_row(2),
        user_row(4),
        user_row(6),
        user_row(8),
        user_row(10),
    ]);

    let images = EntityBuilder::new(IMAGES.clone())
        .with("imageable")
        .get(&conn)
        .await
        .unwrap();

    // exactly 2 additional queries for 10 parents
    let log = conn.statements();
    assert_eq!(log.len(), 3);
    assert!(log[1].sql.starts_with("SELECT * FROM posts WHERE posts.id IN"));
    assert!(log[2].sql.starts_with("SELECT * FROM users WHERE users.id IN"));

    for image in &images {
        let target = image.get_relation("imageable").unwrap().as_one().unwrap();
        assert_eq!(
            Some(target.get_attribute("id").unwrap()),
            image.get_attribute("imageable_id")
        );
    }
}

#[tokio::test]
async fn morph_to_with_unknown_discriminator_fails() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![
        row([("id", 1i64), ("imageable_id", 5i64)]).set("imageable_type", "videos")
    ]);

    let err = EntityBuilder::new(IMAGES.clone())
        .with("imageable")
        .get(&conn)
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Relationship(_)));
}

#[tokio::test]
async fn belongs_to_many_strips_pivot_columns() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1), user_row(2)]);
    conn.push_rows(vec![
        row([("id", 7i64)])
            .set("name", "editor")
            .set("pivot_user_id", 1i64)
            .set("pivot_role_id", 7i64),
        row([("id", 7i64)])
            .set("name", "editor")
            .set("pivot_user_id", 2i64)
            .set("pivot_role_id", 7i64),
        row([("id", 8i64)])
            .set("name", "admin")
            .set("pivot_user_id", 1i64)
            .set("pivot_role_id", 8i64),
    ]);

    let users = EntityBuilder::new(USERS.clone())
        .with("roles")
        .get(&conn)
        .await
        .unwrap();

    let log = conn.statements();
    assert!(log[1].sql.contains("INNER JOIN role_user ON role_user.role_id = roles.id"));
    assert!(log[1].sql.contains("role_user.user_id AS pivot_user_id"));
    assert!(log[1].sql.contains("WHERE role_user.user_id IN ($1, $2)"));

    let first_roles = users[0].get_relation("roles").unwrap().as_many().unwrap();
    let second_roles = users[1].get_relation("roles").unwrap().as_many().unwrap();
    assert_eq!(first_roles.len(), 2);
    assert_eq!(second_roles.len(), 1);

    for role in first_roles {
        assert!(!role.attributes().contains_key("pivot_user_id"));
        let pivot = PivotRecord::of(role).expect("pivot attached");
        assert_eq!(pivot.get_attribute("user_id"), Some(json!(1)));
    }
}

#[tokio::test]
async fn has_many_through_recovers_the_grandparent_key() {
    static COUNTRIES: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
        EntityDefinition::builder("countries")
            .guarded(vec![])
            .relation(
                "posts",
                RelationDef::has_many_through(posts_ref(), users_ref(), "country_id", "user_id"),
            )
            .build()
    });

    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 1i64)]).set("name", "NZ"), row([("id", 2i64)]).set("name", "AU")]);
    conn.push_rows(vec![
        post_row(10, 5).set("through_key", 1i64),
        post_row(11, 6).set("through_key", 2i64),
    ]);

    let countries = EntityBuilder::new(COUNTRIES.clone())
        .with("posts")
        .get(&conn)
        .await
        .unwrap();

    let log = conn.statements();
    assert!(log[1].sql.contains("INNER JOIN users ON users.id = posts.user_id"));
    assert!(log[1].sql.contains("users.country_id AS through_key"));
    assert!(log[1].sql.contains("WHERE users.country_id IN ($1, $2)"));

    let nz_posts = countries[0].get_relation("posts").unwrap().as_many().unwrap();
    assert_eq!(nz_posts.len(), 1);
    assert_eq!(nz_posts[0].get_attribute("id"), Some(json!(10)));
}

#[tokio::test]
async fn without_unregisters_an_eager_path() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1)]);

    let users = EntityBuilder::new(USERS.clone())
        .with("posts")
        .without("posts")
        .get(&conn)
        .await
        .unwrap();

    assert!(users[0].get_relation("posts").is_none());
    assert_eq!(conn.statements().len(), 1);
}

#[test]
fn existence_queries_use_raw_correlation() {
    let builder = EntityBuilder::new(USERS.clone()).has("posts").unwrap();
    let sql = builder.query().to_sql();
    assert_eq!(
        sql,
        "SELECT * FROM users WHERE \
         (SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id) >= 1"
    );

    let none = EntityBuilder::new(USERS.clone()).doesnt_have("posts").unwrap();
    assert!(none.query().to_sql().ends_with("< 1"));
}

#[test]
fn where_has_merges_relation_constraints() {
    let builder = EntityBuilder::new(USERS.clone())
        .where_has("posts", |q| q.where_eq("published", true))
        .unwrap();
    assert_eq!(
        builder.query().to_sql(),
        "SELECT * FROM users WHERE (SELECT COUNT(*) FROM posts \
         WHERE published = true AND posts.user_id = users.id) >= 1"
    );
}

#[test]
fn dotted_has_recurses_through_nested_relations() {
    let builder = EntityBuilder::new(USERS.clone()).has("posts.comments").unwrap();
    assert_eq!(
        builder.query().to_sql(),
        "SELECT * FROM users WHERE (SELECT COUNT(*) FROM posts WHERE \
         (SELECT COUNT(*) FROM comments WHERE comments.post_id = posts.id) >= 1 \
         AND posts.user_id = users.id) >= 1"
    );
}

#[test]
fn with_count_adds_an_aliased_subselect() {
    let builder = EntityBuilder::new(USERS.clone()).with_count("posts").unwrap();
    assert_eq!(
        builder.query().to_sql(),
        "SELECT users.*, (SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id) \
         AS posts_count FROM users"
    );
}

#[tokio::test]
async fn with_count_hydrates_the_alias() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1).set("posts_count", 4i64)]);

    let users = EntityBuilder::new(USERS.clone())
        .with_count("posts")
        .unwrap()
        .get(&conn)
        .await
        .unwrap();
    assert_eq!(users[0].get_attribute("posts_count"), Some(json!(4)));
}

#[tokio::test]
async fn unknown_relation_name_surfaces_during_eager_load() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![user_row(1)]);

    let err = EntityBuilder::new(USERS.clone())
        .with("followers")
        .get(&conn)
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownRelation(name) if name == "followers"));
}

#[tokio::test]
async fn eager_load_skips_when_no_parents() {
    let conn = MemoryConnection::new();
    let users = EntityBuilder::new(USERS.clone())
        .with("posts")
        .get(&conn)
        .await
        .unwrap();
    assert!(users.is_empty());
    assert_eq!(conn.statements().len(), 1);
}
