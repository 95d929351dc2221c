//! Coverage for the remaining relation variants: has-one, the polymorphic
//! has-one/has-many pair, and the through relations.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::json;

use quarry_orm::backends::memory::{row, MemoryConnection};
use quarry_orm::relations::{DefinitionRef, RelationDef};
use quarry_orm::{Entity, EntityBuilder, EntityDefinition};

fn profiles_ref() -> DefinitionRef {
    Arc::new(|| PROFILES.clone())
}

fn comments_ref() -> DefinitionRef {
    Arc::new(|| COMMENTS.clone())
}

fn suppliers_ref() -> DefinitionRef {
    Arc::new(|| SUPPLIERS.clone())
}

fn accounts_ref() -> DefinitionRef {
    Arc::new(|| ACCOUNTS.clone())
}

fn histories_ref() -> DefinitionRef {
    Arc::new(|| HISTORIES.clone())
}

fn posts_ref() -> DefinitionRef {
    Arc::new(|| POSTS.clone())
}

fn users_ref() -> DefinitionRef {
    Arc::new(|| USERS.clone())
}

static PROFILES: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("profiles").guarded(vec![]).build());

static COMMENTS: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("comments").guarded(vec![]).build());

static USERS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("users")
        .guarded(vec![])
        .relation(
            "profile",
            RelationDef::has_one(profiles_ref(), "user_id", "id"),
        )
        .relation(
            "comments",
            RelationDef::morph_many(comments_ref(), "commentable", "id"),
        )
        .relation(
            "avatar",
            RelationDef::morph_one(profiles_ref(), "imageable", "id"),
        )
        .build()
});

static SUPPLIERS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("suppliers")
        .guarded(vec![])
        .relation(
            "account_history",
            RelationDef::has_one_through(histories_ref(), accounts_ref(), "supplier_id", "account_id"),
        )
        .build()
});

static ACCOUNTS: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("accounts").guarded(vec![]).build());

static HISTORIES: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("histories").guarded(vec![]).build());

static POSTS: Lazy<Arc<EntityDefinition>> =
    Lazy::new(|| EntityDefinition::builder("posts").guarded(vec![]).build());

static REVIEWS: Lazy<Arc<EntityDefinition>> = Lazy::new(|| {
    EntityDefinition::builder("reviews")
        .guarded(vec![])
        .relation(
            "author",
            RelationDef::belongs_to_through(users_ref(), posts_ref(), "post_id", "user_id"),
        )
        .build()
});

fn hydrate(def: &Arc<EntityDefinition>, pairs: &[(&str, serde_json::Value)]) -> Entity {
    let attrs: BTreeMap<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Entity::hydrate(def.clone(), attrs)
}

#[tokio::test]
async fn has_one_eager_defaults_to_null_and_takes_first_match() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 1i64)]), row([("id", 2i64)])]);
    conn.push_rows(vec![
        row([("id", 10i64), ("user_id", 1i64)]),
        row([("id", 11i64), ("user_id", 1i64)]),
    ]);

    let users = EntityBuilder::new(USERS.clone())
        .with("profile")
        .get(&conn)
        .await
        .unwrap();

    let first = users[0].get_relation("profile").unwrap().as_one().unwrap();
    assert_eq!(first.get_attribute("id"), Some(json!(10)));
    assert!(users[1].get_relation("profile").unwrap().as_one().is_none());
}

#[tokio::test]
async fn has_one_lazy_constrains_to_the_parent() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 10i64), ("user_id", 3i64)])]);

    let mut user = hydrate(&USERS, &[("id", json!(3))]);
    let related = user.load("profile", &conn).await.unwrap();
    assert!(related.as_one().is_some());

    let log = conn.statements();
    assert_eq!(log[0].sql, "SELECT * FROM profiles WHERE user_id = $1 LIMIT 1");
    assert_eq!(log[0].params.len(), 1);
}

#[tokio::test]
async fn morph_many_filters_on_the_discriminator() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 1i64)])]);
    conn.push_rows(vec![
        row([("id", 100i64), ("commentable_id", 1i64)]).set("commentable_type", "users")
    ]);

    let users = EntityBuilder::new(USERS.clone())
        .with("comments")
        .get(&conn)
        .await
        .unwrap();

    let log = conn.statements();
    assert!(log[1]
        .sql
        .contains("WHERE commentable_id IN ($1) AND commentable_type = $2"));
    assert_eq!(log[1].params.len(), 2);

    let comments = users[0].get_relation("comments").unwrap().as_many().unwrap();
    assert_eq!(comments.len(), 1);
}

#[tokio::test]
async fn morph_one_lazy_includes_both_predicates() {
    let conn = MemoryConnection::new();
    let mut user = hydrate(&USERS, &[("id", json!(4))]);
    user.load("avatar", &conn).await.unwrap();

    let log = conn.statements();
    assert_eq!(
        log[0].sql,
        "SELECT * FROM profiles WHERE imageable_id = $1 AND imageable_type = $2 LIMIT 1"
    );
}

#[tokio::test]
async fn has_one_through_joins_the_intermediate_table() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 1i64)])]);
    conn.push_rows(vec![
        row([("id", 50i64), ("account_id", 9i64)]).set("through_key", 1i64)
    ]);

    let suppliers = EntityBuilder::new(SUPPLIERS.clone())
        .with("account_history")
        .get(&conn)
        .await
        .unwrap();

    let log = conn.statements();
    assert!(log[1]
        .sql
        .contains("INNER JOIN accounts ON accounts.id = histories.account_id"));
    assert!(log[1].sql.contains("accounts.supplier_id AS through_key"));

    let history = suppliers[0]
        .get_relation("account_history")
        .unwrap()
        .as_one()
        .unwrap();
    assert_eq!(history.get_attribute("id"), Some(json!(50)));
}

#[tokio::test]
async fn belongs_to_through_reaches_the_grandparent() {
    let conn = MemoryConnection::new();
    conn.push_rows(vec![row([("id", 77i64)]).set("name", "Ada")]);

    let mut review = hydrate(&REVIEWS, &[("id", json!(1)), ("post_id", json!(10))]);
    let related = review.load("author", &conn).await.unwrap();
    assert_eq!(
        related.as_one().unwrap().get_attribute("name"),
        Some(json!("Ada"))
    );

    let log = conn.statements();
    assert_eq!(
        log[0].sql,
        "SELECT * FROM users INNER JOIN posts ON posts.user_id = users.id \
         WHERE posts.id = $1 LIMIT 1"
    );
}
