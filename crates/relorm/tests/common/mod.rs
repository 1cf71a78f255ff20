//! Shared fixtures: a small blog schema on a seeded in-memory connection
#![allow(dead_code)]

use std::sync::Arc;

use relorm::{
    Builder, ConnectionRef, LocalScope, MemoryConnection, Model, OrmResult, Record, Relation, Row,
    Scope, SoftDeletingScope,
};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct Country;

#[derive(Debug)]
pub struct User;

#[derive(Debug)]
pub struct Post;

#[derive(Debug)]
pub struct Comment;

#[derive(Debug)]
pub struct Role;

impl Model for Country {
    fn table_name(&self) -> &str {
        "countries"
    }

    fn model_name(&self) -> &str {
        "Country"
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "users" => Some(parent.has_many(User, "country_id", "id").into()),
            "posts" => Some(
                parent
                    .has_many_through(Post, User, "country_id", "user_id", "id", "id")
                    .into(),
            ),
            _ => None,
        }
    }
}

impl Model for User {
    fn table_name(&self) -> &str {
        "users"
    }

    fn model_name(&self) -> &str {
        "User"
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "posts" => Some(parent.has_many(Post, "user_id", "id").into()),
            "latest_post" => Some(
                parent
                    .has_one(Post, "user_id", "id")
                    .map_query(|q| q.order_by_desc("posts.id"))
                    .into(),
            ),
            "country" => Some(parent.belongs_to(Country, "country_id", "id").into()),
            "roles" => Some(
                parent
                    .belongs_to_many(Role, "role_user", "user_id", "role_id")
                    .with_pivot(&["level"])
                    .into(),
            ),
            "comments" => Some(
                parent
                    .has_many_through(Comment, Post, "user_id", "post_id", "id", "id")
                    .into(),
            ),
            _ => None,
        }
    }
}

fn published(builder: Builder, _: &[Value]) -> OrmResult<Builder> {
    Ok(builder.where_eq("posts.published", true))
}

fn popular(builder: Builder, args: &[Value]) -> OrmResult<Builder> {
    let votes = args.first().and_then(Value::as_i64).unwrap_or(5);
    Ok(builder.where_gte("posts.votes", votes))
}

impl Model for Post {
    fn table_name(&self) -> &str {
        "posts"
    }

    fn model_name(&self) -> &str {
        "Post"
    }

    fn uses_timestamps(&self) -> bool {
        true
    }

    fn local_scope(&self, name: &str) -> Option<LocalScope> {
        match name {
            "published" => Some(published),
            "popular" => Some(popular),
            _ => None,
        }
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "author" => Some(parent.belongs_to(User, "user_id", "id").into()),
            "comments" => Some(parent.has_many(Comment, "post_id", "id").into()),
            "country" => Some(
                parent
                    .has_one_through(Country, User, "id", "id", "user_id", "country_id")
                    .into(),
            ),
            _ => None,
        }
    }
}

impl Model for Comment {
    fn table_name(&self) -> &str {
        "comments"
    }

    fn model_name(&self) -> &str {
        "Comment"
    }

    fn global_scopes(&self) -> Vec<(String, Arc<dyn Scope>)> {
        vec![SoftDeletingScope::registration()]
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "post" => Some(parent.belongs_to(Post, "post_id", "id").into()),
            _ => None,
        }
    }
}

impl Model for Role {
    fn table_name(&self) -> &str {
        "roles"
    }

    fn model_name(&self) -> &str {
        "Role"
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "users" => Some(parent.belongs_to_many(User, "role_user", "role_id", "user_id").into()),
            _ => None,
        }
    }
}

/// Countries 1-2, users 1, 2, 3, 7, 8, posts 10-13, comments 100-103 (103 trashed),
/// roles 1-4 with user 1 linked to 1, 2, 3 and user 2 linked to 2
pub async fn seeded() -> Arc<MemoryConnection> {
    let db = Arc::new(MemoryConnection::new());

    db.seed(
        "countries",
        vec![json!({"id": 1, "name": "Norway"}), json!({"id": 2, "name": "Chile"})],
    )
    .await
    .unwrap();

    db.seed(
        "users",
        vec![
            json!({"id": 1, "name": "alice", "country_id": 1}),
            json!({"id": 2, "name": "bob", "country_id": 1}),
            json!({"id": 3, "name": "carol", "country_id": 2}),
            json!({"id": 7, "name": "dave", "country_id": 2}),
            json!({"id": 8, "name": "erin", "country_id": null}),
        ],
    )
    .await
    .unwrap();

    db.seed(
        "posts",
        vec![
            json!({"id": 10, "user_id": 7, "title": "first", "published": true, "votes": 5}),
            json!({"id": 11, "user_id": 7, "title": "draft", "published": false, "votes": 1}),
            json!({"id": 12, "user_id": 1, "title": "hello", "published": true, "votes": 9}),
            json!({"id": 13, "user_id": null, "title": "orphan", "published": true, "votes": 0}),
        ],
    )
    .await
    .unwrap();

    db.seed(
        "comments",
        vec![
            json!({"id": 100, "post_id": 10, "body": "nice", "deleted_at": null}),
            json!({"id": 101, "post_id": 10, "body": "agreed", "deleted_at": null}),
            json!({"id": 102, "post_id": 12, "body": "hi", "deleted_at": null}),
            json!({"id": 103, "post_id": 12, "body": "spam", "deleted_at": "2024-01-01T00:00:00Z"}),
        ],
    )
    .await
    .unwrap();

    db.seed(
        "roles",
        vec![
            json!({"id": 1, "name": "admin"}),
            json!({"id": 2, "name": "editor"}),
            json!({"id": 3, "name": "viewer"}),
            json!({"id": 4, "name": "guest"}),
        ],
    )
    .await
    .unwrap();

    db.seed(
        "role_user",
        vec![
            json!({"user_id": 1, "role_id": 1, "level": "owner"}),
            json!({"user_id": 1, "role_id": 2, "level": "member"}),
            json!({"user_id": 1, "role_id": 3, "level": "member"}),
            json!({"user_id": 2, "role_id": 2, "level": "member"}),
        ],
    )
    .await
    .unwrap();

    db
}

pub fn connection(db: &Arc<MemoryConnection>) -> ConnectionRef {
    db.clone()
}

pub fn users(db: &Arc<MemoryConnection>) -> Builder {
    Builder::new(Arc::new(User), Some(connection(db)))
}

pub fn posts(db: &Arc<MemoryConnection>) -> Builder {
    Builder::new(Arc::new(Post), Some(connection(db)))
}

pub fn comments(db: &Arc<MemoryConnection>) -> Builder {
    Builder::new(Arc::new(Comment), Some(connection(db)))
}

pub fn countries(db: &Arc<MemoryConnection>) -> Builder {
    Builder::new(Arc::new(Country), Some(connection(db)))
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Primary keys of `records`, in order
pub fn ids<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<i64> {
    records.into_iter().filter_map(|r| r.key().as_i64()).collect()
}
