mod common;

use std::sync::Arc;

use common::*;
use relorm::{
    Builder, Collection, MemoryConnection, Model, ModelError, QueryOperator, Record, Related,
    Relation, Scope, SoftDeletingScope,
};
use serde_json::{json, Value};

#[derive(Debug)]
struct Widget;

impl Model for Widget {
    fn table_name(&self) -> &str {
        "widgets"
    }

    fn model_name(&self) -> &str {
        "Widget"
    }
}

#[derive(Debug)]
struct Category;

#[derive(Debug)]
struct Product;

impl Model for Category {
    fn table_name(&self) -> &str {
        "categories"
    }

    fn model_name(&self) -> &str {
        "Category"
    }

    fn global_scopes(&self) -> Vec<(String, Arc<dyn Scope>)> {
        vec![SoftDeletingScope::registration()]
    }

    fn relation(&self, parent: &Record, name: &str) -> Option<Relation> {
        match name {
            "children" => Some(parent.has_many(Category, "parent_id", "id").into()),
            "parent" => Some(parent.belongs_to(Category, "parent_id", "id").into()),
            "related" => Some(
                parent
                    .belongs_to_many(Category, "category_links", "category_id", "related_id")
                    .into(),
            ),
            "child_products" => Some(
                parent
                    .has_many_through(Product, Category, "parent_id", "category_id", "id", "id")
                    .into(),
            ),
            _ => None,
        }
    }
}

impl Model for Product {
    fn table_name(&self) -> &str {
        "products"
    }

    fn model_name(&self) -> &str {
        "Product"
    }
}

/// Categories 1 and 4 are roots; 2 and 3 sit under 1, 6 under 2 and the trashed 5 under 4
async fn catalog() -> Arc<MemoryConnection> {
    let db = Arc::new(MemoryConnection::new());
    db.seed(
        "categories",
        vec![
            json!({"id": 1, "name": "root", "parent_id": null, "deleted_at": null}),
            json!({"id": 2, "name": "child a", "parent_id": 1, "deleted_at": null}),
            json!({"id": 3, "name": "child b", "parent_id": 1, "deleted_at": null}),
            json!({"id": 4, "name": "other", "parent_id": null, "deleted_at": null}),
            json!({"id": 5, "name": "gone", "parent_id": 4, "deleted_at": "2024-01-01T00:00:00Z"}),
            json!({"id": 6, "name": "grandchild", "parent_id": 2, "deleted_at": null}),
        ],
    )
    .await
    .unwrap();
    db.seed(
        "products",
        vec![
            json!({"id": 10, "category_id": 2}),
            json!({"id": 11, "category_id": 3}),
            json!({"id": 12, "category_id": 5}),
            json!({"id": 13, "category_id": 4}),
        ],
    )
    .await
    .unwrap();
    db.seed(
        "category_links",
        vec![
            json!({"category_id": 1, "related_id": 4}),
            json!({"category_id": 2, "related_id": 3}),
        ],
    )
    .await
    .unwrap();
    db
}

fn categories(db: &Arc<MemoryConnection>) -> Builder {
    Builder::new(Arc::new(Category), Some(connection(db)))
}

async fn widgets(count: i64) -> (Arc<MemoryConnection>, Builder) {
    let db = Arc::new(MemoryConnection::new());
    db.seed("widgets", (1..=count).map(|id| json!({"id": id, "size": id % 7})))
        .await
        .unwrap();
    let builder = Builder::new(Arc::new(Widget), Some(connection(&db)));
    (db, builder)
}

#[tokio::test]
async fn test_chunk_pages_until_short_page() {
    let (db, builder) = widgets(120).await;

    let mut sizes = Vec::new();
    let mut pages = Vec::new();
    let completed = builder
        .chunk(50, |records, page| {
            sizes.push(records.len());
            pages.push(page);
            true
        })
        .await
        .unwrap();

    assert!(completed);
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(db.query_count().await, 3);

    let log = db.query_log().await;
    assert!(log[0].sql.ends_with(r#"ORDER BY "widgets"."id" ASC LIMIT 50 OFFSET 0"#));
}

#[tokio::test]
async fn test_chunk_stops_when_callback_returns_false() {
    let (db, builder) = widgets(120).await;

    let mut seen = 0;
    let completed = builder
        .chunk(50, |records, _| {
            seen += records.len();
            false
        })
        .await
        .unwrap();

    assert!(!completed);
    assert_eq!(seen, 50);
    assert_eq!(db.query_count().await, 1);
}

#[tokio::test]
async fn test_chunk_rejects_zero_size() {
    let (_db, builder) = widgets(3).await;
    assert!(matches!(builder.chunk(0, |_, _| true).await, Err(ModelError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_each_and_chunk_by_id() {
    let (db, builder) = widgets(25).await;

    let mut visited = Vec::new();
    builder
        .clone()
        .where_gt("widgets.id", 20)
        .each(2, |record| {
            visited.push(record.key());
            true
        })
        .await
        .unwrap();
    assert_eq!(visited, (21..=25).map(Value::from).collect::<Vec<_>>());

    db.flush_query_log().await;
    let mut sizes = Vec::new();
    builder
        .chunk_by_id(10, |records, _| {
            sizes.push(records.len());
            true
        })
        .await
        .unwrap();
    assert_eq!(sizes, vec![10, 10, 5]);

    let log = db.query_log().await;
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].bindings, vec![json!(20)]);
}

#[tokio::test]
async fn test_has_and_where_has() {
    let db = seeded().await;

    let with_posts = users(&db).has("posts").unwrap().get().await.unwrap();
    assert_eq!(ids(with_posts.iter()), vec![1, 7]);

    let prolific = users(&db)
        .has_count("posts", QueryOperator::GreaterThanOrEqual, 2)
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(prolific.iter()), vec![7]);

    let without = users(&db).doesnt_have("posts").unwrap().get().await.unwrap();
    assert_eq!(ids(without.iter()), vec![2, 3, 8]);

    let popular = users(&db)
        .where_has("posts", |q| q.where_gte("posts.votes", 9))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(popular.iter()), vec![1]);

    let either = users(&db)
        .where_eq("users.id", 2)
        .or_has("roles")
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(either.iter()), vec![1, 2]);

    // Post 12 still has one live comment
    let commented = users(&db).has("posts.comments").unwrap().get().await.unwrap();
    assert_eq!(ids(commented.iter()), vec![1, 7]);

    let quiet = users(&db)
        .where_doesnt_have("posts", |q| q.where_eq("posts.published", false))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(quiet.iter()), vec![1, 2, 3, 8]);

    assert!(matches!(
        users(&db).where_has("followers", |q| q),
        Err(ModelError::RelationNotFound { .. })
    ));
}

#[tokio::test]
async fn test_soft_deletes() {
    let db = seeded().await;

    assert_eq!(comments(&db).count().await.unwrap(), 3);
    assert_eq!(comments(&db).call("with_trashed", &[]).unwrap().count().await.unwrap(), 4);
    let trashed = comments(&db).call("only_trashed", &[]).unwrap().get().await.unwrap();
    assert_eq!(ids(trashed.iter()), vec![103]);

    let deleted = comments(&db).where_key(100).delete().await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(comments(&db).count().await.unwrap(), 2);
    let stored = db.rows("comments").await;
    assert!(stored.iter().any(|r| r.get("id") == Some(&json!(100)) && r["deleted_at"].is_string()));

    let mut record = comments(&db)
        .call("with_trashed", &[])
        .unwrap()
        .find(103)
        .await
        .unwrap()
        .unwrap();
    assert!(record.force_delete().await.unwrap());
    assert_eq!(db.rows("comments").await.len(), 3);
}

#[tokio::test]
async fn test_record_delete_goes_through_hook() {
    let db = seeded().await;

    let mut comment = comments(&db).find(101).await.unwrap().unwrap();
    assert!(comment.delete().await.unwrap());
    assert!(comments(&db).find(101).await.unwrap().is_none());
    assert_eq!(db.rows("comments").await.len(), 4);

    let mut post = posts(&db).find(11).await.unwrap().unwrap();
    assert!(post.delete().await.unwrap());
    assert!(posts(&db).find(11).await.unwrap().is_none());
    assert_eq!(db.rows("posts").await.len(), 3);
}

#[tokio::test]
async fn test_scopes_and_dynamic_calls() {
    let db = seeded().await;

    let published = posts(&db).call("published", &[]).unwrap().get().await.unwrap();
    assert_eq!(ids(published.iter()), vec![10, 12, 13]);

    let popular = posts(&db)
        .scope("published", &[])
        .unwrap()
        .scope("popular", &[json!(5)])
        .unwrap()
        .call("order_by", &[json!("votes"), json!("desc")])
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(popular.iter()), vec![12, 10]);

    let titled = posts(&db)
        .register_macro("titled", |b: Builder, args: &[Value]| {
            let title = args.first().cloned().unwrap_or(Value::Null);
            Ok(b.where_eq("posts.title", title))
        })
        .call("titled", &[json!("draft")])
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(titled.key(), json!(11));

    assert!(matches!(posts(&db).call("explode", &[]), Err(ModelError::BadMethodCall { .. })));
}

#[tokio::test]
async fn test_find_variants() {
    let db = seeded().await;

    let err = users(&db).find_or_fail(999).await.unwrap_err();
    assert_eq!(err, ModelError::NotFound { model: "User".to_string(), ids: vec![json!(999)] });
    assert!(err.is_not_found());

    assert!(users(&db).find(999).await.unwrap().is_none());
    assert!(users(&db).where_eq("name", "nobody").first_or_fail().await.is_err());

    db.flush_query_log().await;
    assert!(users(&db).find_many(Vec::<i64>::new()).await.unwrap().is_empty());
    assert_eq!(db.query_count().await, 0);

    let many = users(&db).find_many([3, 1]).await.unwrap();
    assert_eq!(ids(many.iter()), vec![1, 3]);

    let fresh = users(&db).find_or_new(42).await.unwrap();
    assert!(!fresh.exists());
}

#[tokio::test]
async fn test_first_or_create_and_update_or_create() {
    let db = seeded().await;

    let existing = users(&db)
        .first_or_create(row(json!({"name": "bob"})), row(json!({"country_id": 2})))
        .await
        .unwrap();
    assert_eq!(existing.key(), json!(2));
    assert_eq!(existing.get_value("country_id"), json!(1));

    let created = users(&db)
        .first_or_create(row(json!({"name": "frank"})), row(json!({"country_id": 2})))
        .await
        .unwrap();
    assert!(created.exists());
    assert_eq!(created.key(), json!(9));
    assert_eq!(created.get_value("country_id"), json!(2));

    let updated = users(&db)
        .update_or_create(row(json!({"name": "frank"})), row(json!({"country_id": 1})))
        .await
        .unwrap();
    assert_eq!(updated.key(), json!(9));
    let stored = users(&db).find(9).await.unwrap().unwrap();
    assert_eq!(stored.get_value("country_id"), json!(1));

    let unsaved = users(&db)
        .first_or_new(row(json!({"name": "gina"})), row(json!({"country_id": 1})))
        .await
        .unwrap();
    assert!(!unsaved.exists());
    assert_eq!(unsaved.get_value("name"), json!("gina"));
}

#[tokio::test]
async fn test_pluck_value_count_exists() {
    let db = seeded().await;

    let names = users(&db)
        .where_in("users.id", vec![1, 2])
        .pluck("name", Some("id"))
        .await
        .unwrap();
    assert_eq!(names.get(1i64), Some(&json!("alice")));
    assert_eq!(names.get(2i64), Some(&json!("bob")));

    let plain = users(&db)
        .order_by_desc("users.id")
        .take(2)
        .pluck("users.name", None)
        .await
        .unwrap();
    assert_eq!(plain.all_values(), vec![json!("erin"), json!("dave")]);

    let title = posts(&db).where_key(12).value("title").await.unwrap();
    assert_eq!(title, Some(json!("hello")));

    assert_eq!(users(&db).count().await.unwrap(), 5);
    assert!(users(&db).where_eq("name", "carol").exists().await.unwrap());
    assert!(users(&db).where_eq("name", "nobody").doesnt_exist().await.unwrap());
}

#[tokio::test]
async fn test_update_touches_timestamps() {
    let db = seeded().await;

    let affected = posts(&db)
        .where_eq("posts.user_id", 7)
        .update(row(json!({"votes": 0})))
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let rows = db.rows("posts").await;
    let touched: Vec<&relorm::Row> =
        rows.iter().filter(|r| r.get("user_id") == Some(&json!(7))).collect();
    assert!(touched.iter().all(|r| r["votes"] == json!(0) && r["updated_at"].is_string()));

    // Users are not timestamped
    users(&db).where_key(1).update(row(json!({"name": "alicia"}))).await.unwrap();
    let alice = db.rows("users").await.into_iter().find(|r| r["id"] == json!(1)).unwrap();
    assert!(alice.get("updated_at").is_none());
}

#[tokio::test]
async fn test_collection_round_trip() {
    let db = seeded().await;

    let loaded = users(&db).with(["posts"]).get().await.unwrap();
    let individually: Vec<Value> = loaded.iter().map(Record::to_array).collect();
    let rebuilt = Collection::make(loaded.iter().cloned());

    assert_eq!(rebuilt.to_array(), Value::Array(individually.clone()));
    assert_eq!(serde_json::to_value(&rebuilt).unwrap(), Value::Array(individually));
}

#[tokio::test]
async fn test_builder_without_connection() {
    let builder = Builder::new(Arc::new(Widget), None);
    assert!(matches!(builder.get().await, Err(ModelError::Connection(_))));
}

#[tokio::test]
async fn test_has_on_self_relations() {
    let db = catalog().await;

    let parents = categories(&db).has("children").unwrap().get().await.unwrap();
    assert_eq!(ids(parents.iter()), vec![1, 2]);

    let leaves = categories(&db).doesnt_have("children").unwrap().get().await.unwrap();
    assert_eq!(ids(leaves.iter()), vec![3, 4, 6]);

    let nested = categories(&db)
        .has("children")
        .unwrap()
        .has("parent")
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(nested.iter()), vec![2]);

    let grandparents = categories(&db).has("children.children").unwrap().get().await.unwrap();
    assert_eq!(ids(grandparents.iter()), vec![1]);

    let named = categories(&db)
        .where_has("children", |q| {
            let column = q.model().qualify_column("name");
            q.where_eq(&column, "child b")
        })
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(ids(named.iter()), vec![1]);

    let linked = categories(&db).has("related").unwrap().get().await.unwrap();
    assert_eq!(ids(linked.iter()), vec![1, 2]);

    // Category 5 is trashed, so category 4 reaches no products through it
    let stocked = categories(&db).has("child_products").unwrap().get().await.unwrap();
    assert_eq!(ids(stocked.iter()), vec![1]);

    // The eager path agrees with the existence filter
    let loaded = categories(&db).with(["children"]).get().await.unwrap();
    let with_children: Vec<i64> = loaded
        .iter()
        .filter(|c| {
            c.get_relation("children")
                .and_then(Related::many)
                .map_or(false, |m| !m.is_empty())
        })
        .filter_map(|c| c.key().as_i64())
        .collect();
    assert_eq!(with_children, vec![1, 2]);
}

#[tokio::test]
async fn test_through_scopes_can_be_removed() {
    let db = catalog().await;
    let other = categories(&db).find(4).await.unwrap().unwrap();

    let through = match other.relation("child_products").unwrap() {
        Relation::HasManyThrough(relation) => relation,
        other => panic!("unexpected relation {}", other.kind()),
    };
    let scoped = through.get_results().await.unwrap();
    assert!(scoped.many().unwrap().is_empty());

    let unscoped = through
        .map_query(|q| q.without_global_scope("categories.soft_deletes"))
        .get_results()
        .await
        .unwrap();
    assert_eq!(ids(unscoped.many().unwrap().iter()), vec![12]);
}
