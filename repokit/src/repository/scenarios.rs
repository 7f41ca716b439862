//! Behaviour every adapter must share, run by each adapter's tests

use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{
    NewDocument, Patch, RepositoryError, RepositoryErrorKind, RepositoryOperation,
    RepositoryPort, UpdateOptions,
};
use crate::context::Ctx;
use crate::cursor::{CursorCodec, CursorQueryBuilder};
use crate::pagination::{PageRequest, Paginator};
use crate::query::{Field, FieldValue, QueryModel, SortKey, SortOrder};
use crate::repository::FindOptions;

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn seed<R: RepositoryPort>(repo: &R, collection: &str, docs: Vec<(&str, &str, Value)>) {
    let ctx = Ctx::new();
    repo.ensure_collection(&ctx, collection).await.unwrap();
    for (id, owner, data) in docs {
        repo.save(&ctx, collection, NewDocument::new(id, owner, body(data)))
            .await
            .unwrap();
    }
}

async fn count_where<R: RepositoryPort>(repo: &R, collection: &str, query: QueryModel) -> u64 {
    repo.count(&Ctx::new(), collection, &query).await.unwrap()
}

pub(crate) async fn save_and_find<R: RepositoryPort>(repo: &R) {
    #[derive(Debug, Deserialize)]
    struct Post {
        id: String,
        owner_id: String,
        title: String,
        votes: i64,
    }

    let ctx = Ctx::new();
    let collection = "sc_posts";
    repo.ensure_collection(&ctx, collection).await.unwrap();
    repo.ensure_collection(&ctx, collection).await.unwrap();

    let doc = NewDocument::new(
        "p_1",
        "u_1",
        body(json!({"title": "Hello", "votes": 3, "stats": {"views": 10}})),
    )
    .with_timestamps(100, 100);
    repo.save(&ctx, collection, doc.clone()).await.unwrap();

    let err = repo.save(&ctx, collection, doc).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::AlreadyExists);
    assert_eq!(err.entity_id.as_deref(), Some("p_1"));

    let found = repo
        .find_one(&ctx, collection, &QueryModel::by_id("p_1"))
        .await
        .unwrap();
    let stored = found.document();
    assert_eq!(stored.owner_id, "u_1");
    assert_eq!(stored.created_at, 100);
    assert_eq!(stored.data["stats"]["views"], json!(10));

    let post: Post = found.decode().unwrap();
    assert_eq!(post.id, "p_1");
    assert_eq!(post.owner_id, "u_1");
    assert_eq!(post.title, "Hello");
    assert_eq!(post.votes, 3);

    let err = repo
        .find_one(&ctx, collection, &QueryModel::by_id("p_missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.operation, RepositoryOperation::FindOne);

    assert_eq!(count_where(repo, collection, QueryModel::new()).await, 1);
}

pub(crate) async fn filters<R: RepositoryPort>(repo: &R) {
    let c = "sc_filters";
    seed(
        repo,
        c,
        vec![
            ("a", "u_1", json!({"status": "published", "votes": 5, "title": "Rust tips", "category": "tech", "featured": true, "stats": {"views": 4}})),
            ("b", "u_2", json!({"status": "published", "votes": 2, "title": "Async Rust", "category": "life"})),
            ("c", "u_2", json!({"status": "draft", "votes": 9, "title": "Cooking", "category": "food"})),
            ("d", "u_1", json!({"status": "published", "votes": 2, "title": "Plain words"})),
            ("e", "u_1", json!({"status": "archived", "votes": 0, "title": "Zed", "category": null})),
        ],
    )
    .await;

    let cases: Vec<(QueryModel, u64)> = vec![
        (QueryModel::from_conditions([Field::eq("status", "published")]), 3),
        (QueryModel::from_conditions([Field::ne("status", "published")]), 2),
        (QueryModel::from_conditions([Field::gt("votes", 2_i64)]), 2),
        (QueryModel::from_conditions([Field::gte("votes", 2_i64)]), 4),
        (QueryModel::from_conditions([Field::lt("votes", 2_i64)]), 1),
        (QueryModel::from_conditions([Field::lte("votes", 2_i64)]), 3),
        (QueryModel::from_conditions([Field::gt("votes", 4.5)]), 2),
        (
            QueryModel::from_conditions([Field::in_list(
                "category",
                vec!["tech".to_string(), "food".to_string()],
            )]),
            2,
        ),
        (QueryModel::from_conditions([Field::in_list("category", Vec::<String>::new())]), 0),
        (QueryModel::from_conditions([Field::is_null("category")]), 2),
        (QueryModel::from_conditions([Field::is_not_null("category")]), 3),
        (QueryModel::from_conditions([Field::like("title", "Rust%")]), 1),
        (QueryModel::from_conditions([Field::like("title", "%Rust")]), 1),
        (QueryModel::from_conditions([Field::like("title", "%us%")]), 2),
        (QueryModel::from_conditions([Field::eq("ownerId", "u_2")]), 2),
        (QueryModel::from_conditions([Field::eq("featured", true)]), 1),
        (QueryModel::from_conditions([Field::gt("stats.views", 1_i64)]), 1),
        (
            QueryModel::from_conditions([Field::eq("status", "published"), Field::eq("votes", 2_i64)]),
            2,
        ),
        (
            QueryModel::new()
                .with_or_group(vec![Field::eq("status", "draft")])
                .with_or_group(vec![Field::eq("votes", 0_i64)]),
            2,
        ),
    ];
    for (query, expected) in cases {
        assert_eq!(count_where(repo, c, query.clone()).await, expected, "{query:?}");
        let found = repo
            .find(&Ctx::new(), c, &query, FindOptions::new())
            .await
            .unwrap();
        assert_eq!(found.len() as u64, expected, "{query:?}");
    }

    let window = repo
        .find(
            &Ctx::new(),
            c,
            &QueryModel::new(),
            FindOptions::new()
                .sort_by(SortKey::desc("votes"))
                .sort_by(SortKey::asc("id"))
                .with_limit(2)
                .with_skip(1),
        )
        .await
        .unwrap();
    let ids: Vec<_> = window.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let err = repo
        .find(
            &Ctx::new(),
            c,
            &QueryModel::from_conditions([Field::eq("title; DROP TABLE sc_filters", "x")]),
            FindOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
}

pub(crate) async fn updates<R: RepositoryPort>(repo: &R) {
    let ctx = Ctx::new();
    let c = "sc_updates";
    repo.ensure_collection(&ctx, c).await.unwrap();
    repo.save(
        &ctx,
        c,
        NewDocument::new("u1", "u_1", body(json!({"votes": 1, "title": "one", "draft": true})))
            .with_timestamps(1, 1),
    )
    .await
    .unwrap();
    repo.save(&ctx, c, NewDocument::new("u2", "u_1", body(json!({"votes": 1}))))
        .await
        .unwrap();
    repo.save(&ctx, c, NewDocument::new("u3", "u_1", body(json!({"votes": 5}))))
        .await
        .unwrap();

    let changed = repo
        .update_fields(&ctx, c, &QueryModel::by_id("u1"), vec![("title".to_string(), json!("uno"))])
        .await
        .unwrap();
    assert_eq!(changed, 1);
    let u1 = repo.find_one(&ctx, c, &QueryModel::by_id("u1")).await.unwrap();
    assert_eq!(u1.document().data["title"], json!("uno"));
    assert_eq!(u1.document().created_at, 1);
    assert!(u1.document().updated_at > 1);

    let changed = repo
        .increment_fields(
            &ctx,
            c,
            &QueryModel::from_conditions([Field::eq("votes", 1_i64)]),
            vec![("votes".to_string(), FieldValue::Integer(2))],
        )
        .await
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(
        count_where(repo, c, QueryModel::from_conditions([Field::eq("votes", 3_i64)])).await,
        2
    );

    let changed = repo
        .update(
            &ctx,
            c,
            &QueryModel::from_conditions([Field::eq("votes", 3_i64)]),
            Patch::new().set("flagged", json!(true)),
            UpdateOptions::single(),
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);
    assert_eq!(
        count_where(repo, c, QueryModel::from_conditions([Field::eq("flagged", true)])).await,
        1
    );

    repo.update(
        &ctx,
        c,
        &QueryModel::by_id("u3"),
        Patch::new().unset("votes").increment("score", 4_i64),
        UpdateOptions::multi(),
    )
    .await
    .unwrap();
    repo.update(
        &ctx,
        c,
        &QueryModel::by_id("u1"),
        Patch::new().unset("draft"),
        UpdateOptions::multi(),
    )
    .await
    .unwrap();
    let u3 = repo.find_one(&ctx, c, &QueryModel::by_id("u3")).await.unwrap();
    assert!(u3.document().data.get("votes").is_none());
    assert_eq!(u3.document().data["score"], json!(4));
    let u1 = repo.find_one(&ctx, c, &QueryModel::by_id("u1")).await.unwrap();
    assert!(u1.document().data.get("draft").is_none());

    let changed = repo
        .update_fields(&ctx, c, &QueryModel::by_id("nobody"), vec![("title".to_string(), json!("x"))])
        .await
        .unwrap();
    assert_eq!(changed, 0);

    let err = repo
        .update(&ctx, c, &QueryModel::new(), Patch::new(), UpdateOptions::multi())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);

    let err = repo
        .update(
            &ctx,
            c,
            &QueryModel::new(),
            Patch::new().set("owner_id", json!("u_9")),
            UpdateOptions::multi(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
}

pub(crate) async fn deletes<R: RepositoryPort>(repo: &R) {
    let c = "sc_deletes";
    seed(
        repo,
        c,
        vec![
            ("d1", "u_1", json!({"votes": 1})),
            ("d2", "u_1", json!({"votes": 2})),
            ("d3", "u_1", json!({"votes": 3})),
        ],
    )
    .await;

    let ctx = Ctx::new();
    let removed = repo
        .delete(&ctx, c, &QueryModel::from_conditions([Field::lt("votes", 3_i64)]))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 1);

    let removed = repo
        .delete(&ctx, c, &QueryModel::from_conditions([Field::eq("votes", 100_i64)]))
        .await
        .unwrap();
    assert_eq!(removed, 0);
}

pub(crate) async fn ownership_isolation<R: RepositoryPort>(repo: &R) {
    let c = "sc_owned";
    seed(repo, c, vec![("o1", "alice", json!({"title": "mine"}))]).await;
    let ctx = Ctx::new();

    let err = repo
        .update_with_ownership(&ctx, c, "o1", "bob", Patch::new().set("title", json!("stolen")))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    assert_eq!(err.operation, RepositoryOperation::UpdateWithOwnership);
    assert_eq!(err.entity_id.as_deref(), Some("o1"));

    let err = repo
        .delete_with_ownership(&ctx, c, "o1", "bob")
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    assert_eq!(err.operation, RepositoryOperation::DeleteWithOwnership);

    let missing = repo
        .delete_with_ownership(&ctx, c, "o_missing", "alice")
        .await
        .unwrap_err();
    assert_eq!(missing.kind, err.kind);

    let title = repo.find_one(&ctx, c, &QueryModel::by_id("o1")).await.unwrap();
    assert_eq!(title.document().data["title"], json!("mine"));

    repo.update_with_ownership(&ctx, c, "o1", "alice", Patch::new().set("title", json!("edited")))
        .await
        .unwrap();
    let title = repo.find_one(&ctx, c, &QueryModel::by_id("o1")).await.unwrap();
    assert_eq!(title.document().data["title"], json!("edited"));

    repo.delete_with_ownership(&ctx, c, "o1", "alice").await.unwrap();
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 0);
}

/// Run `n` concurrent increments of one counter; returns how many applied
///
/// Every increment must succeed and be reflected in the final value.
pub(crate) async fn concurrent_increments<R: RepositoryPort>(repo: &R, n: usize) -> u64 {
    let c = "sc_counters";
    seed(repo, c, vec![("c1", "u_1", json!({"count": 0}))]).await;
    let ctx = Ctx::new();
    let query = QueryModel::by_id("c1");

    let results = join_all((0..n).map(|_| {
        repo.increment_fields(
            &ctx,
            c,
            &query,
            vec![("count".to_string(), FieldValue::Integer(1))],
        )
    }))
    .await;

    let mut applied = 0;
    for result in results {
        match result {
            Ok(changed) => applied += changed,
            Err(err) => panic!("increment failed: {err}"),
        }
    }

    let counter = repo.find_one(&ctx, c, &query).await.unwrap();
    assert_eq!(counter.document().data["count"], json!(n));
    applied
}

pub(crate) async fn transaction_commits<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_commit";
    let ctx = Ctx::new();
    repo.ensure_collection(&ctx, c).await.unwrap();

    let saved = repo
        .with_transaction(&ctx, |tx| async move {
            repo.save(&tx, c, NewDocument::new("t1", "u_1", Map::new())).await?;
            repo.save(&tx, c, NewDocument::new("t2", "u_1", Map::new())).await?;
            Ok(2)
        })
        .await
        .unwrap();
    assert_eq!(saved, 2);
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 2);
}

pub(crate) async fn transaction_atomicity<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_atomic";
    seed(repo, c, vec![("existing", "u_1", json!({}))]).await;
    let ctx = Ctx::new();

    let err = repo
        .with_transaction(&ctx, |tx| async move {
            repo.save(&tx, c, NewDocument::new("fresh", "u_1", Map::new())).await?;
            repo.save(&tx, c, NewDocument::new("existing", "u_1", Map::new())).await?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::AlreadyExists);
    assert_eq!(
        count_where(repo, c, QueryModel::by_id("fresh")).await,
        0,
        "first write of a failed transaction is visible"
    );
}

pub(crate) async fn transaction_rollback_on_error<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_rollback";
    let ctx = Ctx::new();
    repo.ensure_collection(&ctx, c).await.unwrap();

    let err = repo
        .with_transaction(&ctx, |tx| async move {
            repo.save(&tx, c, NewDocument::new("r1", "u_1", Map::new())).await?;
            Err::<(), _>(RepositoryError::validation_failed("business rule rejected the post"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    assert_eq!(err.message, "business rule rejected the post");
    assert!(err.cause.is_none());
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 0);
}

pub(crate) async fn nested_transaction_joins<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_nested";
    let ctx = Ctx::new();
    repo.ensure_collection(&ctx, c).await.unwrap();

    let err = repo
        .with_transaction(&ctx, |tx| async move {
            repo.save(&tx, c, NewDocument::new("n1", "u_1", Map::new())).await?;
            repo.with_transaction(&tx, |inner| async move {
                repo.save(&inner, c, NewDocument::new("n2", "u_1", Map::new())).await
            })
            .await?;
            Err::<(), _>(RepositoryError::validation_failed("abort outer"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.message, "abort outer");
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 0);

    repo.with_transaction(&ctx, |tx| async move {
        repo.save(&tx, c, NewDocument::new("n1", "u_1", Map::new())).await?;
        repo.with_transaction(&tx, |inner| async move {
            repo.save(&inner, c, NewDocument::new("n2", "u_1", Map::new())).await
        })
        .await
    })
    .await
    .unwrap();
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 2);
}

pub(crate) async fn finished_transaction_is_rejected<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_finished";
    let ctx = Ctx::new();
    repo.ensure_collection(&ctx, c).await.unwrap();

    let leaked = repo
        .with_transaction(&ctx, |tx| async move { Ok(tx) })
        .await
        .unwrap();
    assert!(leaked.transaction().is_some());

    let err = repo
        .count(&leaked, c, &QueryModel::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::TransactionFailed);
    assert_eq!(err.operation, RepositoryOperation::Count);

    let err = repo
        .save(&leaked, c, NewDocument::new("late", "u_1", Map::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::TransactionFailed);
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 0);
}

/// Ownership-scoped calls inside a transaction fail on the call itself
pub(crate) async fn ownership_inside_transaction<R: RepositoryPort>(repo: &R) {
    let c = "sc_tx_owned";
    seed(repo, c, vec![("w1", "alice", json!({"title": "mine", "edits": 0}))]).await;
    let ctx = Ctx::new();

    repo.with_transaction(&ctx, |tx| async move {
        let err = repo
            .update_with_ownership(&tx, c, "w1", "bob", Patch::new().set("title", json!("stolen")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.operation, RepositoryOperation::UpdateWithOwnership);
        assert_eq!(err.entity_id.as_deref(), Some("w1"));

        let err = repo
            .delete_with_ownership(&tx, c, "w1", "bob")
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.operation, RepositoryOperation::DeleteWithOwnership);

        let changed = repo
            .increment_fields(
                &tx,
                c,
                &QueryModel::by_id("w1"),
                vec![("edits".to_string(), FieldValue::Integer(1))],
            )
            .await?;
        assert_eq!(changed, 1);

        repo.update_with_ownership(&tx, c, "w1", "alice", Patch::new().set("title", json!("edited")))
            .await?;
        Ok(())
    })
    .await
    .unwrap();

    let stored = repo.find_one(&ctx, c, &QueryModel::by_id("w1")).await.unwrap();
    assert_eq!(stored.document().owner_id, "alice");
    assert_eq!(stored.document().data["title"], json!("edited"));
    assert_eq!(stored.document().data["edits"], json!(1));
}

/// Walk every page forward and back in both directions over duplicate sort values
pub(crate) async fn tie_break_totality<R: RepositoryPort>(repo: &R) {
    let c = "sc_ties";
    let votes = [3_i64, 3, 3, 2, 2, 1, 1];
    let docs: Vec<(String, i64)> = votes
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("t{}", i + 1), *v))
        .collect();
    seed(
        repo,
        c,
        docs.iter()
            .map(|(id, v)| (id.as_str(), "u_1", json!({"votes": v})))
            .collect(),
    )
    .await;

    let paginator = Paginator::new(
        CursorCodec::with_signing_key("scenario-secret"),
        CursorQueryBuilder::new("id", SortOrder::Desc).with_sortable_fields(["votes"]),
    );
    let ctx = Ctx::new();
    let base = QueryModel::new();

    for order in [SortOrder::Desc, SortOrder::Asc] {
        let mut expected = docs.clone();
        expected.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        if order == SortOrder::Desc {
            expected.reverse();
        }
        let expected: Vec<String> = expected.into_iter().map(|(id, _)| id).collect();
        let request = PageRequest::new().sorted_by("votes", order).with_limit(2);

        // Forward
        let mut seen = Vec::new();
        let mut page = paginator
            .fetch_page(repo, &ctx, c, &base, &request)
            .await
            .unwrap();
        assert!(!page.has_prev);
        assert!(page.prev_cursor.is_none());
        for _ in 0..expected.len() {
            seen.extend(page.items.iter().map(|d| d.id.clone()));
            let Some(next) = page.next_cursor.clone() else {
                break;
            };
            assert!(page.has_next);
            page = paginator
                .fetch_page(repo, &ctx, c, &base, &request.clone().after(next))
                .await
                .unwrap();
            assert!(page.has_prev);
        }
        assert!(!page.has_next);
        assert_eq!(seen, expected, "forward walk, {order}");

        // Backward from the last page
        let mut back: Vec<String> = page.items.iter().map(|d| d.id.clone()).collect();
        for _ in 0..expected.len() {
            let Some(prev) = page.prev_cursor.clone() else {
                break;
            };
            page = paginator
                .fetch_page(repo, &ctx, c, &base, &request.clone().before(prev))
                .await
                .unwrap();
            assert!(page.has_next);
            let mut earlier: Vec<String> = page.items.iter().map(|d| d.id.clone()).collect();
            earlier.append(&mut back);
            back = earlier;
        }
        assert!(!page.has_prev);
        assert_eq!(back, expected, "backward walk, {order}");
    }

    let err = paginator
        .fetch_page(repo, &ctx, c, &base, &PageRequest::new().after("bm90LWEtY3Vyc29y"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor);
}

pub(crate) async fn cancelled_context<R: RepositoryPort>(repo: &R) {
    let c = "sc_cancel";
    repo.ensure_collection(&Ctx::new(), c).await.unwrap();

    let token = CancellationToken::new();
    let ctx = Ctx::new().with_cancellation(token.clone());
    token.cancel();

    let err = repo
        .find(&ctx, c, &QueryModel::new(), FindOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Cancelled);

    let err = repo
        .save(&ctx.child(), c, NewDocument::new("x", "u_1", Map::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Cancelled);

    let err = repo
        .with_transaction(&ctx, |tx| async move {
            repo.save(&tx, c, NewDocument::new("y", "u_1", Map::new())).await
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Cancelled);
    assert_eq!(count_where(repo, c, QueryModel::new()).await, 0);
}
