//! Integration tests for the query plan graph.

use std::collections::HashMap;
use std::sync::Arc;

use dagdb_core::query::walk;
use dagdb_core::storage::{decode_value, CommitStore, DOCS_TREE};
use dagdb_core::{
    Error, ExecError, JoinStrategy, NodeKind, PlanNode, Planner, SelectNode, StorageConfig,
    StorageEngine,
};
use dagdb_proto::{Doc, FilterExpr, OrderSpec, Value};

struct TestContext {
    storage: Arc<StorageEngine>,
    _storage_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let storage_dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(StorageConfig::new(storage_dir.path())).unwrap();
        Self {
            storage: Arc::new(storage),
            _storage_dir: storage_dir,
        }
    }

    fn planner(&self) -> Planner {
        Planner::new(Arc::clone(&self.storage))
    }
}

/// Document keys of the seeded blog.
struct Blog {
    alice: String,
    bob: String,
    carol: String,
}

fn fields(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

/// Three users (alice -> bob -> carol friendships) and three posts.
fn seed_blog(ctx: &TestContext) -> Blog {
    let store = CommitStore::new(&ctx.storage);
    let user = |name: &str, age: i64| {
        store
            .create_document(
                "users",
                &fields(&[("name", Value::from(name)), ("age", Value::Int(age))]),
            )
            .unwrap()
    };
    let alice = user("Alice", 30);
    let bob = user("Bob", 25);
    let carol = user("Carol", 35);

    store
        .update_document("users", &alice, &fields(&[("friend_id", Value::from(bob.as_str()))]))
        .unwrap();
    store
        .update_document("users", &bob, &fields(&[("friend_id", Value::from(carol.as_str()))]))
        .unwrap();

    for (title, author) in [("Hello", &alice), ("World", &alice), ("Notes", &bob)] {
        store
            .create_document(
                "posts",
                &fields(&[
                    ("title", Value::from(title)),
                    ("author_id", Value::from(author.as_str())),
                ]),
            )
            .unwrap();
    }

    Blog { alice, bob, carol }
}

/// `users { posts friend ... }` with one merge plan per related field.
fn users_with_merges(planner: &Planner, extra_friend_joins: &[&str]) -> PlanNode {
    let mut select = planner.select("users");
    select
        .add_sub_plan(
            "posts",
            planner.join_many(
                "users",
                "posts",
                planner.select("posts"),
                "author_id",
                JoinStrategy::NestedLoop,
            ),
        )
        .unwrap();
    select
        .add_sub_plan(
            "friend",
            planner.join_one("users", "friend", planner.select("users"), "friend_id"),
        )
        .unwrap();
    for field in extra_friend_joins {
        select
            .add_sub_plan(
                field,
                planner.join_one("users", field, planner.select("users"), "friend_id"),
            )
            .unwrap();
    }
    PlanNode::Select(select)
}

fn parallel_of(plan: &PlanNode) -> &dagdb_core::ParallelNode {
    match plan {
        PlanNode::Select(select) => match select.source() {
            PlanNode::Parallel(parallel) => parallel,
            other => panic!("expected a parallel source, got {}", other.kind().name()),
        },
        other => panic!("expected a select, got {}", other.kind().name()),
    }
}

fn by_key(rows: Vec<Doc>) -> HashMap<String, Doc> {
    rows.into_iter()
        .map(|row| (row.key().unwrap().to_string(), row))
        .collect()
}

fn friend_key(row: &Doc, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_doc)
        .and_then(|doc| doc.key().map(str::to_string))
}

// ============================================================================
// Shared scan lockstep
// ============================================================================

#[test]
fn test_merge_branches_see_the_same_row() {
    let ctx = TestContext::new();
    let blog = seed_blog(&ctx);
    let planner = ctx.planner();

    let mut plan = users_with_merges(&planner, &[]);
    let rows = by_key(planner.execute(&mut plan).unwrap());
    assert_eq!(rows.len(), 3);

    // Every branch contributes to the row of the same document
    for (key, row) in &rows {
        let posts = row.get("posts").and_then(Value::as_docs).unwrap();
        for post in posts {
            assert_eq!(post.get("author_id").and_then(Value::as_str), Some(key.as_str()));
        }
        let expected_friend = row
            .get("friend_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        assert_eq!(friend_key(row, "friend"), expected_friend);
    }

    let post_counts: HashMap<&str, usize> = rows
        .iter()
        .map(|(k, row)| (k.as_str(), row.get("posts").and_then(Value::as_docs).unwrap().len()))
        .collect();
    assert_eq!(post_counts[blog.alice.as_str()], 2);
    assert_eq!(post_counts[blog.bob.as_str()], 1);
    assert_eq!(post_counts[blog.carol.as_str()], 0);

    assert_eq!(friend_key(&rows[&blog.alice], "friend"), Some(blog.bob.clone()));
    assert_eq!(friend_key(&rows[&blog.bob], "friend"), Some(blog.carol.clone()));
    assert_eq!(rows[&blog.carol].get("friend"), Some(&Value::Null));
}

#[test]
fn test_shared_scan_advances_once_per_row() {
    let ctx = TestContext::new();
    seed_blog(&ctx);
    let planner = ctx.planner();

    for extra in [&[][..], &["mentor"][..], &["mentor", "buddy", "pal"][..]] {
        let mut plan = users_with_merges(&planner, extra);
        let rows = planner.execute(&mut plan).unwrap();
        assert_eq!(rows.len(), 3);

        let controller = parallel_of(&plan).multiscan().unwrap();
        assert_eq!(controller.readers(), 2 + extra.len());
        // Three rows plus the call that found the end
        assert_eq!(controller.stats().next_calls, 4);
        assert_eq!(controller.stats().docs_fetched, 3);
    }
}

#[test]
fn test_round_completion_is_enforced() {
    let ctx = TestContext::new();
    seed_blog(&ctx);
    let planner = ctx.planner();

    let controller = dagdb_core::MultiScanNode::new();
    controller.attach(planner.scan("users"));
    let mut first = PlanNode::MultiScan(controller.add_reader().unwrap());
    let mut second = PlanNode::MultiScan(controller.add_reader().unwrap());
    first.init().unwrap();
    second.init().unwrap();

    assert!(first.next().unwrap());
    let err = first.next().unwrap_err();
    assert!(matches!(
        err,
        Error::Execution(ExecError::ReaderOutOfStep { round: 1, .. })
    ));

    assert!(second.next().unwrap());
    assert_eq!(first.values().unwrap(), second.values().unwrap());
    assert!(first.next().unwrap());
    assert!(second.next().unwrap());
    assert_eq!(first.values().unwrap(), second.values().unwrap());
    assert_eq!(controller.stats().next_calls, 2);
}

// ============================================================================
// Sub-plan grafting
// ============================================================================

#[test]
fn test_add_sub_plan_topology() {
    let ctx = TestContext::new();
    let planner = ctx.planner();

    // scan + merge: the merge replaces the scan
    let mut select = planner.select("users");
    select
        .add_sub_plan(
            "friend",
            planner.join_one("users", "friend", planner.select("users"), "friend_id"),
        )
        .unwrap();
    assert_eq!(select.source().kind(), NodeKind::TypeJoin);

    // merge + merge: parallel over a two-reader shared scan
    select
        .add_sub_plan(
            "posts",
            planner.join_many(
                "users",
                "posts",
                planner.select("posts"),
                "author_id",
                JoinStrategy::HashJoin,
            ),
        )
        .unwrap();
    let plan = PlanNode::Select(select);
    let parallel = parallel_of(&plan);
    assert_eq!(
        parallel.child_fields(),
        &["".to_string(), "posts".to_string()]
    );
    assert_eq!(parallel.source().map(PlanNode::kind), Some(NodeKind::MultiScan));
    assert_eq!(parallel.multiscan().unwrap().readers(), 2);

    // Each branch reads through a reader in place of its own scan
    for child in parallel.children() {
        let PlanNode::TypeJoin(join) = child else {
            panic!("expected a type join");
        };
        assert_eq!(join.root().kind(), NodeKind::MultiScan);
    }

    // scan + append: parallel without a shared scan
    let mut select = planner.select("users");
    planner.add_version(&mut select).unwrap();
    let plan = PlanNode::Select(select);
    let parallel = parallel_of(&plan);
    assert!(parallel.source().is_none());
    assert_eq!(parallel.children()[1].kind(), NodeKind::Append);
}

#[test]
fn test_merge_and_append_on_merge_source_is_rejected() {
    let ctx = TestContext::new();
    let planner = ctx.planner();

    let mut select = planner.select("users");
    select
        .add_sub_plan(
            "friend",
            planner.join_one("users", "friend", planner.select("users"), "friend_id"),
        )
        .unwrap();
    let err = planner.add_version(&mut select).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot attach sub plan appendNode to source typeJoin"
    );
}

// ============================================================================
// Append children and commit history
// ============================================================================

#[test]
fn test_append_runs_once_per_parent_row() {
    let ctx = TestContext::new();
    let blog = seed_blog(&ctx);
    let planner = ctx.planner();

    let mut select = planner.select("users");
    planner.add_version(&mut select).unwrap();
    let mut plan = PlanNode::Select(select);
    plan.init().unwrap();

    let mut versions = HashMap::new();
    while plan.next().unwrap() {
        let row = plan.values().unwrap().clone();
        let key = row.key().unwrap().to_string();

        // The append child was pointed at this row before it ran
        let append = &parallel_of(&plan).children()[1];
        let Some(PlanNode::DagScan(dag)) = walk::find(append, NodeKind::DagScan) else {
            panic!("expected a DAG scan under the append node");
        };
        assert_eq!(dag.spans()[0].start.to_string(), format!("/{key}/C"));
        assert_eq!(dag.spans()[0].end.to_string(), format!("/{key}/D"));

        let history = row.get("_version").and_then(Value::as_docs).unwrap();
        let head_height = history[0].get("height").and_then(Value::as_i64).unwrap();
        versions.insert(key, (head_height, history.len()));
    }
    plan.close();

    // Composite commits plus the field commits they link
    assert_eq!(versions[&blog.alice], (2, 5));
    assert_eq!(versions[&blog.bob], (2, 5));
    assert_eq!(versions[&blog.carol], (1, 3));
}

#[test]
fn test_latest_commits_and_history() {
    let ctx = TestContext::new();
    let blog = seed_blog(&ctx);
    let planner = ctx.planner();

    let mut latest = planner.latest_commits(&blog.alice, None);
    let rows = planner.execute(&mut latest).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("height"), Some(&Value::Int(2)));
    // Composite head links the previous composite head and the field commit
    assert_eq!(rows[0].get("links").and_then(Value::as_docs).unwrap().len(), 2);

    let mut name_history = planner.commits(&blog.alice, Some("name"));
    let rows = planner.execute(&mut name_history).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("fieldName"), Some(&Value::from("name")));

    // Walking the composite DAG reaches the field commits too
    let mut history = planner.commits(&blog.alice, None);
    let rows = planner.execute(&mut history).unwrap();
    let fields: Vec<&str> = rows
        .iter()
        .map(|row| row.get("fieldName").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(fields.iter().filter(|f| **f == "C").count(), 2);
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"age"));
    assert!(fields.contains(&"friend_id"));

    // A commit looked up by CID
    let cid = rows[0].get("cid").and_then(Value::as_str).unwrap().to_string();
    let mut single = planner.commit(&cid).unwrap();
    let rows = planner.execute(&mut single).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("cid"), Some(&Value::from(cid)));

    // No commits is no rows, not an error
    let mut nothing = planner.latest_commits("bae-00000000-0000-0000-0000-000000000000", None);
    assert!(planner.execute(&mut nothing).unwrap().is_empty());
}

#[test]
fn test_commit_span_fixture() {
    let ctx = TestContext::new();
    let planner = ctx.planner();
    let key = "bae-41598f0c-19bc-5da6-813b-e80f14a10df3";

    let explain = planner.latest_commits(key, Some("1")).explain();
    assert_eq!(
        explain["commitSelectNode"]["dagScanNode"]["spans"],
        serde_json::json!([{
            "start": "/bae-41598f0c-19bc-5da6-813b-e80f14a10df3/1",
            "end": "/bae-41598f0c-19bc-5da6-813b-e80f14a10df3/2",
        }])
    );

    let explain = planner.latest_commits(key, None).explain();
    assert_eq!(
        explain["commitSelectNode"]["dagScanNode"]["spans"],
        serde_json::json!([{
            "start": "/bae-41598f0c-19bc-5da6-813b-e80f14a10df3/C",
            "end": "/bae-41598f0c-19bc-5da6-813b-e80f14a10df3/D",
        }])
    );

    let cid = dagdb_core::Cid::of(b"any block").to_string();
    let explain = planner.commit(&cid).unwrap().explain();
    assert_eq!(
        explain["commitSelectNode"]["dagScanNode"]["spans"],
        serde_json::json!([])
    );
}

// ============================================================================
// Errors and lifecycle
// ============================================================================

#[test]
fn test_storage_error_surfaces_unchanged() {
    let ctx = TestContext::new();
    seed_blog(&ctx);
    let planner = ctx.planner();

    let corrupt = [0xffu8];
    ctx.storage
        .db()
        .open_tree(DOCS_TREE)
        .unwrap()
        .insert(b"/users/bae-zzzz/name", &corrupt[..])
        .unwrap();
    let expected = decode_value(&corrupt).unwrap_err().to_string();

    let mut plan = users_with_merges(&planner, &[]);
    let err = planner.execute(&mut plan).unwrap_err();
    assert!(matches!(err, Error::Deserialization(_)));
    assert_eq!(err.to_string(), expected);
}

#[test]
fn test_close_is_idempotent_and_plans_rerun() {
    let ctx = TestContext::new();
    seed_blog(&ctx);
    let planner = ctx.planner();

    let mut plan = users_with_merges(&planner, &["mentor"]);
    let first = by_key(planner.execute(&mut plan).unwrap());
    assert_eq!(parallel_of(&plan).multiscan().unwrap().stats().releases, 1);

    plan.close();
    plan.close();
    assert_eq!(parallel_of(&plan).multiscan().unwrap().stats().releases, 1);

    let second = by_key(planner.execute(&mut plan).unwrap());
    assert_eq!(first, second);
    assert_eq!(parallel_of(&plan).multiscan().unwrap().stats().releases, 2);
}

#[test]
fn test_values_without_row_is_an_error() {
    let ctx = TestContext::new();
    seed_blog(&ctx);
    let planner = ctx.planner();

    let mut plan = users_with_merges(&planner, &[]);
    plan.init().unwrap();
    assert!(matches!(
        plan.values(),
        Err(Error::Execution(ExecError::NoCurrentRow))
    ));
    plan.close();
}

// ============================================================================
// Select features over joined rows
// ============================================================================

#[test]
fn test_filter_on_joined_field() {
    let ctx = TestContext::new();
    let blog = seed_blog(&ctx);
    let planner = ctx.planner();

    let mut select: SelectNode = planner
        .select("users")
        .with_filter(FilterExpr::eq("friend.name", "Carol"))
        .with_order(vec![OrderSpec::asc("name")]);
    select
        .add_sub_plan(
            "friend",
            planner.join_one("users", "friend", planner.select("users"), "friend_id"),
        )
        .unwrap();
    let mut plan = PlanNode::Select(select);
    let rows = planner.execute(&mut plan).unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key(), Some(blog.bob.as_str()));
}

#[test]
fn test_explain_shows_shared_scan() {
    let ctx = TestContext::new();
    let planner = ctx.planner();

    let plan = users_with_merges(&planner, &[]);
    let explain = plan.explain();
    let branches = explain["selectNode"]["parallelNode"].as_array().unwrap();
    assert_eq!(branches.len(), 2);
    for branch in branches {
        let root = &branch["typeJoin"]["root"]["multiScanNode"];
        assert_eq!(root["readers"], 2);
        assert_eq!(root["source"]["scanNode"]["collectionName"], "users");
    }
    assert_eq!(branches[0]["typeJoin"]["joinType"], "typeJoinMany");
    assert_eq!(branches[1]["typeJoin"]["joinType"], "typeJoinOne");
}
