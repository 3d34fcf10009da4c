use super::{resolve, Resolution};
use crate::tree::{handler_fn, FnHandler, HandlerOutcome, TreeNode};

fn h(name: &str) -> FnHandler {
    handler_fn(name, |_| Ok(HandlerOutcome::empty()))
}

fn tree() -> TreeNode {
    TreeNode::new()
        .with_handler(h("index"))
        .with_child(
            "a",
            TreeNode::new()
                .with_handler(h("default"))
                .with_child("b", TreeNode::new().with_handler(h("index")))
                .with_handler(h("leaf")),
        )
        .with_child("global_", TreeNode::new().with_handler(h("index")))
        .with_child("hidden", TreeNode::new().with_handler(h("index").hidden()))
}

#[test]
fn test_root_index() {
    let r = resolve(&tree(), "/").unwrap();
    assert_eq!(r.object_path(), "root.index");
    assert!(!r.is_index_redirect());
    let r = resolve(&tree(), "").unwrap();
    assert_eq!(r.object_path(), "root.index");
    assert!(!r.is_index_redirect());
}

#[test]
fn test_index_with_trailing_slash() {
    let r = resolve(&tree(), "/a/b/").unwrap();
    assert_eq!(r.object_path(), "root.a.b.index");
    assert!(r.virtual_path().is_empty());
    assert_eq!(r.consumed(), ["a", "b"]);
}

#[test]
fn test_index_without_trailing_slash_redirects() {
    let r = resolve(&tree(), "/a/b").unwrap();
    assert!(r.is_index_redirect());
    assert_eq!(r.object_path(), "root.a.b.index");
}

#[test]
fn test_default_gets_virtual_path_in_order() {
    let r = resolve(&tree(), "/a/x/y/z").unwrap();
    assert_eq!(r.object_path(), "root.a.default");
    assert_eq!(r.virtual_path(), ["x", "y", "z"]);
}

#[test]
fn test_index_wins_over_default_at_same_depth() {
    let root = TreeNode::new().with_child(
        "a",
        TreeNode::new().with_handler(h("index")).with_handler(h("default")),
    );
    let r = resolve(&root, "/a/").unwrap();
    assert_eq!(r.object_path(), "root.a.index");
}

#[test]
fn test_bare_leaf_handler() {
    let r = resolve(&tree(), "/a/leaf").unwrap();
    assert!(matches!(r, Resolution::Handler { .. }));
    assert_eq!(r.object_path(), "root.a.leaf");
    assert!(r.virtual_path().is_empty());

    // the leaf is tried before any default
    let root = TreeNode::new().with_child(
        "a",
        TreeNode::new()
            .with_handler(h("leaf"))
            .with_handler(h("default"))
            .with_child("leaf", TreeNode::new().with_handler(h("default"))),
    );
    let r = resolve(&root, "/a/leaf").unwrap();
    assert_eq!(r.object_path(), "root.a.leaf");
}

#[test]
fn test_bare_leaf_never_takes_trailing_segments() {
    let root = TreeNode::new().with_child("a", TreeNode::new().with_handler(h("b")));
    let err = resolve(&root, "/a/b/c/d").unwrap_err();
    assert_eq!(err.0, "/a/b/c/d");
}

#[test]
fn test_default_is_only_reached_by_popping() {
    let root = TreeNode::new().with_child(
        "a",
        TreeNode::new().with_child("b", TreeNode::new().with_handler(h("default"))),
    );
    // `root.a.b.default` serves what lies below `b`, not `b` itself
    assert!(resolve(&root, "/a/b").is_err());
    let r = resolve(&root, "/a/b/c").unwrap();
    assert_eq!(r.object_path(), "root.a.b.default");
    assert_eq!(r.virtual_path(), ["c"]);
}

#[test]
fn test_root_default_serves_empty_path_and_everything_else() {
    let root = TreeNode::new().with_handler(h("default"));
    let r = resolve(&root, "/").unwrap();
    assert_eq!(r.object_path(), "root.default");
    assert!(r.virtual_path().is_empty());
    let r = resolve(&root, "/x/y").unwrap();
    assert_eq!(r.object_path(), "root.default");
    assert_eq!(r.virtual_path(), ["x", "y"]);
}

#[test]
fn test_missing_path_is_not_found() {
    let root = TreeNode::new().with_child("a", TreeNode::new().with_handler(h("index")));
    let err = resolve(&root, "/missing").unwrap_err();
    assert_eq!(err.0, "/missing");
}

#[test]
fn test_unexposed_handlers_are_skipped() {
    let root = TreeNode::new().with_child("hidden", TreeNode::new().with_handler(h("index").hidden()));
    assert!(resolve(&root, "/hidden/").is_err());
}

#[test]
fn test_star_and_global_map_to_global_underscore() {
    let r = resolve(&tree(), "/global/").unwrap();
    assert_eq!(r.object_path(), "root.global_.index");
    let r = resolve(&tree(), "*").unwrap();
    assert_eq!(r.object_path(), "root.global_.index");
}

#[test]
fn test_encoded_slash_stays_in_one_segment() {
    let r = resolve(&tree(), "/a/x%2Fy/z").unwrap();
    assert_eq!(r.object_path(), "root.a.default");
    assert_eq!(r.virtual_path(), ["x/y", "z"]);
}

#[test]
fn test_resolution_is_idempotent() {
    let t = tree();
    for path in ["/", "/a/b/", "/a/b", "/a/q/r", "/nope/x"] {
        let first = resolve(&t, path);
        let second = resolve(&t, path);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                assert_eq!(a.object_path(), b.object_path());
                assert_eq!(a.virtual_path(), b.virtual_path());
                assert_eq!(a.is_index_redirect(), b.is_index_redirect());
            }
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("resolution of {path} changed between calls"),
        }
    }
}
