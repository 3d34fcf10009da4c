//! # Resolver Module
//!
//! Maps a URL path onto a handler of the application tree.
//!
//! ## Algorithm
//!
//! The path is stripped of surrounding slashes and split into segments. The
//! candidates are then tried in this order, deepest first:
//!
//! 1. `root.<segments>.index`. If the request path did not end in `/`, a hit
//!    here is an [`Resolution::IndexRedirect`]: the caller answers with a
//!    301 to the same URL plus a trailing slash instead of invoking it.
//! 2. The bare leaf: handler `<last segment>` on the node named by the
//!    segments before it. It gets no virtual path.
//! 3. Popping one segment at a time into the virtual path,
//!    `root.<remaining segments>.default`, down to `root.default`. The
//!    popped segments are handed over in URL order.
//!
//! Missing children and unexposed handlers are simply absent; the only error
//! is [`NotFound`].
//!
//! Two paths are special: `*` resolves as the single segment `global`, and
//! the segment list `["global"]` is looked up as `["global_"]`.
//!
//! ## Example
//!
//! ```rust
//! use arbor::resolver::resolve;
//! use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
//!
//! let root = TreeNode::new().with_child(
//!     "a",
//!     TreeNode::new().with_handler(handler_fn("default", |_| Ok(HandlerOutcome::empty()))),
//! );
//! let found = resolve(&root, "/a/b/c").unwrap();
//! assert_eq!(found.object_path(), "root.a.default");
//! assert_eq!(found.virtual_path(), ["b", "c"]);
//! ```

mod core;
#[cfg(test)]
mod tests;

pub use self::core::{resolve, Resolution, DEFAULT_HANDLER, INDEX_HANDLER, MAX_INLINE_SEGMENTS};
