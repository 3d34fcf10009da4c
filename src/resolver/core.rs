use crate::error::NotFound;
use crate::tree::{Handler, Node};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use tracing::debug;

pub const INDEX_HANDLER: &str = "index";
pub const DEFAULT_HANDLER: &str = "default";

/// Segments stored inline before spilling to the heap.
pub const MAX_INLINE_SEGMENTS: usize = 8;

type SegmentVec<'a> = SmallVec<[&'a str; MAX_INLINE_SEGMENTS]>;

/// Outcome of a successful lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    Handler {
        handler: Arc<dyn Handler>,
        /// Dotted trail such as `root.a.default`.
        object_path: String,
        /// Segments matched by tree traversal.
        consumed: Vec<String>,
        /// Unmatched trailing segments, in URL order.
        virtual_path: Vec<String>,
    },
    /// Found via `index` on a path without a trailing slash.
    IndexRedirect {
        handler: Arc<dyn Handler>,
        object_path: String,
    },
}

impl Resolution {
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        match self {
            Resolution::Handler { handler, .. } | Resolution::IndexRedirect { handler, .. } => {
                handler
            }
        }
    }

    #[must_use]
    pub fn object_path(&self) -> &str {
        match self {
            Resolution::Handler { object_path, .. }
            | Resolution::IndexRedirect { object_path, .. } => object_path,
        }
    }

    #[must_use]
    pub fn virtual_path(&self) -> &[String] {
        match self {
            Resolution::Handler { virtual_path, .. } => virtual_path,
            Resolution::IndexRedirect { .. } => &[],
        }
    }

    #[must_use]
    pub fn consumed(&self) -> &[String] {
        match self {
            Resolution::Handler { consumed, .. } => consumed,
            Resolution::IndexRedirect { .. } => &[],
        }
    }

    #[must_use]
    pub fn is_index_redirect(&self) -> bool {
        matches!(self, Resolution::IndexRedirect { .. })
    }
}

/// Resolve `path` against the tree rooted at `root`.
///
/// # Errors
///
/// [`NotFound`] carrying the original path when no exposed handler matches.
pub fn resolve(root: &dyn Node, path: &str) -> Result<Resolution, NotFound> {
    let trimmed = path.trim_matches('/');
    let mut segments: SegmentVec<'_> = if path == "*" {
        smallvec!["global"]
    } else if trimmed.is_empty() {
        SmallVec::new()
    } else {
        trimmed.split('/').collect()
    };
    if segments.as_slice() == ["global"] {
        segments[0] = "global_";
    }
    let ends_with_slash = path.is_empty() || path.ends_with('/');

    if let Some(handler) = lookup(root, &segments, INDEX_HANDLER) {
        let object_path = dotted(&segments, INDEX_HANDLER);
        debug!(path = %path, object_path = %object_path, redirect = !ends_with_slash, "Resolved via index");
        if !ends_with_slash {
            return Ok(Resolution::IndexRedirect {
                handler,
                object_path,
            });
        }
        return Ok(Resolution::Handler {
            handler,
            object_path,
            consumed: owned(&segments),
            virtual_path: Vec::new(),
        });
    }

    if let Some((leaf, parent)) = segments.split_last() {
        if let Some(handler) = lookup(root, parent, leaf) {
            return Ok(found(handler, parent, leaf, &segments, &[], path));
        }
    }

    // each pop moves one more segment into the virtual path
    let deepest = segments.len().saturating_sub(1);
    for depth in (0..=deepest).rev() {
        let (node_path, rest) = segments.split_at(depth);
        if let Some(handler) = lookup(root, node_path, DEFAULT_HANDLER) {
            return Ok(found(handler, node_path, DEFAULT_HANDLER, node_path, rest, path));
        }
    }

    debug!(path = %path, "No handler resolved");
    Err(NotFound(path.to_string()))
}

fn found(
    handler: Arc<dyn Handler>,
    node_path: &[&str],
    name: &str,
    consumed: &[&str],
    rest: &[&str],
    path: &str,
) -> Resolution {
    let object_path = dotted(node_path, name);
    let virtual_path: Vec<String> = rest.iter().map(|s| s.replace("%2F", "/")).collect();
    debug!(
        path = %path,
        object_path = %object_path,
        virtual_path = ?virtual_path,
        "Resolved handler"
    );
    Resolution::Handler {
        handler,
        object_path,
        consumed: owned(consumed),
        virtual_path,
    }
}

/// Walk `segments` from `root`, then fetch `name` if it is exposed.
fn lookup(root: &dyn Node, segments: &[&str], name: &str) -> Option<Arc<dyn Handler>> {
    let mut node = root;
    for segment in segments {
        node = node.child(segment)?;
    }
    node.handler(name).filter(|h| h.exposed())
}

fn dotted(segments: &[&str], name: &str) -> String {
    let mut out = String::from("root");
    for segment in segments {
        out.push('.');
        out.push_str(segment);
    }
    out.push('.');
    out.push_str(name);
    out
}

fn owned(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| (*s).to_string()).collect()
}
