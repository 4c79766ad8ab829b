//! Binding-path parsing and textual path helpers.
//!
//! A binding path is a dotted relative path resolved against the block that
//! owns the binding: an optional run of special leading segments picks the
//! anchor block (`#` stays on the block itself, each `##` climbs one level,
//! `###` jumps to the block's root flow), and the remaining ordinary
//! segments descend through child fields.
//!
//! The textual helpers at the bottom operate on path *strings* without any
//! graph. They refuse paths involving `###`: where a root-flow segment lands
//! depends on the block it is resolved against, which a string cannot know.

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::graph::naming::{SEG_ROOT_FLOW, SEG_SELF, SEG_UP};

/// Where a binding path starts relative to its owning block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathAnchor {
    /// The owning block itself (`#`, or no special prefix at all).
    Owner,
    /// `n` levels up the ownership chain (`##`, `##.##`, ...).
    Up(usize),
    /// The root flow of the owning block (`###`).
    RootFlow,
}

/// A parsed binding path: anchor plus at least one ordinary segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingPath {
    pub anchor: PathAnchor,
    pub segments: Vec<Arc<str>>,
}

/// Parse a binding path.
///
/// Special segments are only valid as a leading run; `###` cannot be
/// combined with other specials; at least one ordinary segment must follow.
pub(crate) fn parse_binding_path(path: &str) -> Result<BindingPath> {
    let syntax = |cause: &str| EngineError::PathSyntax {
        path: path.to_string(),
        cause: cause.to_string(),
    };

    if path.is_empty() {
        return Err(syntax("empty path"));
    }

    let mut anchor = PathAnchor::Owner;
    let mut segments: Vec<Arc<str>> = Vec::new();
    let mut specials_done = false;

    for (i, seg) in path.split('.').enumerate() {
        match seg {
            "" => return Err(syntax("empty segment")),
            SEG_SELF => {
                if i != 0 {
                    return Err(syntax("# is only valid as the first segment"));
                }
                specials_done = true;
            }
            SEG_UP => {
                if specials_done || !segments.is_empty() {
                    return Err(syntax("## is only valid in the leading segments"));
                }
                anchor = match anchor {
                    PathAnchor::Owner => PathAnchor::Up(1),
                    PathAnchor::Up(n) => PathAnchor::Up(n + 1),
                    PathAnchor::RootFlow => {
                        return Err(syntax("## cannot follow ###"));
                    }
                };
            }
            SEG_ROOT_FLOW => {
                if i != 0 {
                    return Err(syntax("### is only valid as the first segment"));
                }
                anchor = PathAnchor::RootFlow;
                specials_done = true;
            }
            _ => {
                specials_done = true;
                segments.push(Arc::from(seg));
            }
        }
    }

    if segments.is_empty() {
        return Err(syntax("path has no field segments"));
    }
    Ok(BindingPath { anchor, segments })
}

/// Join a base path and a relative field name textually.
pub fn concat_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}.{name}")
    }
}

/// Compute the relative binding path from the block at absolute path `base`
/// to the property at absolute path `target`.
///
/// Both arguments are absolute dotted paths from the same root, with no
/// special segments. Used when serializing a binding whose source lies
/// outside the saved subtree.
///
/// # Errors
/// Returns [`EngineError::PathNeedsContext`] if either path contains a
/// root-flow segment, and [`EngineError::PathSyntax`] for empty input.
pub fn relative_path(base: &str, target: &str) -> Result<String> {
    for p in [base, target] {
        if p.split('.').any(|seg| seg == SEG_ROOT_FLOW) {
            return Err(EngineError::PathNeedsContext {
                path: p.to_string(),
            });
        }
    }
    if target.is_empty() {
        return Err(EngineError::PathSyntax {
            path: target.to_string(),
            cause: "empty target".to_string(),
        });
    }

    let base_segs: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('.').collect()
    };
    let target_segs: Vec<&str> = target.split('.').collect();

    let mut common = 0;
    while common < base_segs.len()
        && common < target_segs.len().saturating_sub(1)
        && base_segs[common] == target_segs[common]
    {
        common += 1;
    }

    let ups = base_segs.len() - common;
    let mut out = String::new();
    for _ in 0..ups {
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(SEG_UP);
    }
    for seg in &target_segs[common..] {
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(seg);
    }
    Ok(out)
}
