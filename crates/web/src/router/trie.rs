//! Path trie with literal, parameter and wildcard edges.
//!
//! One trie serves every method: each node carries per-method handler slots,
//! which is what makes the 405 answer cheap (the walk that found the node
//! already knows which other methods it serves). Matching prefers a literal
//! edge, then the parameter edge, then the wildcard edge, and backtracks out
//! of dead ends, so the tie-break `literal > parameter > wildcard` holds on
//! every full walk, not just segment-locally.

use crate::event::PathParams;
use crate::handler::RouteHandler;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors detected while building the route table.
#[derive(Debug, Error)]
pub enum RouterBuildError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("duplicate route: {method} {pattern}")]
    DuplicateRoute { method: http::Method, pattern: String },

    #[error("pattern {pattern:?} conflicts with an existing route: {reason}")]
    Conflict { pattern: String, reason: String },
}

impl RouterBuildError {
    fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern { pattern: pattern.to_owned(), reason: reason.into() }
    }

    fn conflict(pattern: &str, reason: impl Into<String>) -> Self {
        Self::Conflict { pattern: pattern.to_owned(), reason: reason.into() }
    }
}

/// Routing failures surfaced per request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route matches the path")]
    NotFound,

    #[error("path is routed but not for this method")]
    MethodNotAllowed { allow: Vec<http::Method> },
}

/// A successful resolution: the handler plus the captured parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub handler: Arc<RouteHandler>,
    pub params: PathParams,
}

impl PartialEq for RouteMatch {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler) && self.params == other.params
    }
}

impl Eq for RouteMatch {}

type MethodMap = HashMap<http::Method, Arc<RouteHandler>>;

#[derive(Debug, Default)]
pub(crate) struct Trie {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<ParamEdge>>,
    wildcard: Option<WildcardEdge>,
    handlers: MethodMap,
}

#[derive(Debug)]
struct ParamEdge {
    name: Arc<str>,
    node: Node,
}

/// Wildcards are terminal, so the edge holds the handler slots directly.
#[derive(Debug)]
struct WildcardEdge {
    name: Arc<str>,
    handlers: MethodMap,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouterBuildError> {
    if !pattern.starts_with('/') {
        return Err(RouterBuildError::invalid(pattern, "pattern must start with '/'"));
    }

    let mut segments = Vec::new();
    let mut names: Vec<&str> = Vec::new();

    let raw_segments: Vec<&str> = pattern[1..].split('/').collect();
    let last = raw_segments.len().saturating_sub(1);

    // "/" alone has no segments
    if pattern == "/" {
        return Ok(segments);
    }

    for (index, raw) in raw_segments.iter().enumerate() {
        let segment = if let Some(name) = raw.strip_prefix(':') {
            if name.is_empty() {
                return Err(RouterBuildError::invalid(pattern, "parameter segment needs a name"));
            }
            names.push(name);
            Segment::Param(name.to_owned())
        } else if let Some(name) = raw.strip_prefix('*') {
            if name.is_empty() {
                return Err(RouterBuildError::invalid(pattern, "wildcard segment needs a name"));
            }
            if index != last {
                return Err(RouterBuildError::invalid(pattern, "wildcard is only valid as the final segment"));
            }
            names.push(name);
            Segment::Wildcard(name.to_owned())
        } else {
            Segment::Literal((*raw).to_owned())
        };
        segments.push(segment);
    }

    names.sort_unstable();
    if names.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(RouterBuildError::invalid(pattern, "duplicate parameter name"));
    }

    Ok(segments)
}

/// Splits a request path into match segments; `/` has none.
fn path_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() { Vec::new() } else { trimmed.split('/').collect() }
}

impl Trie {
    pub(crate) fn insert(
        &mut self,
        method: http::Method,
        pattern: &str,
        handler: Arc<RouteHandler>,
    ) -> Result<(), RouterBuildError> {
        let segments = parse_pattern(pattern)?;

        let mut node = &mut self.root;
        for (index, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    node = node.literals.entry(literal.clone()).or_default();
                }
                Segment::Param(name) => {
                    let edge = node.param.get_or_insert_with(|| {
                        Box::new(ParamEdge { name: Arc::from(name.as_str()), node: Node::default() })
                    });
                    if edge.name.as_ref() != name {
                        return Err(RouterBuildError::conflict(
                            pattern,
                            format!("parameter :{} collides with :{} at the same position", name, edge.name),
                        ));
                    }
                    node = &mut edge.node;
                }
                Segment::Wildcard(name) => {
                    debug_assert_eq!(index, segments.len() - 1);
                    let edge = node
                        .wildcard
                        .get_or_insert_with(|| WildcardEdge { name: Arc::from(name.as_str()), handlers: MethodMap::new() });
                    if edge.name.as_ref() != name {
                        return Err(RouterBuildError::conflict(
                            pattern,
                            format!("wildcard *{} collides with *{} at the same position", name, edge.name),
                        ));
                    }
                    if edge.handlers.insert(method.clone(), handler).is_some() {
                        return Err(RouterBuildError::DuplicateRoute { method, pattern: pattern.to_owned() });
                    }
                    return Ok(());
                }
            }
        }

        if node.handlers.insert(method.clone(), handler).is_some() {
            return Err(RouterBuildError::DuplicateRoute { method, pattern: pattern.to_owned() });
        }
        Ok(())
    }

    pub(crate) fn match_path(&self, method: &http::Method, path: &str) -> Result<RouteMatch, RouteError> {
        let segments = path_segments(path);
        let mut params = PathParams::empty();

        let handlers = walk(&self.root, &segments, &mut params).ok_or(RouteError::NotFound)?;

        match handlers.get(method) {
            Some(handler) => Ok(RouteMatch { handler: Arc::clone(handler), params }),
            None => {
                let mut allow: Vec<http::Method> = handlers.keys().cloned().collect();
                allow.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
                Err(RouteError::MethodNotAllowed { allow })
            }
        }
    }
}

/// Depth-first walk in tie-break order, backtracking out of dead ends.
///
/// Returns the handler slots of the first complete walk that lands on a node
/// (or wildcard edge) with any handler at all; `params` holds that walk's
/// bindings on success.
fn walk<'t>(node: &'t Node, segments: &[&str], params: &mut PathParams) -> Option<&'t MethodMap> {
    let Some((head, rest)) = segments.split_first() else {
        if !node.handlers.is_empty() {
            return Some(&node.handlers);
        }
        // a wildcard may capture the empty remainder
        if let Some(edge) = &node.wildcard {
            params.push(Arc::clone(&edge.name), String::new());
            return Some(&edge.handlers);
        }
        return None;
    };

    if let Some(child) = node.literals.get(*head)
        && let Some(found) = walk(child, rest, params)
    {
        return Some(found);
    }

    // parameters bind exactly one non-empty segment
    if !head.is_empty()
        && let Some(edge) = &node.param
    {
        params.push(Arc::clone(&edge.name), (*head).to_owned());
        if let Some(found) = walk(&edge.node, rest, params) {
            return Some(found);
        }
        params.pop_last();
    }

    if let Some(edge) = &node.wildcard {
        params.push(Arc::clone(&edge.name), segments.join("/"));
        return Some(&edge.handlers);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{RouteHandler, handler_fn};
    use http::Method;

    fn handler(tag: &'static str) -> Arc<RouteHandler> {
        Arc::new(RouteHandler::Unary(Box::new(handler_fn(move |event| {
            Box::pin(async move { event.send_text(tag).map_err(Into::into) })
        }))))
    }

    fn trie(routes: &[(Method, &str)]) -> Trie {
        let mut trie = Trie::default();
        for (method, pattern) in routes {
            trie.insert(method.clone(), pattern, handler("h")).unwrap();
        }
        trie
    }

    #[test]
    fn literal_match() {
        let trie = trie(&[(Method::GET, "/"), (Method::GET, "/about")]);

        assert!(trie.match_path(&Method::GET, "/").is_ok());
        assert!(trie.match_path(&Method::GET, "/about").is_ok());
        assert_eq!(trie.match_path(&Method::GET, "/missing"), Err(RouteError::NotFound));
    }

    #[test]
    fn param_captures_segment_verbatim() {
        let trie = trie(&[(Method::GET, "/users/:id")]);

        let matched = trie.match_path(&Method::GET, "/users/42").unwrap();
        assert_eq!(matched.params.get("id"), Some("42"));

        let matched = trie.match_path(&Method::GET, "/users/%20odd").unwrap();
        assert_eq!(matched.params.get("id"), Some("%20odd"));
    }

    #[test]
    fn param_requires_non_empty_segment() {
        let trie = trie(&[(Method::GET, "/users/:id")]);
        assert_eq!(trie.match_path(&Method::GET, "/users/"), Err(RouteError::NotFound));
    }

    #[test]
    fn literal_beats_param_beats_wildcard() {
        let trie = trie(&[
            (Method::GET, "/files/readme"),
            (Method::GET, "/files/:name"),
            (Method::GET, "/files/*rest"),
        ]);

        let literal = trie.match_path(&Method::GET, "/files/readme").unwrap();
        assert!(literal.params.is_empty());

        let param = trie.match_path(&Method::GET, "/files/other").unwrap();
        assert_eq!(param.params.get("name"), Some("other"));

        let wildcard = trie.match_path(&Method::GET, "/files/a/b/c").unwrap();
        assert_eq!(wildcard.params.get("rest"), Some("a/b/c"));
    }

    #[test]
    fn wildcard_captures_empty_remainder() {
        let trie = trie(&[(Method::GET, "/static/*path")]);

        let matched = trie.match_path(&Method::GET, "/static").unwrap();
        assert_eq!(matched.params.get("path"), Some(""));

        let matched = trie.match_path(&Method::GET, "/static/css/site.css").unwrap();
        assert_eq!(matched.params.get("path"), Some("css/site.css"));
    }

    #[test]
    fn backtracks_out_of_literal_dead_ends() {
        let trie = trie(&[(Method::GET, "/a/b/c"), (Method::GET, "/a/:x/d")]);

        // the literal walk a -> b dead-ends at segment "d"; the param walk
        // binds x=b and completes
        let matched = trie.match_path(&Method::GET, "/a/b/d").unwrap();
        assert_eq!(matched.params.get("x"), Some("b"));
    }

    #[test]
    fn intermediate_nodes_do_not_answer() {
        let trie = trie(&[(Method::GET, "/a/b/c"), (Method::GET, "/:x")]);

        // /a/b exists only as an interior node; the param route matches /a
        // but nothing matches /a/b
        assert_eq!(trie.match_path(&Method::GET, "/a/b"), Err(RouteError::NotFound));
        assert!(trie.match_path(&Method::GET, "/a").is_ok());
    }

    #[test]
    fn method_not_allowed_lists_supported_methods() {
        let trie = trie(&[(Method::GET, "/a"), (Method::HEAD, "/a")]);

        let error = trie.match_path(&Method::POST, "/a").unwrap_err();
        let RouteError::MethodNotAllowed { allow } = error else { panic!("expected 405") };
        assert_eq!(allow, vec![Method::GET, Method::HEAD]);
    }

    #[test]
    fn method_check_does_not_backtrack() {
        let trie = trie(&[(Method::GET, "/a/b"), (Method::POST, "/a/:x")]);

        // the literal walk wins the tie-break; POST is judged at that node
        let error = trie.match_path(&Method::POST, "/a/b").unwrap_err();
        assert!(matches!(error, RouteError::MethodNotAllowed { .. }));
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut trie = trie(&[(Method::GET, "/a")]);
        let error = trie.insert(Method::GET, "/a", handler("dup")).unwrap_err();
        assert!(matches!(error, RouterBuildError::DuplicateRoute { .. }));

        // same pattern, different method is fine
        trie.insert(Method::POST, "/a", handler("post")).unwrap();
    }

    #[test]
    fn conflicting_param_names_rejected() {
        let mut trie = trie(&[(Method::GET, "/users/:id")]);
        let error = trie.insert(Method::POST, "/users/:uid", handler("h")).unwrap_err();
        assert!(matches!(error, RouterBuildError::Conflict { .. }));
    }

    #[test]
    fn invalid_patterns_rejected() {
        let mut trie = Trie::default();

        assert!(matches!(trie.insert(Method::GET, "a/b", handler("h")), Err(RouterBuildError::InvalidPattern { .. })));
        assert!(matches!(trie.insert(Method::GET, "/a/*rest/b", handler("h")), Err(RouterBuildError::InvalidPattern { .. })));
        assert!(matches!(trie.insert(Method::GET, "/a/:", handler("h")), Err(RouterBuildError::InvalidPattern { .. })));
        assert!(matches!(trie.insert(Method::GET, "/a/*", handler("h")), Err(RouterBuildError::InvalidPattern { .. })));
        assert!(matches!(trie.insert(Method::GET, "/:x/:x", handler("h")), Err(RouterBuildError::InvalidPattern { .. })));
    }

    #[test]
    fn trailing_slash_is_a_distinct_path() {
        let trie = trie(&[(Method::GET, "/a")]);
        assert_eq!(trie.match_path(&Method::GET, "/a/"), Err(RouteError::NotFound));
    }
}
