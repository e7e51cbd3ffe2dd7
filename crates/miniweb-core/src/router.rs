// src/router.rs
use crate::error::HandlerError;
use crate::http::{Method, Request, Response};
use std::collections::HashMap;

pub type HandlerResult = Result<Response, HandlerError>;

/// Route handler. Runs synchronously on a worker and returns exactly one response.
pub type Handler<S> = fn(&Context<'_, S>) -> HandlerResult;

/// Everything a handler sees: the request, captured route params and shared state.
pub struct Context<'a, S> {
    pub req: &'a Request<'a>,
    pub params: HashMap<String, String>,
    pub state: &'a S,
}

impl<'a, S> Context<'a, S> {
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn get_header(&self, key: &str) -> Option<&'a str> {
        self.req.header(key)
    }
}

struct RouteNode<S> {
    path: String,
    handlers: HashMap<Method, Handler<S>>,
    children: Vec<RouteNode<S>>,
    is_param: bool,
    param_name: Option<String>,
    is_wildcard: bool,
}

impl<S> RouteNode<S> {
    fn new(path: String) -> Self {
        Self {
            path,
            handlers: HashMap::new(),
            children: Vec::new(),
            is_param: false,
            param_name: None,
            is_wildcard: false,
        }
    }
}

/// Route table: static segments, `:name` captures and a trailing `*name` wildcard.
pub struct Router<S> {
    root: RouteNode<S>,
    len: usize,
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self {
            root: RouteNode::new(String::new()),
            len: 0,
        }
    }

    pub fn add(&mut self, method: Method, path: &str, handler: Handler<S>) {
        let mut current = &mut self.root;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let is_param = segment.starts_with(':');
            let is_wildcard = segment.starts_with('*');
            let param_name = (is_param || is_wildcard).then(|| segment[1..].to_string());
            let segment_path = if is_param || is_wildcard {
                String::new()
            } else {
                segment.to_string()
            };

            let found = current.children.iter().position(|child| {
                child.is_param == is_param
                    && child.is_wildcard == is_wildcard
                    && (is_param || is_wildcard || child.path == segment_path)
            });

            let idx = match found {
                Some(idx) => idx,
                None => {
                    let mut node = RouteNode::new(segment_path);
                    node.is_param = is_param;
                    node.param_name = param_name;
                    node.is_wildcard = is_wildcard;
                    current.children.push(node);
                    current.children.len() - 1
                }
            };
            current = &mut current.children[idx];
        }

        if current.handlers.insert(method, handler).is_none() {
            self.len += 1;
        }
    }

    /// Route lookup. HEAD falls back to the GET handler.
    pub fn find(&self, method: Method, path: &str) -> Option<(Handler<S>, HashMap<String, String>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        let handler = self
            .match_recursive(&self.root, method, &segments, 0, &mut params)
            .or_else(|| {
                if method != Method::Head {
                    return None;
                }
                params.clear();
                self.match_recursive(&self.root, Method::Get, &segments, 0, &mut params)
            })?;
        Some((handler, params))
    }

    fn match_recursive(
        &self,
        node: &RouteNode<S>,
        method: Method,
        segments: &[&str],
        depth: usize,
        params: &mut HashMap<String, String>,
    ) -> Option<Handler<S>> {
        if depth == segments.len() {
            return node.handlers.get(&method).copied();
        }

        let segment = segments[depth];

        // Exact match first
        for child in &node.children {
            if !child.is_param && !child.is_wildcard && child.path == segment {
                if let Some(handler) = self.match_recursive(child, method, segments, depth + 1, params) {
                    return Some(handler);
                }
            }
        }

        for child in node.children.iter().filter(|c| c.is_param) {
            if let Some(name) = &child.param_name {
                params.insert(name.clone(), segment.to_string());
            }
            if let Some(handler) = self.match_recursive(child, method, segments, depth + 1, params) {
                return Some(handler);
            }
            // Backtrack
            if let Some(name) = &child.param_name {
                params.remove(name);
            }
        }

        for child in node.children.iter().filter(|c| c.is_wildcard) {
            if let Some(handler) = child.handlers.get(&method) {
                if let Some(name) = &child.param_name {
                    params.insert(name.clone(), segments[depth..].join("/"));
                }
                return Some(*handler);
            }
        }

        None
    }

    /// Number of (method, path) registrations.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&mut self, path: &str, handler: Handler<S>) {
        self.add(Method::Get, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: Handler<S>) {
        self.add(Method::Post, path, handler);
    }
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}
