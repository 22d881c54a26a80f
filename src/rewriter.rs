//! Named request rewriters.
//!
//! Instructions are declared in configuration, compiled once at startup (header
//! names, values and methods are validated there) and applied in order to each
//! request that reaches a path using them.

use axum::http::{
    header::{HeaderName, HOST},
    uri::PathAndQuery,
    HeaderValue, Method, Uri,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::handler::Request;
use crate::routes::error::RouteError;

/// Compiled rewriters by configured name
pub type RewriterCollection = HashMap<String, Arc<RewriteList>>;

/// A single rewrite step as written in configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RewriteInstruction {
    SetHeader { name: String, value: String },
    AppendHeader { name: String, value: String },
    DeleteHeader { name: String },
    SetParam { name: String, value: String },
    AppendParam { name: String, value: String },
    DeleteParam { name: String },
    SetPath { value: String },
    ReplacePath { search: String, replacement: String },
    SetMethod { value: String },
    SetHost { value: String },
}

#[derive(Debug, Clone)]
enum Step {
    SetHeader(HeaderName, HeaderValue),
    AppendHeader(HeaderName, HeaderValue),
    DeleteHeader(HeaderName),
    SetParam(String, String),
    AppendParam(String, String),
    DeleteParam(String),
    SetPath(String),
    ReplacePath(String, String),
    SetMethod(Method),
    SetHost(HeaderValue),
}

/// An ordered, validated list of rewrite steps
#[derive(Debug, Clone)]
pub struct RewriteList {
    name: String,
    steps: Vec<Step>,
}

impl RewriteList {
    /// Validate and compile a configured instruction list
    pub fn compile(name: &str, instructions: &[RewriteInstruction]) -> Result<Self, RouteError> {
        let invalid = |what: &str, value: &str| {
            RouteError::InvalidConfig(format!(
                "rewriter {}: invalid {} [{}]",
                name, what, value
            ))
        };
        let header_name =
            |n: &str| HeaderName::from_bytes(n.as_bytes()).map_err(|_| invalid("header name", n));
        let header_value =
            |v: &str| HeaderValue::from_str(v).map_err(|_| invalid("header value", v));

        let mut steps = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            let step = match instruction {
                RewriteInstruction::SetHeader { name, value } => {
                    Step::SetHeader(header_name(name)?, header_value(value)?)
                }
                RewriteInstruction::AppendHeader { name, value } => {
                    Step::AppendHeader(header_name(name)?, header_value(value)?)
                }
                RewriteInstruction::DeleteHeader { name } => Step::DeleteHeader(header_name(name)?),
                RewriteInstruction::SetParam { name, value } => {
                    Step::SetParam(name.clone(), value.clone())
                }
                RewriteInstruction::AppendParam { name, value } => {
                    Step::AppendParam(name.clone(), value.clone())
                }
                RewriteInstruction::DeleteParam { name } => Step::DeleteParam(name.clone()),
                RewriteInstruction::SetPath { value } => {
                    if !value.starts_with('/') {
                        return Err(invalid("path", value));
                    }
                    Step::SetPath(value.clone())
                }
                RewriteInstruction::ReplacePath {
                    search,
                    replacement,
                } => Step::ReplacePath(search.clone(), replacement.clone()),
                RewriteInstruction::SetMethod { value } => Step::SetMethod(
                    Method::from_bytes(value.to_ascii_uppercase().as_bytes())
                        .map_err(|_| invalid("method", value))?,
                ),
                RewriteInstruction::SetHost { value } => Step::SetHost(header_value(value)?),
            };
            steps.push(step);
        }

        Ok(Self {
            name: name.to_string(),
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step to the request in order
    pub fn apply(&self, request: &mut Request) {
        for step in &self.steps {
            match step {
                Step::SetHeader(name, value) => {
                    request.headers_mut().insert(name.clone(), value.clone());
                }
                Step::AppendHeader(name, value) => {
                    request.headers_mut().append(name.clone(), value.clone());
                }
                Step::DeleteHeader(name) => {
                    request.headers_mut().remove(name);
                }
                Step::SetParam(name, value) => {
                    let mut params = query_pairs(request.uri());
                    let mut found = false;
                    params.retain_mut(|(k, v)| {
                        if k != name {
                            return true;
                        }
                        if found {
                            return false;
                        }
                        found = true;
                        *v = value.clone();
                        true
                    });
                    if !found {
                        params.push((name.clone(), value.clone()));
                    }
                    set_query(request, &params);
                }
                Step::AppendParam(name, value) => {
                    let mut params = query_pairs(request.uri());
                    params.push((name.clone(), value.clone()));
                    set_query(request, &params);
                }
                Step::DeleteParam(name) => {
                    let mut params = query_pairs(request.uri());
                    params.retain(|(k, _)| k != name);
                    set_query(request, &params);
                }
                Step::SetPath(path) => set_path(request, path),
                Step::ReplacePath(search, replacement) => {
                    let path = request.uri().path().replace(search.as_str(), replacement);
                    set_path(request, &path);
                }
                Step::SetMethod(method) => *request.method_mut() = method.clone(),
                Step::SetHost(host) => {
                    request.headers_mut().insert(HOST, host.clone());
                }
            }
        }
    }
}

/// Compile every configured rewriter
pub fn build_rewriters(
    instructions: &HashMap<String, Vec<RewriteInstruction>>,
) -> Result<RewriterCollection, RouteError> {
    instructions
        .iter()
        .map(|(name, list)| Ok((name.clone(), Arc::new(RewriteList::compile(name, list)?))))
        .collect()
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn set_query(request: &mut Request, params: &[(String, String)]) {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let path = request.uri().path().to_string();
    replace_path_and_query(request, &path, Some(&query));
}

fn set_path(request: &mut Request, path: &str) {
    let query = request.uri().query().map(str::to_string);
    replace_path_and_query(request, path, query.as_deref());
}

/// Swap the request's path and query, keeping scheme and authority
pub(crate) fn replace_path_and_query(request: &mut Request, path: &str, query: Option<&str>) {
    let path_and_query = match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    };
    let path_and_query = match PathAndQuery::try_from(path_and_query) {
        Ok(path_and_query) => path_and_query,
        Err(e) => {
            warn!(error = %e, path, "Rewritten path is not a valid URI, keeping the original");
            return;
        }
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    match Uri::from_parts(parts) {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => warn!(error = %e, "Failed to rebuild rewritten URI"),
    }
}
