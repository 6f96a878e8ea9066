//! Typed request descriptors.
//!
//! A `Request<B, R>` names one endpoint: method, path, optional body of type
//! `B` and per-request options. `R` is the type the response decodes into;
//! it is never materialized here. Descriptors are built by value and are
//! immutable once handed to a client.

use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

use crate::http::{Headers, HttpMethod};

/// Marker body for requests that send nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NoBody;

/// A single `name=value` query parameter. A `None` value renders as a bare
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryItem {
    pub name: String,
    pub value: Option<String>,
}

impl QueryItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

// Serialized as a `[name, value]` pair so a list of items can be used as a
// form body.
impl Serialize for QueryItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.name)?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Builds query items consistently: `None` values are skipped, booleans
/// render as `true`/`false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryItems {
    items: Vec<QueryItem>,
}

impl QueryItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<V: Display>(&mut self, name: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.items.push(QueryItem::new(name, value.to_string()));
        }
        self
    }

    /// Add a float formatted with a fixed number of decimals.
    pub fn add_float(&mut self, name: &str, value: Option<f64>, precision: usize) -> &mut Self {
        if let Some(value) = value {
            self.items
                .push(QueryItem::new(name, format!("{value:.precision$}")));
        }
        self
    }

    /// Add `values` joined by `separator`; empty or missing lists are skipped.
    pub fn add_joined<S: AsRef<str>>(
        &mut self,
        name: &str,
        values: Option<&[S]>,
        separator: &str,
    ) -> &mut Self {
        if let Some(values) = values.filter(|v| !v.is_empty()) {
            let joined = values
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(separator);
            self.items.push(QueryItem::new(name, joined));
        }
        self
    }

    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<QueryItem> {
        self.items
    }
}

/// Per-request settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Falls back to `ClientConfig::default_timeout` when unset.
    pub timeout: Option<Duration>,
    /// In caller order; the builder sorts them.
    pub query_items: Vec<QueryItem>,
    /// Override environment defaults.
    pub headers: Headers,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options whose query items come from a `QueryItems` builder.
    pub fn with_query(build: impl FnOnce(&mut QueryItems)) -> Self {
        let mut query = QueryItems::new();
        build(&mut query);
        Self {
            query_items: query.into_items(),
            ..Self::default()
        }
    }
}

/// Description of one endpoint call.
#[derive(Debug, Clone)]
pub struct Request<B = NoBody, R = serde_json::Value> {
    method: HttpMethod,
    path: String,
    body: Option<B>,
    options: RequestOptions,
    response: PhantomData<fn() -> R>,
}

impl<R> Request<NoBody, R> {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            options: RequestOptions::default(),
            response: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }
}

impl<B, R> Request<B, R> {
    pub fn with_body<B2: Serialize>(self, body: B2) -> Request<B2, R> {
        Request {
            method: self.method,
            path: self.path,
            body: Some(body),
            options: self.options,
            response: PhantomData,
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.query_items.push(QueryItem::new(name, value));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Side {
        Buy,
    }

    impl Display for Side {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Side::Buy => f.write_str("buy"),
            }
        }
    }

    #[test]
    fn adds_primitive_types_and_omits_none() {
        let mut q = QueryItems::new();
        q.add("count", Some(42))
            .add("flag", Some(true))
            .add("skip", Some(false))
            .add::<&str>("missing", None);
        assert_eq!(
            q.items(),
            &[
                QueryItem::new("count", "42"),
                QueryItem::new("flag", "true"),
                QueryItem::new("skip", "false"),
            ]
        );
    }

    #[test]
    fn formats_float_with_precision() {
        let mut q = QueryItems::new();
        q.add_float("price", Some(1.23456), 3);
        assert_eq!(q.items(), &[QueryItem::new("price", "1.235")]);
    }

    #[test]
    fn display_enums_use_their_rendering() {
        let mut q = QueryItems::new();
        q.add("side", Some(Side::Buy));
        assert_eq!(q.items(), &[QueryItem::new("side", "buy")]);
    }

    #[test]
    fn add_joined_skips_empty_lists() {
        let mut q = QueryItems::new();
        let empty: [&str; 0] = [];
        q.add_joined("symbols", Some(&empty[..]), ",");
        q.add_joined("ids", Some(&["a", "b", "c"][..]), ",");
        assert_eq!(q.items(), &[QueryItem::new("ids", "a,b,c")]);
    }

    #[test]
    fn query_item_serializes_as_pair() {
        let json = serde_json::to_value(QueryItem::new("a", "1")).unwrap();
        assert_eq!(json, serde_json::json!(["a", "1"]));
    }

    #[test]
    fn with_body_keeps_route_and_options() {
        let req: Request<NoBody, ()> = Request::post("users").with_query("debug", "true");
        let req = req.with_body("payload");
        assert_eq!(req.method(), HttpMethod::Post);
        assert_eq!(req.path(), "users");
        assert_eq!(req.body(), Some(&"payload"));
        assert_eq!(req.options().query_items.len(), 1);
    }
}
