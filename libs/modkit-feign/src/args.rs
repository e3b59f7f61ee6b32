//! Invocation arguments.
//!
//! The dispatch layer passes the method's arguments positionally; the
//! descriptor decides whether a slot feeds placeholders, the body, or a
//! dynamic query/header map.

use crate::request::RequestBody;

/// One positional argument of a method call.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub enum Arg {
    /// Absent value (`None`). Placeholders bound to it stay unexpanded.
    #[default]
    Null,
    /// Single value
    Value(String),
    /// Repeated value (iterable argument)
    Values(Vec<String>),
    /// Dynamic name -> values map, used for query-map and header-map slots
    Map(Vec<(String, Vec<String>)>),
    /// Request body
    Body(RequestBody),
}

impl Arg {
    /// Map argument from single-valued pairs, keeping input order.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), vec![v.into()]))
                .collect(),
        )
    }

    /// Map argument whose entries may repeat.
    pub fn multi_map<K, I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, vs)| (k.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    /// Values this argument contributes to a placeholder, `None` for null.
    #[must_use]
    pub fn placeholder_values(&self) -> Option<Vec<String>> {
        match self {
            Self::Value(v) => Some(vec![v.clone()]),
            Self::Values(vs) => Some(vs.clone()),
            Self::Null | Self::Map(_) | Self::Body(_) => None,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<Vec<String>> for Arg {
    fn from(values: Vec<String>) -> Self {
        Self::Values(values)
    }
}

impl From<Vec<&str>> for Arg {
    fn from(values: Vec<&str>) -> Self {
        Self::Values(values.into_iter().map(ToOwned::to_owned).collect())
    }
}

impl From<RequestBody> for Arg {
    fn from(body: RequestBody) -> Self {
        Self::Body(body)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

macro_rules! arg_from_display {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(value: $t) -> Self {
                Self::Value(value.to_string())
            }
        })*
    };
}

arg_from_display!(bool, i32, i64, u16, u32, u64, usize);
