//! Static per-method request templates.
//!
//! A [`MethodDescriptor`] is what the contract parser produces for one
//! declared method. It is built once, compiled once and shared by every
//! invocation of that method.

use crate::error::FeignError;
use crate::template::Template;
use http::Method;
use http::header::HeaderName;
use std::sync::Arc;

/// Declared result shape of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReturnShape {
    /// Zero or one element
    Single,
    /// Unbounded element sequence
    Stream,
    /// A shape the pipeline cannot adapt to; rejected when the client is built
    Unsupported(String),
}

/// Parses a client interface into method descriptors.
///
/// Annotation/interface parsing lives outside this crate; it plugs in here.
pub trait ContractParser {
    /// Produce one descriptor per declared method.
    ///
    /// # Errors
    /// Returns an error if the interface cannot be described.
    fn parse(&self) -> Result<Vec<MethodDescriptor>, FeignError>;
}

impl ContractParser for Vec<MethodDescriptor> {
    fn parse(&self) -> Result<Vec<MethodDescriptor>, FeignError> {
        Ok(self.clone())
    }
}

/// Compiled, immutable template of one declared remote method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub(crate) key: Arc<str>,
    pub(crate) method: Method,
    pub(crate) path: Template,
    pub(crate) queries: Vec<(String, Vec<Template>)>,
    pub(crate) headers: Vec<(HeaderName, Vec<Template>)>,
    pub(crate) arg_names: Vec<(usize, Vec<String>)>,
    pub(crate) body_index: Option<usize>,
    pub(crate) query_map_index: Option<usize>,
    pub(crate) header_map_index: Option<usize>,
    pub(crate) return_shape: ReturnShape,
}

impl MethodDescriptor {
    /// Start describing a method.
    ///
    /// `key` identifies the method (e.g. `"OrderApi#find(long)"`), `path` is the
    /// path template, which may carry an inline query (`/r?p={p}`).
    pub fn builder(key: impl Into<String>, method: Method, path: &str) -> MethodDescriptorBuilder {
        MethodDescriptorBuilder {
            key: key.into(),
            method,
            path: path.to_owned(),
            queries: Vec::new(),
            headers: Vec::new(),
            arg_names: Vec::new(),
            body_index: None,
            query_map_index: None,
            header_map_index: None,
            return_shape: ReturnShape::Single,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &Template {
        &self.path
    }

    #[must_use]
    pub fn return_shape(&self) -> &ReturnShape {
        &self.return_shape
    }

    #[must_use]
    pub fn body_index(&self) -> Option<usize> {
        self.body_index
    }

    /// Fail fast on shapes the pipeline cannot serve.
    ///
    /// # Errors
    /// Returns `FeignError::UnsupportedReturnShape` naming the method.
    pub fn validate(&self) -> Result<(), FeignError> {
        if let ReturnShape::Unsupported(shape) = &self.return_shape {
            return Err(FeignError::UnsupportedReturnShape {
                method_key: self.key.to_string(),
                shape: shape.clone(),
            });
        }
        Ok(())
    }
}

/// Builder for [`MethodDescriptor`].
#[must_use = "MethodDescriptorBuilder does nothing until .build() is called"]
pub struct MethodDescriptorBuilder {
    key: String,
    method: Method,
    path: String,
    queries: Vec<(String, Vec<String>)>,
    headers: Vec<(String, Vec<String>)>,
    arg_names: Vec<(usize, Vec<String>)>,
    body_index: Option<usize>,
    query_map_index: Option<usize>,
    header_map_index: Option<usize>,
    return_shape: ReturnShape,
}

impl MethodDescriptorBuilder {
    /// Declare a query parameter with one or more value templates.
    pub fn query(mut self, name: &str, template: &str) -> Self {
        match self.queries.iter_mut().find(|(n, _)| n == name) {
            Some((_, templates)) => templates.push(template.to_owned()),
            None => self.queries.push((name.to_owned(), vec![template.to_owned()])),
        }
        self
    }

    /// Declare a header with one or more value templates.
    pub fn header(mut self, name: &str, template: &str) -> Self {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, templates)) => templates.push(template.to_owned()),
            None => self.headers.push((name.to_owned(), vec![template.to_owned()])),
        }
        self
    }

    /// Bind argument `index` to placeholder `name`.
    ///
    /// One argument may feed several placeholders.
    pub fn param(mut self, index: usize, name: &str) -> Self {
        match self.arg_names.iter_mut().find(|(i, _)| *i == index) {
            Some((_, names)) => names.push(name.to_owned()),
            None => self.arg_names.push((index, vec![name.to_owned()])),
        }
        self
    }

    /// Argument `index` is the request body.
    pub fn body(mut self, index: usize) -> Self {
        self.body_index = Some(index);
        self
    }

    /// Argument `index` is a dynamic query map merged after template queries.
    pub fn query_map(mut self, index: usize) -> Self {
        self.query_map_index = Some(index);
        self
    }

    /// Argument `index` is a dynamic header map merged after template headers.
    pub fn header_map(mut self, index: usize) -> Self {
        self.header_map_index = Some(index);
        self
    }

    /// The method returns an element stream.
    pub fn streaming(mut self) -> Self {
        self.return_shape = ReturnShape::Stream;
        self
    }

    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.return_shape = shape;
        self
    }

    /// Compile all templates.
    ///
    /// # Errors
    /// Returns `FeignError::InvalidHeaderName` for a malformed header name and
    /// `FeignError::Configuration` if one argument is bound to two special slots.
    pub fn build(self) -> Result<MethodDescriptor, FeignError> {
        let special = [self.body_index, self.query_map_index, self.header_map_index];
        let special: Vec<usize> = special.into_iter().flatten().collect();
        for (i, idx) in special.iter().enumerate() {
            if special[i + 1..].contains(idx) {
                return Err(FeignError::Configuration(format!(
                    "{}: argument {idx} is bound to more than one of body/query map/header map",
                    self.key
                )));
            }
        }

        let headers = self
            .headers
            .into_iter()
            .map(|(name, templates)| {
                let name = HeaderName::try_from(name)?;
                Ok((name, templates.iter().map(|t| Template::compile(t)).collect()))
            })
            .collect::<Result<Vec<_>, FeignError>>()?;

        let queries = self
            .queries
            .into_iter()
            .map(|(name, templates)| (name, templates.iter().map(|t| Template::compile(t)).collect()))
            .collect();

        Ok(MethodDescriptor {
            key: Arc::from(self.key),
            method: self.method,
            path: Template::compile(&self.path),
            queries,
            headers,
            arg_names: self.arg_names,
            body_index: self.body_index,
            query_map_index: self.query_map_index,
            header_map_index: self.header_map_index,
            return_shape: self.return_shape,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_compiles_templates() {
        let d = MethodDescriptor::builder("Api#find(long)", Method::GET, "/orders/{id}")
            .param(0, "id")
            .query("expand", "{expand}")
            .header("X-Trace", "{trace}")
            .build()
            .unwrap();

        assert_eq!(d.key(), "Api#find(long)");
        assert_eq!(d.path().placeholders().collect::<Vec<_>>(), vec!["id"]);
        assert_eq!(d.headers[0].0.as_str(), "x-trace");
        assert_eq!(d.return_shape(), &ReturnShape::Single);
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let result = MethodDescriptor::builder("Api#x()", Method::GET, "/")
            .header("bad header", "v")
            .build();
        assert!(matches!(result, Err(FeignError::InvalidHeaderName(_))));
    }

    #[test]
    fn test_overlapping_special_slots_rejected() {
        let result = MethodDescriptor::builder("Api#x(Map)", Method::POST, "/")
            .body(0)
            .query_map(0)
            .build();
        assert!(matches!(result, Err(FeignError::Configuration(_))));
    }

    #[test]
    fn test_unsupported_shape_names_method() {
        let d = MethodDescriptor::builder("Api#legacy()", Method::GET, "/")
            .returns(ReturnShape::Unsupported("Future<Response>".to_owned()))
            .build()
            .unwrap();
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("Api#legacy()"));
        assert!(err.is_construction());
    }
}
