//! Request template expansion: `(MethodDescriptor, args) -> Request`.
//!
//! Pure and synchronous. Every attempt of an invocation (retry, failover)
//! expands again from the descriptor and the original arguments.

use crate::args::Arg;
use crate::descriptor::MethodDescriptor;
use crate::error::{FeignError, InvalidUriKind};
use crate::request::{HeaderList, Request, RequestBody};
use crate::template::{Encoding, Substitutions};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::Uri;
use std::sync::Arc;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Expand `descriptor` with `args` against `base_url` (`scheme://authority[/prefix]`).
///
/// # Errors
/// Returns a construction error (`InvalidUri`, `InvalidHeaderName`,
/// `InvalidHeaderValue`, `FormEncode`) before any I/O happens.
pub fn expand(
    descriptor: &MethodDescriptor,
    args: &[Arg],
    base_url: &str,
) -> Result<Request, FeignError> {
    let vars = substitutions(descriptor, args);

    let mut url = join_base(base_url, &descriptor.path.expand(&vars, Encoding::Uri));
    let query = expand_query(descriptor, args, &vars);
    if !query.is_empty() {
        if !(url.ends_with('?') || url.ends_with('&')) {
            url.push(if url.contains('?') { '&' } else { '?' });
        }
        url.push_str(&query);
    }
    let uri = parse_uri(url)?;

    let mut headers = expand_headers(descriptor, args, &vars)?;
    let body = expand_body(descriptor, args)?;
    if matches!(body, RequestBody::Form(_)) && !headers.contains(&CONTENT_TYPE) {
        headers.append(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    }

    Ok(Request::new(
        Arc::clone(&descriptor.key),
        descriptor.method.clone(),
        uri,
        headers,
        body,
    ))
}

fn substitutions(descriptor: &MethodDescriptor, args: &[Arg]) -> Substitutions {
    let mut vars = Substitutions::new();
    for (index, names) in &descriptor.arg_names {
        if let Some(values) = args.get(*index).and_then(Arg::placeholder_values) {
            for name in names {
                vars.insert(name.clone(), values.clone());
            }
        }
    }
    vars
}

fn join_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut url = String::with_capacity(base.len() + path.len() + 1);
    url.push_str(base);
    if !path.is_empty() && !path.starts_with('/') && !path.starts_with('?') {
        url.push('/');
    }
    url.push_str(path);
    url
}

fn expand_query(descriptor: &MethodDescriptor, args: &[Arg], vars: &Substitutions) -> String {
    let mut pairs: Vec<String> = Vec::new();

    for (name, templates) in &descriptor.queries {
        let name = urlencoding::encode(name);
        for template in templates {
            for value in template.expand_values(vars, Encoding::Uri) {
                pairs.push(format!("{name}={value}"));
            }
        }
    }

    if let Some(Arg::Map(entries)) = descriptor.query_map_index.and_then(|i| args.get(i)) {
        for (name, values) in entries {
            let name = urlencoding::encode(name);
            for value in values {
                pairs.push(format!("{name}={}", urlencoding::encode(value)));
            }
        }
    }

    pairs.join("&")
}

fn expand_headers(
    descriptor: &MethodDescriptor,
    args: &[Arg],
    vars: &Substitutions,
) -> Result<HeaderList, FeignError> {
    let mut headers = HeaderList::new();

    for (name, templates) in &descriptor.headers {
        for template in templates {
            for value in template.expand_values(vars, Encoding::None) {
                headers.append(name.clone(), HeaderValue::try_from(value)?);
            }
        }
    }

    if let Some(Arg::Map(entries)) = descriptor.header_map_index.and_then(|i| args.get(i)) {
        for (name, values) in entries {
            let name = HeaderName::try_from(name.as_str())?;
            for value in values {
                headers.append(name.clone(), HeaderValue::try_from(value.as_str())?);
            }
        }
    }

    Ok(headers)
}

fn expand_body(descriptor: &MethodDescriptor, args: &[Arg]) -> Result<RequestBody, FeignError> {
    let Some(arg) = descriptor.body_index.and_then(|i| args.get(i)) else {
        return Ok(RequestBody::Empty);
    };
    Ok(match arg {
        Arg::Null => RequestBody::Empty,
        Arg::Body(body) => body.clone(),
        Arg::Value(value) => RequestBody::Bytes(Bytes::from(value.clone())),
        Arg::Values(values) => {
            RequestBody::chunks(values.iter().map(|v| Bytes::from(v.clone())).collect())
        }
        Arg::Map(entries) => {
            let pairs: Vec<(&str, &str)> = entries
                .iter()
                .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
                .collect();
            RequestBody::form(&pairs)?
        }
    })
}

fn parse_uri(url: String) -> Result<Uri, FeignError> {
    let uri = match Uri::try_from(url.as_str()) {
        Ok(uri) => uri,
        Err(e) => {
            return Err(FeignError::InvalidUri {
                url,
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            });
        }
    };
    if uri.scheme().is_none() {
        return Err(FeignError::InvalidUri {
            url,
            kind: InvalidUriKind::MissingScheme,
            reason: "expanded URL has no scheme".to_owned(),
        });
    }
    if uri.authority().is_none() {
        return Err(FeignError::InvalidUri {
            url,
            kind: InvalidUriKind::MissingAuthority,
            reason: "expanded URL has no host".to_owned(),
        });
    }
    Ok(uri)
}
