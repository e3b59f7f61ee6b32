#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end behavior of the single-value pipeline over a scripted transport.

mod common;

use common::{RecordingListener, ScriptedTransport, broken_body, reply, reply_with_headers};
use http::{Method, StatusCode};
use modkit_feign::{
    Arg, Backoff, FeignClient, FeignClientConfig, FeignError, HeaderInterceptor, LogLevel,
    MethodDescriptor, Request, RetryConfig, Target,
};
use std::sync::Arc;

const BASE: &str = "https://api.example.com";

fn mirror() -> MethodDescriptor {
    MethodDescriptor::builder("Api#mirror(int,Map)", Method::GET, "/mirrorParameters?paramInUrl={p}")
        .param(0, "p")
        .query_map(1)
        .build()
        .unwrap()
}

fn get_item() -> MethodDescriptor {
    MethodDescriptor::builder("Api#item(String)", Method::GET, "/items/{id}")
        .param(0, "id")
        .build()
        .unwrap()
}

fn retrying(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff: Backoff::None,
        retry_client_errors: false,
    }
}

fn client_with(
    transport: Arc<ScriptedTransport>,
    configure: impl FnOnce(modkit_feign::FeignClientBuilder) -> modkit_feign::FeignClientBuilder,
) -> FeignClient {
    let builder = FeignClient::builder(Target::url(BASE))
        .config(FeignClientConfig::minimal())
        .transport(transport)
        .method(mirror())
        .method(get_item());
    configure(builder).build().unwrap()
}

#[tokio::test]
async fn test_template_query_merges_with_query_map() {
    let transport = ScriptedTransport::always(200, "ok");
    let client = client_with(Arc::clone(&transport), |b| b);

    let body = client
        .invoke_single("Api#mirror(int,Map)", vec![Arg::from(777), Arg::map([("k", "v")])])
        .await
        .unwrap();

    assert_eq!(body.as_deref(), Some(&b"ok"[..]));
    assert_eq!(
        transport.uris(),
        vec!["https://api.example.com/mirrorParameters?paramInUrl=777&k=v"]
    );
}

#[tokio::test]
async fn test_empty_body_is_none() {
    let transport = ScriptedTransport::always(204, "");
    let client = client_with(transport, |b| b);
    let body = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap();
    assert!(body.is_none());
}

#[tokio::test]
async fn test_retry_exhaustion_counts_attempts() {
    let transport = ScriptedTransport::always(503, "busy");
    let client = client_with(Arc::clone(&transport), |b| b.retry(Some(retrying(2))));

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 3);
    match err {
        FeignError::OutOfRetries { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(source.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        }
        other => panic!("Expected OutOfRetries, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_recovers_and_reexpands() {
    let transport = ScriptedTransport::new(|_, i| Ok(if i < 2 { reply(502, "") } else { reply(200, "done") }));
    let client = client_with(Arc::clone(&transport), |b| b.retry(Some(retrying(3))));

    let body = client
        .invoke_single("Api#item(String)", vec![Arg::from("x y")])
        .await
        .unwrap();

    assert_eq!(body.as_deref(), Some(&b"done"[..]));
    let uris = transport.uris();
    assert_eq!(uris.len(), 3);
    assert!(uris.iter().all(|u| u == "https://api.example.com/items/x%20y"));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let transport = ScriptedTransport::always(400, "bad");
    let client = client_with(Arc::clone(&transport), |b| b.retry(Some(retrying(3))));

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    match err {
        FeignError::Status {
            status,
            body_preview,
            ..
        } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body_preview, "bad");
        }
        other => panic!("Expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_after_hint_is_carried() {
    let transport = ScriptedTransport::new(|_, _| Ok(reply_with_headers(429, "", &[("retry-after", "0")])));
    let client = client_with(Arc::clone(&transport), |b| b.retry(Some(retrying(1))));

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 2, "429 is retryable");
    assert_eq!(err.retry_after(), Some(std::time::Duration::ZERO));
}

#[tokio::test]
async fn test_decode404_only_affects_404() {
    let transport = ScriptedTransport::new(|req: &Request, _| {
        Ok(if req.uri().path().ends_with("/missing") {
            reply(404, "nope")
        } else {
            reply(500, "boom")
        })
    });
    let client = client_with(transport, |b| b.decode404());

    let missing = client
        .invoke_single("Api#item(String)", vec![Arg::from("missing")])
        .await
        .unwrap();
    assert!(missing.is_none());

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("broken")])
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn test_404_is_error_without_decode404() {
    let transport = ScriptedTransport::always(404, "nope");
    let client = client_with(transport, |b| b);
    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_interceptors_run_in_order_before_user_agent() {
    let transport = ScriptedTransport::always(200, "");
    let client = client_with(Arc::clone(&transport), |b| {
        b.interceptor(HeaderInterceptor::if_absent("x-trace", "first").unwrap())
            .interceptor(HeaderInterceptor::if_absent("x-trace", "second").unwrap())
            .interceptor(HeaderInterceptor::overwrite("user-agent", "custom/2.0").unwrap())
    });

    client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap();

    let seen = transport.seen();
    let seen = &seen[0];
    assert_eq!(seen.header("x-trace"), vec!["first"]);
    assert_eq!(seen.header("user-agent"), vec!["custom/2.0"]);
}

#[tokio::test]
async fn test_default_user_agent_is_set() {
    let transport = ScriptedTransport::always(200, "");
    let client = client_with(Arc::clone(&transport), |b| b);
    client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap();
    assert_eq!(
        transport.seen()[0].header("user-agent"),
        vec![modkit_feign::DEFAULT_USER_AGENT]
    );
}

#[tokio::test]
async fn test_interceptor_error_aborts_without_sending() {
    let transport = ScriptedTransport::always(200, "");
    let client = client_with(Arc::clone(&transport), |b| {
        b.retry(Some(retrying(3)))
            .interceptor(|_: Request| -> Result<Request, FeignError> {
                Err(FeignError::Configuration("no credentials".to_owned()))
            })
    });

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, FeignError::Configuration(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_listener_sees_every_attempt_and_one_error() {
    let transport = ScriptedTransport::always(503, "");
    let listener = Arc::new(RecordingListener::default());
    let client = client_with(Arc::clone(&transport), |b| {
        b.retry(Some(retrying(2)))
            .log_level(LogLevel::Full)
            .listener(Arc::clone(&listener) as Arc<dyn modkit_feign::InvocationListener>)
    });

    client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();

    assert_eq!(listener.count("request:"), 3);
    assert_eq!(listener.count("response:503"), 3);
    assert_eq!(listener.count("retry:"), 2);
    assert_eq!(listener.events().last().map(String::as_str), Some("error:Api#item(String)"));
    assert_eq!(listener.count("error:"), 1);
}

#[tokio::test]
async fn test_body_over_limit_fails() {
    let transport = ScriptedTransport::always(200, "0123456789");
    let client = client_with(Arc::clone(&transport), |b| b.max_body_size(4).retry(Some(retrying(3))));
    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, FeignError::BodyTooLarge { limit: 4, .. }));
    assert_eq!(transport.calls(), 1, "an oversized body is not retried");
}

#[tokio::test]
async fn test_body_read_failure_is_retried() {
    let transport = ScriptedTransport::new(|_, i| Ok(if i == 0 { broken_body("par") } else { reply(200, "ok") }));
    let listener = Arc::new(RecordingListener::default());
    let client = client_with(Arc::clone(&transport), |b| {
        b.retry(Some(retrying(3)))
            .listener(Arc::clone(&listener) as Arc<dyn modkit_feign::InvocationListener>)
    });

    let body = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap();

    assert_eq!(body.as_deref(), Some(&b"ok"[..]));
    assert_eq!(transport.calls(), 2);
    assert_eq!(listener.count("retry:"), 1);
    assert_eq!(listener.count("element:"), 1, "the partial body is never delivered");
    assert_eq!(listener.count("error:"), 0);
}

#[tokio::test]
async fn test_body_read_failure_without_retry_surfaces() {
    let transport = ScriptedTransport::new(|_, _| Ok(broken_body("par")));
    let client = client_with(Arc::clone(&transport), |b| b);

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();

    assert!(matches!(err, FeignError::Body(_)), "got {err:?}");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_invalid_uri_fails_before_io() {
    let transport = ScriptedTransport::always(200, "");
    let client = FeignClient::builder(Target::url("not a url"))
        .config(FeignClientConfig::minimal())
        .transport(Arc::clone(&transport) as Arc<dyn modkit_feign::Transport>)
        .method(get_item())
        .build()
        .unwrap();

    let err = client
        .invoke_single("Api#item(String)", vec![Arg::from("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, FeignError::InvalidUri { .. }));
    assert_eq!(transport.calls(), 0);
}
