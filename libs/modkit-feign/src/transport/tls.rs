//! Connector construction for [`super::HyperTransport`].

use crate::config::{TlsRootConfig, TransportOptions};
use crate::error::FeignError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// OS root store, loaded at most once per process (may be empty).
static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn native_roots() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }
        tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
        loaded.certs
    })
}

/// Use the process-wide crypto provider if one is installed, aws-lc-rs otherwise.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_client_config() -> Result<rustls::ClientConfig, FeignError> {
    let certs = native_roots();
    let mut store = rustls::RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(FeignError::Tls(
            format!("no usable native root CA certificates ({} found)", certs.len()).into(),
        ));
    }

    Ok(rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| FeignError::Tls(Box::new(e)))?
        .with_root_certificates(store)
        .with_no_client_auth())
}

/// HTTPS connector honoring `tls_roots` and `allow_insecure_http`.
///
/// HTTP/2 is negotiated through ALPN alongside HTTP/1.1.
pub(super) fn build_https_connector(
    options: &TransportOptions,
) -> Result<HttpsConnector<HttpConnector>, FeignError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(options.connect_timeout));

    let builder = match options.tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| FeignError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_client_config()?)
        }
    };

    let connector = if options.allow_insecure_http {
        builder.https_or_http().enable_all_versions().wrap_connector(http)
    } else {
        builder.https_only().enable_all_versions().wrap_connector(http)
    };
    Ok(connector)
}
