//! Insecure TLS client configuration.
//!
//! The probe targets test servers with self-signed certificates, so the
//! certificate chain and server name are never checked. Handshake
//! signatures are still verified against whatever certificate the peer
//! presented. Not suitable for production traffic.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::errors::ConnectError;

/// Certificate verifier that trusts every server certificate.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    /// Verifier using `provider`'s signature algorithms.
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client configuration with the insecure trust policy and no client auth.
pub fn insecure_client_config() -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
        .with_no_client_auth();
    Ok(config)
}

/// Connector built from [`insecure_client_config`].
pub fn insecure_connector() -> Result<TlsConnector, ConnectError> {
    Ok(TlsConnector::from(Arc::new(insecure_client_config()?)))
}

/// SNI name for `host`. IP literals are accepted as IP server names.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ConnectError> {
    ServerName::try_from(host.to_string()).map_err(|_| ConnectError::ServerName(host.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accepts_any_certificate_for_any_name() {
        let verifier = AcceptAnyServerCert::new(Arc::new(rustls::crypto::ring::default_provider()));
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03]);
        let name = ServerName::try_from("not-the-right-host.test").unwrap();
        let verdict = verifier.verify_server_cert(&garbage, &[], &name, &[], UnixTime::now());
        assert!(verdict.is_ok());
    }

    #[test]
    fn advertises_signature_schemes() {
        let verifier = AcceptAnyServerCert::new(Arc::new(rustls::crypto::ring::default_provider()));
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn insecure_config_builds() {
        let config = insecure_client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
        assert!(insecure_connector().is_ok());
    }

    #[test]
    fn server_names_accept_dns_and_ip() {
        assert_matches!(server_name("localhost"), Ok(ServerName::DnsName(_)));
        assert_matches!(server_name("127.0.0.1"), Ok(ServerName::IpAddress(_)));
        assert_matches!(server_name("::1"), Ok(ServerName::IpAddress(_)));
        assert_matches!(server_name("bad name!"), Err(ConnectError::ServerName(_)));
    }
}
