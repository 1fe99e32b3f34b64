//! TLS configuration built from the device credential bundle.
//!
//! The broker presents a certificate issued by the CA delivered in the
//! credential bundle, and the client authenticates with the bundled device
//! certificate and key. The chain is validated against that pinned CA only.
//!
//! Broker endpoints are assigned dynamically and their certificates do not
//! carry the endpoint hostname, so name verification is relaxed: a chain
//! that is valid in every respect except the subject name is accepted.
//! Everything else (expiry, signatures, chain of trust) is still enforced.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    CertificateError, ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
};

use super::{error::ChannelError, provision::CredentialPaths};

/// Builds a client TLS configuration from the materialized credential bundle.
///
/// # Errors
///
/// Fails when any credential file is unreadable, contains no usable PEM
/// material, or the key does not pair with the certificate.
pub fn client_config(paths: &CredentialPaths) -> Result<ClientConfig, ChannelError> {
    let roots = load_roots(&paths.ca)?;
    let certs = read_certs(&paths.cert)?;
    if certs.is_empty() {
        return Err(ChannelError::ClientSetup(format!(
            "no client certificate in {}",
            paths.cert.display()
        )));
    }
    let key = load_key(&paths.key)?;

    let verifier = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ChannelError::ClientSetup(format!("server verifier: {e}")))?;

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedCaVerifier { inner: verifier }))
        .with_client_auth_cert(certs, key)?;

    Ok(config)
}

fn load_roots(path: &Path) -> Result<RootCertStore, ChannelError> {
    let mut store = RootCertStore::empty();
    for cert in read_certs(path)? {
        store.add(cert)?;
    }
    if store.is_empty() {
        return Err(ChannelError::ClientSetup(format!(
            "no CA certificates in {}",
            path.display()
        )));
    }
    Ok(store)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ChannelError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ChannelError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        ChannelError::ClientSetup(format!("no private key in {}", path.display()))
    })
}

/// Delegates chain validation to webpki against the pinned CA, accepting
/// certificates whose subject does not match the connection hostname.
#[derive(Debug)]
struct PinnedCaVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for PinnedCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            // The chain itself checked out against the pinned CA; only the
            // subject name failed. That is the one check this channel relaxes.
            Err(Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn paths_in(dir: &TempDir) -> CredentialPaths {
        CredentialPaths {
            ca: dir.path().join("ck_ca.pem"),
            cert: dir.path().join("ck_cert.pem"),
            key: dir.path().join("ck_private_key.pem"),
        }
    }

    #[test]
    fn test_client_config_missing_files() {
        let dir = TempDir::new().unwrap();
        let result = client_config(&paths_in(&dir));
        assert!(matches!(result, Err(ChannelError::Io(_))));
    }

    #[test]
    fn test_client_config_empty_ca() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        for path in [&paths.ca, &paths.cert, &paths.key] {
            File::create(path).unwrap().write_all(b"").unwrap();
        }

        let result = client_config(&paths);
        assert!(matches!(result, Err(ChannelError::ClientSetup(_))));
    }

    #[test]
    fn test_client_config_garbage_pem() {
        let dir = TempDir::new().unwrap();
        let paths = paths_in(&dir);
        for path in [&paths.ca, &paths.cert, &paths.key] {
            File::create(path)
                .unwrap()
                .write_all(b"not pem material")
                .unwrap();
        }

        // Garbage parses to zero certificates, which fails CA loading
        let result = client_config(&paths);
        assert!(matches!(result, Err(ChannelError::ClientSetup(_))));
    }
}
