use std::{fs::File, io::BufReader, path::Path, sync::Arc, time::SystemTime};

use rustls::{
    Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName,
    client::{ServerCertVerified, ServerCertVerifier},
};
use rustls_pemfile::Item;

use crate::error::ConfigError;

/// Accepts any upstream certificate. The proxy trusts whatever it is asked to
/// forward to.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

pub fn upstream_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}

/// Loads a PEM certificate chain and private key for the listening socket.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, ConfigError> {
    let certs = read_pem(cert_path)?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(der) => Some(Certificate(der)),
            _ => None,
        })
        .collect::<Vec<_>>();
    if certs.is_empty() {
        return Err(tls_error(cert_path, "no certificate found"));
    }

    let key = read_pem(key_path)?
        .into_iter()
        .find_map(|item| match item {
            Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => Some(PrivateKey(der)),
            _ => None,
        })
        .ok_or_else(|| tls_error(key_path, "no private key found"))?;

    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| tls_error(cert_path, err))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn read_pem(path: &Path) -> Result<Vec<Item>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::read_all(&mut BufReader::new(file)).map_err(|err| tls_error(path, err))
}

fn tls_error(path: &Path, message: impl ToString) -> ConfigError {
    ConfigError::Tls {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
