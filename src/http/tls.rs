use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::Item;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("could not generate a self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Builds the TLS acceptor. With no certificate files a self-signed certificate for
/// `gateway_address` is generated.
pub fn make_acceptor(cert_file: Option<&Path>, key_file: Option<&Path>, gateway_address: &str) -> Result<TlsAcceptor, TlsError> {
    let (certs, key) = match (cert_file, key_file) {
        (Some(cert_file), Some(key_file)) => (load_certs(cert_file)?, load_key(key_file)?),
        _ => {
            warn!(name = gateway_address, "no certificate configured, using a self-signed one");
            self_signed(gateway_address)?
        }
    };

    let config = configure_server(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub fn configure_server(certs: Vec<Certificate>, key: PrivateKey) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    // Only writes anything if SSLKEYLOGFILE is set.
    config.key_log = Arc::new(rustls::KeyLogFile::new());

    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(BufReader::new(file))
}

pub fn load_certs(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match certs.is_empty() {
        true => Err(TlsError::NoCertificates(path.to_path_buf())),
        false => Ok(certs.into_iter().map(Certificate).collect()),
    }
}

/// Loads the first private key in a PEM file, in any of the formats rustls accepts.
pub fn load_key(path: &Path) -> Result<PrivateKey, TlsError> {
    let mut reader = open(path)?;

    loop {
        let item = rustls_pemfile::read_one(&mut reader).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match item {
            Some(Item::RSAKey(key)) | Some(Item::PKCS8Key(key)) | Some(Item::ECKey(key)) => return Ok(PrivateKey(key)),
            Some(_) => continue,
            None => return Err(TlsError::NoPrivateKey(path.to_path_buf())),
        }
    }
}

fn self_signed(name: &str) -> Result<(Vec<Certificate>, PrivateKey), TlsError> {
    let cert = rcgen::generate_simple_self_signed(vec![name.to_string()])?;
    let cert_der = cert.serialize_der()?;
    let key = PrivateKey(cert.serialize_private_key_der());
    Ok((vec![Certificate(cert_der)], key))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tsgate-{:016x}-{name}", rand::random::<u64>()))
    }

    #[test]
    fn self_signed_acceptor() {
        assert!(make_acceptor(None, None, "localhost").is_ok());
    }

    #[test]
    fn loads_pem_files() {
        let cert = rcgen::generate_simple_self_signed(vec!["gw.example.com".to_string()]).unwrap();
        let cert_path = temp_path("cert.pem");
        let key_path = temp_path("key.pem");
        fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        let certs = load_certs(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        assert!(load_key(&key_path).is_ok());
        assert!(make_acceptor(Some(&cert_path), Some(&key_path), "gw.example.com").is_ok());

        assert!(matches!(load_key(&cert_path), Err(TlsError::NoPrivateKey(_))));
        assert!(matches!(load_certs(&key_path), Err(TlsError::NoCertificates(_))));

        let _ = fs::remove_file(cert_path);
        let _ = fs::remove_file(key_path);
    }

    #[test]
    fn missing_file() {
        let path = temp_path("missing.pem");
        assert!(matches!(load_certs(&path), Err(TlsError::Read { .. })));
    }
}
