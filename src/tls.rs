use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{
    Certificate, ClientConfig, PrivateKey, RootCertStore, ServerName, SignatureScheme,
};
use rustls_pemfile::Item;
use tracing::{debug, warn};

use crate::error::{Error, FileKind, Result};
use crate::util;

/// A client certificate chain and the private key that goes with it
#[derive(Clone)]
pub struct ClientCertificate {
    chain: Vec<Certificate>,
    key: PrivateKey,
}

impl ClientCertificate {
    /// Create a client certificate from DER-encoded material
    pub fn new(chain: Vec<Certificate>, key: PrivateKey) -> Self {
        Self { chain, key }
    }

    /// Get the certificate chain, leaf first
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Get the private key
    pub fn key(&self) -> &PrivateKey {
        &self.key
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// TLS configuration for outbound connections
///
/// Holds the trust roots, the optional client identity and the verification
/// mode. A `TlsConfig` is immutable once built; start a new [`TlsBuilder`] to
/// change anything.
///
/// Without a custom pool the platform trust store is loaded through
/// `rustls-native-certs`, the same source reqwest uses for clients built
/// without any TLS options.
#[derive(Clone, Default)]
pub struct TlsConfig {
    insecure_skip_verify: bool,
    client_certificate: Option<ClientCertificate>,
    root_ca_pool: Option<RootCertStore>,
}

impl TlsConfig {
    /// Create a TLS configuration with standard verification against the platform roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a TLS configuration from already loaded material
    ///
    /// `root_ca_pool` of `None` means the platform trust roots are used.
    pub fn from_parts(
        root_ca_pool: Option<RootCertStore>,
        client_certificate: Option<ClientCertificate>,
        insecure_skip_verify: bool,
    ) -> Self {
        Self {
            insecure_skip_verify,
            client_certificate,
            root_ca_pool,
        }
    }

    /// Create a TLS configuration that accepts any server certificate
    pub fn insecure() -> Self {
        Self::from_parts(None, None, true)
    }

    /// Create a TLS builder
    pub fn builder() -> TlsBuilder {
        TlsBuilder::new()
    }

    /// Check if server certificate verification is skipped
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Get the client certificates presented during the handshake
    pub fn client_certificates(&self) -> &[ClientCertificate] {
        self.client_certificate.as_slice()
    }

    /// Get the custom trust pool, if one replaces the platform roots
    pub fn root_ca_pool(&self) -> Option<&RootCertStore> {
        self.root_ca_pool.as_ref()
    }

    /// Create a rustls client config from this configuration
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let roots = match &self.root_ca_pool {
            Some(pool) => pool.clone(),
            None => platform_root_store(),
        };

        let builder = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots);

        let mut config = match &self.client_certificate {
            Some(identity) => builder
                .with_client_auth_cert(identity.chain.clone(), identity.key.clone())
                .map_err(|e| Error::tls(format!("failed to configure client certificate: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        if self.insecure_skip_verify {
            warn!("TLS server certificate verification is disabled");
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(SkipServerVerification));
        }

        Ok(config)
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("client_certificate", &self.client_certificate)
            .field("root_ca_pool_len", &self.root_ca_pool.as_ref().map(RootCertStore::len))
            .finish()
    }
}

/// Builder that assembles a [`TlsConfig`] from certificate files
///
/// Options start unset. Setting the same option twice keeps the last value;
/// different options compose.
///
/// # Examples
///
/// ```rust,no_run
/// use httpext::tls::TlsBuilder;
///
/// let config = TlsBuilder::new()
///     .ca_certs(["/etc/ssl/private-ca.pem"])
///     .key_pair("client.crt", "client.key")
///     .build()?;
/// # Ok::<(), httpext::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TlsBuilder {
    skip_verify: Option<bool>,
    ca_certs: Option<Vec<PathBuf>>,
    key_pair: Option<(PathBuf, PathBuf)>,
}

impl TlsBuilder {
    /// Create a new TLS builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip server certificate verification. Dangerous.
    pub fn skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.skip_verify = Some(insecure_skip_verify);
        self
    }

    /// Set the CA certificate files that make up the trust pool
    pub fn ca_certs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.ca_certs = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Set the client certificate and private key files
    pub fn key_pair(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.key_pair = Some((cert_path.into(), key_path.into()));
        self
    }

    /// Check whether no option has been set
    pub fn is_empty(&self) -> bool {
        self.skip_verify.is_none() && self.ca_certs.is_none() && self.key_pair.is_none()
    }

    /// Validate the referenced files and load them into a [`TlsConfig`]
    pub fn build(&self) -> Result<TlsConfig> {
        let cert_file = self
            .key_pair
            .as_ref()
            .map(|(cert, _)| cert.as_path())
            .filter(|path| !is_blank(path));
        let key_file = self
            .key_pair
            .as_ref()
            .map(|(_, key)| key.as_path())
            .filter(|path| !is_blank(path));
        let ca_files: Vec<&Path> = self
            .ca_certs
            .iter()
            .flatten()
            .map(PathBuf::as_path)
            .filter(|path| !is_blank(path))
            .collect();

        if let Some(cert) = cert_file {
            check_file_exists(FileKind::Cert, cert)?;
        }
        if let Some(key) = key_file {
            check_file_exists(FileKind::Key, key)?;
        }
        for ca in &ca_files {
            check_file_exists(FileKind::Ca, ca)?;
        }

        let client_certificate = match (cert_file, key_file) {
            (Some(cert), Some(key)) => Some(load_key_pair(cert, key)?),
            (None, None) => None,
            (cert, key) => {
                return Err(Error::KeyPairLoad {
                    cert: cert.map(Path::to_path_buf).unwrap_or_default(),
                    key: key.map(Path::to_path_buf).unwrap_or_default(),
                    reason: "certificate and key must be provided together".to_string(),
                })
            }
        };

        let root_ca_pool = if ca_files.is_empty() {
            None
        } else {
            Some(load_ca_pool(&ca_files)?)
        };

        let config = TlsConfig {
            insecure_skip_verify: self.skip_verify.unwrap_or(false),
            client_certificate,
            root_ca_pool,
        };
        debug!(config = ?config, "assembled TLS config");
        Ok(config)
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn check_file_exists(kind: FileKind, path: &Path) -> Result<()> {
    if util::file_exists(path) {
        Ok(())
    } else {
        Err(Error::InvalidPath {
            kind,
            path: path.to_path_buf(),
        })
    }
}

fn load_key_pair(cert: &Path, key: &Path) -> Result<ClientCertificate> {
    let pair_error = |reason: String| Error::KeyPairLoad {
        cert: cert.to_path_buf(),
        key: key.to_path_buf(),
        reason,
    };

    let cert_pem = util::read_file(cert, false)?;
    let chain: Vec<Certificate> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .map_err(|e| pair_error(format!("invalid certificate PEM: {}", e)))?
        .into_iter()
        .map(Certificate)
        .collect();
    if chain.is_empty() {
        return Err(pair_error("no certificate found in certificate file".to_string()));
    }

    let key_pem = util::read_file(key, false)?;
    let key_der = rustls_pemfile::read_all(&mut key_pem.as_slice())
        .map_err(|e| pair_error(format!("invalid private key PEM: {}", e)))?
        .into_iter()
        .find_map(|item| match item {
            Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => Some(der),
            _ => None,
        })
        .ok_or_else(|| pair_error("no private key found in key file".to_string()))?;
    let key_der = PrivateKey(key_der);

    check_key_matches(&chain[0], &key_der).map_err(pair_error)?;

    Ok(ClientCertificate::new(chain, key_der))
}

const KEY_CHECK_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA256,
];

const KEY_CHECK_MESSAGE: &[u8] = b"httpext key pair check";

/// Sign with `key` and verify the signature against the public key in `leaf`
fn check_key_matches(leaf: &Certificate, key: &PrivateKey) -> std::result::Result<(), String> {
    let signing_key = rustls::sign::any_supported_type(key)
        .map_err(|e| format!("unsupported private key: {}", e))?;
    let signer = signing_key
        .choose_scheme(KEY_CHECK_SCHEMES)
        .ok_or_else(|| format!("no supported signature scheme for {:?} key", signing_key.algorithm()))?;
    let algorithm = webpki_algorithm(signer.scheme())
        .ok_or_else(|| format!("unsupported signature scheme {:?}", signer.scheme()))?;
    let signature = signer
        .sign(KEY_CHECK_MESSAGE)
        .map_err(|e| format!("failed to sign with private key: {}", e))?;

    let leaf = webpki::EndEntityCert::try_from(leaf.0.as_slice())
        .map_err(|e| format!("invalid leaf certificate: {:?}", e))?;
    leaf.verify_signature(algorithm, KEY_CHECK_MESSAGE, &signature)
        .map_err(|_| "private key does not match certificate public key".to_string())
}

fn webpki_algorithm(scheme: SignatureScheme) -> Option<&'static webpki::SignatureAlgorithm> {
    match scheme {
        SignatureScheme::ECDSA_NISTP256_SHA256 => Some(&webpki::ECDSA_P256_SHA256),
        SignatureScheme::ECDSA_NISTP384_SHA384 => Some(&webpki::ECDSA_P384_SHA384),
        SignatureScheme::ED25519 => Some(&webpki::ED25519),
        SignatureScheme::RSA_PSS_SHA256 => Some(&webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY),
        SignatureScheme::RSA_PKCS1_SHA256 => Some(&webpki::RSA_PKCS1_2048_8192_SHA256),
        _ => None,
    }
}

fn load_ca_pool(files: &[&Path]) -> Result<RootCertStore> {
    let mut pool = RootCertStore::empty();
    let mut seen: HashSet<Vec<u8>> = HashSet::new();

    for path in files {
        let append_error = |reason: String| Error::CaAppend {
            path: path.to_path_buf(),
            reason,
        };

        let pem = util::read_file(path, false)?;
        let ders = rustls_pemfile::certs(&mut pem.as_slice())
            .map_err(|e| append_error(format!("invalid PEM: {}", e)))?;
        if ders.is_empty() {
            return Err(append_error("no PEM certificate found".to_string()));
        }

        let (mut added, mut known, mut ignored) = (0usize, 0usize, 0usize);
        for der in ders {
            if seen.contains(&der) {
                known += 1;
                continue;
            }
            let cert = Certificate(der);
            match pool.add(&cert) {
                Ok(()) => {
                    seen.insert(cert.0);
                    added += 1;
                }
                Err(_) => ignored += 1,
            }
        }
        if added + known == 0 {
            return Err(append_error(format!(
                "none of {} certificate(s) could be parsed",
                ignored
            )));
        }
        debug!(path = %path.display(), added, known, ignored, "appended CA certificates");
    }

    Ok(pool)
}

fn platform_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let ders: Vec<Vec<u8>> = certs.iter().map(|cert| cert.as_ref().to_vec()).collect();
            let (added, ignored) = store.add_parsable_certificates(&ders[..]);
            debug!(added, ignored, "loaded platform trust roots");
        }
        Err(e) => warn!(error = %e, "failed to load platform trust roots"),
    }
    store
}

/// Verifier that accepts every server certificate
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_tls_config_creation() {
        let config = TlsConfig::new();
        assert!(!config.insecure_skip_verify());
        assert!(config.client_certificates().is_empty());
        assert!(config.root_ca_pool().is_none());
    }

    #[test]
    fn test_tls_config_insecure() {
        let config = TlsConfig::insecure();
        assert!(config.insecure_skip_verify());
    }

    #[test]
    fn test_builder_tracks_unset_options() {
        assert!(TlsBuilder::new().is_empty());
        assert!(!TlsBuilder::new().skip_verify(false).is_empty());
        assert!(!TlsBuilder::new().ca_certs(Vec::<PathBuf>::new()).is_empty());
    }

    #[test]
    fn test_skip_verify_is_copied_verbatim() {
        let config = TlsBuilder::new().skip_verify(true).build().unwrap();
        assert!(config.insecure_skip_verify());
        assert!(config.root_ca_pool().is_none());

        let config = TlsBuilder::new()
            .skip_verify(true)
            .skip_verify(false)
            .build()
            .unwrap();
        assert!(!config.insecure_skip_verify());
    }

    #[test]
    fn test_ca_pool_is_union_of_files() {
        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-one.pem"), fixture("ca-two.pem")])
            .build()
            .unwrap();
        assert_eq!(config.root_ca_pool().unwrap().len(), 2);

        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-bundle.pem")])
            .build()
            .unwrap();
        assert_eq!(config.root_ca_pool().unwrap().len(), 2);
    }

    #[test]
    fn test_ca_pool_skips_certificates_seen_in_earlier_files() {
        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-one.pem"), fixture("ca-bundle.pem")])
            .build()
            .unwrap();
        assert_eq!(config.root_ca_pool().unwrap().len(), 2);

        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-one.pem"), fixture("ca-one.pem")])
            .build()
            .unwrap();
        assert_eq!(config.root_ca_pool().unwrap().len(), 1);
    }

    #[test]
    fn test_ca_certs_last_call_wins() {
        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-bundle.pem")])
            .ca_certs([fixture("ca-one.pem")])
            .build()
            .unwrap();
        assert_eq!(config.root_ca_pool().unwrap().len(), 1);
    }

    #[test]
    fn test_ca_file_without_pem_blocks_is_rejected() {
        let err = TlsBuilder::new()
            .ca_certs([fixture("ca-one.pem"), fixture("not-a-cert.pem")])
            .build()
            .unwrap_err();

        match err {
            Error::CaAppend { path, .. } => assert_eq!(path, fixture("not-a-cert.pem")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_ca_file() {
        let err = TlsBuilder::new()
            .ca_certs([fixture("nope.pem")])
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::InvalidPath { kind: FileKind::Ca, .. }));
        assert!(err.to_string().starts_with("CA file"));
    }

    #[test]
    fn test_directory_is_not_a_valid_file() {
        let err = TlsBuilder::new()
            .key_pair(fixture(""), fixture("client.key"))
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::InvalidPath { kind: FileKind::Cert, .. }));
    }

    #[test]
    fn test_cert_checked_before_key_and_ca() {
        let err = TlsBuilder::new()
            .ca_certs(["missing-ca.pem"])
            .key_pair("missing.crt", "missing.key")
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::InvalidPath { kind: FileKind::Cert, .. }));
        assert!(err.to_string().contains("missing.crt"));

        let err = TlsBuilder::new()
            .ca_certs(["missing-ca.pem"])
            .key_pair(fixture("client.crt"), "missing.key")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath { kind: FileKind::Key, .. }));
    }

    #[test]
    fn test_empty_paths_are_skipped() {
        let config = TlsBuilder::new()
            .ca_certs(["", "", ""])
            .build()
            .unwrap();
        assert!(config.root_ca_pool().is_none());
    }

    #[test]
    fn test_partial_key_pair_is_rejected() {
        let err = TlsBuilder::new()
            .key_pair(fixture("client.crt"), "")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::KeyPairLoad { .. }));

        let err = TlsBuilder::new()
            .key_pair("", fixture("client.key"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::KeyPairLoad { .. }));
    }

    #[test]
    fn test_key_pair_loads() {
        let config = TlsBuilder::new()
            .key_pair(fixture("client.crt"), fixture("client.key"))
            .build()
            .unwrap();

        let certs = config.client_certificates();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].chain().len(), 1);
        assert!(format!("{:?}", certs[0]).contains("<redacted>"));
    }

    #[test]
    fn test_mismatched_key_pair_is_rejected() {
        let err = TlsBuilder::new()
            .key_pair(fixture("client.crt"), fixture("other.key"))
            .build()
            .unwrap_err();

        match err {
            Error::KeyPairLoad { cert, key, reason } => {
                assert_eq!(cert, fixture("client.crt"));
                assert_eq!(key, fixture("other.key"));
                assert!(reason.contains("does not match"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_server_key_pair_matches_its_own_cert_only() {
        assert!(TlsBuilder::new()
            .key_pair(fixture("server.crt"), fixture("server.key"))
            .build()
            .is_ok());
        assert!(TlsBuilder::new()
            .key_pair(fixture("server.crt"), fixture("client.key"))
            .build()
            .is_err());
    }

    #[test]
    fn test_key_file_without_key_is_rejected() {
        let err = TlsBuilder::new()
            .key_pair(fixture("client.crt"), fixture("ca-one.pem"))
            .build()
            .unwrap_err();

        match err {
            Error::KeyPairLoad { reason, .. } => assert!(reason.contains("no private key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cert_file_without_cert_is_rejected() {
        let err = TlsBuilder::new()
            .key_pair(fixture("client.key"), fixture("client.key"))
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::KeyPairLoad { .. }));
    }

    #[test]
    fn test_options_compose_into_client_config() {
        let config = TlsBuilder::new()
            .ca_certs([fixture("ca-one.pem")])
            .key_pair(fixture("client.crt"), fixture("client.key"))
            .skip_verify(true)
            .build()
            .unwrap();

        assert!(config.insecure_skip_verify());
        assert_eq!(config.client_certificates().len(), 1);
        assert_eq!(config.root_ca_pool().unwrap().len(), 1);
        assert!(config.to_client_config().is_ok());
    }
}
