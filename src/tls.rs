//! Self-signed certificate supply for the HTTPS listener
//!
//! WebXR only runs in a secure context, so the headset must load the client
//! over HTTPS even on a LAN. Explicit paths are used when they hold a valid
//! pair; otherwise a certificate covering every local address is generated and
//! cached for reuse.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, RsaKeySize, PKCS_RSA_SHA256};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::utils::net::{hostname, local_ipv4_addresses};

pub const CERT_FILE_NAME: &str = "vr_cert.pem";
pub const KEY_FILE_NAME: &str = "vr_key.pem";

/// Validity of generated certificates
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Install ring as the process-wide rustls provider.
///
/// rustls cannot pick a default when several providers are compiled in, and
/// both the HTTPS listener and WebRTC DTLS need one. A provider installed
/// earlier by the host is left in place.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

/// Paths of a certificate/key pair on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// `$XDG_CACHE_HOME/vr-teleop/ssl`, falling back to `~/.cache/vr-teleop/ssl`
pub fn default_ssl_dir() -> PathBuf {
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    cache.join("vr-teleop").join("ssl")
}

/// Resolve the certificate pair the server should use.
///
/// Explicit paths are honoured when both files exist and the certificate has
/// not expired; otherwise a fresh self-signed pair is written there (or to
/// the default cache directory when no paths were given).
pub fn resolve_certificate(
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<CertificatePaths> {
    let dir = default_ssl_dir();
    let paths = CertificatePaths {
        cert: cert_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.join(CERT_FILE_NAME)),
        key: key_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.join(KEY_FILE_NAME)),
    };
    ensure_certificate(&paths, &subject_alt_names())?;
    Ok(paths)
}

/// Reuse the pair at `paths` if valid, else generate one covering `sans`
pub fn ensure_certificate(paths: &CertificatePaths, sans: &[String]) -> Result<()> {
    if paths.cert.is_file() && paths.key.is_file() && certificate_is_valid(&paths.cert) {
        info!("Reusing TLS certificate {}", paths.cert.display());
        return Ok(());
    }

    info!("Generating self-signed TLS certificate for {:?}", sans);
    let (cert_pem, key_pem) = generate_self_signed(sans)?;

    for path in [&paths.cert, &paths.key] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Tls(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
    }
    write_private_key(&paths.key, &key_pem)
        .map_err(|e| AppError::Tls(format!("Failed to write {}: {}", paths.key.display(), e)))?;
    fs::write(&paths.cert, cert_pem)
        .map_err(|e| AppError::Tls(format!("Failed to write {}: {}", paths.cert.display(), e)))?;

    info!("TLS certificate written to {}", paths.cert.display());
    Ok(())
}

/// Write the key readable by the owner only, from creation on
#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to newly created files
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(pem.as_bytes())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    fs::write(path, pem)
}

/// SAN entries: localhost, loopback, hostname and every discovered LAN address
pub fn subject_alt_names() -> Vec<String> {
    let mut sans = vec!["localhost".to_string()];
    if let Some(name) = hostname() {
        if name != "localhost" {
            sans.push(name);
        }
    }
    for ip in local_ipv4_addresses() {
        let ip = ip.to_string();
        if !sans.contains(&ip) {
            sans.push(ip);
        }
    }
    sans
}

/// Generate a PEM certificate and RSA-2048 private key valid for [`CERT_VALIDITY_DAYS`]
pub fn generate_self_signed(sans: &[String]) -> Result<(String, String)> {
    let mut params = CertificateParams::new(sans.to_vec())
        .map_err(|e| AppError::Tls(format!("Invalid subject alternative name: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "VR Teleop");
    dn.push(DnType::OrganizationName, "vr-teleop");
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::minutes(5);
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

    let key_pair = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(|e| AppError::Tls(format!("Failed to generate key pair: {}", e)))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| AppError::Tls(format!("Failed to sign certificate: {}", e)))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// True if the PEM file parses and `not_after` lies in the future
pub fn certificate_is_valid(cert_path: &Path) -> bool {
    let Ok(pem) = fs::read_to_string(cert_path) else {
        return false;
    };
    match CertificateParams::from_ca_cert_pem(&pem) {
        Ok(params) => params.not_after > OffsetDateTime::now_utc(),
        Err(e) => {
            debug!("Existing certificate unusable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(dir: &Path) -> CertificatePaths {
        CertificatePaths {
            cert: dir.join("ssl").join(CERT_FILE_NAME),
            key: dir.join("ssl").join(KEY_FILE_NAME),
        }
    }

    #[test]
    fn test_generated_certificate_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        ensure_certificate(&paths, &["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();

        assert!(paths.cert.is_file());
        assert!(paths.key.is_file());
        assert!(certificate_is_valid(&paths.cert));

        let key = fs::read_to_string(&paths.key).unwrap();
        assert!(key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_generated_key_is_rsa_2048() {
        let (_, key_pem) = generate_self_signed(&["localhost".to_string()]).unwrap();
        let key_pair = KeyPair::from_pem(&key_pem).unwrap();
        assert_eq!(key_pair.algorithm(), &PKCS_RSA_SHA256);
        // PKCS#1 RSAPublicKey DER: 256-byte modulus plus framing
        let public = key_pair.public_key_raw();
        assert!((260..300).contains(&public.len()), "len {}", public.len());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.key.parent().unwrap()).unwrap();
        // A stale, world-readable key is tightened on rewrite
        fs::write(&paths.key, "old").unwrap();
        fs::set_permissions(&paths.key, fs::Permissions::from_mode(0o644)).unwrap();

        ensure_certificate(&paths, &["localhost".to_string()]).unwrap();
        let mode = fs::metadata(&paths.key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_valid_pair_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let sans = vec!["localhost".to_string()];
        ensure_certificate(&paths, &sans).unwrap();
        let first = fs::read_to_string(&paths.cert).unwrap();

        ensure_certificate(&paths, &sans).unwrap();
        assert_eq!(fs::read_to_string(&paths.cert).unwrap(), first);
    }

    #[test]
    fn test_garbage_certificate_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.cert.parent().unwrap()).unwrap();
        fs::write(&paths.cert, "not a certificate").unwrap();
        fs::write(&paths.key, "not a key").unwrap();
        assert!(!certificate_is_valid(&paths.cert));

        ensure_certificate(&paths, &["localhost".to_string()]).unwrap();
        assert!(certificate_is_valid(&paths.cert));
    }

    #[test]
    fn test_missing_certificate_is_invalid() {
        assert!(!certificate_is_valid(Path::new("/nonexistent/cert.pem")));
    }

    #[test]
    fn test_sans_cover_localhost_and_loopback() {
        let sans = subject_alt_names();
        assert_eq!(sans[0], "localhost");
        assert!(sans.contains(&"127.0.0.1".to_string()));
    }

    #[test]
    fn test_explicit_paths_used() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.pem");
        let key = dir.path().join("k.pem");
        let paths = resolve_certificate(Some(&cert), Some(&key)).unwrap();
        assert_eq!(paths.cert, cert);
        assert_eq!(paths.key, key);
        assert!(certificate_is_valid(&cert));
    }
}
