//! OpenDAL Operator factory for blob store backends

use anyhow::{Context, Result};
use opendal::Operator;
use tcap_core::config::{StorageBackendKind, StorageConfig};

/// S3 credentials, loaded by the embedding application.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Build an OpenDAL Operator for the configured backend.
///
/// No RetryLayer here: the resilience layer owns timeouts and backoff.
///
/// If `enforce_tls` is true and an S3 endpoint uses HTTP, this returns an
/// error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_operator(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    match cfg.backend {
        StorageBackendKind::Memory => {
            let builder = opendal::services::Memory::default().root(&cfg.root);
            Ok(Operator::new(builder)
                .context("creating OpenDAL memory operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish())
        }
        StorageBackendKind::S3 => {
            if cfg.endpoint.starts_with("http://") {
                if cfg.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        cfg.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %cfg.endpoint,
                    "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
                );
            }

            let creds = creds.context("S3 backend requires credentials")?;

            // opendal 0.55: consuming builder; path-style addressing is the default
            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .root(&cfg.root)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);

            Ok(Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
        }
    }

    fn s3(endpoint: &str, enforce_tls: bool) -> StorageConfig {
        StorageConfig {
            backend: StorageBackendKind::S3,
            endpoint: endpoint.into(),
            enforce_tls,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_memory_default() {
        assert!(build_operator(&StorageConfig::default(), None).is_ok());
    }

    #[test]
    fn test_build_s3_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        assert!(build_operator(&s3("http://localhost:8333", false), Some(&creds())).is_ok());
    }

    #[test]
    fn test_build_s3_http_enforce_tls() {
        let result = build_operator(&s3("http://insecure:8333", true), Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(result.unwrap_err().to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_build_s3_https() {
        assert!(build_operator(&s3("https://s3.example.com", true), Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_without_credentials() {
        let err = build_operator(&s3("https://s3.example.com", true), None).unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let dbg = format!("{:?}", creds());
        assert!(!dbg.contains("test-secret"));
    }
}
