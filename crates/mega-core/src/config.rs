use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hard cap on transfer worker pools.
pub const MAX_WORKERS: usize = 24;

/// Default transfer worker pool size.
pub const DEFAULT_WORKERS: usize = 6;

/// Client configuration (loadable from a toml file, all fields optional).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API origin. `/cs` (commands) and `/sc` (events) are appended.
    pub api_url: String,
    /// Parallel chunk downloads per transfer (1..=24)
    pub download_workers: usize,
    /// Parallel chunk uploads per transfer (1..=24)
    pub upload_workers: usize,
    /// Request `ssl=1` transfer URLs from the service
    pub https: bool,
    /// Also rewrite any plaintext chunk URL to https
    pub https_transfers: bool,
    /// Per-HTTP-request timeout in seconds
    pub timeout_secs: u64,
    /// Max attempts per logical API call and per chunk request
    pub retries: u32,
    /// Overall proof-of-work solve timeout in seconds
    pub hashcash_timeout_secs: u64,
    /// Proof-of-work solver threads (0 = CPU count)
    pub hashcash_workers: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://eu.api.mega.co.nz".into(),
            download_workers: DEFAULT_WORKERS,
            upload_workers: DEFAULT_WORKERS,
            https: false,
            https_transfers: false,
            timeout_secs: 30,
            retries: 5,
            hashcash_timeout_secs: 60,
            hashcash_workers: 0,
        }
    }
}

impl ClientConfig {
    /// Reject out-of-range worker pools. A zero count is meaningless and a
    /// count above [`MAX_WORKERS`] is refused rather than clamped.
    pub fn validate(&self) -> Result<()> {
        for workers in [self.download_workers, self.upload_workers] {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(Error::WorkerLimitExceeded(workers));
            }
        }
        Ok(())
    }

    pub fn ssl_flag(&self) -> i32 {
        if self.https {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.api_url, "https://eu.api.mega.co.nz");
        assert_eq!(cfg.download_workers, 6);
        assert_eq!(cfg.upload_workers, 6);
        assert_eq!(cfg.retries, 5);
        assert_eq!(cfg.hashcash_timeout_secs, 60);
        assert!(!cfg.https);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: ClientConfig = toml::from_str(
            r#"
api_url = "http://127.0.0.1:4433"
download_workers = 12
https = true
"#,
        )
        .unwrap();

        // Overridden
        assert_eq!(cfg.api_url, "http://127.0.0.1:4433");
        assert_eq!(cfg.download_workers, 12);
        assert!(cfg.https);
        assert_eq!(cfg.ssl_flag(), 1);
        // Defaults
        assert_eq!(cfg.upload_workers, 6);
        assert_eq!(cfg.timeout_secs, 30);
    }

    #[test]
    fn test_worker_cap() {
        let mut cfg = ClientConfig::default();
        cfg.download_workers = 100;
        assert!(matches!(
            cfg.validate(),
            Err(Error::WorkerLimitExceeded(100))
        ));

        cfg.download_workers = 24;
        assert!(cfg.validate().is_ok());

        cfg.upload_workers = 0;
        assert!(matches!(cfg.validate(), Err(Error::WorkerLimitExceeded(0))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let cfg = ClientConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let parsed: ClientConfig = toml::from_str(&s).unwrap();
        assert_eq!(cfg.api_url, parsed.api_url);
        assert_eq!(cfg.download_workers, parsed.download_workers);
    }
}
