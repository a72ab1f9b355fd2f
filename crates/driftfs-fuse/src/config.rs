//! Mount-time configuration.
//!
//! One `MountConfig` describes a whole filesystem instance; the chunking
//! mode and codec can never change for the lifetime of the data written
//! with them.

use driftfs_datapath::DataPathOptions;
use driftfs_types::{make_error, status_code::StatusCode, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Directory the filesystem is mounted on.
    #[serde(default)]
    pub mountpoint: String,

    /// Object-store flavor: "s3" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// Store files as chunk objects plus a manifest.
    #[serde(default)]
    pub chunk: bool,

    /// Fixed-size chunk boundaries (content-defined when false).
    #[serde(default = "default_true")]
    pub fixed: bool,

    /// Compression codec ("zstd", "lz4", "snappy"); empty disables.
    #[serde(default)]
    pub compress: String,
}

fn default_backend() -> String {
    "s3".into()
}

fn default_true() -> bool {
    true
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mountpoint: String::new(),
            backend: default_backend(),
            bucket: String::new(),
            region: String::new(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            chunk: false,
            fixed: true,
            compress: String::new(),
        }
    }
}

impl MountConfig {
    /// The data-path policy slice of this config.
    pub fn data_path_options(&self) -> DataPathOptions {
        DataPathOptions {
            chunked: self.chunk,
            fixed: self.fixed,
            compress: self.compress.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "s3" | "memory" => {}
            _ => return make_error(StatusCode::INVALID_CONFIG),
        }
        if self.backend == "s3" && self.bucket.is_empty() {
            return make_error(StatusCode::INVALID_CONFIG);
        }
        match self.compress.as_str() {
            "" | "zstd" | "lz4" | "snappy" => {}
            _ => return make_error(StatusCode::INVALID_CONFIG),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = MountConfig::default();
        assert_eq!(c.backend, "s3");
        assert!(!c.chunk);
        assert!(c.fixed);
        assert!(c.compress.is_empty());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let c: MountConfig =
            serde_json::from_str(r#"{"backend":"memory","chunk":true,"compress":"lz4"}"#).unwrap();
        assert_eq!(c.backend, "memory");
        assert!(c.chunk);
        assert!(c.fixed);
        assert_eq!(c.compress, "lz4");
        c.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_codec() {
        let c = MountConfig {
            backend: "memory".into(),
            compress: "gzip".into(),
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_requires_bucket_for_s3() {
        let c = MountConfig::default();
        assert!(c.validate().is_err());

        let c = MountConfig {
            bucket: "data".into(),
            ..Default::default()
        };
        c.validate().unwrap();
    }

    #[test]
    fn test_data_path_options() {
        let c = MountConfig {
            chunk: true,
            fixed: false,
            compress: "zstd".into(),
            ..Default::default()
        };
        let opts = c.data_path_options();
        assert!(opts.chunked);
        assert!(!opts.fixed);
        assert_eq!(opts.compress, "zstd");
    }
}
