//! Bank construction from configuration

use super::{BankOptions, DataFileBank};
use crate::cache::Caches;
use crate::config::Config;
use crate::enumerator;
use crate::error::Result;
use tracing::info;

/// Build the configured bank
///
/// Validates `config`, connects the caches and builds the backend once.
/// `device_id` selects the device read by the S3 backend.
pub async fn from_config(config: &Config, device_id: Option<&str>) -> Result<DataFileBank> {
    config.validate()?;

    let caches = Caches::from_config(&config.cache).await?;
    let enumerator = enumerator::from_config(config, caches, device_id).await?;

    info!(
        backend = enumerator.backend_id(),
        file_limit = enumerator.file_limit(),
        "data file bank ready"
    );
    Ok(DataFileBank::new(enumerator, BankOptions::from(&config.bank)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::error::Error;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_bank_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.bank.round_to = Some(1);
        config.local.pending = Some(temp_dir.path().to_path_buf());

        let bank = from_config(&config, None).await.unwrap();
        assert_eq!(bank.enumerator().backend_id(), "local");
        assert_eq!(bank.options().round_to, Some(1));
    }

    #[tokio::test]
    async fn test_s3_requires_device() {
        let mut config = Config::default();
        config.bank.backend = BackendKind::S3;
        config.s3.bucket = "bucket".to_string();

        let result = from_config(&config, Some("")).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
