//! Object-store target for produced artifacts.
//!
//! When a bucket is configured, artifacts go to S3 instead of the local
//! sharded tree. Credentials may come from the config file or from the
//! ambient AWS environment; retry policy is the SDK's default.

use std::path::Path;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use tracing::{debug, instrument};

use scriba_common::Config;

/// Infrequent-access single-zone storage: the harvest output is bulky and
/// reproducible.
const STORAGE_CLASS: StorageClass = StorageClass::OnezoneIa;

pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let region = if config.region.is_empty() {
            "us-east-1".to_string()
        } else {
            config.region.clone()
        };
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));
        if !config.aws_access_key_id.is_empty() {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                config.aws_access_key_id.clone(),
                config.aws_secret_access_key.clone(),
                None,
                None,
                "scriba-config",
            ));
        }
        let shared = loader.load().await;
        Ok(Self {
            client: aws_sdk_s3::Client::new(&shared),
            bucket: config.bucket_name.clone(),
        })
    }

    /// Upload one local file under `dest_path` in the bucket. A `.` or
    /// empty destination puts the file at the bucket root.
    #[instrument(skip(self))]
    pub async fn upload_file(&self, local: &Path, dest_path: &str) -> anyhow::Result<()> {
        let file_name = local
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("no file name in {}", local.display()))?
            .to_string_lossy();
        let prefix = dest_path.trim_end_matches('/');
        let key = if prefix.is_empty() || prefix == "." {
            file_name.into_owned()
        } else {
            format!("{prefix}/{file_name}")
        };

        let body = ByteStream::from_path(local).await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .storage_class(STORAGE_CLASS)
            .body(body)
            .send()
            .await?;
        debug!(bucket = %self.bucket, %key, "uploaded");
        Ok(())
    }
}
