use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use inkroom_shared::board_format::{
    decode_board_file, encode_board_file, BoardFileData, BoardFileDecodeError,
};
use inkroom_shared::Stroke;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("board store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("board record for {0} is corrupt")]
    Corrupt(String),
    #[error("board record for {room_id} has unsupported version {version}")]
    UnsupportedVersion { room_id: String, version: u32 },
    #[error("s3 error for board {room_id}: {message}")]
    S3 { room_id: String, message: String },
}

/// Durable room-id keyed store for stroke logs. `load` is read-once on the
/// first access to a room; an absent record is `Ok(None)`, never an error.
/// `save` overwrites the whole record.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<Stroke>>, StorageError>;
    async fn save(&self, room_id: &str, strokes: &[Stroke]) -> Result<(), StorageError>;
}

/// One `<room>.board` file per room under `board_dir`.
pub struct FileStorage {
    board_dir: PathBuf,
}

impl FileStorage {
    pub fn new(board_dir: PathBuf) -> Self {
        Self { board_dir }
    }

    fn board_path(&self, room_id: &str) -> PathBuf {
        self.board_dir.join(format!("{}.board", file_stem(room_id)))
    }
}

/// Room ids come straight off the wire; anything outside a conservative
/// character set is mapped away so an id can never escape `board_dir`.
fn file_stem(room_id: &str) -> String {
    room_id
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<Stroke>>, StorageError> {
        let path = self.board_path(room_id);
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        decode_record(room_id, &payload).map(|data| Some(data.strokes))
    }

    async fn save(&self, room_id: &str, strokes: &[Stroke]) -> Result<(), StorageError> {
        let payload = encode_board_file(&BoardFileData {
            strokes: strokes.to_vec(),
        });
        tokio::fs::write(self.board_path(room_id), payload).await?;
        Ok(())
    }
}

fn decode_record(room_id: &str, payload: &[u8]) -> Result<BoardFileData, StorageError> {
    decode_board_file(payload).map_err(|error| match error {
        BoardFileDecodeError::UnsupportedVersion(version) => StorageError::UnsupportedVersion {
            room_id: room_id.to_string(),
            version,
        },
        BoardFileDecodeError::InvalidData => StorageError::Corrupt(room_id.to_string()),
    })
}

#[derive(Clone, Debug)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3StorageConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

pub struct S3Storage {
    bucket: String,
    prefix: String,
    client: Client,
}

impl S3Storage {
    pub async fn new(config: S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let (Some(access_key_id), Some(secret_access_key)) = (
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
        ) {
            let creds = Credentials::new(access_key_id, secret_access_key, None, None, "static");
            loader = loader.credentials_provider(creds);
        }
        if let Some(region) = config.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint_url) = config.endpoint_url.as_ref() {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());
        let prefix = config
            .prefix
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();
        Self {
            bucket: config.bucket,
            prefix,
            client,
        }
    }

    fn object_key(&self, room_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.board", file_stem(room_id))
        } else {
            format!("{}/{}.board", self.prefix, file_stem(room_id))
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn load(&self, room_id: &str) -> Result<Option<Vec<Stroke>>, StorageError> {
        let key = self.object_key(room_id);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        let output = match response {
            Ok(output) => output,
            Err(error) => {
                if let Some(service_error) = error.as_service_error() {
                    if service_error.is_no_such_key() {
                        return Ok(None);
                    }
                }
                return Err(StorageError::S3 {
                    room_id: room_id.to_string(),
                    message: format!("{error:?}"),
                });
            }
        };
        let bytes = match output.body.collect().await {
            Ok(collected) => collected.into_bytes(),
            Err(error) => {
                return Err(StorageError::S3 {
                    room_id: room_id.to_string(),
                    message: format!("{error:?}"),
                });
            }
        };
        decode_record(room_id, &bytes).map(|data| Some(data.strokes))
    }

    async fn save(&self, room_id: &str, strokes: &[Stroke]) -> Result<(), StorageError> {
        let key = self.object_key(room_id);
        let payload = encode_board_file(&BoardFileData {
            strokes: strokes.to_vec(),
        });
        let body = ByteStream::from(payload);
        if let Err(error) = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
        {
            warn!(%room_id, key, "s3 put failed");
            return Err(StorageError::S3 {
                room_id: room_id.to_string(),
                message: format!("{error:?}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
