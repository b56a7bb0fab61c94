//! Persisted token record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authn::token::Token;
use crate::errors::BridgeError;
use crate::filesys::file::File;

/// Token record stored per integration instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub instance_id: String,

    #[serde(flatten)]
    pub token: Token,

    /// Last time the record was written
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(instance_id: &str, token: Token) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            token,
            updated_at: Utc::now(),
        }
    }
}

/// Load the token record, `None` if none was ever written
pub async fn load_tokens(token_file: &File) -> Result<Option<TokenRecord>, BridgeError> {
    if !token_file.exists().await {
        return Ok(None);
    }

    let record: TokenRecord = token_file.read_json().await.map_err(|e| {
        BridgeError::StorageError(format!(
            "Failed to read token file {}: {}",
            token_file.path().display(),
            e
        ))
    })?;

    Ok(Some(record))
}

/// Save the token record readable by the owner only
pub async fn save_tokens(token_file: &File, record: &TokenRecord) -> Result<(), BridgeError> {
    token_file.write_json(record).await?;
    token_file.set_permissions_600().await
}
