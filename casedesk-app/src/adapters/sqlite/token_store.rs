//! `TokenStore` implementation for `SqliteStore`.

use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, EntityTrait};
use tokio::sync::broadcast;

use casedesk_core::error::{CoreError, CoreResult};
use casedesk_core::traits::TokenStore;
use casedesk_core::types::{Credential, TokenChange};

use super::entity::credential;
use super::SqliteStore;

impl credential::Model {
    fn into_credential(self) -> CoreResult<Credential> {
        let expires_at = chrono::DateTime::parse_from_rfc3339(&self.expires_at)
            .map_err(|e| CoreError::SerializationError(format!("Invalid expires_at: {e}")))?
            .with_timezone(&chrono::Utc);
        Ok(Credential::new(self.token, expires_at))
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn load(&self) -> CoreResult<Option<Credential>> {
        let row = credential::Entity::find_by_id(credential::SESSION_ROW)
            .one(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to query credential: {e}")))?;

        row.map(credential::Model::into_credential).transpose()
    }

    async fn save(&self, value: &Credential) -> CoreResult<()> {
        let row = credential::Model {
            id: credential::SESSION_ROW,
            token: value.token.clone(),
            expires_at: value.expires_at.to_rfc3339(),
        };
        let active_model = credential::ActiveModel {
            id: Set(row.id),
            token: Set(row.token.clone()),
            expires_at: Set(row.expires_at.clone()),
        };

        let mut seen = self.last_seen.lock().await;
        credential::Entity::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(credential::Column::Id)
                    .update_columns([credential::Column::Token, credential::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to save credential: {e}")))?;

        *seen = Some(row);
        drop(seen);
        self.publish(TokenChange::Saved);
        log::debug!("Credential saved to SQLite");
        Ok(())
    }

    async fn clear(&self) -> CoreResult<()> {
        let mut seen = self.last_seen.lock().await;
        credential::Entity::delete_many()
            .exec(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(format!("Failed to clear credential: {e}")))?;

        *seen = None;
        drop(seen);
        self.publish(TokenChange::Cleared);
        log::debug!("Credential cleared from SQLite");
        Ok(())
    }

    fn changes(&self) -> Option<broadcast::Receiver<TokenChange>> {
        Some(self.subscribe())
    }
}
