// Read access to the social backend's tables, plus the one write the relay
// owns: validated chat membership changes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use socialnet_common::protocol::ws::{ChatMessageFrame, EventStatus};
use socialnet_common::types::UserSummary;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::chat::{self, ChatMembership, ChatType, MembershipChangeError};
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, PoolConfig},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl StoredUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary::new(&self.first_name, &self.last_name, &self.username, self.avatar_url.clone())
    }
}

/// A chat message joined with its sender, as the relay projects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender: UserSummary,
    pub text: Option<String>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_frame(&self, status: EventStatus) -> ChatMessageFrame {
        ChatMessageFrame {
            id: self.id,
            chat_id: Some(self.chat_id),
            sender: self.sender.clone(),
            text: self.text.clone(),
            file: self.file_url.clone(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
            status,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipUpdateError {
    #[error(transparent)]
    Invalid(#[from] MembershipChangeError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone)]
pub enum SocialStore {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl SocialStore {
    /// Connects, health-checks and migrates the Postgres store.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = create_pg_pool(database_url, PoolConfig::from_env())
            .await
            .context("failed to initialize socialnet PostgreSQL pool")?;
        check_pool_health(&pool).await?;
        run_migrations(&pool).await?;
        info!("connected socialnet store to PostgreSQL");

        Ok(Self::Postgres(pool))
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }

    pub async fn user_exists(&self, user_id: Uuid) -> anyhow::Result<bool> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("failed to query user existence")
            }
            Self::Memory(store) => Ok(store.state.read().await.users.contains_key(&user_id)),
        }
    }

    /// Whether the user is still logged in. Logging out deletes the session
    /// row, which revokes access tokens that have not expired yet.
    pub async fn has_active_session(&self, user_id: Uuid) -> anyhow::Result<bool> {
        match self {
            Self::Postgres(pool) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM access_sessions WHERE user_id = $1)",
            )
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("failed to query access session"),
            Self::Memory(store) => Ok(store.state.read().await.sessions.contains(&user_id)),
        }
    }

    pub async fn chat_membership(&self, chat_id: Uuid) -> anyhow::Result<Option<ChatMembership>> {
        match self {
            Self::Postgres(pool) => load_chat_membership(pool, chat_id).await,
            Self::Memory(store) => Ok(store.state.read().await.chats.get(&chat_id).cloned()),
        }
    }

    pub async fn message_projection(&self, message_id: Uuid) -> anyhow::Result<Option<StoredMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT m.id, m.chat_id, m.sender_id, m.text, m.file_url,
                           m.created_at, m.updated_at,
                           u.first_name, u.last_name, u.username, u.avatar_url
                    FROM messages AS m
                    INNER JOIN users AS u ON u.id = m.sender_id
                    WHERE m.id = $1
                    "#,
                )
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .context("failed to query chat message")?;

                Ok(row.map(MessageRow::into_message))
            }
            Self::Memory(store) => Ok(store.state.read().await.messages.get(&message_id).cloned()),
        }
    }

    /// Validates and persists a group membership change in one step.
    pub async fn apply_membership_change(
        &self,
        chat_id: Uuid,
        adds: &[Uuid],
        removes: &[Uuid],
    ) -> Result<ChatMembership, MembershipUpdateError> {
        match self {
            Self::Postgres(pool) => persist_membership_change(pool, chat_id, adds, removes).await,
            Self::Memory(store) => {
                let mut state = store.state.write().await;
                if let Some(unknown) = adds.iter().find(|id| !state.users.contains_key(id)) {
                    return Err(MembershipChangeError::UnknownUser(*unknown).into());
                }
                let current = state
                    .chats
                    .get(&chat_id)
                    .ok_or(MembershipChangeError::ChatNotFound(chat_id))?;
                let updated = chat::apply_membership_change(current, adds, removes)?;
                state.chats.insert(chat_id, updated.clone());
                Ok(updated)
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    owner_id: Uuid,
    ctype: String,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    text: Option<String>,
    file_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    first_name: String,
    last_name: String,
    username: String,
    avatar_url: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> StoredMessage {
        StoredMessage {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            sender: UserSummary::new(
                &self.first_name,
                &self.last_name,
                &self.username,
                self.avatar_url,
            ),
            text: self.text,
            file_url: self.file_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn chat_from_row(chat_id: Uuid, row: ChatRow, member_ids: Vec<Uuid>) -> anyhow::Result<ChatMembership> {
    let ctype = ChatType::from_db_value(&row.ctype)
        .ok_or_else(|| anyhow::anyhow!("invalid chat type '{}' in database", row.ctype))?;

    Ok(ChatMembership {
        chat_id,
        ctype,
        owner_id: row.owner_id,
        member_ids: member_ids.into_iter().collect(),
    })
}

async fn load_chat_membership(
    pool: &PgPool,
    chat_id: Uuid,
) -> anyhow::Result<Option<ChatMembership>> {
    let Some(row) =
        sqlx::query_as::<_, ChatRow>("SELECT owner_id, ctype FROM chats WHERE id = $1")
            .bind(chat_id)
            .fetch_optional(pool)
            .await
            .context("failed to query chat")?
    else {
        return Ok(None);
    };

    let member_ids =
        sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM chat_users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(pool)
            .await
            .context("failed to query chat members")?;

    chat_from_row(chat_id, row, member_ids).map(Some)
}

async fn persist_membership_change(
    pool: &PgPool,
    chat_id: Uuid,
    adds: &[Uuid],
    removes: &[Uuid],
) -> Result<ChatMembership, MembershipUpdateError> {
    let mut tx = pool.begin().await.context("failed to begin membership transaction")?;

    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT owner_id, ctype FROM chats WHERE id = $1 FOR UPDATE",
    )
    .bind(chat_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to lock chat for membership change")?
    .ok_or(MembershipChangeError::ChatNotFound(chat_id))?;

    let member_ids =
        sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM chat_users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(&mut *tx)
            .await
            .context("failed to query chat members")?;

    let known_adds: HashSet<Uuid> =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = ANY($1)")
            .bind(adds)
            .fetch_all(&mut *tx)
            .await
            .context("failed to query users to add")?
            .into_iter()
            .collect();
    if let Some(unknown) = adds.iter().find(|id| !known_adds.contains(id)) {
        return Err(MembershipChangeError::UnknownUser(*unknown).into());
    }

    let current = chat_from_row(chat_id, row, member_ids)?;
    let updated = chat::apply_membership_change(&current, adds, removes)?;

    let removed: Vec<Uuid> = current.member_ids.difference(&updated.member_ids).copied().collect();
    let added: Vec<Uuid> = updated.member_ids.difference(&current.member_ids).copied().collect();

    sqlx::query("DELETE FROM chat_users WHERE chat_id = $1 AND user_id = ANY($2)")
        .bind(chat_id)
        .bind(&removed)
        .execute(&mut *tx)
        .await
        .context("failed to remove chat members")?;
    sqlx::query(
        "INSERT INTO chat_users (chat_id, user_id) SELECT $1, UNNEST($2::uuid[]) \
         ON CONFLICT DO NOTHING",
    )
    .bind(chat_id)
    .bind(&added)
    .execute(&mut *tx)
    .await
    .context("failed to add chat members")?;
    sqlx::query("UPDATE chats SET updated_at = now() WHERE id = $1")
        .bind(chat_id)
        .execute(&mut *tx)
        .await
        .context("failed to touch chat")?;

    tx.commit().await.context("failed to commit membership change")?;
    Ok(updated)
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, StoredUser>,
    sessions: HashSet<Uuid>,
    chats: HashMap<Uuid, ChatMembership>,
    messages: HashMap<Uuid, StoredMessage>,
}

/// Process-local store for single-instance development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub async fn insert_user(&self, user: StoredUser) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn open_session(&self, user_id: Uuid) {
        self.state.write().await.sessions.insert(user_id);
    }

    pub async fn revoke_session(&self, user_id: Uuid) {
        self.state.write().await.sessions.remove(&user_id);
    }

    pub async fn insert_chat(
        &self,
        chat_id: Uuid,
        ctype: ChatType,
        owner_id: Uuid,
        member_ids: impl IntoIterator<Item = Uuid>,
    ) {
        let member_ids: BTreeSet<Uuid> = member_ids.into_iter().collect();
        self.state
            .write()
            .await
            .chats
            .insert(chat_id, ChatMembership { chat_id, ctype, owner_id, member_ids });
    }

    /// Stores a message sent by an existing user. Returns `None` when the
    /// sender is unknown.
    pub async fn insert_message(
        &self,
        message_id: Uuid,
        chat_id: Uuid,
        sender_id: Uuid,
        text: Option<&str>,
        file_url: Option<&str>,
    ) -> Option<StoredMessage> {
        let mut state = self.state.write().await;
        let sender = state.users.get(&sender_id)?.summary();
        let now = Utc::now();
        let message = StoredMessage {
            id: message_id,
            chat_id,
            sender_id,
            sender,
            text: text.map(str::to_string),
            file_url: file_url.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        state.messages.insert(message_id, message.clone());
        Some(message)
    }

    pub async fn edit_message(&self, message_id: Uuid, text: &str) -> Option<StoredMessage> {
        let mut state = self.state.write().await;
        let message = state.messages.get_mut(&message_id)?;
        message.text = Some(text.to_string());
        message.updated_at = Utc::now();
        Some(message.clone())
    }

    pub async fn delete_message(&self, message_id: Uuid) -> bool {
        self.state.write().await.messages.remove(&message_id).is_some()
    }
}
