//! In-memory chat sessions, messages and agent kits.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use orchestra_core::{
    traits::ChatStore,
    types::{AgentKit, ChatSession, SessionMessage, TenantId},
    Error, Result,
};

#[derive(Default)]
pub struct InMemoryChatStore {
    sessions: DashMap<Uuid, ChatSession>,
    messages: RwLock<Vec<SessionMessage>>,
    kits: DashMap<Uuid, AgentKit>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_session(&self, session: ChatSession) -> Result<()> {
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, tenant: TenantId, id: Uuid) -> Result<Option<ChatSession>> {
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| s.tenant_id == tenant)
            .map(|s| s.clone()))
    }

    async fn update_session(&self, session: &ChatSession) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut s) if s.tenant_id == session.tenant_id => {
                *s = session.clone();
                Ok(())
            }
            _ => Err(Error::not_found(format!("chat session {}", session.id))),
        }
    }

    async fn append_message(&self, message: SessionMessage) -> Result<SessionMessage> {
        let in_tenant = self
            .sessions
            .get(&message.session_id)
            .map(|s| s.tenant_id == message.tenant_id)
            .unwrap_or(false);
        if !in_tenant {
            return Err(Error::not_found(format!("chat session {}", message.session_id)));
        }
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, tenant: TenantId, session: Uuid) -> Result<Vec<SessionMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.tenant_id == tenant && m.session_id == session)
            .cloned()
            .collect())
    }

    async fn upsert_agent_kit(&self, kit: AgentKit) -> Result<()> {
        self.kits.insert(kit.id, kit);
        Ok(())
    }

    async fn get_agent_kit(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentKit>> {
        Ok(self
            .kits
            .get(&id)
            .filter(|k| k.tenant_id == tenant)
            .map(|k| k.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::types::MessageRole;

    #[tokio::test]
    async fn test_messages_require_session_in_tenant() {
        let store = InMemoryChatStore::new();
        let tenant = Uuid::new_v4();
        let session = ChatSession::new(tenant, Uuid::new_v4());
        store.create_session(session.clone()).await.unwrap();

        store
            .append_message(SessionMessage::new(tenant, session.id, MessageRole::User, "hi"))
            .await
            .unwrap();
        let err = store
            .append_message(SessionMessage::new(
                Uuid::new_v4(),
                session.id,
                MessageRole::User,
                "sneaky",
            ))
            .await;
        assert!(err.is_err());
        assert_eq!(store.list_messages(tenant, session.id).await.unwrap().len(), 1);
    }
}
