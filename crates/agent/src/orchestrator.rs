use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use vendi_core::config::AppConfig;
use vendi_core::{
    Cart, Customer, Entities, ModelClient, Role, Session, SessionStore, TurnMetadata,
};

use crate::classifier::IntentClassifier;
use crate::composer::ReplyComposer;
use crate::dispatcher::{ActionDispatcher, ActionFlags, Adapters};
use crate::hooks::{TurnContext, TurnHook};
use crate::session::SessionManager;

const FALLBACK_TEXT: &str =
    "I am having trouble processing that request right now. Please try again.";
const ERROR_INTENT: &str = "error";

/// The response envelope every turn resolves to, success or failure.
#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
    pub text: String,
    pub intent: String,
    pub confidence: f64,
    pub entities: Entities,
    pub actions: ActionFlags,
    pub data: Option<crate::dispatcher::ActionData>,
    pub session: SessionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionSnapshot {
    pub cart: Cart,
    pub customer: Option<Customer>,
    pub context: Map<String, Value>,
}

impl SessionSnapshot {
    fn of(session: &Session) -> Self {
        Self {
            cart: session.cart.clone(),
            customer: session.customer.clone(),
            context: session.context.clone(),
        }
    }
}

struct TurnFailure {
    error: String,
    session: Option<Session>,
}

/// Keyed turn locks. Two concurrent turns for one session id would
/// otherwise race read-modify-write on the store (last write wins);
/// holding the key's mutex for the whole turn serializes them within
/// this process. Entries are dropped as soon as no turn holds them,
/// so the registry stays bounded by in-flight turns.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            Arc::clone(
                locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    async fn release(&self, id: &str) {
        let mut locks = self.inner.lock().await;
        if let Some(lock) = locks.get(id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(id);
            }
        }
    }
}

/// Sequences one conversational turn: hooks, session load, user-turn
/// append, classification, dispatch, reply composition, assistant
/// append, persist, envelope. The public contract is that `chat`
/// never raises; every failure becomes a degraded envelope with the
/// session persisted on a best-effort basis.
pub struct SalesAgent {
    classifier: IntentClassifier,
    sessions: SessionManager,
    dispatcher: ActionDispatcher,
    composer: ReplyComposer,
    hooks: Vec<Arc<dyn TurnHook>>,
    locks: SessionLocks,
}

impl SalesAgent {
    pub fn new(
        config: &AppConfig,
        model: Arc<dyn ModelClient>,
        adapters: Adapters,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(
                Arc::clone(&model),
                config.conversation.enabled_intents.clone(),
            ),
            sessions: SessionManager::new(
                store,
                config.conversation.max_history_length,
                config.conversation.session_ttl_secs,
            ),
            dispatcher: ActionDispatcher::new(
                adapters,
                Arc::clone(&model),
                config.business.clone(),
                config.payments.clone(),
            ),
            composer: ReplyComposer::new(
                model,
                config.business.clone(),
                &config.conversation,
                &config.llm,
            ),
            hooks: Vec::new(),
            locks: SessionLocks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn TurnHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Processes one turn. Always returns an envelope.
    pub async fn chat(
        &self,
        session_id: &str,
        message: &str,
        metadata: TurnMetadata,
    ) -> ChatResponse {
        let mut ctx = TurnContext::new(session_id, message, metadata);

        if message.trim().is_empty() {
            return self
                .reject_turn(&mut ctx, "message must be a non-empty string".to_string())
                .await;
        }

        let guard = self.locks.acquire(session_id).await;
        let response = match self.try_turn(&mut ctx).await {
            Ok(response) => response,
            Err(failure) => self.fail_turn(&mut ctx, failure).await,
        };
        drop(guard);
        self.locks.release(session_id).await;

        response
    }

    async fn try_turn(&self, ctx: &mut TurnContext) -> Result<ChatResponse, TurnFailure> {
        for hook in &self.hooks {
            hook.before(ctx)
                .await
                .map_err(|error| TurnFailure { error: error.to_string(), session: None })?;
        }

        let mut session = self
            .sessions
            .load(&ctx.session_id)
            .await
            .map_err(|error| TurnFailure { error: error.to_string(), session: None })?;

        self.sessions.append_message(
            &mut session,
            Role::User,
            &ctx.message,
            metadata_map(&ctx.metadata),
        );

        let intent_result = self.classifier.classify(&ctx.message, &session.history).await;

        let action_result = self
            .dispatcher
            .execute(&intent_result, &mut session, &ctx.message, &ctx.metadata)
            .await;

        let reply =
            self.composer.compose(&ctx.message, &intent_result, &action_result, &session).await;

        let mut assistant_meta = Map::new();
        assistant_meta
            .insert("intent".to_string(), Value::from(intent_result.intent.as_str()));
        assistant_meta.insert("confidence".to_string(), Value::from(intent_result.confidence));
        self.sessions.append_message(&mut session, Role::Assistant, &reply, assistant_meta);

        self.sessions.save(&ctx.session_id, &mut session).await.map_err(|error| TurnFailure {
            error: error.to_string(),
            session: Some(session.clone()),
        })?;

        let response = ChatResponse {
            text: reply,
            intent: intent_result.intent.as_str().to_string(),
            confidence: intent_result.confidence,
            entities: intent_result.entities,
            actions: action_result.actions,
            data: action_result.data,
            session: SessionSnapshot::of(&session),
            error: None,
        };
        ctx.response = Some(response.clone());

        for hook in &self.hooks {
            hook.after(ctx).await.map_err(|error| TurnFailure {
                error: error.to_string(),
                session: Some(session.clone()),
            })?;
        }

        Ok(response)
    }

    /// The degraded path: append a fallback assistant turn carrying
    /// the error, persist regardless, run error hooks, return the
    /// error envelope.
    async fn fail_turn(&self, ctx: &mut TurnContext, failure: TurnFailure) -> ChatResponse {
        let mut session = match failure.session {
            Some(session) => session,
            None => match self.sessions.load(&ctx.session_id).await {
                Ok(session) => session,
                Err(load_error) => {
                    warn!(
                        event_name = "turn.fallback_load_failed",
                        session_id = %ctx.session_id,
                        error = %load_error,
                    );
                    Session::new(&ctx.session_id)
                }
            },
        };

        let mut fallback_meta = Map::new();
        fallback_meta.insert("error".to_string(), Value::from(failure.error.clone()));
        self.sessions.append_message(&mut session, Role::Assistant, FALLBACK_TEXT, fallback_meta);

        if let Err(save_error) = self.sessions.save(&ctx.session_id, &mut session).await {
            warn!(
                event_name = "turn.fallback_persist_failed",
                session_id = %ctx.session_id,
                error = %save_error,
            );
        }

        let response = ChatResponse {
            text: FALLBACK_TEXT.to_string(),
            intent: ERROR_INTENT.to_string(),
            confidence: 0.0,
            entities: Entities::default(),
            actions: ActionFlags::default(),
            data: None,
            session: SessionSnapshot::of(&session),
            error: Some(failure.error.clone()),
        };
        ctx.error = Some(failure.error);
        ctx.response = Some(response.clone());

        self.run_error_hooks(ctx).await;
        response
    }

    /// Input-validation rejection: degraded envelope, error hooks,
    /// no session mutation or persistence.
    async fn reject_turn(&self, ctx: &mut TurnContext, error: String) -> ChatResponse {
        let response = ChatResponse {
            text: FALLBACK_TEXT.to_string(),
            intent: ERROR_INTENT.to_string(),
            confidence: 0.0,
            entities: Entities::default(),
            actions: ActionFlags::default(),
            data: None,
            session: SessionSnapshot::default(),
            error: Some(error.clone()),
        };
        ctx.error = Some(error);
        ctx.response = Some(response.clone());

        self.run_error_hooks(ctx).await;
        response
    }

    async fn run_error_hooks(&self, ctx: &mut TurnContext) {
        for hook in &self.hooks {
            if let Err(hook_error) = hook.error(ctx).await {
                warn!(
                    event_name = "turn.error_hook_failed",
                    session_id = %ctx.session_id,
                    error = %hook_error,
                );
            }
        }
    }
}

/// Flattens turn metadata into the per-turn record, dropping empty
/// slots so stored history stays compact.
fn metadata_map(metadata: &TurnMetadata) -> Map<String, Value> {
    match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => {
            map.into_iter().filter(|(_, value)| !value.is_null()).collect()
        }
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use vendi_core::config::AppConfig;
    use vendi_core::{
        CompletionOptions, ModelClient, ModelError, Role, Session, SessionStore,
        SessionStoreError, TurnMetadata,
    };

    use crate::dispatcher::Adapters;
    use crate::hooks::{TurnContext, TurnHook};

    use super::SalesAgent;

    struct UnclearModel;

    #[async_trait]
    impl ModelClient for UnclearModel {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ModelError> {
            Err(ModelError::Backend("model offline".to_string()))
        }
    }

    /// Store double with switchable failure modes.
    #[derive(Default)]
    struct TestStore {
        sessions: Mutex<std::collections::HashMap<String, Session>>,
        fail_get: bool,
        fail_save: bool,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for TestStore {
        async fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(SessionStoreError::Backend("store down".to_string()));
            }
            Ok(self.sessions.lock().await.get(id).cloned())
        }

        async fn save(&self, id: &str, session: &Session) -> Result<(), SessionStoreError> {
            if self.fail_save {
                return Err(SessionStoreError::Backend("store down".to_string()));
            }
            self.sessions.lock().await.insert(id.to_string(), session.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
            self.sessions.lock().await.remove(id);
            Ok(())
        }

        async fn update_ttl(&self, _id: &str, _ttl: u64) -> Result<(), SessionStoreError> {
            Ok(())
        }
    }

    fn agent_with(store: Arc<TestStore>) -> SalesAgent {
        SalesAgent::new(
            &AppConfig::default(),
            Arc::new(UnclearModel),
            Adapters::default(),
            store,
        )
    }

    #[tokio::test]
    async fn a_turn_with_no_adapters_and_a_dead_model_still_answers() {
        let store = Arc::new(TestStore::default());
        let agent = agent_with(Arc::clone(&store));

        let response = agent.chat("s-1", "hello there", TurnMetadata::default()).await;

        // Dead model => unclear intent => informational payload =>
        // deterministic fallback text.
        assert_eq!(response.intent, "unclear");
        assert_eq!(response.confidence, 0.0);
        assert!(!response.text.is_empty());
        assert!(response.error.is_none());

        let session = store.sessions.lock().await.get("s-1").cloned().expect("persisted");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn store_failure_produces_the_degraded_envelope() {
        let store = Arc::new(TestStore { fail_get: true, fail_save: true, ..TestStore::default() });
        let agent = agent_with(store);

        let response = agent.chat("s-1", "hello", TurnMetadata::default()).await;

        assert_eq!(response.intent, "error");
        assert_eq!(response.confidence, 0.0);
        assert!(!response.text.is_empty());
        assert!(response.error.as_deref().unwrap_or("").contains("store down"));
        assert!(response.data.is_none());
        assert_eq!(response.actions, Default::default());
    }

    #[tokio::test]
    async fn save_failure_still_returns_an_envelope() {
        let store = Arc::new(TestStore { fail_save: true, ..TestStore::default() });
        let agent = agent_with(store);

        let response = agent.chat("s-1", "hello", TurnMetadata::default()).await;
        assert_eq!(response.intent, "error");
        assert!(response.error.is_some());
    }

    struct RecordingHook {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    }

    #[async_trait]
    impl TurnHook for RecordingHook {
        async fn before(&self, _ctx: &mut TurnContext) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("{}:before", self.name));
            if self.fail_before {
                bail!("{} rejected the turn", self.name);
            }
            Ok(())
        }

        async fn after(&self, _ctx: &mut TurnContext) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("{}:after", self.name));
            Ok(())
        }

        async fn error(&self, _ctx: &mut TurnContext) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("{}:error", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let store = Arc::new(TestStore::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let agent = agent_with(store).with_hooks(vec![
            Arc::new(RecordingHook { name: "first", log: Arc::clone(&log), fail_before: false }),
            Arc::new(RecordingHook { name: "second", log: Arc::clone(&log), fail_before: false }),
        ]);

        let response = agent.chat("s-1", "hello", TurnMetadata::default()).await;
        assert!(response.error.is_none());

        let entries = log.lock().await.clone();
        assert_eq!(entries, ["first:before", "second:before", "first:after", "second:after"]);
    }

    #[tokio::test]
    async fn failing_before_hook_aborts_into_the_fallback_path() {
        let store = Arc::new(TestStore::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let agent = agent_with(Arc::clone(&store)).with_hooks(vec![Arc::new(RecordingHook {
            name: "limiter",
            log: Arc::clone(&log),
            fail_before: true,
        })]);

        let response = agent.chat("s-1", "hello", TurnMetadata::default()).await;
        assert_eq!(response.intent, "error");
        assert!(response.error.as_deref().unwrap_or("").contains("limiter rejected"));

        // The fallback assistant turn is persisted even though the
        // turn never dispatched.
        let session = store.sessions.lock().await.get("s-1").cloned().expect("persisted");
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].role, Role::Assistant);
        assert_eq!(
            session.history[0].metadata.get("error").and_then(Value::as_str),
            Some("limiter rejected the turn")
        );

        let entries = log.lock().await.clone();
        assert_eq!(entries, ["limiter:before", "limiter:error"]);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_touching_the_store() {
        let store = Arc::new(TestStore::default());
        let agent = agent_with(Arc::clone(&store));

        let response = agent.chat("s-1", "   ", TurnMetadata::default()).await;
        assert_eq!(response.intent, "error");
        assert!(response.error.as_deref().unwrap_or("").contains("non-empty"));
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert!(store.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_are_serialized() {
        let store = Arc::new(TestStore::default());
        let agent = Arc::new(agent_with(Arc::clone(&store)));

        let mut handles = Vec::new();
        for index in 0..4 {
            let agent = Arc::clone(&agent);
            handles.push(tokio::spawn(async move {
                agent.chat("s-shared", &format!("message {index}"), TurnMetadata::default()).await
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        // Four turns, two records each, no lost updates.
        let session = store.sessions.lock().await.get("s-shared").cloned().expect("persisted");
        assert_eq!(session.history.len(), 8);

        // The lock registry drains once no turn is in flight.
        assert!(agent.locks.inner.lock().await.is_empty());
    }
}
