//! The transcript controller: owns the chat transcript and drives one exchange
//! with the query endpoint at a time.

use crate::bus::{Event, EventBus};
use crate::chat::{self, HistoryTurn, Message, FALLBACK_REPLY, UNREACHABLE_REPLY};
use crate::client::{QueryClient, QueryRequest, QueryResponse};
use crate::store::{KeyValueStore, SESSION_ID_KEY, TRANSCRIPT_KEY};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the controller is in its single-flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A request is outstanding; `placeholder` is the id of the loading message.
    AwaitingReply { placeholder: u64 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    /// Send recent turns and the session id along with each question.
    pub send_history: bool,
}

/// What became of a call to [`TranscriptController::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The text was empty after trimming; nothing changed.
    Empty,
    /// Another exchange is still outstanding; nothing changed.
    Busy,
    /// The endpoint replied.
    Answered,
    /// The exchange failed and the error reply was appended.
    Failed,
}

struct State {
    messages: Vec<Message>,
    draft: String,
    phase: Phase,
    next_id: u64,
}

impl State {
    fn new() -> Self {
        let greeting = Message::greeting();
        Self {
            next_id: greeting.id + 1,
            messages: vec![greeting],
            draft: String::new(),
            phase: Phase::Idle,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

/// An exchange whose user message and placeholder are already in the
/// transcript. Hand it to [`TranscriptController::finish`] to send it.
#[must_use = "the placeholder stays until the exchange is finished"]
#[derive(Debug)]
pub struct Pending {
    question: String,
    history: Vec<HistoryTurn>,
}

impl Pending {
    pub fn question(&self) -> &str {
        &self.question
    }
}

pub struct TranscriptController {
    state: Mutex<State>,
    store: Arc<dyn KeyValueStore>,
    client: Arc<dyn QueryClient>,
    bus: Arc<EventBus>,
    options: ControllerOptions,
    session_id: OnceCell<String>,
}

impl TranscriptController {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn QueryClient>,
        bus: Arc<EventBus>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            state: Mutex::new(State::new()),
            store,
            client,
            bus,
            options,
            session_id: OnceCell::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    /// Replace the draft. Allowed while a reply is outstanding.
    pub fn set_draft(&self, text: impl Into<String>) {
        self.lock().draft = text.into();
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_awaiting_reply(&self) -> bool {
        matches!(self.phase(), Phase::AwaitingReply { .. })
    }

    /// Replace the default transcript with the saved one, if there is a usable one.
    pub async fn restore(&self) {
        let raw = match self.store.get(TRANSCRIPT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not read saved transcript: {:#}", e);
                return;
            }
        };

        let saved: Vec<Message> = match serde_json::from_str(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Ignoring unreadable saved transcript: {}", e);
                return;
            }
        };

        // A placeholder left by an interrupted exchange has no request behind it any more
        let restored: Vec<Message> = saved
            .into_iter()
            .filter(|msg| msg.sender.is_settled())
            .collect();
        if restored.is_empty() {
            return;
        }

        let snapshot = {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                warn!("Skipping restore while a reply is outstanding");
                return;
            }
            state.next_id = restored.iter().map(|msg| msg.id).max().unwrap_or(0).saturating_add(1);
            state.messages = restored;
            state.messages.clone()
        };

        info!("Restored {} messages from storage", snapshot.len());
        self.bus.publish(Event::TranscriptChanged { messages: snapshot });
    }

    /// Save the full transcript. Failures are logged and otherwise ignored.
    pub async fn persist(&self) {
        let snapshot = self.snapshot();
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize transcript: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set(TRANSCRIPT_KEY, &raw).await {
            warn!("Failed to persist transcript: {:#}", e);
        }
    }

    /// The cached session identifier, generating and saving one on first use.
    /// Concurrent first calls share a single lookup.
    pub async fn session_id(&self) -> String {
        self.session_id
            .get_or_init(|| self.load_or_create_session_id())
            .await
            .clone()
    }

    async fn load_or_create_session_id(&self) -> String {
        let stored = match self.store.get(SESSION_ID_KEY).await {
            Ok(stored) => stored.filter(|id| !id.trim().is_empty()),
            Err(e) => {
                warn!("Could not read session id: {:#}", e);
                None
            }
        };

        if let Some(id) = stored {
            return id;
        }

        let id = new_session_id();
        if let Err(e) = self.store.set(SESSION_ID_KEY, &id).await {
            warn!("Failed to persist session id: {:#}", e);
        }
        id
    }

    /// Submit whatever is currently in the draft.
    pub async fn submit_draft(&self) -> SubmitOutcome {
        let draft = self.draft();
        self.submit(&draft).await
    }

    /// Post `text` to the endpoint and settle the transcript with the reply.
    ///
    /// Every failure ends as a bot message; nothing is returned as an error.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        match self.start(text) {
            Ok(pending) => self.finish(pending).await,
            Err(outcome) => outcome,
        }
    }

    /// Send a started exchange and settle the transcript with its outcome.
    pub async fn finish(&self, pending: Pending) -> SubmitOutcome {
        let mut in_flight = InFlight {
            controller: self,
            armed: true,
        };

        self.persist().await;

        let mut request = QueryRequest::new(pending.question);
        if self.options.send_history {
            let conversation_id = self.session_id().await;
            request = request.with_memory(pending.history, conversation_id);
        }

        let result = self.client.ask(&request).await;

        in_flight.armed = false;
        let outcome = self.settle(result);
        self.persist().await;
        outcome
    }

    /// Append the user message and the loading placeholder for `text`.
    ///
    /// Returns `Err(Empty)` or `Err(Busy)` without touching anything when the
    /// submission is refused. Callers that need the transcript updated before
    /// they yield (a stdin loop, say) call this and then [`Self::finish`].
    pub fn start(&self, text: &str) -> Result<Pending, SubmitOutcome> {
        let question = text.trim();

        let (snapshot, pending) = {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                debug!("Submission refused: a reply is still outstanding");
                return Err(SubmitOutcome::Busy);
            }
            if question.is_empty() {
                return Err(SubmitOutcome::Empty);
            }

            let history = chat::recent_history(&state.messages);

            let user_id = state.allocate_id();
            state.messages.push(Message::user(user_id, question));
            state.draft.clear();

            let placeholder = state.allocate_id();
            state.messages.push(Message::loading(placeholder));
            state.phase = Phase::AwaitingReply { placeholder };

            let pending = Pending {
                question: question.to_string(),
                history,
            };
            (state.messages.clone(), pending)
        };

        self.bus.publish(Event::TranscriptChanged { messages: snapshot });
        self.bus.publish(Event::StatusChanged {
            awaiting_reply: true,
        });
        Ok(pending)
    }

    fn settle(&self, result: anyhow::Result<QueryResponse>) -> SubmitOutcome {
        let (reply, outcome) = match result {
            Ok(body) => {
                let reply = match body.response.filter(|text| !text.trim().is_empty()) {
                    Some(text) => text,
                    None => {
                        warn!("Query endpoint reply had no response text");
                        FALLBACK_REPLY.to_string()
                    }
                };
                (reply, SubmitOutcome::Answered)
            }
            Err(e) => {
                error!("Query endpoint request failed: {:#}", e);
                (UNREACHABLE_REPLY.to_string(), SubmitOutcome::Failed)
            }
        };

        let snapshot = {
            let mut state = self.lock();
            state.messages.retain(|msg| msg.sender.is_settled());
            let id = state.allocate_id();
            state.messages.push(Message::bot(id, reply));
            state.phase = Phase::Idle;
            state.messages.clone()
        };

        self.bus.publish(Event::TranscriptChanged { messages: snapshot });
        self.bus.publish(Event::StatusChanged {
            awaiting_reply: false,
        });
        outcome
    }

    /// Drop the placeholder of an exchange whose future went away before settling.
    fn abandon(&self) {
        let snapshot = {
            let mut state = self.lock();
            let Phase::AwaitingReply { placeholder } = state.phase else {
                return;
            };
            state.messages.retain(|msg| msg.id != placeholder);
            state.phase = Phase::Idle;
            state.messages.clone()
        };

        debug!("Discarded pending reply");
        self.persist_in_background(&snapshot);
        self.bus.publish(Event::TranscriptChanged { messages: snapshot });
        self.bus.publish(Event::StatusChanged {
            awaiting_reply: false,
        });
    }
}

impl TranscriptController {
    /// Save `snapshot` without awaiting, for callers that cannot suspend.
    fn persist_in_background(&self, snapshot: &[Message]) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to persist the transcript on");
            return;
        };
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize transcript: {}", e);
                return;
            }
        };

        let store = self.store.clone();
        handle.spawn(async move {
            if let Err(e) = store.set(TRANSCRIPT_KEY, &raw).await {
                warn!("Failed to persist transcript: {:#}", e);
            }
        });
    }
}

/// Returns the controller to idle if a submission is dropped mid-flight.
struct InFlight<'a> {
    controller: &'a TranscriptController,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon();
        }
    }
}

fn new_session_id() -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("ses_{}", &token[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_short_and_alphanumeric() {
        let id = new_session_id();
        assert_eq!(id.len(), 16);
        assert!(id.starts_with("ses_"));
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn id_allocation_saturates_instead_of_overflowing() {
        let mut state = State::new();
        state.next_id = u64::MAX;
        assert_eq!(state.allocate_id(), u64::MAX);
        assert_eq!(state.allocate_id(), u64::MAX);
    }

    #[test]
    fn fresh_state_holds_only_the_greeting() {
        let state = State::new();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].text, chat::GREETING);
        assert_eq!(state.messages[0].sender, crate::entity::Sender::Bot);
        assert_eq!(state.next_id, 2);
        assert_eq!(state.phase, Phase::Idle);
    }
}
