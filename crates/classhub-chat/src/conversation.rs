//! Per-conversation state machine.
//!
//! A [`Conversation`] merges REST history, optimistic sends and live socket
//! events into one ordered, de-duplicated list. It performs no I/O of its
//! own: transport intents go through the `&dyn ChatTransport` handed to each
//! call, and time is passed in by the caller.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use classhub_transport::{ChatTransport, ConnectionEvent, TypingEvent};
use classhub_types::models::{ChatMessage, UserRef};

use crate::message::{Message, MessageId};
use crate::typing::{TypingDebounce, TypingSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Loading,
    Ready,
}

/// What [`Conversation::handle_message`] did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Closed view, or a message for another conversation.
    Ignored,
    /// Already in the list.
    Duplicate,
    Appended,
    /// Appended in place of an optimistic entry.
    Reconciled,
}

/// How an optimistic send leaves the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    Socket,
    /// Transport is down; the caller must post it over REST and report back
    /// through [`Conversation::send_confirmed`] or [`Conversation::send_failed`].
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub client_id: Uuid,
    pub content: String,
    pub route: SendRoute,
}

/// Read-only view of a conversation, as published to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub peer_typing: bool,
    pub connection_error: bool,
    pub draft: String,
}

#[derive(Debug)]
pub struct Conversation {
    conversation_id: String,
    local_user: UserRef,
    phase: Phase,
    messages: Vec<Message>,
    peer_typing: bool,
    connection_error: bool,
    visible: bool,
    draft: String,
    typing: TypingDebounce,
}

impl Conversation {
    pub fn new(conversation_id: impl Into<String>, local_user: UserRef, typing: TypingDebounce) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            local_user,
            phase: Phase::Closed,
            messages: Vec::new(),
            peer_typing: false,
            connection_error: false,
            visible: true,
            draft: String::new(),
            typing,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn connection_error(&self) -> bool {
        self.connection_error
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Closed -> Loading. Joins the conversation channel; the caller issues
    /// the history fetch after its subscriptions are in place.
    pub fn open(&mut self, transport: &dyn ChatTransport) -> bool {
        if self.phase != Phase::Closed {
            return false;
        }
        self.phase = Phase::Loading;
        transport.join_conversation(&self.conversation_id);
        info!("Opened conversation {}", self.conversation_id);
        true
    }

    /// Loading -> Ready with the fetched history. Entries that arrived while
    /// loading are kept after the history unless the history already has them.
    /// An optimistic entry is covered by a history document carrying its
    /// client id or, failing that, by an unclaimed local document with the
    /// same content (one document per entry).
    pub fn history_loaded(&mut self, history: Vec<ChatMessage>) {
        if self.phase != Phase::Loading {
            debug!("Ignoring history for {} in {:?}", self.conversation_id, self.phase);
            return;
        }

        let mut server_ids = HashSet::new();
        let mut client_ids = HashSet::new();
        // Local documents without a client id, by content, not yet matched.
        let mut unclaimed: HashMap<String, usize> = HashMap::new();
        let mut merged = Vec::with_capacity(history.len() + self.messages.len());
        for doc in history {
            if !server_ids.insert(doc.id.clone()) {
                continue;
            }
            match doc.client_id {
                Some(client_id) => {
                    client_ids.insert(client_id);
                }
                None if doc.sender.id == self.local_user.id => {
                    *unclaimed.entry(doc.content.clone()).or_default() += 1;
                }
                None => {}
            }
            merged.push(Message::confirmed(doc, &self.local_user.id));
        }
        let fetched = merged.len();

        for msg in self.messages.drain(..) {
            let known = match &msg.id {
                MessageId::Server(id) => server_ids.contains(id),
                MessageId::Pending(id) if client_ids.contains(id) => true,
                MessageId::Pending(_) => match unclaimed.get_mut(&msg.content) {
                    Some(count) if *count > 0 => {
                        *count -= 1;
                        true
                    }
                    _ => false,
                },
            };
            if !known {
                merged.push(msg);
            }
        }

        self.messages = merged;
        self.phase = Phase::Ready;
        debug!(
            "Loaded {} history messages for {} ({} total)",
            fetched,
            self.conversation_id,
            self.messages.len()
        );
    }

    /// Loading -> Ready without history; live entries stay usable.
    pub fn history_failed(&mut self) {
        if self.phase != Phase::Loading {
            return;
        }
        self.phase = Phase::Ready;
        self.connection_error = true;
    }

    pub fn set_connection_error(&mut self, connection_error: bool) {
        self.connection_error = connection_error;
    }

    pub fn handle_message(&mut self, doc: ChatMessage, transport: &dyn ChatTransport) -> Applied {
        if self.phase == Phase::Closed || doc.conversation_id != self.conversation_id {
            trace!("Dropping message {} for {}", doc.id, doc.conversation_id);
            return Applied::Ignored;
        }

        if self.contains_server_id(&doc.id) {
            debug!("Duplicate delivery of {} in {}", doc.id, self.conversation_id);
            // Only an exact client id may retire an entry here; content would
            // claim an unrelated pending send.
            if let Some(client_id) = doc.client_id {
                self.messages.retain(|m| m.client_id() != Some(client_id));
            }
            return Applied::Duplicate;
        }

        let reconciled = self.take_optimistic(&doc).is_some();

        self.messages.push(Message::confirmed(doc, &self.local_user.id));

        if self.visible {
            transport.mark_read(&self.conversation_id);
        }

        if reconciled {
            Applied::Reconciled
        } else {
            Applied::Appended
        }
    }

    /// Remove the optimistic entry `doc` confirms: by echoed client id, or
    /// else the oldest local entry with identical content.
    fn take_optimistic(&mut self, doc: &ChatMessage) -> Option<Message> {
        let index = match doc.client_id {
            Some(client_id) => self
                .messages
                .iter()
                .position(|m| m.client_id() == Some(client_id)),
            None if doc.sender.id == self.local_user.id => self
                .messages
                .iter()
                .position(|m| m.is_optimistic() && m.is_local && m.content == doc.content),
            None => None,
        }?;
        Some(self.messages.remove(index))
    }

    fn contains_server_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.server_id() == Some(id))
    }

    pub fn handle_typing(&mut self, event: &TypingEvent) -> bool {
        if self.phase == Phase::Closed || event.conversation_id != self.conversation_id {
            return false;
        }
        let changed = self.peer_typing != event.typing;
        self.peer_typing = event.typing;
        changed
    }

    /// Marks every entry read. Returns whether anything changed.
    pub fn handle_read_receipt(&mut self, conversation_id: &str) -> bool {
        if self.phase == Phase::Closed || conversation_id != self.conversation_id {
            return false;
        }
        let mut changed = false;
        for msg in self.messages.iter_mut().filter(|m| !m.read) {
            msg.read = true;
            changed = true;
        }
        changed
    }

    pub fn handle_connection_event(&mut self, event: &ConnectionEvent, transport: &dyn ChatTransport) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        match event {
            ConnectionEvent::Connected | ConnectionEvent::Reconnected => {
                transport.join_conversation(&self.conversation_id);
                let changed = self.connection_error;
                self.connection_error = false;
                changed
            }
            ConnectionEvent::Disconnected { .. } | ConnectionEvent::Error { .. } => {
                let changed = !self.connection_error;
                self.connection_error = true;
                // Peer's stop may never arrive while we are cut off.
                self.peer_typing = false;
                changed
            }
            ConnectionEvent::MessagesRead { conversation_id } => self.handle_read_receipt(conversation_id),
            ConnectionEvent::Notification(_) => false,
        }
    }

    /// Append an optimistic entry for `content` and route it. Blank input is
    /// ignored.
    pub fn send(&mut self, content: &str, transport: &dyn ChatTransport) -> Option<PendingSend> {
        if self.phase == Phase::Closed || content.trim().is_empty() {
            return None;
        }

        let client_id = Uuid::new_v4();
        self.messages.push(Message::optimistic(
            client_id,
            &self.conversation_id,
            content,
            self.local_user.clone(),
            Utc::now(),
        ));
        self.draft.clear();

        self.typing.cancel();
        transport.stop_typing(&self.conversation_id);

        let route = if transport.is_connected() {
            transport.send_message(&self.conversation_id, content, Some(client_id));
            SendRoute::Socket
        } else {
            debug!("Transport down, sending {} over REST", client_id);
            SendRoute::Rest
        };

        Some(PendingSend {
            client_id,
            content: content.to_string(),
            route,
        })
    }

    /// REST send succeeded.
    pub fn send_confirmed(&mut self, client_id: Uuid, doc: ChatMessage) {
        self.messages.retain(|m| m.client_id() != Some(client_id));
        if self.phase == Phase::Closed || self.contains_server_id(&doc.id) {
            return;
        }
        self.messages.push(Message::confirmed(doc, &self.local_user.id));
    }

    /// REST send failed; the optimistic entry disappears.
    pub fn send_failed(&mut self, client_id: Uuid, reason: &str) {
        let before = self.messages.len();
        self.messages.retain(|m| m.client_id() != Some(client_id));
        if self.messages.len() != before {
            error!(
                "Failed to send message {} in {}: {}",
                client_id, self.conversation_id, reason
            );
        }
    }

    /// Input box changed. Emits typing intents through the debounce.
    pub fn input_changed(&mut self, text: &str, transport: &dyn ChatTransport, now: Instant) {
        self.draft = text.to_string();
        if self.phase == Phase::Closed {
            return;
        }

        let signal = if text.trim().is_empty() {
            self.typing.cleared()
        } else if transport.is_connected() {
            self.typing.keystroke(now)
        } else {
            None
        };
        self.emit_typing(signal, transport);
    }

    /// When the pending typing-stop is due, if any.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    pub fn typing_timer_fired(&mut self, transport: &dyn ChatTransport, now: Instant) {
        let signal = self.typing.poll(now);
        self.emit_typing(signal, transport);
    }

    fn emit_typing(&self, signal: Option<TypingSignal>, transport: &dyn ChatTransport) {
        match signal {
            Some(TypingSignal::Start) => transport.start_typing(&self.conversation_id),
            Some(TypingSignal::Stop) => transport.stop_typing(&self.conversation_id),
            None => {}
        }
    }

    /// Becoming visible with unread peer messages sends a read receipt.
    pub fn set_visible(&mut self, visible: bool, transport: &dyn ChatTransport) {
        let became_visible = visible && !self.visible;
        self.visible = visible;
        if !became_visible || self.phase == Phase::Closed {
            return;
        }
        if self.messages.iter().any(|m| !m.read && !m.is_local) {
            transport.mark_read(&self.conversation_id);
        }
    }

    /// Any -> Closed. Leaves the channel and drops the typing deadline.
    pub fn close(&mut self, transport: &dyn ChatTransport) {
        if self.phase == Phase::Closed {
            return;
        }
        transport.leave_conversation(&self.conversation_id);
        if self.typing.is_typing() {
            transport.stop_typing(&self.conversation_id);
        }
        self.typing.cancel();
        self.peer_typing = false;
        self.phase = Phase::Closed;
        info!("Closed conversation {}", self.conversation_id);
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            phase: self.phase,
            messages: self.messages.clone(),
            peer_typing: self.peer_typing,
            connection_error: self.connection_error,
            draft: self.draft.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fake::{FakeTransport, Intent, doc, me};

    fn ready(transport: &FakeTransport) -> Conversation {
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        assert!(conv.open(transport));
        conv.history_loaded(Vec::new());
        conv
    }

    fn ids(conv: &Conversation) -> Vec<String> {
        conv.messages().iter().map(|m| m.id.to_string()).collect()
    }

    fn echo(id: &str, content: &str, client_id: Option<Uuid>) -> ChatMessage {
        let mut msg = doc(id, "c1", content, "me");
        msg.client_id = client_id;
        msg
    }

    #[test]
    fn open_joins_and_loads() {
        let transport = FakeTransport::connected();
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        assert_eq!(conv.phase(), Phase::Closed);

        assert!(conv.open(&*transport));
        assert!(!conv.open(&*transport));
        assert_eq!(conv.phase(), Phase::Loading);
        assert_eq!(transport.intents(), vec![Intent::Join("c1".into())]);

        conv.history_loaded(vec![doc("h1", "c1", "earlier", "peer"), doc("h2", "c1", "mine", "me")]);
        assert_eq!(conv.phase(), Phase::Ready);
        assert_eq!(ids(&conv), vec!["h1", "h2"]);
        assert!(!conv.messages()[0].is_local);
        assert!(conv.messages()[1].is_local);
    }

    #[test]
    fn echo_replaces_optimistic_entry() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);

        let pending = conv.send("hello", &*transport).unwrap();
        assert_eq!(pending.route, SendRoute::Socket);
        assert!(conv.messages()[0].is_optimistic());

        let applied = conv.handle_message(echo("m1", "hello", Some(pending.client_id)), &*transport);
        assert_eq!(applied, Applied::Reconciled);
        assert_eq!(conv.messages().len(), 1);
        let msg = &conv.messages()[0];
        assert_eq!(msg.id, MessageId::Server("m1".into()));
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_optimistic());
        assert!(msg.is_local);
    }

    #[test]
    fn echo_without_client_id_falls_back_to_content() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);

        conv.send("hello", &*transport).unwrap();
        conv.handle_message(echo("m1", "hello", None), &*transport);
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn identical_rapid_sends_reconcile_one_for_one() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);

        let first = conv.send("ok", &*transport).unwrap();
        let second = conv.send("ok", &*transport).unwrap();

        conv.handle_message(echo("m1", "ok", None), &*transport);
        assert_eq!(conv.messages().len(), 2);
        assert_eq!(conv.messages()[0].client_id(), Some(second.client_id));

        conv.handle_message(echo("m2", "ok", Some(second.client_id)), &*transport);
        assert_eq!(ids(&conv), vec!["m1", "m2"]);
        assert!(conv.messages().iter().all(|m| m.client_id() != Some(first.client_id)));
    }

    #[test]
    fn peer_message_with_same_content_keeps_optimistic_entry() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);

        conv.send("hi", &*transport).unwrap();
        conv.handle_message(doc("p1", "c1", "hi", "peer"), &*transport);
        assert_eq!(conv.messages().len(), 2);
        assert!(conv.messages()[0].is_optimistic());
    }

    #[test]
    fn redelivery_is_dropped() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);

        let first = doc("m1", "c1", "hey", "peer");
        assert_eq!(conv.handle_message(first.clone(), &*transport), Applied::Appended);
        assert_eq!(conv.handle_message(first, &*transport), Applied::Duplicate);
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn other_conversations_are_ignored() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        let applied = conv.handle_message(doc("m1", "c2", "elsewhere", "peer"), &*transport);
        assert_eq!(applied, Applied::Ignored);
        assert!(conv.messages().is_empty());
        assert!(transport.intents().is_empty());

        assert!(!conv.handle_typing(&TypingEvent {
            conversation_id: "c2".into(),
            typing: true,
        }));
        assert!(!conv.peer_typing());
    }

    #[test]
    fn inbound_marks_read_only_while_visible() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        conv.handle_message(doc("m1", "c1", "one", "peer"), &*transport);
        assert_eq!(transport.intents(), vec![Intent::MarkRead("c1".into())]);

        conv.set_visible(false, &*transport);
        conv.handle_message(doc("m2", "c1", "two", "peer"), &*transport);
        assert_eq!(transport.count(|i| matches!(i, Intent::MarkRead(_))), 1);

        conv.set_visible(true, &*transport);
        assert_eq!(transport.count(|i| matches!(i, Intent::MarkRead(_))), 2);
    }

    #[test]
    fn read_receipt_marks_everything_and_is_idempotent() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        conv.handle_message(doc("m1", "c1", "one", "peer"), &*transport);
        conv.send("two", &*transport);

        assert!(!conv.handle_read_receipt("c2"));
        assert!(conv.handle_read_receipt("c1"));
        assert!(conv.messages().iter().all(|m| m.read));

        let before = conv.snapshot();
        assert!(!conv.handle_read_receipt("c1"));
        assert_eq!(conv.snapshot(), before);
    }

    #[test]
    fn messages_read_arrives_through_connection_events() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        conv.handle_message(doc("m1", "c1", "one", "peer"), &*transport);

        let event = ConnectionEvent::MessagesRead {
            conversation_id: "c1".into(),
        };
        assert!(conv.handle_connection_event(&event, &*transport));
        assert!(conv.messages()[0].read);
    }

    #[test]
    fn live_message_during_loading_survives_empty_history() {
        let transport = FakeTransport::connected();
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        conv.open(&*transport);

        conv.handle_message(doc("m9", "c1", "early", "peer"), &*transport);
        conv.history_loaded(Vec::new());
        assert_eq!(ids(&conv), vec!["m9"]);
    }

    #[test]
    fn history_merge_drops_entries_it_already_has() {
        let transport = FakeTransport::connected();
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        conv.open(&*transport);

        conv.handle_message(doc("m2", "c1", "live", "peer"), &*transport);
        let pending = conv.send("mine", &*transport).unwrap();
        let unsent = conv.send("later", &*transport).unwrap();

        conv.history_loaded(vec![
            doc("m1", "c1", "old", "peer"),
            doc("m2", "c1", "live", "peer"),
            echo("m3", "mine", Some(pending.client_id)),
        ]);

        let unsent_id = MessageId::Pending(unsent.client_id).to_string();
        assert_eq!(
            ids(&conv),
            vec!["m1".to_string(), "m2".into(), "m3".into(), unsent_id]
        );
    }

    #[test]
    fn history_merge_matches_echoes_without_client_id_by_content() {
        let transport = FakeTransport::connected();
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        conv.open(&*transport);

        let first = conv.send("ok", &*transport).unwrap();
        let second = conv.send("ok", &*transport).unwrap();
        conv.send("from peer too", &*transport).unwrap();

        conv.history_loaded(vec![
            echo("m1", "ok", None),
            doc("m2", "c1", "from peer too", "peer"),
        ]);

        // One local "ok" document covers one of the two pending sends.
        let pending: Vec<_> = conv.messages().iter().filter(|m| m.is_optimistic()).collect();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].client_id(), Some(second.client_id));
        assert_eq!(pending[1].content, "from peer too");
        assert_eq!(ids(&conv)[..2], ["m1", "m2"]);

        // Redelivery of the merged document leaves the other pending send alone.
        assert_eq!(
            conv.handle_message(echo("m1", "ok", None), &*transport),
            Applied::Duplicate
        );
        assert_eq!(conv.messages().len(), 4);
        assert!(conv.messages().iter().all(|m| m.client_id() != Some(first.client_id)));
    }

    #[test]
    fn history_failure_keeps_view_usable() {
        let transport = FakeTransport::connected();
        let mut conv = Conversation::new("c1", me(), TypingDebounce::default());
        conv.open(&*transport);
        conv.history_failed();

        assert_eq!(conv.phase(), Phase::Ready);
        assert!(conv.connection_error());
        assert_eq!(conv.handle_message(doc("m1", "c1", "hi", "peer"), &*transport), Applied::Appended);
    }

    #[test]
    fn blank_send_is_ignored() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        assert!(conv.send("   ", &*transport).is_none());
        assert!(conv.messages().is_empty());
        assert!(transport.intents().is_empty());
    }

    #[test]
    fn send_clears_draft_and_stops_typing() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        conv.input_changed("hel", &*transport, Instant::now());
        let pending = conv.send("hello", &*transport).unwrap();

        assert_eq!(conv.draft(), "");
        assert_eq!(conv.typing_deadline(), None);
        assert_eq!(
            transport.intents(),
            vec![
                Intent::TypingStart("c1".into()),
                Intent::TypingStop("c1".into()),
                Intent::Send {
                    conversation_id: "c1".into(),
                    content: "hello".into(),
                    client_id: Some(pending.client_id),
                },
            ]
        );
    }

    #[test]
    fn disconnected_send_is_routed_to_rest() {
        let transport = FakeTransport::disconnected();
        let mut conv = ready(&transport);

        let pending = conv.send("offline", &*transport).unwrap();
        assert_eq!(pending.route, SendRoute::Rest);
        assert!(transport.intents().is_empty());

        conv.send_confirmed(pending.client_id, echo("r1", "offline", None));
        assert_eq!(ids(&conv), vec!["r1"]);
    }

    #[test]
    fn rest_confirmation_after_socket_echo_is_not_duplicated() {
        let transport = FakeTransport::disconnected();
        let mut conv = ready(&transport);
        let pending = conv.send("offline", &*transport).unwrap();

        conv.handle_message(echo("r1", "offline", Some(pending.client_id)), &*transport);
        conv.send_confirmed(pending.client_id, echo("r1", "offline", None));
        assert_eq!(ids(&conv), vec!["r1"]);
    }

    #[test]
    fn failed_send_removes_optimistic_entry() {
        let transport = FakeTransport::disconnected();
        let mut conv = ready(&transport);
        conv.handle_message(doc("m1", "c1", "before", "peer"), &*transport);

        let pending = conv.send("doomed", &*transport).unwrap();
        conv.send_failed(pending.client_id, "503");
        assert_eq!(ids(&conv), vec!["m1"]);
    }

    #[test]
    fn keystrokes_emit_one_start_and_one_stop() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        let t0 = Instant::now();
        for i in 0..5 {
            conv.input_changed("abc", &*transport, t0 + Duration::from_secs(2 * i));
        }
        let last = t0 + Duration::from_secs(8);
        assert_eq!(conv.typing_deadline(), Some(last + Duration::from_secs(3)));

        conv.typing_timer_fired(&*transport, last + Duration::from_secs(2));
        conv.typing_timer_fired(&*transport, last + Duration::from_secs(3));
        conv.typing_timer_fired(&*transport, last + Duration::from_secs(6));

        assert_eq!(
            transport.intents(),
            vec![Intent::TypingStart("c1".into()), Intent::TypingStop("c1".into())]
        );
    }

    #[test]
    fn clearing_input_stops_typing() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        transport.clear_intents();

        conv.input_changed("a", &*transport, Instant::now());
        conv.input_changed("  ", &*transport, Instant::now());
        conv.input_changed("", &*transport, Instant::now());
        assert_eq!(
            transport.intents(),
            vec![Intent::TypingStart("c1".into()), Intent::TypingStop("c1".into())]
        );
    }

    #[test]
    fn typing_is_not_tracked_while_disconnected() {
        let transport = FakeTransport::disconnected();
        let mut conv = ready(&transport);

        conv.input_changed("abc", &*transport, Instant::now());
        assert_eq!(conv.draft(), "abc");
        assert_eq!(conv.typing_deadline(), None);
    }

    #[test]
    fn connection_events_toggle_error_and_rejoin() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        conv.handle_typing(&TypingEvent {
            conversation_id: "c1".into(),
            typing: true,
        });
        transport.clear_intents();

        let lost = ConnectionEvent::Disconnected {
            reason: "reset".into(),
        };
        assert!(conv.handle_connection_event(&lost, &*transport));
        assert!(conv.connection_error());
        assert!(!conv.peer_typing());

        assert!(conv.handle_connection_event(&ConnectionEvent::Reconnected, &*transport));
        assert!(!conv.connection_error());
        assert_eq!(transport.intents(), vec![Intent::Join("c1".into())]);
    }

    #[test]
    fn close_leaves_and_ignores_later_events() {
        let transport = FakeTransport::connected();
        let mut conv = ready(&transport);
        conv.handle_message(doc("m1", "c1", "one", "peer"), &*transport);
        conv.input_changed("typing", &*transport, Instant::now());
        transport.clear_intents();

        conv.close(&*transport);
        assert_eq!(conv.phase(), Phase::Closed);
        assert_eq!(
            transport.intents(),
            vec![Intent::Leave("c1".into()), Intent::TypingStop("c1".into())]
        );
        assert_eq!(conv.typing_deadline(), None);

        let before = conv.snapshot();
        assert_eq!(conv.handle_message(doc("m2", "c1", "late", "peer"), &*transport), Applied::Ignored);
        conv.handle_typing(&TypingEvent {
            conversation_id: "c1".into(),
            typing: true,
        });
        conv.handle_read_receipt("c1");
        conv.history_loaded(vec![doc("h1", "c1", "late history", "peer")]);
        assert_eq!(conv.snapshot(), before);

        conv.close(&*transport);
        assert_eq!(transport.count(|i| matches!(i, Intent::Leave(_))), 1);
    }
}
