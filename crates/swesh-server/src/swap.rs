//! Orchestration of the swap lifecycle.
//!
//! [`SwapService`] runs store operations and publishes the resulting
//! events through the injected [`Notifier`].  Persistence happens first,
//! inside the store's transactions; events are derived from the returned
//! reports after commit, so a dropped event can never contradict stored
//! state.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use swesh_core::events::MessagePayload;
use swesh_core::{chat_room, user_room, InteractionAction, RealtimeEvent};
use swesh_store::{
    ArchivedMatchNote, CompletionReport, ConfirmOutcome, Database, InteractionOutcome, Item,
    ItemDeletionReport, Match, MatchFormation, MatchSummary, Message, NewItem, Proposal,
    SendOutcome, StoreError, User,
};

use crate::notifier::Notifier;

/// Result of a proposal submission, mirrored by `POST /proposals`.
pub enum ProposalOutcome {
    Pending(Proposal),
    Matched(MatchFormation),
}

pub struct SwapService {
    db: Arc<Mutex<Database>>,
    notifier: Arc<dyn Notifier>,
    daily_proposal_limit: u32,
}

impl SwapService {
    pub fn new(
        db: Arc<Mutex<Database>>,
        notifier: Arc<dyn Notifier>,
        daily_proposal_limit: u32,
    ) -> Self {
        Self {
            db,
            notifier,
            daily_proposal_limit,
        }
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn create_user(
        &self,
        nickname: &str,
        avatar: Option<&str>,
    ) -> Result<User, StoreError> {
        self.db.lock().await.create_user(nickname, avatar)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.db.lock().await.get_user(id)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub async fn create_item(&self, owner: Uuid, new: NewItem) -> Result<Item, StoreError> {
        self.db.lock().await.create_item(owner, new)
    }

    pub async fn get_item(&self, id: Uuid) -> Result<Item, StoreError> {
        self.db.lock().await.get_item(id)
    }

    pub async fn list_feed(&self, user: Uuid) -> Result<Vec<Item>, StoreError> {
        self.db.lock().await.list_feed(user)
    }

    pub async fn list_user_items(&self, owner: Uuid) -> Result<Vec<Item>, StoreError> {
        self.db.lock().await.list_user_items(owner)
    }

    /// Delete an item; affected participants learn through
    /// `match_archived` events.
    pub async fn delete_item(
        &self,
        item_id: Uuid,
        acting_user: Uuid,
    ) -> Result<ItemDeletionReport, StoreError> {
        let report = self.db.lock().await.delete_item(item_id, acting_user)?;
        for note in &report.archived {
            self.publish_archived(note);
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Proposals & interactions
    // ------------------------------------------------------------------

    /// Admit against the daily ceiling, record the proposal, then try to
    /// resolve it against its reciprocal.
    pub async fn submit_proposal(
        &self,
        proposer: Uuid,
        target_item_id: Uuid,
        offered_item_id: Uuid,
    ) -> Result<ProposalOutcome, StoreError> {
        let outcome = {
            let mut db = self.db.lock().await;
            db.admit_proposal(proposer, self.daily_proposal_limit)?;
            let proposal = db.submit_proposal(proposer, target_item_id, offered_item_id)?;
            match db.resolve_proposal_match(&proposal)? {
                Some(formation) => ProposalOutcome::Matched(formation),
                None => ProposalOutcome::Pending(proposal),
            }
        };

        if let ProposalOutcome::Matched(formation) = &outcome {
            self.publish_new_match(formation);
        }
        Ok(outcome)
    }

    pub async fn record_interaction(
        &self,
        user: Uuid,
        item_id: Uuid,
        action: InteractionAction,
    ) -> Result<InteractionOutcome, StoreError> {
        let outcome = self
            .db
            .lock()
            .await
            .record_interaction(user, item_id, action)?;

        if let Some(formation) = &outcome.match_formed {
            self.publish_new_match(formation);
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Matches & the exchange handshake
    // ------------------------------------------------------------------

    pub async fn list_matches(&self, user: Uuid) -> Result<Vec<MatchSummary>, StoreError> {
        self.db.lock().await.list_matches(user)
    }

    pub async fn confirm_exchange(
        &self,
        match_id: Uuid,
        acting_user: Uuid,
    ) -> Result<ConfirmOutcome, StoreError> {
        let outcome = self.db.lock().await.confirm_exchange(match_id, acting_user)?;

        self.notifier.publish(
            &chat_room(match_id),
            &RealtimeEvent::ExchangeStatus {
                match_id,
                status: outcome.status,
                confirmation: outcome.confirmation.clone(),
            },
        );

        if let Some(report) = &outcome.completion {
            self.publish_completion(report);
        }
        Ok(outcome)
    }

    pub async fn cancel_match(
        &self,
        match_id: Uuid,
        acting_user: Uuid,
        reason: Option<&str>,
    ) -> Result<Match, StoreError> {
        let cancelled = self
            .db
            .lock()
            .await
            .cancel_match(match_id, acting_user, reason)?;

        self.notifier.publish(
            &chat_room(match_id),
            &RealtimeEvent::ExchangeStatus {
                match_id,
                status: cancelled.status,
                confirmation: cancelled.confirmation.clone(),
            },
        );
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    pub async fn list_messages(
        &self,
        match_id: Uuid,
        caller: Uuid,
        limit: u32,
    ) -> Result<(Vec<Message>, Match), StoreError> {
        self.db.lock().await.list_messages(match_id, caller, limit)
    }

    pub async fn send_message(
        &self,
        match_id: Uuid,
        sender: Uuid,
        content: &str,
    ) -> Result<SendOutcome, StoreError> {
        let outcome = self.db.lock().await.send_message(match_id, sender, content)?;

        self.notifier.publish(
            &chat_room(match_id),
            &RealtimeEvent::NewMessage {
                match_id,
                message: message_payload(&outcome.message),
            },
        );
        self.notifier.publish(
            &user_room(outcome.recipient_id),
            &RealtimeEvent::NewMessageNotification {
                match_id,
                chat_id: outcome.message.chat_id,
                sender_nickname: outcome.sender_nickname.clone(),
                preview: preview_of(&outcome.message.content),
            },
        );
        Ok(outcome)
    }

    /// Relay a typing indicator; nothing is persisted.
    pub async fn typing(&self, match_id: Uuid, user: Uuid) -> Result<(), StoreError> {
        self.assert_participant(match_id, user).await?;
        self.notifier.publish(
            &chat_room(match_id),
            &RealtimeEvent::UserTyping { match_id, user_id: user },
        );
        Ok(())
    }

    /// Resolve the chat room name for a participant, rejecting outsiders.
    pub async fn chat_room_for(&self, match_id: Uuid, user: Uuid) -> Result<String, StoreError> {
        self.assert_participant(match_id, user).await?;
        Ok(chat_room(match_id))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub async fn expire_stale_proposals(&self, older_than_days: i64) -> Result<usize, StoreError> {
        self.db.lock().await.expire_stale_proposals(older_than_days)
    }

    // ------------------------------------------------------------------
    // Event fan-out
    // ------------------------------------------------------------------

    async fn assert_participant(&self, match_id: Uuid, user: Uuid) -> Result<(), StoreError> {
        let m = self.db.lock().await.get_match(match_id)?;
        if !m.has_participant(user) {
            return Err(StoreError::NotParticipant);
        }
        Ok(())
    }

    fn publish_new_match(&self, formation: &MatchFormation) {
        for user in [formation.user_a, formation.user_b] {
            self.notifier.publish(
                &user_room(user),
                &RealtimeEvent::NewMatch {
                    match_id: formation.match_id,
                    chat_id: formation.chat_id,
                    match_type: formation.match_type,
                },
            );
        }
    }

    fn publish_archived(&self, note: &ArchivedMatchNote) {
        for user in [note.user_a, note.user_b] {
            self.notifier.publish(
                &user_room(user),
                &RealtimeEvent::MatchArchived {
                    match_id: note.match_id,
                    reason: note.reason,
                    related_match_id: note.related_match_id,
                    item_title: note.item_title.clone(),
                },
            );
        }
    }

    fn publish_completion(&self, report: &CompletionReport) {
        for side in &report.sides {
            self.notifier.publish(
                &user_room(side.user_id),
                &RealtimeEvent::ExchangeCompleted {
                    match_id: report.match_id,
                    my_item_title: side.my_item_title.clone(),
                    their_item_title: side.their_item_title.clone(),
                    other_user_nickname: side.other_user_nickname.clone(),
                },
            );
        }
        for note in &report.archived {
            self.publish_archived(note);
        }
    }
}

fn message_payload(message: &Message) -> MessagePayload {
    MessagePayload {
        id: message.id,
        chat_id: message.chat_id,
        sender_id: message.sender_id,
        content: message.content.clone(),
        is_system: message.is_system,
        created_at: message.created_at,
    }
}

/// First characters of a message for the out-of-band notification.
fn preview_of(content: &str) -> String {
    const PREVIEW_CHARS: usize = 80;
    content.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RealtimeHub;
    use swesh_core::{ItemCategory, ItemCondition, ItemSize};

    struct Fixture {
        _dir: tempfile::TempDir,
        service: SwapService,
        hub: Arc<RealtimeHub>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("svc.db")).unwrap();
        let hub = Arc::new(RealtimeHub::default());
        let service = SwapService::new(Arc::new(Mutex::new(db)), hub.clone(), 50);
        Fixture {
            _dir: dir,
            service,
            hub,
        }
    }

    fn new_item(title: &str) -> NewItem {
        NewItem {
            title: title.to_string(),
            description: String::new(),
            images: Vec::new(),
            size: ItemSize::L,
            category: ItemCategory::Shoes,
            condition: ItemCondition::LikeNew,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_publishes_the_expected_events() {
        let fx = fixture();
        let svc = &fx.service;

        let alice = svc.create_user("alice", None).await.unwrap();
        let bob = svc.create_user("bob", None).await.unwrap();
        let jacket = svc.create_item(alice.id, new_item("Jacket")).await.unwrap();
        let boots = svc.create_item(bob.id, new_item("Boots")).await.unwrap();

        let mut alice_events = fx.hub.subscribe(&user_room(alice.id));
        let mut bob_events = fx.hub.subscribe(&user_room(bob.id));

        // Pending first, matched second.
        let outcome = svc
            .submit_proposal(alice.id, boots.id, jacket.id)
            .await
            .unwrap();
        assert!(matches!(outcome, ProposalOutcome::Pending(_)));

        let outcome = svc
            .submit_proposal(bob.id, jacket.id, boots.id)
            .await
            .unwrap();
        let formation = match outcome {
            ProposalOutcome::Matched(f) => f,
            ProposalOutcome::Pending(_) => panic!("reciprocal proposal must match"),
        };

        for rx in [&mut alice_events, &mut bob_events] {
            let payload = rx.recv().await.unwrap();
            assert!(payload.contains("new_match"));
        }

        // Chat events flow to the chat room and the recipient's user room.
        let mut chat_events = fx.hub.subscribe(&chat_room(formation.match_id));
        svc.send_message(formation.match_id, alice.id, "hi bob")
            .await
            .unwrap();
        assert!(chat_events.recv().await.unwrap().contains("new_message"));
        assert!(bob_events
            .recv()
            .await
            .unwrap()
            .contains("new_message_notification"));

        // Confirmations: one exchange_status each, then completion events.
        svc.confirm_exchange(formation.match_id, alice.id)
            .await
            .unwrap();
        assert!(chat_events.recv().await.unwrap().contains("exchange_status"));

        svc.confirm_exchange(formation.match_id, bob.id)
            .await
            .unwrap();
        assert!(chat_events.recv().await.unwrap().contains("exchange_status"));

        let completed = alice_events.recv().await.unwrap();
        assert!(completed.contains("exchange_completed"));
        assert!(completed.contains("Jacket"));
        assert!(completed.contains("bob"));
    }

    #[tokio::test]
    async fn archival_notifies_both_affected_participants() {
        let fx = fixture();
        let svc = &fx.service;

        let alice = svc.create_user("alice", None).await.unwrap();
        let bob = svc.create_user("bob", None).await.unwrap();
        let carol = svc.create_user("carol", None).await.unwrap();
        let jacket = svc.create_item(alice.id, new_item("Jacket")).await.unwrap();
        let boots = svc.create_item(bob.id, new_item("Boots")).await.unwrap();
        let coat = svc.create_item(carol.id, new_item("Coat")).await.unwrap();

        // Two matches competing for the jacket.
        svc.submit_proposal(alice.id, boots.id, jacket.id)
            .await
            .unwrap();
        let first = match svc
            .submit_proposal(bob.id, jacket.id, boots.id)
            .await
            .unwrap()
        {
            ProposalOutcome::Matched(f) => f,
            ProposalOutcome::Pending(_) => panic!("expected a match"),
        };
        svc.submit_proposal(alice.id, coat.id, jacket.id)
            .await
            .unwrap();
        match svc
            .submit_proposal(carol.id, jacket.id, coat.id)
            .await
            .unwrap()
        {
            ProposalOutcome::Matched(_) => {}
            ProposalOutcome::Pending(_) => panic!("expected a match"),
        }

        let mut carol_events = fx.hub.subscribe(&user_room(carol.id));

        svc.confirm_exchange(first.match_id, alice.id).await.unwrap();
        svc.confirm_exchange(first.match_id, bob.id).await.unwrap();

        let payload = carol_events.recv().await.unwrap();
        assert!(payload.contains("match_archived"));
        assert!(payload.contains("item_exchanged"));
        assert!(payload.contains("Jacket"));
    }

    #[tokio::test]
    async fn typing_requires_participation() {
        let fx = fixture();
        let svc = &fx.service;

        let alice = svc.create_user("alice", None).await.unwrap();
        let bob = svc.create_user("bob", None).await.unwrap();
        let mallory = svc.create_user("mallory", None).await.unwrap();
        let jacket = svc.create_item(alice.id, new_item("Jacket")).await.unwrap();
        let boots = svc.create_item(bob.id, new_item("Boots")).await.unwrap();

        svc.submit_proposal(alice.id, boots.id, jacket.id)
            .await
            .unwrap();
        let formation = match svc
            .submit_proposal(bob.id, jacket.id, boots.id)
            .await
            .unwrap()
        {
            ProposalOutcome::Matched(f) => f,
            ProposalOutcome::Pending(_) => panic!("expected a match"),
        };

        assert!(svc.typing(formation.match_id, alice.id).await.is_ok());
        assert!(matches!(
            svc.typing(formation.match_id, mallory.id).await,
            Err(StoreError::NotParticipant)
        ));
    }
}
