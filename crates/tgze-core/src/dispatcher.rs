//! Poll cycle: dedup against the ledger, persist, classify and dispatch.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    commands::CommandTable,
    config::Settings,
    domain::{ChatId, ChatKind, IncomingMessage, MembershipChange, Update, UpdateKind, UserInfo},
    errors::Error,
    formatting::{code, escape_html},
    ports::ChatTransport,
    relay::MediaRelay,
    state::AppState,
    store::DocumentStore,
    Result,
};

/// Counters for one poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
}

pub struct UpdateDispatcher {
    state: AppState,
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn ChatTransport>,
    relay: MediaRelay,
    commands: CommandTable,
    /// Text of the previous message in the current batch.
    previous_text: Option<String>,
}

impl UpdateDispatcher {
    pub fn new(
        state: AppState,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn ChatTransport>,
        relay: MediaRelay,
        commands: CommandTable,
    ) -> Self {
        Self {
            state,
            store,
            transport,
            relay,
            commands,
            previous_text: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn operator(&self) -> ChatId {
        ChatId(self.state.settings.tg_operator_chat_id)
    }

    /// One poll → process-all cycle.
    ///
    /// A poll failure ends the cycle untouched. A ledger persist failure
    /// halts the rest of the batch with `Error::LedgerPersist`.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let offset = self.state.ledger.next_offset();
        let updates = self.transport.get_updates(offset).await?;
        let mut report = CycleReport {
            received: updates.len(),
            ..CycleReport::default()
        };
        if !updates.is_empty() {
            debug!(offset, count = updates.len(), "updates received");
        }

        self.previous_text = None;
        for update in updates {
            if self.state.ledger.contains(update.id) {
                warn!(update = update.id, "update already processed, skipping");
                report.duplicates += 1;
                continue;
            }

            self.state.ledger.record(update.id);
            self.persist()
                .await
                .map_err(|e| Error::LedgerPersist(format!("update {}: {e}", update.id)))?;

            info!(update = update.id, "processing update");
            self.dispatch(update).await;
            report.processed += 1;
        }
        Ok(report)
    }

    async fn persist(&self) -> Result<()> {
        self.store.put(&self.state.to_document()).await
    }

    async fn persist_registry(&self) {
        if let Err(e) = self.persist().await {
            error!("persist channel registry: {e}");
        }
    }

    async fn dispatch(&mut self, update: Update) {
        let (msg, edited, channel_post) = match update.kind {
            UpdateKind::Message(m) => (m, false, false),
            UpdateKind::EditedMessage(m) => (m, true, false),
            UpdateKind::ChannelPost(m) => (m, false, true),
            UpdateKind::EditedChannelPost(m) => (m, true, true),
            UpdateKind::MembershipChange(change) => {
                let html = membership_report(&change);
                if let Err(e) = self.transport.send_html(self.operator(), &html, None).await {
                    warn!(update = update.id, "send membership report: {e}");
                }
                return;
            }
            UpdateKind::Unsupported { raw } => {
                warn!(update = update.id, "unsupported update type");
                let html = format!(
                    "{}\n<pre>{}</pre>",
                    escape_html(&format!(
                        "unsupported type of update (id:{}) received:",
                        update.id
                    )),
                    escape_html(&raw)
                );
                if let Err(e) = self.transport.send_html(self.operator(), &html, None).await {
                    warn!(update = update.id, "forward unsupported update: {e}");
                }
                return;
            }
        };

        let channel_post = channel_post || msg.chat.kind == ChatKind::Channel;
        if channel_post && self.state.channels.insert(msg.chat.id) {
            info!(chat = msg.chat.id.0, "new channel registered");
            self.persist_registry().await;
        }

        info!(
            from = msg.from.as_ref().and_then(|u| u.username.as_deref()).unwrap_or(""),
            chat = msg.chat.username.as_deref().unwrap_or(""),
            text = %msg.text,
            "telegram message"
        );
        if msg.text.is_empty() {
            return;
        }

        if !self.report_to_operator(&msg, edited).await {
            return;
        }

        if self
            .commands
            .run(&msg, self.transport.as_ref(), &mut self.state.channels)
            .await
        {
            self.persist_registry().await;
        }

        let previous = self.previous_text.replace(msg.text.clone());
        if let Err(e) = self
            .relay
            .handle(&msg, channel_post, previous.as_deref())
            .await
        {
            warn!(chat = msg.chat.id.0, "report relay failure: {e}");
        }
    }

    /// Returns `false` when a due report could not be sent.
    async fn report_to_operator(&self, msg: &IncomingMessage, edited: bool) -> bool {
        let operator = self.operator();
        let mut should_report = msg.from.as_ref().map(|u| u.id.0) != Some(operator.0);

        let mut admins = Vec::new();
        match self.transport.get_chat_administrators(msg.chat.id).await {
            Ok(list) => {
                for a in list {
                    if a.user.id.0 == operator.0 {
                        should_report = false;
                    }
                    admins.push(format!(
                        "username:@{} id:{} status:{}",
                        a.user.username.unwrap_or_default(),
                        a.user.id.0,
                        a.status
                    ));
                }
            }
            Err(e) => warn!(chat = msg.chat.id.0, "get chat administrators: {e}"),
        }

        if !should_report {
            return true;
        }

        let html = format!(
            "<b>Message</b>\nfrom: {}\nchat: id:{} username:@{} type:{} title:{}\nchat admins: {}\nedited: {}\ntext:\n<pre>{}</pre>",
            user_line(msg.from.as_ref()),
            msg.chat.id.0,
            escape_html(msg.chat.username.as_deref().unwrap_or("")),
            msg.chat.kind.as_str(),
            escape_html(msg.chat.title.as_deref().unwrap_or("")),
            escape_html(&admins.join("  ")),
            edited,
            escape_html(&msg.text),
        );
        match self.transport.send_html(operator, &html, None).await {
            Ok(_) => true,
            Err(e) => {
                warn!(chat = msg.chat.id.0, "send operator report: {e}");
                false
            }
        }
    }
}

fn user_line(user: Option<&UserInfo>) -> String {
    match user {
        Some(u) => format!(
            "username:@{} id:{}",
            escape_html(u.username.as_deref().unwrap_or("")),
            code(&u.id.0.to_string())
        ),
        None => "-".to_string(),
    }
}

fn membership_report(change: &MembershipChange) -> String {
    let member = |label: &str, m: &crate::domain::ChatMemberInfo| {
        format!(
            "{label}:\n  username: @{}\n  id: {}\n  status: {}",
            escape_html(m.user.username.as_deref().unwrap_or("")),
            code(&m.user.id.0.to_string()),
            escape_html(&m.status)
        )
    };
    format!(
        "<b>MyChatMemberUpdated</b>\nfrom:\n  username: @{}\n  id: {}\nchat:\n  id: {}\n  username: @{}\n  type: {}\n  title: {}\n{}\n{}",
        escape_html(change.from.username.as_deref().unwrap_or("")),
        code(&change.from.id.0.to_string()),
        code(&change.chat.id.0.to_string()),
        escape_html(change.chat.username.as_deref().unwrap_or("")),
        change.chat.kind.as_str(),
        escape_html(change.chat.title.as_deref().unwrap_or("")),
        member("old member", &change.old_member),
        member("new member", &change.new_member),
    )
}
