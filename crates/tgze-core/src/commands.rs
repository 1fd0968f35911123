//! Text commands answered directly by the relay.
//!
//! Triggers are compared against the trimmed message text; every matching
//! entry runs, in table order.

use tracing::{info, warn};

use crate::{
    config::Settings,
    domain::{ChatId, IncomingMessage},
    errors::Error,
    formatting::{code, escape_html},
    ports::ChatTransport,
    state::ChannelRegistry,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reply with the sender's username, user id and the chat id.
    Id,
    /// Post every registered channel, pruning the ones that are gone.
    ListChannels,
    /// Promote the sender to administrator in every registered channel.
    PromoteAdmin,
    /// Reply with a fixed key as inline code.
    Reveal(String),
}

#[derive(Clone, Debug, Default)]
pub struct CommandTable {
    entries: Vec<(String, Command)>,
}

impl CommandTable {
    pub fn new(entries: Vec<(String, Command)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(t, c)| (t.trim().to_string(), c))
            .filter(|(t, _)| !t.is_empty())
            .collect();
        Self { entries }
    }

    pub fn from_settings(s: &Settings) -> Self {
        Self::new(vec![
            ("/id".to_string(), Command::Id),
            (s.tg_command_channels.clone(), Command::ListChannels),
            (
                s.tg_command_channels_promote_admin.clone(),
                Command::PromoteAdmin,
            ),
            (s.tg_quest1.clone(), Command::Reveal(s.tg_quest1_key.clone())),
            (s.tg_quest2.clone(), Command::Reveal(s.tg_quest2_key.clone())),
            (s.tg_quest3.clone(), Command::Reveal(s.tg_quest3_key.clone())),
        ])
    }

    pub fn matching<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a Command> + 'a {
        let text = text.trim();
        self.entries
            .iter()
            .filter(move |(trigger, _)| trigger == text)
            .map(|(_, c)| c)
    }

    /// Run every command triggered by `msg`. Returns `true` when the
    /// registry changed and needs persisting.
    pub async fn run(
        &self,
        msg: &IncomingMessage,
        transport: &dyn ChatTransport,
        channels: &mut ChannelRegistry,
    ) -> bool {
        let mut changed = false;
        for cmd in self.matching(&msg.text) {
            info!(chat = msg.chat.id.0, command = ?cmd, "command");
            changed |= match cmd {
                Command::Id => {
                    reply_id(msg, transport).await;
                    false
                }
                Command::ListChannels => list_channels(msg, transport, channels).await,
                Command::PromoteAdmin => {
                    promote_admin(msg, transport, channels).await;
                    false
                }
                Command::Reveal(key) => {
                    send(transport, msg.chat.id, &code(key), None).await;
                    false
                }
            };
        }
        changed
    }
}

async fn send(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    html: &str,
    reply_to: Option<crate::domain::MessageId>,
) {
    if let Err(e) = transport.send_html(chat_id, html, reply_to).await {
        warn!(chat = chat_id.0, "send command reply: {e}");
    }
}

async fn reply_id(msg: &IncomingMessage, transport: &dyn ChatTransport) {
    let (username, user_id) = msg
        .from
        .as_ref()
        .map(|u| (u.username.clone().unwrap_or_default(), u.id.0))
        .unwrap_or_default();
    let html = format!(
        "username {}\nuser id {}\nchat id {}",
        code(&username),
        code(&user_id.to_string()),
        code(&msg.chat.id.0.to_string())
    );
    send(transport, msg.chat.id, &html, Some(msg.id)).await;
}

async fn list_channels(
    msg: &IncomingMessage,
    transport: &dyn ChatTransport,
    channels: &mut ChannelRegistry,
) -> bool {
    let ids: Vec<ChatId> = channels.iter().collect();
    let total = ids.len();
    let mut removed = 0;

    for id in ids {
        match transport.get_chat(id).await {
            Ok(chat) => {
                let mut line = chat.title.unwrap_or_default();
                if let Some(username) = chat.username.filter(|u| !u.is_empty()) {
                    line.push_str(&format!(" https://t.me/{username}"));
                } else if let Some(link) = chat.invite_link.filter(|l| !l.is_empty()) {
                    line.push(' ');
                    line.push_str(&link);
                }
                send(transport, msg.chat.id, &escape_html(&line), None).await;
            }
            Err(Error::NotFound(e)) => {
                info!(channel = id.0, "pruning channel: {e}");
                channels.remove(id);
                removed += 1;
            }
            Err(e) => {
                let text = format!("id:{} err:{e}", id.0);
                send(transport, msg.chat.id, &escape_html(&text), None).await;
            }
        }
    }

    let mut summary = format!("Total {total} channels.");
    if removed > 0 {
        summary.push_str(&format!("\nRemoved {removed} channels."));
    }
    send(transport, msg.chat.id, &escape_html(&summary), Some(msg.id)).await;
    removed > 0
}

async fn promote_admin(
    msg: &IncomingMessage,
    transport: &dyn ChatTransport,
    channels: &ChannelRegistry,
) {
    let total = channels.len();
    let mut ok = 0;
    match msg.from.as_ref() {
        Some(user) => {
            for id in channels.iter() {
                match transport.promote_chat_member(id, user.id).await {
                    Ok(()) => {
                        ok += 1;
                        info!(channel = id.0, user = user.id.0, "promoted");
                    }
                    Err(e) => warn!(channel = id.0, user = user.id.0, "promote: {e}"),
                }
            }
        }
        None => warn!(chat = msg.chat.id.0, "promote requested without a sender"),
    }
    let text = format!("ok for {ok} of total {total} channels.");
    send(transport, msg.chat.id, &escape_html(&text), Some(msg.id)).await;
}
