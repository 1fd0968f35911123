//! teloxide types → core domain types.

use teloxide::types::{
    Chat, ChatMember, ChatMemberStatus, Message, Update as TgUpdate, UpdateKind as TgUpdateKind,
    User,
};

use tgze_core::domain::{
    ChatId, ChatInfo, ChatKind, ChatMemberInfo, IncomingMessage, MembershipChange, MessageId,
    Update, UpdateKind, UserId, UserInfo,
};

pub fn update(u: TgUpdate) -> Update {
    let kind = match u.kind {
        TgUpdateKind::Message(m) => UpdateKind::Message(message(&m)),
        TgUpdateKind::EditedMessage(m) => UpdateKind::EditedMessage(message(&m)),
        TgUpdateKind::ChannelPost(m) => UpdateKind::ChannelPost(message(&m)),
        TgUpdateKind::EditedChannelPost(m) => UpdateKind::EditedChannelPost(message(&m)),
        TgUpdateKind::MyChatMember(c) => UpdateKind::MembershipChange(MembershipChange {
            from: user(&c.from),
            chat: chat(&c.chat),
            old_member: member(&c.old_chat_member),
            new_member: member(&c.new_chat_member),
        }),
        TgUpdateKind::Error(raw) => UpdateKind::Unsupported {
            raw: serde_json::to_string_pretty(&raw).unwrap_or_else(|_| raw.to_string()),
        },
        other => UpdateKind::Unsupported {
            raw: format!("{other:#?}"),
        },
    };
    Update {
        id: i64::from(u.id),
        kind,
    }
}

pub fn message(m: &Message) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(m.id.0),
        chat: chat(&m.chat),
        from: m.from().map(user),
        text: m.text().unwrap_or_default().to_string(),
    }
}

pub fn chat(c: &Chat) -> ChatInfo {
    let kind = if c.is_channel() {
        ChatKind::Channel
    } else if c.is_supergroup() {
        ChatKind::Supergroup
    } else if c.is_group() {
        ChatKind::Group
    } else {
        ChatKind::Private
    };
    ChatInfo {
        id: ChatId(c.id.0),
        kind,
        title: c.title().map(str::to_string),
        username: c.username().map(str::to_string),
        invite_link: c.invite_link().map(str::to_string),
    }
}

pub fn user(u: &User) -> UserInfo {
    UserInfo {
        id: UserId(u.id.0 as i64),
        username: u.username.clone(),
    }
}

pub fn member(m: &ChatMember) -> ChatMemberInfo {
    // Bot API status names.
    let status = match m.kind.status() {
        ChatMemberStatus::Owner => "creator",
        ChatMemberStatus::Administrator => "administrator",
        ChatMemberStatus::Member => "member",
        ChatMemberStatus::Restricted => "restricted",
        ChatMemberStatus::Left => "left",
        ChatMemberStatus::Banned => "kicked",
    };
    ChatMemberInfo {
        user: user(&m.user),
        status: status.to_string(),
    }
}
