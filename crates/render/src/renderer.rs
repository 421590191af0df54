//! Produces the `summary` (markdown) and `objective` (natural language)
//! views of an enriched message, and renders poke notices the same way.

use crate::cache::{InfoCache, InfoKind};
use crate::rules::{
    format_file_size, format_identity, format_sender_display, format_time_str, normalize_media_url,
};
use broker_core::model::{ConversationKind, PokeNotice, SenderRole};
use broker_core::segment::{CardData, FileData, ForwardNode, ImageData, MediaData, ShareData};
use broker_core::{FormattedMessage, Segment};
use enrich::UpstreamCaller;
use serde_json::Value;
use std::sync::Arc;

pub struct Renderer {
    upstream: Arc<dyn UpstreamCaller>,
    cache: InfoCache,
}

/// Raw fields for a `notify`/`poke` notice; the renderer fills in display
/// names and both text views.
pub struct PokeInput {
    pub time: i64,
    pub self_id: i64,
    pub sender_id: i64,
    pub target_id: i64,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
}

impl Renderer {
    pub fn new(upstream: Arc<dyn UpstreamCaller>) -> Self {
        Self {
            upstream,
            cache: InfoCache::default(),
        }
    }

    async fn resolve_name(&self, kind: ConversationKind, group_id: Option<i64>, id: i64) -> String {
        let info_kind = match (kind, group_id) {
            (ConversationKind::Group, Some(g)) => InfoKind::GroupMember(g),
            _ => InfoKind::Stranger,
        };
        let upstream = self.upstream.clone();
        self.cache
            .get_or_fetch(info_kind, id, || async move {
                let (action, params) = match info_kind {
                    InfoKind::GroupMember(g) => (
                        "get_group_member_info",
                        serde_json::json!({"group_id": g, "user_id": id}),
                    ),
                    InfoKind::Stranger => ("get_stranger_info", serde_json::json!({"user_id": id})),
                };
                match upstream.call(action, params, None).await {
                    Ok(resp) => resp
                        .data
                        .as_ref()
                        .and_then(|d| d.get("card").filter(|v| v.as_str() != Some("")).or_else(|| d.get("nickname")))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| id.to_string()),
                    Err(_) => id.to_string(),
                }
            })
            .await
    }

    /// Fills in `summary` and `objective` on an already-enriched message.
    pub async fn render(&self, msg: &mut FormattedMessage) {
        if msg.sender_name.is_empty() {
            msg.sender_name = self.resolve_name(msg.kind, msg.group_id, msg.sender_id).await;
        }
        msg.summary = render_summary(msg);
        msg.objective = render_objective(msg);
    }

    pub async fn format_poke(&self, input: PokeInput) -> PokeNotice {
        let kind = if input.group_id.is_some() {
            ConversationKind::Group
        } else {
            ConversationKind::Private
        };
        let sender_name = self.resolve_name(kind, input.group_id, input.sender_id).await;
        let target_name = self.resolve_name(kind, input.group_id, input.target_id).await;

        let mut notice = PokeNotice {
            event_type: "poke".to_string(),
            message_id: 0,
            time: input.time,
            time_str: format_time_str(input.time),
            kind,
            self_id: input.self_id,
            sender_id: input.sender_id,
            sender_name,
            group_id: input.group_id,
            group_name: input.group_name,
            target_id: input.target_id,
            target_name,
            summary: String::new(),
            objective: String::new(),
        };
        notice.summary = render_poke_summary(&notice);
        notice.objective = render_poke_objective(&notice, input.self_id);
        notice
    }
}

fn render_summary(msg: &FormattedMessage) -> String {
    let conv_id = match msg.kind {
        ConversationKind::Group => format!("G:{}", msg.group_id.unwrap_or_default()),
        ConversationKind::Private => format!("P:{}", msg.sender_id),
    };
    let chat_type = match msg.kind {
        ConversationKind::Group => "群聊",
        ConversationKind::Private => "私聊",
    };
    let sender_display = format_sender_display(
        &msg.sender_name,
        msg.sender_card.as_deref(),
        msg.sender_role,
        msg.sender_id,
        msg.kind == ConversationKind::Group,
    );

    let mut header = format!("消息ID: {} | 会话: {conv_id} | {chat_type}", msg.message_id);
    if msg.kind == ConversationKind::Group {
        if let Some(name) = &msg.group_name {
            header.push_str(&format!(" | {name}({})", msg.group_id.unwrap_or_default()));
        }
    }
    header.push_str(&format!(" | 发送者: {sender_display}"));

    let mut blocks = vec![header];
    if !msg.text.is_empty() {
        blocks.push(msg.text.clone());
    }
    for img in &msg.media.images {
        if let Segment::Image(data) = img {
            blocks.push(render_image_line(data));
        }
    }
    for video in &msg.media.videos {
        if let Segment::Video(data) = video {
            blocks.push(format!("[video]({})", media_ref(data.path.as_deref(), data.url.as_deref())));
        }
    }
    for record in &msg.media.records {
        if let Segment::Record(data) = record {
            blocks.push(format!("[record]({})", media_ref(data.path.as_deref(), data.url.as_deref())));
        }
    }
    for file in &msg.media.files {
        if let Segment::File(data) = file {
            blocks.push(render_file_line(data));
        }
    }
    for card in &msg.media.cards {
        blocks.push(render_card_line(card));
    }
    for forward in &msg.media.forwards {
        if let Segment::Forward(data) = forward {
            if let Some(nodes) = &data.nodes {
                blocks.push(render_forward_block(nodes));
            }
        }
    }
    if let Some(reply) = &msg.reply {
        blocks.push(format!("> 回复 {}: {}", reply.sender_name.as_deref().unwrap_or("?"), reply.text));
    }

    blocks.join("\n\n")
}

fn media_ref(path: Option<&str>, url: Option<&str>) -> String {
    normalize_media_url(path, url).unwrap_or_else(|| "未知来源".to_string())
}

fn render_image_line(data: &ImageData) -> String {
    format!(
        "![{}]({})",
        data.summary.as_deref().unwrap_or("image"),
        media_ref(data.path.as_deref(), data.url.as_deref())
    )
}

fn render_file_line(data: &FileData) -> String {
    format!(
        "[{}]({}) ({})",
        data.file,
        media_ref(data.path.as_deref(), data.url.as_deref()),
        format_file_size(data.file_size)
    )
}

fn render_card_line(seg: &Segment) -> String {
    match seg {
        Segment::Share(ShareData { url, title, .. }) => {
            format!("[share] {} - {url}", title.as_deref().unwrap_or(url))
        }
        Segment::Json(CardData { raw }) => format!("[json] {raw}"),
        Segment::Xml(CardData { raw }) => format!("[xml] {raw}"),
        Segment::App(CardData { raw }) => format!("[app] {raw}"),
        _ => String::new(),
    }
}

fn render_forward_block(nodes: &[ForwardNode]) -> String {
    let total = nodes.len();
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let sender = node.sender_name.as_deref().unwrap_or("未知");
            let text = broker_core::model::concat_text(&node.segments);
            format!("[{}/{total}] {sender}: {text}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_objective(msg: &FormattedMessage) -> String {
    let sender_display = format_sender_display(
        &msg.sender_name,
        msg.sender_card.as_deref(),
        msg.sender_role,
        msg.sender_id,
        msg.kind == ConversationKind::Group,
    );
    let scene = match msg.kind {
        ConversationKind::Group => {
            let name = msg
                .group_name
                .clone()
                .unwrap_or_else(|| msg.group_id.unwrap_or_default().to_string());
            format!("在群聊「{name}」里")
        }
        ConversationKind::Private => "在私聊里".to_string(),
    };

    let mut sentence = format!("{scene}，{sender_display}，说：\"{}\"", msg.text);

    let media_count = msg.media.images.len()
        + msg.media.videos.len()
        + msg.media.records.len()
        + msg.media.files.len()
        + msg.media.cards.len();
    if media_count > 0 {
        sentence.push_str(&format!("，并附带了{media_count}项媒体内容"));
    }
    if !msg.media.forwards.is_empty() {
        sentence.push_str("，转发了一段聊天记录");
    }
    if let Some(reply) = &msg.reply {
        let quoted: String = reply.text.chars().take(30).collect();
        sentence.push_str(&format!("，这是在回复「{quoted}」的消息"));
    }
    sentence
}

fn render_poke_summary(notice: &PokeNotice) -> String {
    let conv = match notice.kind {
        ConversationKind::Group => format!("G:{}", notice.group_id.unwrap_or_default()),
        ConversationKind::Private => format!("P:{}", notice.sender_id),
    };
    format!(
        "消息ID: {} | 会话: {conv} | 戳一戳 | {} -> {}",
        notice.message_id, notice.sender_name, notice.target_name
    )
}

fn render_poke_objective(notice: &PokeNotice, self_id: i64) -> String {
    let scene = match notice.kind {
        ConversationKind::Group => {
            let name = notice
                .group_name
                .clone()
                .unwrap_or_else(|| notice.group_id.unwrap_or_default().to_string());
            format!("在群聊「{name}」里")
        }
        ConversationKind::Private => "在私聊里".to_string(),
    };
    let sender = format_identity(&notice.sender_name, notice.sender_id, self_id);
    let target = format_identity(&notice.target_name, notice.target_id, self_id);
    format!("{scene}，{sender} 戳了戳 {target}")
}
