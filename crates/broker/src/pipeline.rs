//! Per-event composition: whitelist, drop policies, enrichment and
//! rendering, then broadcast. Grounded in the teacher's `mneme_gateway`
//! composition root, generalized from the teacher's persona/organism event
//! routing to this system's message/notice dispatch.

use broker_core::model::{concat_text, ConversationKind, MediaRefs, SenderRole};
use broker_core::{Envelope, PolicyConfig, Segment, Whitelist};
use enrich::Enricher;
use onebot::{MessageEvent, NoticeEvent, UpstreamEvent};
use render::rules::{is_animated_sticker_only, is_voice_only};
use render::{format_time_str, PokeInput, Renderer};
use std::sync::Arc;
use stream::StreamServer;

pub struct Broker {
    enricher: Enricher,
    renderer: Renderer,
    stream: Arc<StreamServer>,
    whitelist: Arc<Whitelist>,
    policy: PolicyConfig,
}

impl Broker {
    pub fn new(
        enricher: Enricher,
        renderer: Renderer,
        stream: Arc<StreamServer>,
        whitelist: Arc<Whitelist>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            enricher,
            renderer,
            stream,
            whitelist,
            policy,
        }
    }

    pub async fn handle_event(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Message(ev) => self.handle_message(ev).await,
            UpstreamEvent::Notice(ev) => self.handle_notice(ev).await,
            UpstreamEvent::Meta(_) => {}
            UpstreamEvent::Request(_) => {}
        }
    }

    async fn handle_message(&self, ev: MessageEvent) {
        let kind = if ev.message_type == "group" {
            ConversationKind::Group
        } else {
            ConversationKind::Private
        };
        let conversation_id = match kind {
            ConversationKind::Group => ev.group_id.unwrap_or_default(),
            ConversationKind::Private => ev.user_id,
        };

        if let Err(denial) = self.check_message_whitelist(kind, conversation_id) {
            if self.policy.log_filtered {
                tracing::info!("dropping message {}: {denial}", ev.message_id);
            }
            return;
        }

        let has_reply = ev.message.iter().any(|s| matches!(s, Segment::Reply(_)));
        let text = concat_text(&ev.message);

        if self.policy.skip_voice && is_voice_only(has_reply, &text, &ev.message) {
            if self.policy.log_filtered {
                tracing::debug!("dropping voice-only message {}", ev.message_id);
            }
            return;
        }

        let raw = self.policy.include_raw.then(|| serde_json::to_value(&ev).unwrap_or_default());

        let mut segments = ev.message;
        self.enricher.enrich(kind, conversation_id, &mut segments).await;

        let reply_id = segments.iter().find_map(|s| match s {
            Segment::Reply(r) => Some(r.id.clone()),
            _ => None,
        });
        let reply = match reply_id {
            Some(id) => self.enricher.resolve_reply(kind, conversation_id, &id).await,
            None => None,
        };

        if self.policy.skip_animated_emoji && is_animated_sticker_only(has_reply, &text, &segments) {
            if self.policy.log_filtered {
                tracing::debug!("dropping animated-sticker-only message {}", ev.message_id);
            }
            return;
        }

        let mut msg = broker_core::FormattedMessage {
            message_id: ev.message_id,
            time: ev.time,
            time_str: format_time_str(ev.time),
            kind,
            self_id: ev.self_id,
            sender_id: ev.user_id,
            sender_name: ev.sender.nickname.clone().unwrap_or_default(),
            sender_card: ev.sender.card.clone(),
            sender_role: ev.sender.role.as_deref().and_then(SenderRole::parse),
            group_id: ev.group_id,
            group_name: ev.group_name,
            text,
            media: MediaRefs::derive(&segments),
            segments,
            reply,
            summary: String::new(),
            objective: String::new(),
            raw,
        };

        self.renderer.render(&mut msg).await;
        self.stream
            .broadcast(Envelope::Message { data: broker_core::MessagePayload::Formatted(msg) });
    }

    async fn handle_notice(&self, ev: NoticeEvent) {
        if ev.notice_type != "notify" || ev.sub_type.as_deref() != Some("poke") {
            return;
        }
        let kind = if ev.group_id.is_some() {
            ConversationKind::Group
        } else {
            ConversationKind::Private
        };
        let sender_id = ev.user_id.unwrap_or_default();
        let target_id = ev.target_id.unwrap_or_default();

        if let Err(denial) = self.check_poke_whitelist(kind, ev.group_id, sender_id) {
            if self.policy.log_filtered {
                tracing::info!("dropping poke notice: {denial}");
            }
            return;
        }

        // A bot poking a non-self target in a private chat is noise (the
        // user almost certainly triggered it themselves); self-poking self
        // still broadcasts.
        if kind == ConversationKind::Private && sender_id == ev.self_id && target_id != ev.self_id {
            return;
        }

        let notice = self
            .renderer
            .format_poke(PokeInput {
                time: ev.time,
                self_id: ev.self_id,
                sender_id,
                target_id,
                group_id: ev.group_id,
                group_name: None,
            })
            .await;
        self.stream
            .broadcast(Envelope::Message { data: broker_core::MessagePayload::Poke(notice) });
    }

    fn check_message_whitelist(&self, kind: ConversationKind, conversation_id: i64) -> Result<(), String> {
        match kind {
            ConversationKind::Group => self.whitelist.check_group(conversation_id).map_err(|e| e.to_string()),
            ConversationKind::Private => self.whitelist.check_user(conversation_id).map_err(|e| e.to_string()),
        }
    }

    fn check_poke_whitelist(
        &self,
        kind: ConversationKind,
        group_id: Option<i64>,
        sender_id: i64,
    ) -> Result<(), String> {
        if kind == ConversationKind::Group {
            if let Some(g) = group_id {
                self.whitelist.check_group(g).map_err(|e| e.to_string())?;
            }
        }
        self.whitelist.check_user(sender_id).map_err(|e| e.to_string())
    }
}
