use crate::segment::Segment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Owner,
    Admin,
    Member,
}

impl SenderRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Projections over `segments` by kind. Authoritative source is always
/// `FormattedMessage::segments`; these fields MUST be re-derived from it
/// (see `MediaRefs::derive`), never hand-populated independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaRefs {
    pub images: Vec<Segment>,
    pub videos: Vec<Segment>,
    pub files: Vec<Segment>,
    pub records: Vec<Segment>,
    pub cards: Vec<Segment>,
    pub forwards: Vec<Segment>,
    pub faces: Vec<Segment>,
    pub at_users: Vec<i64>,
    pub at_all: bool,
}

impl MediaRefs {
    pub fn derive(segments: &[Segment]) -> Self {
        let mut refs = MediaRefs::default();
        for seg in segments {
            match seg {
                Segment::Image(_) => refs.images.push(seg.clone()),
                Segment::Video(_) => refs.videos.push(seg.clone()),
                Segment::File(_) => refs.files.push(seg.clone()),
                Segment::Record(_) => refs.records.push(seg.clone()),
                Segment::Share(_) | Segment::Json(_) | Segment::Xml(_) | Segment::App(_) => {
                    refs.cards.push(seg.clone())
                }
                Segment::Forward(_) => refs.forwards.push(seg.clone()),
                Segment::Face(_) => refs.faces.push(seg.clone()),
                Segment::At(at) => {
                    if at.is_all() {
                        refs.at_all = true;
                    } else if let Some(uid) = at.user_id() {
                        refs.at_users.push(uid);
                    }
                }
                _ => {}
            }
        }
        refs
    }
}

/// Concatenation of every `text` segment's body, in order.
pub fn concat_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyMedia {
    pub images: Vec<Segment>,
    pub videos: Vec<Segment>,
    pub files: Vec<Segment>,
    pub records: Vec<Segment>,
    pub forwards: Vec<Segment>,
    pub cards: Vec<Segment>,
    pub faces: Vec<Segment>,
}

impl From<MediaRefs> for ReplyMedia {
    fn from(m: MediaRefs) -> Self {
        Self {
            images: m.images,
            videos: m.videos,
            files: m.files,
            records: m.records,
            forwards: m.forwards,
            cards: m.cards,
            faces: m.faces,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    pub media: ReplyMedia,
}

/// The normalized, enriched, renderable message emitted to downstream
/// consumers. `segments` is authoritative; every other body field
/// (`text`, `images`, ...) is a derived projection (invariant 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedMessage {
    pub message_id: i64,
    pub time: i64,
    pub time_str: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub self_id: i64,

    pub sender_id: i64,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_card: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<SenderRole>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,

    pub text: String,
    pub segments: Vec<Segment>,
    #[serde(flatten)]
    pub media: MediaRefs,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,

    pub summary: String,
    pub objective: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl FormattedMessage {
    /// Conversation identity invariant: exactly one of (group_id, sender_id)
    /// identifies the conversation, per `kind`.
    pub fn has_valid_identity(&self) -> bool {
        match self.kind {
            ConversationKind::Group => self.group_id.is_some_and(|g| g > 0),
            ConversationKind::Private => self.sender_id > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokeNotice {
    pub event_type: String,
    pub message_id: i64,
    pub time: i64,
    pub time_str: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub self_id: i64,

    pub sender_id: i64,
    pub sender_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,

    pub target_id: i64,
    pub target_name: String,

    pub summary: String,
    pub objective: String,
}
