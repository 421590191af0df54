//! OneBot message segments, normalized into a closed tagged variant.
//!
//! Upstream segments arrive as untyped `{type, data}` bags; rather than
//! optional-chain through `serde_json::Value` at every call site, we decode
//! into this closed set once at the boundary. Anything that doesn't match a
//! known `type` becomes `Segment::Unknown`, carrying the raw payload instead
//! of silently dropping it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TextData {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtData {
    pub qq: String,
}

impl AtData {
    pub fn is_all(&self) -> bool {
        self.qq == "all"
    }

    pub fn user_id(&self) -> Option<i64> {
        self.qq.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceData {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageData {
    pub file: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaData {
    pub file: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileData {
    pub file: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub file_size: Option<u64>,
}

/// Accepts the file size as either a JSON number or a numeric string, and
/// normalizes the `"empty"` sentinel some upstreams use for "unset" to `None`.
fn flexible_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) if s != "empty" => s.parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyData {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeData {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub content: Option<Vec<Segment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForwardNode {
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForwardData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub nodes: Option<Vec<ForwardNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareData {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Carrier for `json`/`xml`/`app` card segments, whose `data` payload is
/// usually a single string (serialized JSON/XML) but occasionally a nested
/// object depending on the upstream implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardData {
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownData {
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    Text(TextData),
    At(AtData),
    Face(FaceData),
    Image(ImageData),
    Video(MediaData),
    Record(MediaData),
    File(FileData),
    Reply(ReplyData),
    Node(NodeData),
    Forward(ForwardData),
    Share(ShareData),
    Json(CardData),
    Xml(CardData),
    App(CardData),
    Unknown(UnknownData),
}

impl Segment {
    pub fn kind(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::At(_) => "at",
            Segment::Face(_) => "face",
            Segment::Image(_) => "image",
            Segment::Video(_) => "video",
            Segment::Record(_) => "record",
            Segment::File(_) => "file",
            Segment::Reply(_) => "reply",
            Segment::Node(_) => "node",
            Segment::Forward(_) => "forward",
            Segment::Share(_) => "share",
            Segment::Json(_) => "json",
            Segment::Xml(_) => "xml",
            Segment::App(_) => "app",
            Segment::Unknown(_) => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            data: Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(decode_segment(&raw.kind, raw.data))
    }
}

fn decode_segment(kind: &str, data: Value) -> Segment {
    let parsed: Option<Segment> = match kind {
        "text" => serde_json::from_value(data.clone()).ok().map(Segment::Text),
        "at" => serde_json::from_value(data.clone()).ok().map(Segment::At),
        "face" => serde_json::from_value(data.clone()).ok().map(Segment::Face),
        "image" => serde_json::from_value(data.clone()).ok().map(Segment::Image),
        "video" => serde_json::from_value(data.clone()).ok().map(Segment::Video),
        "record" => serde_json::from_value(data.clone()).ok().map(Segment::Record),
        "file" => serde_json::from_value(data.clone()).ok().map(Segment::File),
        "reply" => serde_json::from_value(data.clone()).ok().map(Segment::Reply),
        "node" => serde_json::from_value(data.clone()).ok().map(Segment::Node),
        "forward" => serde_json::from_value(data.clone()).ok().map(Segment::Forward),
        "share" => serde_json::from_value(data.clone()).ok().map(Segment::Share),
        "json" => Some(Segment::Json(CardData { raw: data.clone() })),
        "xml" => Some(Segment::Xml(CardData { raw: data.clone() })),
        "app" => Some(Segment::App(CardData { raw: data.clone() })),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        Segment::Unknown(UnknownData {
            kind: kind.to_string(),
            data,
        })
    })
}
