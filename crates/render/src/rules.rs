//! Stateless formatting rules shared by `summary` and `objective` rendering.

use broker_core::model::SenderRole;
use broker_core::Segment;
use url::Url;

/// `nickname(card)[role](QQ:id)`, eliding any part that's absent. Role
/// labels (`群主`/`管理员`) only apply in group contexts; `Member` never
/// gets a label.
pub fn format_sender_display(
    nickname: &str,
    card: Option<&str>,
    role: Option<SenderRole>,
    id: i64,
    is_group: bool,
) -> String {
    let mut out = String::new();
    out.push_str(nickname);
    if let Some(card) = card.filter(|c| !c.is_empty()) {
        out.push('(');
        out.push_str(card);
        out.push(')');
    }
    if is_group {
        let label = match role {
            Some(SenderRole::Owner) => Some("群主"),
            Some(SenderRole::Admin) => Some("管理员"),
            Some(SenderRole::Member) | None => None,
        };
        if let Some(label) = label {
            out.push('[');
            out.push_str(label);
            out.push(']');
        }
    }
    out.push_str(&format!("(QQ:{id})"));
    out
}

/// The bot's own identity is rendered distinctly from everyone else's.
pub fn format_self_display(nickname: &str, self_id: i64) -> String {
    format!("我（{nickname}(QQ:{self_id})）")
}

pub fn format_identity(nickname: &str, id: i64, self_id: i64) -> String {
    if id == self_id {
        format_self_display(nickname, self_id)
    } else {
        format!("{nickname}(QQ:{id})")
    }
}

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// `<1024 → B`, `<1MiB → KB (1 decimal)`, `<1GiB → MB`, else `GB`;
/// non-numeric (unknown) sizes render as `未知大小`.
pub fn format_file_size(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "未知大小".to_string();
    };
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes}B")
    } else if b < MIB {
        format!("{:.1}KB", b / KIB)
    } else if b < GIB {
        format!("{:.1}MB", b / MIB)
    } else {
        format!("{:.1}GB", b / GIB)
    }
}

fn is_absolute_local_path(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("\\\\") || s.get(1..2) == Some(":")
}

/// Local absolute paths become percent-encoded `file:///...` URLs; bare
/// http(s) URLs pass through unchanged unless they lack a filename
/// parameter, in which case one is appended.
pub fn normalize_media_url(path: Option<&str>, url: Option<&str>) -> Option<String> {
    if let Some(path) = path.filter(|p| is_absolute_local_path(p)) {
        return Some(
            Url::from_file_path(path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("file://{path}")),
        );
    }
    let raw = url?;
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if raw.contains("file=") || raw.contains("fname=") {
        return Some(raw.to_string());
    }
    let filename = raw.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("file");
    let encoded: String = url::form_urlencoded::byte_serialize(filename.as_bytes()).collect();
    let sep = if raw.contains('?') { '&' } else { '?' };
    Some(format!("{raw}{sep}file={encoded}"))
}

/// Local-time rendering of a unix timestamp, shared by message and poke
/// formatting.
pub fn format_time_str(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix.to_string())
}

/// Drop the outgoing message iff there's no reply, no meaningful text, and
/// at least one image carries the animated-sticker summary marker.
pub fn is_animated_sticker_only(has_reply: bool, text: &str, segments: &[Segment]) -> bool {
    if has_reply || !text.trim().is_empty() {
        return false;
    }
    segments.iter().any(|seg| {
        matches!(seg, Segment::Image(img) if img.summary.as_deref() == Some("[动画表情]"))
    })
}

/// Drop the outgoing message iff there's no reply, no text, at least one
/// `record` segment, and no other segment type alongside it.
pub fn is_voice_only(has_reply: bool, text: &str, segments: &[Segment]) -> bool {
    if has_reply || !text.is_empty() || segments.is_empty() {
        return false;
    }
    let mut has_record = false;
    for seg in segments {
        match seg {
            Segment::Record(_) => has_record = true,
            _ => return false,
        }
    }
    has_record
}
