//! Resolves an `sdk` request's dotted `path` to an upstream action name and
//! positional parameter names, and tells the whitelist check which
//! positional argument (if any) carries a group/user id.
//!
//! The facade surface mirrors the actions the enrichment pipeline already
//! drives (`enrich::enricher`, `render::renderer`) plus the two send
//! actions a downstream consumer actually issues. Unknown paths are
//! rejected rather than guessed at.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistArg {
    Group(usize),
    User(usize),
}

pub struct FacadeEntry {
    pub action: &'static str,
    pub param_names: &'static [&'static str],
    pub whitelist_arg: Option<WhitelistArg>,
}

fn facade_table(path: &str) -> Option<FacadeEntry> {
    match path {
        "send.group" => Some(FacadeEntry {
            action: "send_group_msg",
            param_names: &["group_id", "message"],
            whitelist_arg: Some(WhitelistArg::Group(0)),
        }),
        "send.private" => Some(FacadeEntry {
            action: "send_private_msg",
            param_names: &["user_id", "message"],
            whitelist_arg: Some(WhitelistArg::User(0)),
        }),
        "get.group_member_info" => Some(FacadeEntry {
            action: "get_group_member_info",
            param_names: &["group_id", "user_id"],
            whitelist_arg: Some(WhitelistArg::Group(0)),
        }),
        "get.stranger_info" => Some(FacadeEntry {
            action: "get_stranger_info",
            param_names: &["user_id"],
            whitelist_arg: Some(WhitelistArg::User(0)),
        }),
        "get.group_info" => Some(FacadeEntry {
            action: "get_group_info",
            param_names: &["group_id"],
            whitelist_arg: Some(WhitelistArg::Group(0)),
        }),
        _ => None,
    }
}

/// Resolve `path` + positional `args` into an action name, a JSON params
/// object built from the facade's named positions, and the whitelist id (if
/// any) to check before dispatch. Returns `None` for an unrecognized path.
pub fn resolve(path: &str, args: &[Value]) -> Option<(String, Value, Option<(WhitelistArg, i64)>)> {
    let entry = facade_table(path)?;
    let mut params = serde_json::Map::new();
    for (name, value) in entry.param_names.iter().zip(args.iter()) {
        params.insert((*name).to_string(), value.clone());
    }
    let whitelist_check = entry.whitelist_arg.and_then(|arg| {
        let index = match arg {
            WhitelistArg::Group(i) | WhitelistArg::User(i) => i,
        };
        args.get(index).and_then(Value::as_i64).map(|id| (arg, id))
    });
    Some((entry.action.to_string(), Value::Object(params), whitelist_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_send_group_maps_positional_args() {
        let (action, params, wl) =
            resolve("send.group", &[serde_json::json!(100), serde_json::json!("hi")]).unwrap();
        assert_eq!(action, "send_group_msg");
        assert_eq!(params["group_id"], 100);
        assert_eq!(params["message"], "hi");
        assert_eq!(wl, Some((WhitelistArg::Group(0), 100)));
    }

    #[test]
    fn test_resolve_unknown_path_is_none() {
        assert!(resolve("nonsense.path", &[]).is_none());
    }

    #[test]
    fn test_resolve_missing_arg_omits_whitelist_check() {
        let (_, _, wl) = resolve("send.group", &[]).unwrap();
        assert_eq!(wl, None);
    }
}
