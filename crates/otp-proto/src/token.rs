//! Play-token parsing (spec §1 external collaborator: "the token
//! parser/decryptor: supply account identity given an opaque login blob").
//!
//! [`DislPlainTextTokenParser`] ports `parse_DISL_play_token`'s
//! ampersand-separated `KEY=value` format. Per spec §9's recorded
//! ambiguity, the original's `bool(valid)` accepts any non-empty string
//! (including the literal text `"0"`) as truthy; this port requires an
//! explicit `YES`/`true`/`1` instead.

use std::collections::HashMap;

/// Disconnect reason codes a failed login maps to (spec §7, §4.3).
pub mod disconnect_reason {
    pub const TOKEN_PARSE_ERROR: u16 = 103;
    pub const TOKEN_EXPIRED: u16 = 105;
    pub const TOKEN_OTHER: u16 = 106;
    pub const ACCESS_DENIED: u16 = 122;
    pub const ACCOUNT_NOT_APPROVED: u16 = 123;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub return_code: i32,
    pub resp_string: String,
    pub account_name: Option<String>,
    pub user_name: Option<String>,
    pub account_number: Option<u64>,
    pub paid: bool,
    pub open_chat_enabled: bool,
    pub whitelist_chat: bool,
    pub create_friends_with_chat: bool,
    pub chat_code_creation_rule: bool,
    pub toontown_game_key: Option<String>,
    /// Seconds-since-epoch expiry, if the token carried one.
    pub expires_at: Option<i64>,
    /// Disconnect reason to apply when `return_code != 0`.
    pub disconnect_reason: Option<u16>,
}

impl TokenInfo {
    fn rejected(return_code: i32, resp_string: &str, reason: u16) -> Self {
        TokenInfo {
            return_code,
            resp_string: resp_string.to_string(),
            account_name: None,
            user_name: None,
            account_number: None,
            paid: false,
            open_chat_enabled: false,
            whitelist_chat: true,
            create_friends_with_chat: true,
            chat_code_creation_rule: true,
            toontown_game_key: None,
            expires_at: None,
            disconnect_reason: Some(reason),
        }
    }
}

pub trait TokenParser: Send + Sync {
    fn parse(&self, play_token: &str, token_type: u32, now_secs: i64) -> TokenInfo;
}

/// Require an explicit truthy token rather than "any non-empty string",
/// resolving the §9 ambiguity.
fn parse_bool_strict(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

pub struct DislPlainTextTokenParser;

impl DislPlainTextTokenParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_variables(play_token: &str) -> HashMap<&str, &str> {
        let mut variables = HashMap::new();
        for line in play_token.split('&') {
            if let Some((name, value)) = line.split_once('=') {
                variables.insert(name, value);
            }
        }
        variables
    }
}

impl Default for DislPlainTextTokenParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenParser for DislPlainTextTokenParser {
    fn parse(&self, play_token: &str, _token_type: u32, now_secs: i64) -> TokenInfo {
        if !play_token.contains("TOONTOWN_GAME_KEY") {
            return TokenInfo::rejected(
                3,
                "Ill-formated playtoken.",
                disconnect_reason::TOKEN_PARSE_ERROR,
            );
        }

        let variables = Self::parse_variables(play_token);

        let Some(account_name) = variables.get("ACCOUNT_NAME") else {
            return TokenInfo::rejected(
                2,
                "Invalid playtoken.",
                disconnect_reason::TOKEN_PARSE_ERROR,
            );
        };

        let account_number = variables
            .get("ACCOUNT_NUMBER")
            .and_then(|s| s.parse::<u64>().ok());
        let user_name = variables.get("GAME_USERNAME").map(|s| s.to_string());

        let Some(valid_raw) = variables.get("valid") else {
            return TokenInfo::rejected(
                2,
                "Invalid playtoken.",
                disconnect_reason::TOKEN_PARSE_ERROR,
            );
        };
        let Some(valid) = parse_bool_strict(valid_raw) else {
            return TokenInfo::rejected(
                2,
                "Invalid playtoken.",
                disconnect_reason::TOKEN_PARSE_ERROR,
            );
        };
        if !valid {
            return TokenInfo::rejected(
                2,
                "Invalid playtoken.",
                disconnect_reason::ACCESS_DENIED,
            );
        }

        let mut expires_at = None;
        if let Some(expires_raw) = variables.get("expires") {
            match expires_raw.parse::<i64>() {
                Ok(expires) => {
                    if expires <= now_secs {
                        return TokenInfo::rejected(
                            1,
                            "Invalid playtoken.",
                            disconnect_reason::TOKEN_EXPIRED,
                        );
                    }
                    expires_at = Some(expires);
                }
                Err(_) => {
                    return TokenInfo::rejected(
                        2,
                        "Invalid playtoken.",
                        disconnect_reason::TOKEN_PARSE_ERROR,
                    );
                }
            }
        }

        let approval = variables
            .get("ACCOUNT_NAME_APPROVAL")
            .map(|s| s.eq_ignore_ascii_case("YES"))
            .unwrap_or(false);
        if variables.contains_key("ACCOUNT_NAME_APPROVAL") && !approval {
            return TokenInfo::rejected(
                2,
                "Invalid playtoken.",
                disconnect_reason::ACCOUNT_NOT_APPROVED,
            );
        }

        let paid = variables
            .get("TOONTOWN_ACCESS")
            .map(|s| s.eq_ignore_ascii_case("FULL"))
            .unwrap_or(false);
        let open_chat_enabled = variables
            .get("OPEN_CHAT_ENABLED")
            .map(|s| s.eq_ignore_ascii_case("YES"))
            .unwrap_or(false);
        let whitelist_chat = variables
            .get("WL_CHAT_ENABLED")
            .map(|s| s.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let create_friends_with_chat = variables
            .get("CREATE_FRIENDS_WITH_CHAT")
            .map(|s| s.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let chat_code_creation_rule = variables
            .get("CHAT_CODE_CREATION_RULE")
            .map(|s| s.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let toontown_game_key = variables.get("TOONTOWN_GAME_KEY").map(|s| s.to_string());

        TokenInfo {
            return_code: 0,
            resp_string: String::new(),
            account_name: Some(account_name.to_string()),
            user_name,
            account_number,
            paid,
            open_chat_enabled,
            whitelist_chat,
            create_friends_with_chat,
            chat_code_creation_rule,
            toontown_game_key,
            expires_at,
            disconnect_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_1_token() -> String {
        "ACCOUNT_NAME=alice&ACCOUNT_NUMBER=42&GAME_USERNAME=alice&valid=1&expires=9999999999&\
ACCOUNT_NAME_APPROVAL=YES&FAMILY_NUMBER=1&familyAdmin=1&OPEN_CHAT_ENABLED=YES&\
CREATE_FRIENDS_WITH_CHAT=YES&CHAT_CODE_CREATION_RULE=YES&WL_CHAT_ENABLED=YES&\
TOONTOWN_ACCESS=FULL&TOONTOWN_GAME_KEY=k"
            .to_string()
    }

    #[test]
    fn parses_the_scenario_1_token() {
        let parser = DislPlainTextTokenParser::new();
        let info = parser.parse(&scenario_1_token(), 0, 1_700_000_000);
        assert_eq!(info.return_code, 0);
        assert_eq!(info.account_name.as_deref(), Some("alice"));
        assert_eq!(info.account_number, Some(42));
        assert!(info.paid);
        assert!(info.open_chat_enabled);
    }

    #[test]
    fn rejects_missing_game_key() {
        let parser = DislPlainTextTokenParser::new();
        let info = parser.parse("ACCOUNT_NAME=alice&valid=1", 0, 0);
        assert_eq!(info.return_code, 3);
    }

    #[test]
    fn rejects_loosely_truthy_valid_value() {
        // The original's `bool("0")` is True; this port must reject it.
        let parser = DislPlainTextTokenParser::new();
        let token = "ACCOUNT_NAME=alice&valid=0&TOONTOWN_GAME_KEY=k";
        let info = parser.parse(token, 0, 0);
        assert_ne!(info.return_code, 0);
    }

    #[test]
    fn rejects_expired_token() {
        let parser = DislPlainTextTokenParser::new();
        let token = "ACCOUNT_NAME=alice&valid=1&expires=100&TOONTOWN_GAME_KEY=k";
        let info = parser.parse(token, 0, 200);
        assert_eq!(info.return_code, 1);
        assert_eq!(info.disconnect_reason, Some(disconnect_reason::TOKEN_EXPIRED));
    }
}
