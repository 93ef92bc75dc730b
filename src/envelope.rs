//! Message Envelope
//!
//! Turns a raw inbound message into an enriched, pipeline-ready view:
//! identity and origin, injected state flags, parsed command syntax, and
//! linguistic extras (mentions, URLs). Oversized messages are rejected here,
//! before anything downstream can choke on them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::SenderFlags;
use crate::transport::{InboundMessage, QuotedRef};

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[^\s/$.?#][^\s]*").expect("url regex")
});

#[derive(Debug, Clone)]
pub struct Envelope {
    pub raw: InboundMessage,
    pub chat: String,
    pub sender: String,
    /// Sender identity without the server suffix.
    pub sender_bare: String,
    pub text: String,
    pub is_group: bool,
    pub is_owner: bool,
    pub is_premium: bool,
    pub is_registered: bool,
    pub is_banned: bool,
    pub is_cmd: bool,
    pub prefix: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub urls: Vec<String>,
    pub quoted: Option<QuotedRef>,
    pub mentions: Vec<String>,
}

/// Strip the `@server` suffix from a JID.
pub fn bare(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Reject events the pipeline must never see. Currently: text over the
/// configured ceiling.
pub fn sanitize(msg: &InboundMessage, max_text_len: usize) -> bool {
    if msg.text.len() > max_text_len {
        tracing::warn!(
            chat = %msg.chat,
            length = msg.text.len(),
            "oversized message blocked"
        );
        return false;
    }
    true
}

impl Envelope {
    /// Build an envelope from a raw message. Returns `None` for messages
    /// without a usable sender.
    pub fn build(
        msg: InboundMessage,
        prefixes: &[String],
        owner_numbers: &[String],
        flags: SenderFlags,
    ) -> Option<Envelope> {
        if msg.sender.is_empty() || msg.chat.is_empty() {
            tracing::warn!(id = %msg.id, "message without sender or chat ignored");
            return None;
        }

        let sender = msg.sender.clone();
        let sender_bare = bare(&sender).to_string();
        let text = msg.text.clone();

        let prefix = prefixes
            .iter()
            .find(|p| !p.is_empty() && text.starts_with(p.as_str()))
            .cloned();
        let is_cmd = prefix.is_some();

        let (command, args) = match &prefix {
            Some(p) => {
                let rest = text[p.len()..].trim();
                let mut parts = rest.split_whitespace();
                let command = parts.next().map(|c| c.to_ascii_lowercase());
                let args: Vec<String> = parts.map(|s| s.to_string()).collect();
                (command, args)
            }
            None => (None, Vec::new()),
        };

        let urls = URL_RE
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();

        Some(Envelope {
            chat: msg.chat.clone(),
            sender,
            is_owner: owner_numbers.iter().any(|o| o == &sender_bare),
            sender_bare,
            text,
            is_group: msg.is_group,
            is_premium: flags.is_premium,
            is_registered: flags.is_registered,
            is_banned: flags.is_banned,
            is_cmd,
            prefix,
            command,
            args,
            urls,
            quoted: msg.quoted.clone(),
            mentions: msg.mentions.clone(),
            raw: msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        crate::config::DEFAULT_PREFIXES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            chat: "123@s.whatsapp.net".into(),
            sender: "123@s.whatsapp.net".into(),
            text: text.into(),
            ..Default::default()
        }
    }

    fn build(text: &str) -> Envelope {
        Envelope::build(msg(text), &prefixes(), &[], SenderFlags::default()).unwrap()
    }

    #[test]
    fn parses_command_and_args() {
        let env = build("!ban @someone  now");
        assert!(env.is_cmd);
        assert_eq!(env.prefix.as_deref(), Some("!"));
        assert_eq!(env.command.as_deref(), Some("ban"));
        assert_eq!(env.args, vec!["@someone", "now"]);
    }

    #[test]
    fn command_name_is_lowercased() {
        let env = build(".PING");
        assert_eq!(env.command.as_deref(), Some("ping"));
    }

    #[test]
    fn every_default_prefix_is_recognized() {
        for p in ["!", ".", "#", "/"] {
            let env = build(&format!("{p}menu"));
            assert!(env.is_cmd, "prefix {p} not recognized");
            assert_eq!(env.command.as_deref(), Some("menu"));
        }
    }

    #[test]
    fn plain_text_is_not_a_command() {
        let env = build("hello there");
        assert!(!env.is_cmd);
        assert!(env.command.is_none());
        assert!(env.args.is_empty());
    }

    #[test]
    fn bare_prefix_yields_no_command() {
        let env = build("!");
        assert!(env.is_cmd);
        assert!(env.command.is_none());
    }

    #[test]
    fn urls_are_extracted() {
        let env = build("look https://example.com/x and http://other.org");
        assert_eq!(env.urls.len(), 2);
        assert_eq!(env.urls[0], "https://example.com/x");
    }

    #[test]
    fn owner_flag_follows_bare_number() {
        let owners = vec!["123".to_string()];
        let env = Envelope::build(msg("hi"), &prefixes(), &owners, SenderFlags::default())
            .unwrap();
        assert!(env.is_owner);
        assert_eq!(env.sender_bare, "123");
    }

    #[test]
    fn sanitize_rejects_oversized_text() {
        let big = "x".repeat(5000);
        assert!(!sanitize(&msg(&big), 4096));
        assert!(sanitize(&msg("small"), 4096));
        // Boundary: exactly the ceiling passes.
        let exact = "x".repeat(4096);
        assert!(sanitize(&msg(&exact), 4096));
    }

    #[test]
    fn missing_sender_is_rejected() {
        let mut m = msg("hi");
        m.sender = String::new();
        assert!(Envelope::build(m, &prefixes(), &[], SenderFlags::default()).is_none());
    }
}
