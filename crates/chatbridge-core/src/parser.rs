//! Fragment classifier and parser.
//!
//! Turns one raw markup fragment from a room stream into zero or one
//! [`ChatEvent`]. Pure functions over strings: no I/O, no shared state, and
//! nothing here panics on malformed input.

use crate::markup::{self, Token};
use chatbridge_types::{ChatEvent, RoomId};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

/// First single-quoted string in a script call.
static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']*)'").expect("Invalid quoted string regex"));

/// Digit run closed by a parenthesis, e.g. the `1)` in `user_set_state('x', 1)`.
static STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*\)").expect("Invalid state code regex"));

/// Image path prefix in front of emoticon file names.
const EMOTICON_PREFIX: &str = "/img/";

/// Emoticon image paths and the text code each one stands for.
const EMOTICONS: &[(&str, &str)] = &[
    ("vip/stupid.gif", ":s"),
    ("vip/unsure.gif", ":r"),
    ("vip/sleep.gif", ":u"),
    ("vip/ninja.gif", "(h)"),
    ("vip/sick.gif", ":p"),
    ("vip/hehe.gif", "(he)"),
    ("vip/sad.gif", ":("),
    ("vip/lauth.gif", ":d"),
    ("vip/smile.gif", ":)"),
    ("vip/huh.gif", ":f"),
    ("vip/tombdown.gif", "(n)"),
    ("vip/offended.gif", ":g"),
    ("vip/blomst.gif", "@-}-"),
    ("vip/fika.gif", "(c)"),
    ("vip/love17.gif", ":X"),
    ("vip/devil.gif", "(6)"),
    ("vip/pressed.gif", ":L"),
    ("vip/shout.gif", "(g)"),
    ("vip/hello.gif", "(hi)"),
    ("vip/see.gif", ":s)"),
    ("vip/note.gif", "(m)"),
    ("vip/wacko.gif", "(w)"),
    ("vip/blush.gif", ":B"),
    ("vip/bulb.gif", "(i)"),
    ("vip/tombup.gif", "(y)"),
    ("vip/wink.gif", ";)"),
    ("vip/cry.gif", ";("),
    ("vip/angel.gif", "o:)"),
    ("vip/broken_heart.gif", "(:v)"),
    ("vip/good.gif", "(k)"),
    ("vip/hart.gif", "(s)"),
];

/// Look up the text code of an emoticon image.
///
/// Accepts either the bare table key (`vip/smile.gif`) or a full URL ending in
/// `/img/vip/smile.gif`.
pub fn emoticon_code(src: &str) -> Option<&'static str> {
    let key = match src.rfind(EMOTICON_PREFIX) {
        Some(idx) => &src[idx + EMOTICON_PREFIX.len()..],
        None => src,
    };
    EMOTICONS
        .iter()
        .find(|(path, _)| *path == key)
        .map(|(_, code)| *code)
}

/// What a fragment looks like before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Starts with an inline image: a chat line.
    Message,
    /// Starts with a script block: a presence event.
    Event,
    /// Anything else; dropped without error.
    Unknown,
}

/// Classify a fragment by its leading markup. First match wins.
pub fn classify(fragment: &str) -> FragmentKind {
    let head = fragment.trim_start();
    if starts_with_tag(head, "img") {
        FragmentKind::Message
    } else if starts_with_tag(head, "script") {
        FragmentKind::Event
    } else {
        FragmentKind::Unknown
    }
}

/// Case-insensitive `<name` followed by whitespace, `>` or `/`.
fn starts_with_tag(s: &str, name: &str) -> bool {
    let Some(rest) = s.strip_prefix('<') else {
        return false;
    };
    let Some(head) = rest.get(..name.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(name) {
        return false;
    }
    matches!(
        rest[name.len()..].chars().next(),
        Some(c) if c.is_whitespace() || c == '>' || c == '/'
    )
}

/// Parser options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Replace emoticon images in message bodies with their text codes.
    pub substitute_emoticons: bool,
}

/// Stateless fragment parser bound to one room.
#[derive(Debug, Clone)]
pub struct FragmentParser {
    room_id: RoomId,
    options: ParserOptions,
}

impl FragmentParser {
    pub fn new(room_id: RoomId) -> Self {
        Self::with_options(room_id, ParserOptions::default())
    }

    pub fn with_options(room_id: RoomId, options: ParserOptions) -> Self {
        Self { room_id, options }
    }

    /// Parse one fragment into at most one event.
    pub fn parse(&self, fragment: &str) -> Option<ChatEvent> {
        let event = match classify(fragment) {
            FragmentKind::Message => self.parse_message(fragment),
            FragmentKind::Event => self.parse_script(fragment),
            FragmentKind::Unknown => None,
        };

        if event.is_none() {
            trace!(
                target: "chatbridge::parser",
                room = %self.room_id,
                len = fragment.len(),
                "Discarded fragment"
            );
        }

        event
    }

    fn parse_message(&self, fragment: &str) -> Option<ChatEvent> {
        let tokens = markup::tokenize(fragment);
        let anchors = collect_anchors(&tokens);

        if anchors.is_empty() || anchors.len() > 2 {
            return None;
        }
        if anchors.iter().any(|a| a.text.is_empty()) {
            return None;
        }

        let last_close = anchors[anchors.len() - 1].close_index;
        let body = self.collect_body(&tokens[last_close + 1..])?;

        let sender = &anchors[0];
        let (target, is_private) = match anchors.get(1) {
            Some(addressee) => (Some(addressee.text.clone()), sender.has_class("p")),
            None => (None, false),
        };

        Some(ChatEvent::Message {
            sender: sender.text.clone(),
            body,
            target,
            is_private,
            room_id: self.room_id.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Build the message body from the tokens after the last actor anchor.
    fn collect_body(&self, tokens: &[Token]) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();

        for token in tokens {
            match token {
                Token::Text(text) => {
                    let mut segment = text.trim();
                    if parts.is_empty() {
                        if let Some(rest) = segment.strip_prefix(':') {
                            segment = rest.trim_start();
                        }
                    }
                    if !segment.is_empty() {
                        parts.push(segment.to_string());
                    }
                }
                Token::Open { name, .. } if name == "img" && self.options.substitute_emoticons => {
                    if let Some(code) = token.attr("src").and_then(emoticon_code) {
                        parts.push(code.to_string());
                    }
                }
                _ => {}
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    fn parse_script(&self, fragment: &str) -> Option<ChatEvent> {
        let body = markup::tokenize(fragment).into_iter().find_map(|t| match t {
            Token::Script(body) => Some(body),
            _ => None,
        })?;

        let call = body.trim();
        let call = call.strip_prefix("parent.").unwrap_or(call);
        let room_id = self.room_id.clone();
        let timestamp = Utc::now();

        if call.starts_with("user_add") {
            Some(ChatEvent::UserJoined {
                username: first_quoted(call)?,
                room_id,
                timestamp,
            })
        } else if call.starts_with("user_set_state") {
            let username = first_quoted(call)?;
            let state = STATE_RE
                .captures(call)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())?;
            Some(ChatEvent::UserStateChanged {
                username,
                state,
                room_id,
                timestamp,
            })
        } else if call.starts_with("user_remove") {
            Some(ChatEvent::UserLeft {
                username: first_quoted(call)?,
                room_id,
                timestamp,
            })
        } else {
            None
        }
    }
}

/// First non-empty single-quoted string.
fn first_quoted(s: &str) -> Option<String> {
    QUOTED_RE
        .captures_iter(s)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

struct Anchor {
    text: String,
    class: String,
    close_index: usize,
}

impl Anchor {
    fn has_class(&self, class: &str) -> bool {
        self.class.split_whitespace().any(|c| c == class)
    }
}

fn collect_anchors(tokens: &[Token]) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_open("a") {
            i += 1;
            continue;
        }

        let class = tokens[i].attr("class").unwrap_or_default().to_string();
        let mut text = String::new();
        let mut j = i + 1;
        while j < tokens.len() && !tokens[j].is_close("a") {
            if let Token::Text(t) = &tokens[j] {
                text.push_str(t);
            }
            j += 1;
        }

        // An anchor without a closing tag runs to the end of the fragment.
        let close_index = j.min(tokens.len() - 1);
        anchors.push(Anchor {
            text: text.trim().to_string(),
            class,
            close_index,
        });
        i = j + 1;
    }

    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_types::{STATE_IDLE, STATE_ONLINE};
    use proptest::prelude::*;

    const TWO_ANCHOR_FRAGMENT: &str = concat!(
        "<img src=\"s.gif\">\n",
        "<font color=\"ff0000\"><b>&nbsp;<a class=\"p\" href=\"#\" onclick=\"s('alice');return false;\">alice</a></b></font>:&nbsp;\n",
        "&nbsp;=&gt;\n",
        "<font color=\"ff0000\"><b>&nbsp;<a class=\"t\" href=\"#\">bob</a></b></font>\n",
        ":&nbsp;\n",
        "<img border=\"0\" src=\"http://chat.suomi24.fi/img/vip/devil.gif\">\n",
        "best \n",
        "<img border=\"0\" src=\"http://chat.suomi24.fi/img/vip/offended.gif\">\n",
        "test\n",
        "<br>\n",
    );

    fn parser() -> FragmentParser {
        FragmentParser::new(RoomId::from("101"))
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify() {
        assert_eq!(classify("<img src=\"s.gif\">"), FragmentKind::Message);
        assert_eq!(classify("  <IMG src=x>"), FragmentKind::Message);
        assert_eq!(classify("<script>x</script>"), FragmentKind::Event);
        assert_eq!(classify("<imgx>"), FragmentKind::Unknown);
        assert_eq!(classify("<br>"), FragmentKind::Unknown);
        assert_eq!(classify("hello"), FragmentKind::Unknown);
        assert_eq!(classify(""), FragmentKind::Unknown);
    }

    // ==================== Message Tests ====================

    #[test]
    fn test_public_message() {
        let fragment = r##"<img src="s.gif"><font color="007236"><b>&nbsp;<a class="t" href="#">bob</a></b></font>:&nbsp;hello there<br>"##;
        match parser().parse(fragment) {
            Some(ChatEvent::Message {
                sender,
                body,
                target,
                is_private,
                room_id,
                ..
            }) => {
                assert_eq!(sender, "bob");
                assert_eq!(body, "hello there");
                assert!(target.is_none());
                assert!(!is_private);
                assert_eq!(room_id.as_str(), "101");
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_public_message_skips_empty_segments() {
        let fragment = r#"<img src="s.gif"><a>bob</a><b> </b>&nbsp;<i></i>hello"#;
        match parser().parse(fragment) {
            Some(ChatEvent::Message { body, .. }) => assert_eq!(body, "hello"),
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_private_directed_message() {
        match parser().parse(TWO_ANCHOR_FRAGMENT) {
            Some(ChatEvent::Message {
                sender,
                body,
                target,
                is_private,
                ..
            }) => {
                assert_eq!(sender, "alice");
                assert_eq!(target.as_deref(), Some("bob"));
                assert!(is_private);
                assert_eq!(body, "best test");
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_targeted_message_is_not_private() {
        let fragment = TWO_ANCHOR_FRAGMENT.replace("class=\"p\"", "class=\"t\"");
        match parser().parse(&fragment) {
            Some(ChatEvent::Message {
                target, is_private, ..
            }) => {
                assert_eq!(target.as_deref(), Some("bob"));
                assert!(!is_private);
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_emoticon_substitution() {
        let parser = FragmentParser::with_options(
            RoomId::from("101"),
            ParserOptions {
                substitute_emoticons: true,
            },
        );
        match parser.parse(TWO_ANCHOR_FRAGMENT) {
            Some(ChatEvent::Message { body, .. }) => assert_eq!(body, "(6) best :g test"),
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_emoticon_is_omitted() {
        let parser = FragmentParser::with_options(
            RoomId::from("101"),
            ParserOptions {
                substitute_emoticons: true,
            },
        );
        let fragment = r#"<img src="s.gif"><a>bob</a>: <img src="/img/vip/unknown.gif"> hi"#;
        match parser.parse(fragment) {
            Some(ChatEvent::Message { body, .. }) => assert_eq!(body, "hi"),
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_message_with_wrong_anchor_count_is_discarded() {
        assert!(parser().parse(r#"<img src="s.gif">no anchors here"#).is_none());
        let three = r#"<img src="s.gif"><a>a</a><a>b</a><a>c</a>: hi"#;
        assert!(parser().parse(three).is_none());
    }

    #[test]
    fn test_message_without_body_is_discarded() {
        assert!(parser().parse(r#"<img src="s.gif"><a>bob</a>:&nbsp;<br>"#).is_none());
    }

    #[test]
    fn test_emoticon_code_lookup() {
        assert_eq!(emoticon_code("vip/smile.gif"), Some(":)"));
        assert_eq!(
            emoticon_code("http://chat.suomi24.fi/img/vip/devil.gif"),
            Some("(6)")
        );
        assert_eq!(emoticon_code("s.gif"), None);
    }

    // ==================== Script Event Tests ====================

    #[test]
    fn test_user_joined() {
        let fragment = "<script>parent.user_add(new parent.User('', 'alice', 0, 1));</script>";
        match parser().parse(fragment) {
            Some(ChatEvent::UserJoined { username, .. }) => assert_eq!(username, "alice"),
            other => panic!("Expected UserJoined, got {:?}", other),
        }
    }

    #[test]
    fn test_user_state_changed() {
        match parser().parse("<script>parent.user_set_state('alice', 1);</script>") {
            Some(ChatEvent::UserStateChanged {
                username, state, ..
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(state, STATE_IDLE);
            }
            other => panic!("Expected UserStateChanged, got {:?}", other),
        }

        match parser().parse("<script>parent.user_set_state('alice', 0);</script>") {
            Some(ChatEvent::UserStateChanged { state, .. }) => assert_eq!(state, STATE_ONLINE),
            other => panic!("Expected UserStateChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_user_left() {
        match parser().parse("<script>user_remove('bob');</script>") {
            Some(ChatEvent::UserLeft { username, .. }) => assert_eq!(username, "bob"),
            other => panic!("Expected UserLeft, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_script_is_discarded() {
        assert!(parser().parse("<script>parent.scroll_down();</script>").is_none());
        assert!(parser().parse("<script>user_remove();</script>").is_none());
        assert!(parser().parse("<script>parent.user_set_state('x');</script>").is_none());
    }

    proptest! {
        #[test]
        fn prop_non_image_or_script_yields_nothing(s in "\\PC*") {
            let parser = parser();
            let event = parser.parse(&s);
            if classify(&s) == FragmentKind::Unknown {
                prop_assert!(event.is_none());
            }
        }

        #[test]
        fn prop_message_like_input_never_panics(s in "<img [ -~]{0,200}") {
            let _ = parser().parse(&s);
        }

        #[test]
        fn prop_script_like_input_never_panics(s in "<script>[ -~]{0,200}") {
            let _ = parser().parse(&s);
        }
    }
}
