//! Minimal tokenizer for the small HTML fragments the chat stream emits.
//!
//! Only what the fragment parser needs: start tags with attributes, end tags,
//! entity-decoded text, and raw script bodies. Malformed input never fails,
//! it just degrades into text.

/// One lexical unit of a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Start tag with lowercased name and attributes in source order.
    Open {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Close {
        name: String,
    },
    Text(String),
    /// Raw contents of a `<script>` element.
    Script(String),
}

impl Token {
    pub(crate) fn is_open(&self, tag: &str) -> bool {
        matches!(self, Token::Open { name, .. } if name == tag)
    }

    pub(crate) fn is_close(&self, tag: &str) -> bool {
        matches!(self, Token::Close { name } if name == tag)
    }

    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        match self {
            Token::Open { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Split a fragment into tokens.
pub(crate) fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            push_text(&mut tokens, rest);
            break;
        };

        if lt > 0 {
            push_text(&mut tokens, &rest[..lt]);
            rest = &rest[lt..];
            continue;
        }

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = match after.find("-->") {
                Some(end) => &after[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = rest.find('>') else {
            // Unterminated tag: keep it as text rather than dropping content.
            push_text(&mut tokens, rest);
            break;
        };

        let inner = &rest[1..gt];
        rest = &rest[gt + 1..];

        if let Some(name) = inner.strip_prefix('/') {
            tokens.push(Token::Close {
                name: name.trim().to_ascii_lowercase(),
            });
            continue;
        }

        let (name, attrs) = parse_tag(inner);
        if name.is_empty() || name.starts_with('!') {
            continue;
        }

        if name == "script" {
            let (body, remaining) = split_script(rest);
            tokens.push(Token::Script(body.to_string()));
            rest = remaining;
            continue;
        }

        tokens.push(Token::Open { name, attrs });
    }

    tokens
}

fn push_text(tokens: &mut Vec<Token>, raw: &str) {
    tokens.push(Token::Text(decode_entities(raw)));
}

/// Split the text after `<script ...>` into the script body and whatever
/// follows the closing tag.
fn split_script(rest: &str) -> (&str, &str) {
    let lower = rest.to_ascii_lowercase();
    match lower.find("</script") {
        Some(end) => {
            let after = &rest[end..];
            let remaining = match after.find('>') {
                Some(gt) => &after[gt + 1..],
                None => "",
            };
            (&rest[..end], remaining)
        }
        None => (rest, ""),
    }
}

fn parse_tag(inner: &str) -> (String, Vec<(String, String)>) {
    let inner = inner.trim().trim_end_matches('/');
    let name_end = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let name = inner[..name_end].to_ascii_lowercase();
    let attrs = parse_attrs(&inner[name_end..]);
    (name, attrs)
}

fn parse_attrs(mut s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();

    loop {
        s = s.trim_start();
        if s.is_empty() {
            break;
        }

        let key_end = s
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(s.len());
        let key = s[..key_end].to_ascii_lowercase();
        s = s[key_end..].trim_start();

        let value = if let Some(after_eq) = s.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    s = body.get(end + 1..).unwrap_or("");
                    &body[..end]
                }
                _ => {
                    let end = after_eq
                        .find(|c: char| c.is_whitespace())
                        .unwrap_or(after_eq.len());
                    s = &after_eq[end..];
                    &after_eq[..end]
                }
            }
        } else {
            ""
        };

        if !key.is_empty() {
            attrs.push((key, decode_entities(value)));
        }
    }

    attrs
}

/// Decode the handful of entities the upstream markup uses, plus numeric
/// references. Unknown entities are left as written.
pub(crate) fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];

        let decoded = candidate
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&candidate[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "nbsp" => Some('\u{a0}'),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}
