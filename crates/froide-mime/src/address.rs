//! RFC 5322 address lists.

use crate::encoding::decode_rfc2047;
use std::fmt;

/// A mailbox: optional display name plus lowercased address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    /// Display name, decoded. Empty when absent.
    pub name: String,
    /// Address, lowercased. Empty when the header was missing or unusable.
    pub email: String,
}

impl Address {
    /// Creates an address.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into().to_lowercase(),
        }
    }

    /// Returns the part after the last `@`, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.email.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// Returns the part before the last `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map_or(self.email.as_str(), |(local, _)| local)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.email)
        } else {
            write!(f, "\"{}\" <{}>", self.name, self.email)
        }
    }
}

/// Parses a header value holding a list of addresses.
///
/// Accepts `"Name" <a@b>`, `Name <a@b>`, `a@b (Name)`, bare addresses and
/// groups (`team: a@b, c@d;`). Entries without an address are skipped.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<Address> {
    split_entries(value)
        .iter()
        .filter_map(|entry| parse_mailbox(entry))
        .collect()
}

/// Parses a single-address header such as `From`.
#[must_use]
pub fn parse_address(value: &str) -> Option<Address> {
    parse_address_list(value).into_iter().next()
}

fn split_entries(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes || comment_depth > 0 => {
                current.push(c);
                escaped = true;
            }
            '"' if comment_depth == 0 => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                comment_depth += 1;
                current.push(c);
            }
            ')' if !in_quotes && comment_depth > 0 => {
                comment_depth -= 1;
                current.push(c);
            }
            '<' if !in_quotes && comment_depth == 0 => {
                in_angle = true;
                current.push(c);
            }
            '>' if !in_quotes && comment_depth == 0 => {
                in_angle = false;
                current.push(c);
            }
            // Group display name: everything up to here is not an address
            ':' if !in_quotes && !in_angle && comment_depth == 0 => current.clear(),
            ',' | ';' if !in_quotes && !in_angle && comment_depth == 0 => {
                entries.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    entries.push(current);

    entries
}

fn parse_mailbox(entry: &str) -> Option<Address> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    let (name, email) = if let Some(open) = find_unquoted(entry, '<') {
        let rest = &entry[open + 1..];
        let email = rest.split('>').next().unwrap_or(rest);
        (entry[..open].trim().to_string(), email.to_string())
    } else {
        let (email, comment) = split_comment(entry);
        (comment, email)
    };

    let email = email.trim().trim_start_matches("mailto:").trim().to_lowercase();
    if email.is_empty() || email.contains(char::is_whitespace) {
        return None;
    }

    Some(Address {
        name: clean_name(&name),
        email,
    })
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (pos, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(pos),
            _ => {}
        }
    }
    None
}

/// Splits `a@b (Name)` into the address and the comment text.
fn split_comment(entry: &str) -> (String, String) {
    let mut address = String::new();
    let mut comment = String::new();
    let mut depth = 0usize;

    for c in entry.chars() {
        match c {
            '(' => {
                if depth > 0 {
                    comment.push(c);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth > 0 {
                    comment.push(c);
                }
            }
            _ if depth > 0 => comment.push(c),
            _ => address.push(c),
        }
    }

    (address, comment)
}

fn clean_name(name: &str) -> String {
    let name = name.trim();
    let unquoted = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .map_or_else(|| name.to_string(), |n| n.replace("\\\"", "\"").replace("\\\\", "\\"));
    decode_rfc2047(unquoted.trim())
}
