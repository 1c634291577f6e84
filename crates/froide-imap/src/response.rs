//! Parsing of the few server responses the client needs.

use crate::types::{FetchedMessage, MailboxStatus, Status, Uid};
use crate::{Error, Result};

/// Returns the status and text of a tagged completion line for `tag`.
pub(crate) fn tagged_status(response: &[u8], tag: &str) -> Option<(Status, String)> {
    let rest = response.strip_prefix(tag.as_bytes())?.strip_prefix(b" ")?;
    let line = String::from_utf8_lossy(rest);
    let (word, text) = line.trim_end().split_once(' ').unwrap_or((line.trim_end(), ""));

    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        "BYE" => Status::Bye,
        _ => return None,
    };
    Some((status, text.to_string()))
}

/// Checks that the tagged completion in `responses` is OK.
pub(crate) fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
    let (status, text) = responses
        .iter()
        .rev()
        .find_map(|response| tagged_status(response, tag))
        .ok_or_else(|| Error::Protocol("missing tagged response".to_string()))?;

    match status {
        Status::Ok => Ok(()),
        Status::No => Err(Error::No(text)),
        Status::Bad => Err(Error::Bad(text)),
        Status::Bye => Err(Error::Bye(text)),
    }
}

/// Validates the server greeting.
pub(crate) fn check_greeting(greeting: &[u8]) -> Result<()> {
    let line = String::from_utf8_lossy(greeting);
    let upper = line.to_ascii_uppercase();
    if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
        Ok(())
    } else if let Some(text) = upper.strip_prefix("* BYE") {
        Err(Error::Bye(text.trim().to_string()))
    } else {
        Err(Error::Protocol(format!("unexpected greeting: {}", line.trim_end())))
    }
}

/// Parses `* SEARCH 1 2 3`.
pub(crate) fn parse_search(response: &[u8]) -> Option<Vec<Uid>> {
    let line = std::str::from_utf8(response).ok()?;
    let mut words = line.split_whitespace();
    if words.next()? != "*" || !words.next()?.eq_ignore_ascii_case("SEARCH") {
        return None;
    }
    Some(
        words
            .filter_map(|word| word.parse().ok())
            .filter_map(Uid::new)
            .collect(),
    )
}

/// Updates `status` from an untagged SELECT response line.
pub(crate) fn apply_select_data(response: &[u8], status: &mut MailboxStatus) {
    let line = String::from_utf8_lossy(response).to_ascii_uppercase();
    let words: Vec<&str> = line.split_whitespace().collect();

    if let ["*", count, "EXISTS"] = words.as_slice() {
        if let Ok(count) = count.parse() {
            status.exists = count;
        }
        return;
    }

    if let Some(value) = bracket_value(&line, "UIDVALIDITY") {
        status.uid_validity = Some(value);
    }
    if let Some(value) = bracket_value(&line, "UIDNEXT") {
        status.uid_next = Some(value);
    }
}

fn bracket_value(line: &str, key: &str) -> Option<u32> {
    let start = line.find(&format!("[{key} "))? + key.len() + 2;
    let end = line[start..].find(']')? + start;
    line[start..end].trim().parse().ok()
}

/// Parses `* n FETCH (UID u BODY[] {len}\r\n<raw>)`.
///
/// Untagged FETCH responses without a body literal (flag updates) yield
/// `None`.
pub(crate) fn parse_fetch(response: &[u8]) -> Option<FetchedMessage> {
    if !response.starts_with(b"* ") || find_ci(response, b" FETCH (").is_none() {
        return None;
    }

    let body_pos = find_ci(response, b"BODY[]")?;
    let after_body = &response[body_pos + b"BODY[]".len()..];
    let open = after_body.iter().position(|b| !b.is_ascii_whitespace())?;
    let after_open = after_body[open..].strip_prefix(b"{")?;
    let close = after_open.iter().position(|b| *b == b'}')?;
    let length: usize = std::str::from_utf8(&after_open[..close])
        .ok()?
        .trim_end_matches('+')
        .parse()
        .ok()?;
    let literal = after_open[close + 1..].strip_prefix(b"\r\n")?;
    let raw = literal.get(..length)?;

    let uid = find_uid(&response[..body_pos]).or_else(|| find_uid(&literal[length..]))?;

    Some(FetchedMessage {
        uid,
        raw: raw.to_vec(),
    })
}

fn find_uid(segment: &[u8]) -> Option<Uid> {
    let mut offset = 0;
    while let Some(pos) = find_ci(&segment[offset..], b"UID ") {
        let start = offset + pos;
        let preceded_ok = start == 0 || matches!(segment[start - 1], b'(' | b' ');
        let digits: Vec<u8> = segment[start + 4..]
            .iter()
            .copied()
            .take_while(u8::is_ascii_digit)
            .collect();
        if preceded_ok && !digits.is_empty() {
            let value: u32 = std::str::from_utf8(&digits).ok()?.parse().ok()?;
            return Uid::new(value);
        }
        offset = start + 4;
    }
    None
}

fn find_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tagged_status() {
        assert_eq!(
            tagged_status(b"A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n", "A0001"),
            Some((Status::No, "[AUTHENTICATIONFAILED] Invalid credentials".to_string()))
        );
        assert_eq!(tagged_status(b"* OK hi\r\n", "A0001"), None);
    }

    #[test]
    fn test_check_tagged_ok() {
        let ok = vec![b"* 1 EXISTS\r\n".to_vec(), b"A0002 OK done\r\n".to_vec()];
        assert!(check_tagged_ok(&ok, "A0002").is_ok());

        let bad = vec![b"A0002 BAD syntax\r\n".to_vec()];
        assert!(matches!(check_tagged_ok(&bad, "A0002"), Err(Error::Bad(_))));

        assert!(matches!(check_tagged_ok(&[], "A0002"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_greeting() {
        assert!(check_greeting(b"* OK [CAPABILITY IMAP4rev1] Dovecot ready.\r\n").is_ok());
        assert!(matches!(check_greeting(b"* BYE overloaded\r\n"), Err(Error::Bye(_))));
    }

    #[test]
    fn test_parse_search() {
        let uids = parse_search(b"* SEARCH 4 8 15\r\n").unwrap();
        assert_eq!(uids.iter().map(|u| u.get()).collect::<Vec<_>>(), vec![4, 8, 15]);
        assert_eq!(parse_search(b"* SEARCH\r\n").unwrap(), vec![]);
        assert!(parse_search(b"* 3 EXISTS\r\n").is_none());
    }

    #[test]
    fn test_select_data() {
        let mut status = MailboxStatus::default();
        apply_select_data(b"* 23 EXISTS\r\n", &mut status);
        apply_select_data(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n", &mut status);
        apply_select_data(b"* OK [UIDNEXT 4392] Predicted next UID\r\n", &mut status);

        assert_eq!(status.exists, 23);
        assert_eq!(status.uid_validity, Some(3_857_529_045));
        assert_eq!(status.uid_next, Some(4392));
    }

    #[test]
    fn test_parse_fetch_uid_first() {
        let message = parse_fetch(b"* 2 FETCH (UID 345 BODY[] {11}\r\nSubject: x\n)\r\n").unwrap();
        assert_eq!(message.uid.get(), 345);
        assert_eq!(message.raw, b"Subject: x\n");
    }

    #[test]
    fn test_parse_fetch_uid_last() {
        let message = parse_fetch(b"* 2 FETCH (BODY[] {4}\r\nabcd UID 9)\r\n").unwrap();
        assert_eq!(message.uid.get(), 9);
        assert_eq!(message.raw, b"abcd");
    }

    #[test]
    fn test_parse_fetch_flags_only() {
        assert!(parse_fetch(b"* 2 FETCH (FLAGS (\\Seen) UID 4)\r\n").is_none());
    }

    proptest! {
        #[test]
        fn parse_fetch_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_fetch(&raw);
            let _ = parse_search(&raw);
        }
    }
}
