// src/scan.rs

//! # Cursor Scanner
//!
//! SCAN / KEYS over the key-space index and HSCAN / SSCAN over the elements
//! of one collection. Every call is one forward range read of at most
//! `count` entries; the glob is applied to what comes back.
//!
//! Cursors are opaque: `"0"` starts and ends a scan, anything else is a tag
//! byte (`k` for key scans, `e` for element scans) followed by the hex of the
//! last entry examined. Keys present for the whole scan come back exactly
//! once; keys created or deleted meanwhile may or may not.

use std::fmt;

use crate::element::{HASH_FIELDS, SET_MEMBERS};
use crate::engine::{Namespace, Snapshot};
use crate::error::{Error, Result};
use crate::expire::now_ms;
use crate::meta::{DataType, MetaState};
use crate::store::{or_default, read_slot, Store};
use crate::types::FieldValue;

const KEY_TAG: char = 'k';
const ELEMENT_TAG: char = 'e';

/// Opaque resume token returned by the scan operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn start() -> Self {
        Cursor("0".to_string())
    }

    fn resume_at(tag: char, last: &[u8]) -> Self {
        Cursor(format!("{tag}{}", hex::encode(last)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scan this cursor came from has returned everything.
    pub fn is_done(&self) -> bool {
        self.0 == "0"
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decodes `cursor` into the last position examined, `None` for a fresh scan.
fn parse_cursor(cursor: &str, tag: char) -> Result<Option<Vec<u8>>> {
    if cursor == "0" {
        return Ok(None);
    }
    let Some(body) = cursor.strip_prefix(tag) else {
        return Err(Error::InvalidCursor(format!("{cursor:?} does not belong to this scan")));
    };
    if body.is_empty() {
        return Err(Error::InvalidCursor(format!("{cursor:?} has no position")));
    }
    hex::decode(body)
        .map(Some)
        .map_err(|e| Error::InvalidCursor(format!("{cursor:?}: {e}")))
}

/// Redis-style glob over raw bytes: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and
/// `\x` escapes.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        GlobPattern {
            pattern: pattern.as_ref().to_vec(),
        }
    }

    pub fn matches_all(&self) -> bool {
        !self.pattern.is_empty() && self.pattern.iter().all(|&b| b == b'*')
    }

    /// Bytes every match must start with.
    pub fn literal_prefix(&self) -> &[u8] {
        let end = self
            .pattern
            .iter()
            .position(|b| matches!(b, b'*' | b'?' | b'[' | b'\\'))
            .unwrap_or(self.pattern.len());
        &self.pattern[..end]
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        let pattern = &self.pattern[..];
        let (mut pi, mut ti) = (0, 0);
        // position after the last `*` seen, and the text index it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while ti < text.len() {
            let step = match pattern.get(pi) {
                Some(b'*') => {
                    backtrack = Some((pi + 1, ti));
                    pi += 1;
                    continue;
                }
                Some(b'?') => Some(pi + 1),
                Some(b'[') => match_class(pattern, pi, text[ti]),
                Some(b'\\') if pi + 1 < pattern.len() => {
                    (pattern[pi + 1] == text[ti]).then_some(pi + 2)
                }
                Some(&literal) => (literal == text[ti]).then_some(pi + 1),
                None => None,
            };
            match (step, backtrack) {
                (Some(next), _) => {
                    pi = next;
                    ti += 1;
                }
                (None, Some((star_next, tried))) => {
                    pi = star_next;
                    ti = tried + 1;
                    backtrack = Some((star_next, tried + 1));
                }
                (None, None) => return false,
            }
        }
        pattern[pi..].iter().all(|&b| b == b'*')
    }
}

/// Matches `ch` against the class opening at `pattern[open]`. Returns the
/// index after the class on a match. An unterminated class runs to the end
/// of the pattern.
fn match_class(pattern: &[u8], open: usize, ch: u8) -> Option<usize> {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == ch;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&ch);
            i += 3;
        } else {
            matched |= pattern[i] == ch;
            i += 1;
        }
    }
    let end = (i + 1).min(pattern.len());
    (matched != negate).then_some(end)
}

fn any_live(snapshot: &Snapshot<'_>, key: &[u8], bits: u8, now: u64) -> Result<bool> {
    for ty in DataType::types_in(bits) {
        if let Some(slot) = read_slot(snapshot, key, ty)? {
            if slot.state(now) == MetaState::Live {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

impl Store {
    fn scan_count(&self, count: usize) -> usize {
        if count == 0 {
            self.options().scan_count.max(1)
        } else {
            count
        }
    }

    /// SCAN cursor MATCH pattern COUNT count
    ///
    /// Examines at most `count` index entries (the configured default when
    /// 0) and returns the live keys among them that match `pattern`.
    pub fn scan(
        &self,
        cursor: &str,
        pattern: impl AsRef<[u8]>,
        count: usize,
    ) -> Result<(Vec<Vec<u8>>, Cursor)> {
        let resume = parse_cursor(cursor, KEY_TAG)?;
        let _op = self.monitor().op("scan", resume.as_deref().unwrap_or_default());
        let glob = GlobPattern::new(pattern);
        let count = self.scan_count(count);

        let snapshot = self.snapshot();
        let now = now_ms();
        let mut keys = Vec::new();
        let mut examined = 0;
        let mut last: Option<Vec<u8>> = None;
        for entry in snapshot
            .prefix_range(Namespace::KeySpace, glob.literal_prefix(), resume.as_deref())
            .take(count)
        {
            let (key, bits) = entry?;
            examined += 1;
            let bits = bits.first().copied().unwrap_or(0);
            if (glob.matches_all() || glob.matches(&key)) && any_live(&snapshot, &key, bits, now)? {
                keys.push(key.to_vec());
            }
            last = Some(key.to_vec());
        }
        let next = match last {
            Some(last) if examined == count => Cursor::resume_at(KEY_TAG, &last),
            _ => Cursor::start(),
        };
        Ok((keys, next))
    }

    /// KEYS pattern: every live key matching `pattern`, in byte order.
    pub fn keys(&self, pattern: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        let pattern = pattern.as_ref();
        let mut cursor = Cursor::start();
        let mut all = Vec::new();
        loop {
            let (batch, next) = self.scan(cursor.as_str(), pattern, 0)?;
            all.extend(batch);
            if next.is_done() {
                return Ok(all);
            }
            cursor = next;
        }
    }

    /// HSCAN key cursor MATCH pattern COUNT count, matching on field names.
    /// A missing key is an empty, finished scan.
    pub fn hscan(
        &self,
        key: &[u8],
        cursor: &str,
        pattern: impl AsRef<[u8]>,
        count: usize,
    ) -> Result<(Vec<FieldValue>, Cursor)> {
        let _op = self.monitor().op("hscan", key);
        let resume = parse_cursor(cursor, ELEMENT_TAG)?;
        let glob = GlobPattern::new(pattern);
        let count = self.scan_count(count);
        let page = self.read_collection(key, DataType::Hash, |snap, meta| {
            let mut out = Vec::new();
            let mut examined = 0;
            let mut last = None;
            let entries =
                HASH_FIELDS.range_scan(snap, key, meta.version, resume.as_deref(), Some(count));
            for entry in entries {
                let (field, value) = entry?;
                examined += 1;
                if glob.matches(&field) {
                    out.push(FieldValue {
                        field: field.clone(),
                        value: value.to_vec(),
                    });
                }
                last = Some(field);
            }
            Ok((out, next_element_cursor(last, examined == count)))
        });
        or_default(page, (Vec::new(), Cursor::start()))
    }

    /// SSCAN key cursor MATCH pattern COUNT count.
    pub fn sscan(
        &self,
        key: &[u8],
        cursor: &str,
        pattern: impl AsRef<[u8]>,
        count: usize,
    ) -> Result<(Vec<Vec<u8>>, Cursor)> {
        let _op = self.monitor().op("sscan", key);
        let resume = parse_cursor(cursor, ELEMENT_TAG)?;
        let glob = GlobPattern::new(pattern);
        let count = self.scan_count(count);
        let page = self.read_collection(key, DataType::Set, |snap, meta| {
            let mut out = Vec::new();
            let mut examined = 0;
            let mut last = None;
            let entries =
                SET_MEMBERS.range_scan(snap, key, meta.version, resume.as_deref(), Some(count));
            for entry in entries {
                let (member, _) = entry?;
                examined += 1;
                if glob.matches(&member) {
                    out.push(member.clone());
                }
                last = Some(member);
            }
            Ok((out, next_element_cursor(last, examined == count)))
        });
        or_default(page, (Vec::new(), Cursor::start()))
    }
}

fn next_element_cursor(last: Option<Vec<u8>>, full_page: bool) -> Cursor {
    match last {
        Some(last) if full_page => Cursor::resume_at(ELEMENT_TAG, &last),
        _ => Cursor::start(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use anyhow::Result;
    use std::collections::BTreeSet;

    fn make_store() -> Store {
        Store::temporary(Options::default()).expect("failed to open temporary store")
    }

    #[test]
    fn glob_patterns() {
        let cases: &[(&str, &str, bool)] = &[
            ("*", "anything", true),
            ("*", "", true),
            ("h?llo", "hello", true),
            ("h?llo", "hllo", false),
            ("h[ae]llo", "hallo", true),
            ("h[ae]llo", "hillo", false),
            ("h[^e]llo", "hallo", true),
            ("h[^e]llo", "hello", false),
            ("h[a-e]llo", "hcllo", true),
            ("h[a-e]llo", "hzllo", false),
            ("[z-a]", "m", true),
            ("foo*bar", "fooXYZbar", true),
            ("foo*bar", "foobar", true),
            ("foo*bar", "foobarx", false),
            ("*a*b", "xaab", true),
            ("\\*lit", "*lit", true),
            ("\\*lit", "xlit", false),
            ("[\\]]", "]", true),
            ("user:*", "user:1", true),
            ("user:*", "usr:1", false),
        ];
        for (pattern, text, expected) in cases {
            assert_eq!(
                GlobPattern::new(pattern).matches(text.as_bytes()),
                *expected,
                "{pattern} vs {text}"
            );
        }
    }

    #[test]
    fn literal_prefix_stops_at_first_wildcard() {
        assert_eq!(GlobPattern::new("user:*").literal_prefix(), b"user:");
        assert_eq!(GlobPattern::new("a\\*b").literal_prefix(), b"a");
        assert_eq!(GlobPattern::new("*").literal_prefix(), b"");
        assert!(GlobPattern::new("**").matches_all());
    }

    #[test]
    fn cursor_parsing() {
        assert_eq!(parse_cursor("0", KEY_TAG).unwrap(), None);
        assert_eq!(parse_cursor("k6162", KEY_TAG).unwrap(), Some(b"ab".to_vec()));
        for bad in ["e6162", "kzz", "k", "12"] {
            assert!(matches!(parse_cursor(bad, KEY_TAG), Err(Error::InvalidCursor(_))), "{bad}");
        }
    }

    #[test]
    fn scan_pages_cover_every_key_once() -> Result<()> {
        let store = make_store();
        for i in 0..57 {
            store.set(format!("key:{i:03}").as_bytes(), b"v")?;
        }
        store.sadd(b"other", ["m"])?;

        for pattern in ["*", "key:*"] {
            let mut seen = BTreeSet::new();
            let mut cursor = Cursor::start();
            loop {
                let (keys, next) = store.scan(cursor.as_str(), pattern, 7)?;
                for k in keys {
                    assert!(seen.insert(k), "duplicate key in scan");
                }
                if next.is_done() {
                    break;
                }
                cursor = next;
            }
            let expected = if pattern == "*" { 58 } else { 57 };
            assert_eq!(seen.len(), expected, "pattern {pattern}");
        }
        assert!(matches!(store.scan("e00", "*", 10), Err(Error::InvalidCursor(_))));
        Ok(())
    }

    #[test]
    fn hscan_and_sscan_walk_one_collection() -> Result<()> {
        let store = make_store();
        let fields: Vec<(String, String)> =
            (0..25).map(|i| (format!("f{i:02}"), format!("v{i}"))).collect();
        store.hmset(b"h", fields.iter().map(|(f, v)| (f.as_str(), v.as_str())))?;

        let mut cursor = Cursor::start();
        let mut got = Vec::new();
        loop {
            let (page, next) = store.hscan(b"h", cursor.as_str(), "f1*", 4)?;
            got.extend(page);
            if next.is_done() {
                break;
            }
            cursor = next;
        }
        assert_eq!(got.len(), 10);
        assert_eq!(got[0].field, b"f10".to_vec());
        assert_eq!(got[0].value, b"v10".to_vec());

        store.sadd(b"s", ["a", "b", "c"])?;
        let (members, next) = store.sscan(b"s", "0", "*", 10)?;
        assert_eq!(members.len(), 3);
        assert!(next.is_done());

        let (members, next) = store.sscan(b"missing", "0", "*", 10)?;
        assert!(members.is_empty() && next.is_done());
        Ok(())
    }
}
