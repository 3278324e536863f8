//! Glob-style pattern matching (used by `KEYS`) and the `SORT` command
//! (spec §4.12).

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::{StringData, Value};

/// Matches `text` against a Redis-style glob `pattern`: `*`, `?`, `[...]`
/// (with `^` negation and `a-z` ranges), and `\` escaping.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_inner(pattern, text)
}

fn glob_match_inner(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p: Option<usize> = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star_p = Some(p);
                    star_t = t;
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next_p)) = match_class(&pattern[p..], text[t]) {
                        if matched {
                            p += next_p;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Parses and matches a `[...]` character class starting at `class[0] ==
/// '['`. Returns `(matched, length_of_class_in_pattern)`.
fn match_class(class: &[u8], c: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = class.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut found = false;
    while i < class.len() && class[i] != b']' {
        if class[i] == b'\\' && i + 1 < class.len() {
            if class[i + 1] == c {
                found = true;
            }
            i += 2;
            continue;
        }
        if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            let (lo, hi) = (class[i].min(class[i + 2]), class[i].max(class[i + 2]));
            if (lo..=hi).contains(&c) {
                found = true;
            }
            i += 3;
            continue;
        }
        if class[i] == c {
            found = true;
        }
        i += 1;
    }
    if i >= class.len() {
        return None; // unterminated class; treat '[' as a literal miss upstream
    }
    let class_len = i + 1; // consume the closing ']'
    Some((found != negate, class_len))
}

/// Substitutes the literal `*` in a BY/GET pattern with `element`, and for a
/// `pattern->field` form looks the field up in the hash named by the
/// substituted key (spec §4.12).
fn resolve_pattern(db: &Database, pattern: &[u8], element: &[u8]) -> Option<Vec<u8>> {
    if pattern == b"#" {
        return Some(element.to_vec());
    }
    let star = pattern.iter().position(|&b| b == b'*')?;
    let mut substituted = pattern[..star].to_vec();
    substituted.extend_from_slice(element);
    substituted.extend_from_slice(&pattern[star + 1..]);

    if let Some(arrow) = find_arrow(&substituted) {
        let (key, field) = (&substituted[..arrow], &substituted[arrow + 2..]);
        let value = db.peek(key)?;
        value.as_hash()?.get(field).cloned()
    } else {
        let value = db.peek(&substituted)?;
        Some(value.as_string()?.as_bytes())
    }
}

fn find_arrow(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"->")
}

/// `SORT key [BY pattern] [LIMIT off count] [GET pattern ...] [ASC|DESC]
/// [ALPHA] [STORE dest]`.
pub fn sort(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = &argv[1];
    let mut by: Option<Vec<u8>> = None;
    let mut gets: Vec<Vec<u8>> = Vec::new();
    let mut limit: Option<(usize, usize)> = None;
    let mut desc = false;
    let mut alpha = false;
    let mut store: Option<Vec<u8>> = None;

    let mut i = 2;
    while i < argv.len() {
        match argv[i].to_ascii_uppercase().as_slice() {
            b"BY" => {
                by = Some(argv.get(i + 1).ok_or(KernelError::SyntaxError)?.clone());
                i += 2;
            }
            b"GET" => {
                gets.push(argv.get(i + 1).ok_or(KernelError::SyntaxError)?.clone());
                i += 2;
            }
            b"LIMIT" => {
                let off = super::parse_i64(argv.get(i + 1).ok_or(KernelError::SyntaxError)?)?;
                let count = super::parse_i64(argv.get(i + 2).ok_or(KernelError::SyntaxError)?)?;
                if off < 0 || count < 0 {
                    return Err(KernelError::OutOfRange);
                }
                limit = Some((off as usize, count as usize));
                i += 3;
            }
            b"ASC" => {
                desc = false;
                i += 1;
            }
            b"DESC" => {
                desc = true;
                i += 1;
            }
            b"ALPHA" => {
                alpha = true;
                i += 1;
            }
            b"STORE" => {
                store = Some(argv.get(i + 1).ok_or(KernelError::SyntaxError)?.clone());
                i += 2;
            }
            _ => return Err(KernelError::SyntaxError),
        }
    }

    let mut elements: Vec<Vec<u8>> = match db.lookup_read(key, now) {
        None => Vec::new(),
        Some(v) => match &v.data {
            crate::object::ValueData::List(l) => l.iter().map(StringData::as_bytes).collect(),
            crate::object::ValueData::Set(s) => s.iter().cloned().collect(),
            crate::object::ValueData::ZSet(z) => z.skiplist().iter().map(|e| e.member.clone()).collect(),
            _ => return Err(KernelError::WrongType),
        },
    };

    let no_sort_by = by.as_deref().is_some_and(|p| !p.contains(&b'*'));
    if !no_sort_by {
        let mut keyed: Vec<(Vec<u8>, Vec<u8>)> = elements
            .into_iter()
            .map(|el| {
                let sort_key = match &by {
                    Some(pattern) => resolve_pattern(db, pattern, &el).unwrap_or_default(),
                    None => el.clone(),
                };
                (sort_key, el)
            })
            .collect();
        if alpha {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            keyed.sort_by(|a, b| {
                let (x, y) = (parse_sort_f64(&a.0), parse_sort_f64(&b.0));
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        elements = keyed.into_iter().map(|(_, el)| el).collect();
    }
    if desc {
        elements.reverse();
    }
    if let Some((off, count)) = limit {
        elements = elements.into_iter().skip(off).take(count).collect();
    }

    let output: Vec<Vec<u8>> = if gets.is_empty() {
        elements
    } else {
        elements
            .into_iter()
            .flat_map(|el| {
                gets.iter()
                    .map(|pattern| resolve_pattern(db, pattern, &el).unwrap_or_default())
                    .collect::<Vec<_>>()
            })
            .collect()
    };

    match store {
        Some(dest) => {
            let len = output.len() as i64;
            if output.is_empty() {
                db.remove(&dest);
            } else {
                let list: std::collections::VecDeque<StringData> =
                    output.into_iter().map(StringData::from_bytes).collect();
                db.set(dest, Value::list(list));
            }
            wrote(Reply::Integer(len))
        }
        None => ok(Reply::Multi(output.into_iter().map(Reply::bulk).collect())),
    }
}

fn parse_sort_f64(bytes: &[u8]) -> f64 {
    std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()).unwrap_or(f64::NEG_INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::DbIndex;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(glob_match(b"foo*", b"foobar"));
        assert!(!glob_match(b"foo*", b"barfoo"));
        assert!(glob_match(b"*", b"anything"));
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
    }

    #[test]
    fn glob_character_class_and_negation() {
        assert!(glob_match(b"[a-c]at", b"bat"));
        assert!(!glob_match(b"[^a-c]at", b"bat"));
    }

    #[test]
    fn sort_numeric_ascending_by_default() {
        let mut d = Database::new(DbIndex::new(0));
        let list: std::collections::VecDeque<StringData> =
            ["3", "1", "2"].into_iter().map(|s| StringData::from_bytes(s.as_bytes().to_vec())).collect();
        d.set(b"l".to_vec(), Value::list(list));
        let r = sort(&mut d, &[b"SORT".to_vec(), b"l".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(
            r.reply,
            Reply::Multi(vec![Reply::bulk(*b"1"), Reply::bulk(*b"2"), Reply::bulk(*b"3")])
        );
    }

    #[test]
    fn sort_store_writes_list_and_deletes_dest_when_empty() {
        let mut d = Database::new(DbIndex::new(0));
        let list: std::collections::VecDeque<StringData> =
            ["3", "1"].into_iter().map(|s| StringData::from_bytes(s.as_bytes().to_vec())).collect();
        d.set(b"l".to_vec(), Value::list(list));
        sort(
            &mut d,
            &[b"SORT".to_vec(), b"l".to_vec(), b"STORE".to_vec(), b"dst".to_vec()],
            UnixTime::ZERO,
        )
        .unwrap();
        assert!(d.contains(b"dst"));
    }
}
