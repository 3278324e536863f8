//! Directive-file tokenizer (spec §6).
//!
//! The config file is one directive per whitespace-split line; `#` begins
//! a comment that runs to end of line; `include <path>` splices another
//! file's directives in place, recursively. This is deliberately not
//! TOML/YAML — the wire format here is a bespoke one-directive-per-line
//! grammar (inherited unchanged from the system this spec describes), so a
//! hand-rolled tokenizer is the right tool rather than a generic format
//! crate.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// One parsed directive line: the directive name (lowercased) and its
/// whitespace-split, quote-aware arguments.
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub source: String,
    pub line: usize,
}

const MAX_INCLUDE_DEPTH: usize = 16;

/// Reads `path` (or stdin, when `path == "-"`) and every file it
/// transitively `include`s, in order, as a flat list of directives.
pub fn load_directives(path: &Path) -> Result<Vec<Directive>, ConfigError> {
    let mut out = Vec::new();
    load_into(path, &mut out, 0)?;
    Ok(out)
}

/// Parses directives from an in-memory string, for tests and `CONFIG`
/// directive-string round-trips. `include` is still honored against the
/// filesystem relative to the current directory.
pub fn parse_directives(source_name: &str, text: &str) -> Result<Vec<Directive>, ConfigError> {
    let mut out = Vec::new();
    parse_into(source_name, text, &mut out, 0)?;
    Ok(out)
}

fn load_into(path: &Path, out: &mut Vec<Directive>, depth: usize) -> Result<(), ConfigError> {
    if depth >= MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeCycle(path.to_path_buf()));
    }
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        buf
    } else {
        fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?
    };
    parse_into(&path.display().to_string(), &text, out, depth)
}

fn parse_into(
    source: &str,
    text: &str,
    out: &mut Vec<Directive>,
    depth: usize,
) -> Result<(), ConfigError> {
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let tokens = split_args(line).map_err(|message| ConfigError::Syntax {
            path: source.to_string(),
            line: line_no,
            message,
        })?;
        let Some((name, args)) = tokens.split_first() else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        if name == "include" {
            let Some(include_path) = args.first() else {
                return Err(ConfigError::Syntax {
                    path: source.to_string(),
                    line: line_no,
                    message: "include requires a path argument".to_string(),
                });
            };
            load_into(&PathBuf::from(include_path), out, depth + 1)?;
            continue;
        }
        out.push(Directive {
            name,
            args: args.to_vec(),
            source: source.to_string(),
            line: line_no,
        });
    }
    Ok(())
}

/// Strips a `#`-led comment, respecting double-quoted segments so a `#`
/// inside a quoted value (e.g. a password) isn't mistaken for one.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Splits a line on whitespace, honoring double-quoted arguments so a
/// value like `requirepass "has spaces"` parses as one argument.
fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut current = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => current.push(c),
                    None => return Err("unterminated quoted string".to_string()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                current.push(c);
                chars.next();
            }
        }
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_simple_directives() {
        let directives = parse_directives("<test>", "port 6390\nbind 0.0.0.0\n").unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].name, "port");
        assert_eq!(directives[0].args, vec!["6390"]);
        assert_eq!(directives[1].name, "bind");
    }

    #[test]
    fn strips_comments_and_blank_lines() {
        let directives = parse_directives(
            "<test>",
            "# a comment\n\nport 6390 # trailing comment\n   \n",
        )
        .unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].args, vec!["6390"]);
    }

    #[test]
    fn quoted_values_preserve_spaces_and_hashes() {
        let directives = parse_directives("<test>", r#"requirepass "a b#c""#).unwrap();
        assert_eq!(directives[0].args, vec!["a b#c"]);
    }

    #[test]
    fn include_splices_directives_from_another_file() {
        let dir = tempdir().unwrap();
        let included = dir.path().join("extra.conf");
        fs::write(&included, "maxclients 64\n").unwrap();
        let main = dir.path().join("main.conf");
        fs::write(
            &main,
            format!("port 1234\ninclude {}\n", included.display()),
        )
        .unwrap();

        let directives = load_directives(&main).unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].name, "port");
        assert_eq!(directives[1].name, "maxclients");
    }
}
