//! # vesper-config: directive-file configuration for Vesper
//!
//! Parses the directive file described in spec §6 — one recognized
//! keyword per whitespace-split line, `#` comments, recursive `include` —
//! into a [`ServerConfig`] the rest of the workspace reads startup
//! tunables from. `CONFIG GET`/`CONFIG SET` (spec §4.13) reads and writes
//! the same struct at runtime through [`ServerConfig::get`]/[`ServerConfig::set`],
//! so a directive present at startup and a later `CONFIG SET` always
//! converge on one representation.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{parse_directives, Directive};

use std::path::{Path, PathBuf};

/// `appendfsync` policy (spec §4.6/§6). Kept as a distinct small enum
/// here, rather than importing `vesper-persistence`'s, so this crate has
/// no dependency on the persistence layer — `vesper-server` converts
/// between the two at the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendFsync {
    No,
    EverySec,
    Always,
}

impl AppendFsync {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "no" => Some(Self::No),
            "everysec" => Some(Self::EverySec),
            "always" => Some(Self::Always),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::EverySec => "everysec",
            Self::Always => "always",
        }
    }
}

/// `loglevel` directive (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "verbose" => Some(Self::Verbose),
            "notice" => Some(Self::Notice),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Notice => "notice",
            Self::Warning => "warning",
        }
    }

    /// The `tracing` filter directive this level corresponds to, so
    /// `vesper`'s startup sequencing can build an `EnvFilter` from it.
    pub const fn tracing_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Verbose => "info",
            Self::Notice => "warn",
            Self::Warning => "error",
        }
    }
}

/// One `save SEC CHG` rule (spec §4.6): trigger a `BGSAVE` when at least
/// `changes` writes have happened in the last `seconds` seconds since the
/// last successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub seconds: u64,
    pub changes: u64,
}

/// Where to write log output (spec §6's `logfile PATH|stdout`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    File(PathBuf),
}

/// Every recognized configuration directive (spec §6), with the defaults
/// a conforming server starts with when a directive is absent.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub timeout_secs: u64,
    pub save_rules: Vec<SaveRule>,
    pub dir: PathBuf,
    pub loglevel: LogLevel,
    pub logfile: LogDestination,
    pub databases: u32,
    pub maxclients: u32,
    pub maxmemory: u64,
    pub slaveof: Option<(String, u16)>,
    pub masterauth: Option<String>,
    pub glueoutputbuf: bool,
    pub rdbcompression: bool,
    pub activerehashing: bool,
    pub daemonize: bool,
    pub appendonly: bool,
    pub appendfilename: PathBuf,
    pub appendfsync: AppendFsync,
    pub requirepass: Option<String>,
    pub pidfile: Option<PathBuf>,
    pub dbfilename: PathBuf,
    pub vm_enabled: bool,
    pub vm_swap_file: PathBuf,
    pub vm_max_memory: u64,
    pub vm_page_size: u64,
    pub vm_pages: u64,
    pub vm_max_threads: u32,
    pub hash_max_zipmap_entries: usize,
    pub hash_max_zipmap_value: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6380,
            bind: "127.0.0.1".to_string(),
            timeout_secs: 0,
            save_rules: vec![
                SaveRule { seconds: 900, changes: 1 },
                SaveRule { seconds: 300, changes: 10 },
                SaveRule { seconds: 60, changes: 10_000 },
            ],
            dir: PathBuf::from("."),
            loglevel: LogLevel::Notice,
            logfile: LogDestination::Stdout,
            databases: 16,
            maxclients: 0,
            maxmemory: 0,
            slaveof: None,
            masterauth: None,
            glueoutputbuf: false,
            rdbcompression: true,
            activerehashing: true,
            daemonize: false,
            appendonly: false,
            appendfilename: PathBuf::from("appendonly.aof"),
            appendfsync: AppendFsync::EverySec,
            requirepass: None,
            pidfile: None,
            dbfilename: PathBuf::from("dump.rdb"),
            vm_enabled: false,
            vm_swap_file: PathBuf::from("/tmp/vesper.swap"),
            vm_max_memory: 0,
            vm_page_size: 32,
            vm_pages: 1 << 20,
            vm_max_threads: 4,
            hash_max_zipmap_entries: 64,
            hash_max_zipmap_value: 512,
        }
    }
}

impl ServerConfig {
    /// Loads and applies every directive from `path` (or stdin if `path`
    /// is `-`), starting from [`ServerConfig::default`].
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let directives = loader::load_directives(path)?;
        let mut config = Self::default();
        for directive in &directives {
            config.apply(directive)?;
        }
        Ok(config)
    }

    /// Applies every directive parsed from an in-memory string. Used by
    /// `CONFIG SET` (which reuses the same tokenizer for a single line)
    /// and by tests.
    pub fn apply_str(&mut self, source: &str) -> Result<(), ConfigError> {
        for directive in loader::parse_directives("<config-set>", source)? {
            self.apply(&directive)?;
        }
        Ok(())
    }

    fn apply(&mut self, d: &Directive) -> Result<(), ConfigError> {
        let bad = |message: &str| ConfigError::Syntax {
            path: d.source.clone(),
            line: d.line,
            message: message.to_string(),
        };
        match d.name.as_str() {
            "port" => self.port = parse_u16(d, bad)?,
            "bind" => self.bind = first_arg(d, bad)?.to_string(),
            "timeout" => self.timeout_secs = parse_u64(d, bad)?,
            "save" => {
                if d.args.is_empty() {
                    self.save_rules.clear();
                } else if d.args.len() == 2 {
                    let seconds = d.args[0].parse().map_err(|_| bad("save: bad seconds"))?;
                    let changes = d.args[1].parse().map_err(|_| bad("save: bad changes"))?;
                    self.save_rules.push(SaveRule { seconds, changes });
                } else {
                    return Err(bad("save requires exactly 0 or 2 arguments"));
                }
            }
            "dir" => self.dir = PathBuf::from(first_arg(d, bad)?),
            "loglevel" => {
                self.loglevel =
                    LogLevel::parse(first_arg(d, bad)?).ok_or_else(|| bad("unknown loglevel"))?;
            }
            "logfile" => {
                let v = first_arg(d, bad)?;
                self.logfile = if v == "stdout" {
                    LogDestination::Stdout
                } else {
                    LogDestination::File(PathBuf::from(v))
                };
            }
            "databases" => self.databases = parse_u32(d, bad)?,
            "maxclients" => self.maxclients = parse_u32(d, bad)?,
            "maxmemory" => self.maxmemory = parse_memory(first_arg(d, bad)?).ok_or_else(|| bad("bad maxmemory size"))?,
            "slaveof" => {
                if d.args.len() != 2 {
                    return Err(bad("slaveof requires HOST PORT"));
                }
                let port: u16 = d.args[1].parse().map_err(|_| bad("slaveof: bad port"))?;
                self.slaveof = Some((d.args[0].clone(), port));
            }
            "masterauth" => self.masterauth = Some(first_arg(d, bad)?.to_string()),
            "glueoutputbuf" => self.glueoutputbuf = parse_bool(d, bad)?,
            "rdbcompression" => self.rdbcompression = parse_bool(d, bad)?,
            "activerehashing" => self.activerehashing = parse_bool(d, bad)?,
            "daemonize" => self.daemonize = parse_bool(d, bad)?,
            "appendonly" => self.appendonly = parse_bool(d, bad)?,
            "appendfilename" => self.appendfilename = PathBuf::from(first_arg(d, bad)?),
            "appendfsync" => {
                self.appendfsync = AppendFsync::parse(first_arg(d, bad)?)
                    .ok_or_else(|| bad("unknown appendfsync policy"))?;
            }
            "requirepass" => self.requirepass = Some(first_arg(d, bad)?.to_string()),
            "pidfile" => self.pidfile = Some(PathBuf::from(first_arg(d, bad)?)),
            "dbfilename" => self.dbfilename = PathBuf::from(first_arg(d, bad)?),
            "vm-enabled" => self.vm_enabled = parse_bool(d, bad)?,
            "vm-swap-file" => self.vm_swap_file = PathBuf::from(first_arg(d, bad)?),
            "vm-max-memory" => self.vm_max_memory = parse_memory(first_arg(d, bad)?).ok_or_else(|| bad("bad vm-max-memory size"))?,
            "vm-page-size" => self.vm_page_size = parse_u64(d, bad)?,
            "vm-pages" => self.vm_pages = parse_u64(d, bad)?,
            "vm-max-threads" => self.vm_max_threads = parse_u32(d, bad)?,
            "hash-max-zipmap-entries" => self.hash_max_zipmap_entries = parse_u64(d, bad)? as usize,
            "hash-max-zipmap-value" => self.hash_max_zipmap_value = parse_u64(d, bad)? as usize,
            other => {
                tracing::warn!(directive = other, source = %d.source, line = d.line, "ignoring unrecognized configuration directive");
            }
        }
        Ok(())
    }

    /// `CONFIG GET <glob>` (spec §4.13): every tunable whose name matches
    /// `pattern` (a simple glob, `*`/`?`), as `(name, value)` pairs in the
    /// rendered form a directive file would accept.
    pub fn get(&self, pattern: &str) -> Vec<(String, String)> {
        self.entries()
            .into_iter()
            .filter(|(name, _)| glob_match(pattern, name))
            .collect()
    }

    /// `CONFIG SET name value` (spec §4.13): applies one tunable by name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let directive = Directive {
            name: name.to_ascii_lowercase(),
            args: vec![value.to_string()],
            source: "<config-set>".to_string(),
            line: 0,
        };
        self.apply(&directive)
    }

    fn entries(&self) -> Vec<(String, String)> {
        vec![
            ("port".into(), self.port.to_string()),
            ("bind".into(), self.bind.clone()),
            ("timeout".into(), self.timeout_secs.to_string()),
            ("dir".into(), self.dir.display().to_string()),
            ("loglevel".into(), self.loglevel.name().to_string()),
            (
                "logfile".into(),
                match &self.logfile {
                    LogDestination::Stdout => "stdout".to_string(),
                    LogDestination::File(p) => p.display().to_string(),
                },
            ),
            ("databases".into(), self.databases.to_string()),
            ("maxclients".into(), self.maxclients.to_string()),
            ("maxmemory".into(), self.maxmemory.to_string()),
            ("masterauth".into(), self.masterauth.clone().unwrap_or_default()),
            ("glueoutputbuf".into(), yes_no(self.glueoutputbuf)),
            ("rdbcompression".into(), yes_no(self.rdbcompression)),
            ("activerehashing".into(), yes_no(self.activerehashing)),
            ("daemonize".into(), yes_no(self.daemonize)),
            ("appendonly".into(), yes_no(self.appendonly)),
            ("appendfilename".into(), self.appendfilename.display().to_string()),
            ("appendfsync".into(), self.appendfsync.name().to_string()),
            ("requirepass".into(), self.requirepass.clone().unwrap_or_default()),
            ("dbfilename".into(), self.dbfilename.display().to_string()),
            ("vm-enabled".into(), yes_no(self.vm_enabled)),
            ("vm-swap-file".into(), self.vm_swap_file.display().to_string()),
            ("vm-max-memory".into(), self.vm_max_memory.to_string()),
            ("vm-page-size".into(), self.vm_page_size.to_string()),
            ("vm-pages".into(), self.vm_pages.to_string()),
            ("vm-max-threads".into(), self.vm_max_threads.to_string()),
            ("hash-max-zipmap-entries".into(), self.hash_max_zipmap_entries.to_string()),
            ("hash-max-zipmap-value".into(), self.hash_max_zipmap_value.to_string()),
        ]
    }
}

fn yes_no(b: bool) -> String {
    if b { "yes".to_string() } else { "no".to_string() }
}

fn first_arg<'a>(d: &'a Directive, bad: impl Fn(&str) -> ConfigError) -> Result<&'a str, ConfigError> {
    d.args.first().map(String::as_str).ok_or_else(|| bad("missing argument"))
}

fn parse_bool(d: &Directive, bad: impl Fn(&str) -> ConfigError) -> Result<bool, ConfigError> {
    match first_arg(d, &bad)? {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(bad("expected yes or no")),
    }
}

fn parse_u16(d: &Directive, bad: impl Fn(&str) -> ConfigError) -> Result<u16, ConfigError> {
    first_arg(d, &bad)?.parse().map_err(|_| bad("expected an integer"))
}

fn parse_u32(d: &Directive, bad: impl Fn(&str) -> ConfigError) -> Result<u32, ConfigError> {
    first_arg(d, &bad)?.parse().map_err(|_| bad("expected an integer"))
}

fn parse_u64(d: &Directive, bad: impl Fn(&str) -> ConfigError) -> Result<u64, ConfigError> {
    first_arg(d, &bad)?.parse().map_err(|_| bad("expected an integer"))
}

/// Parses a memory size with the suffixes of spec §6: `b, k, kb, m, mb, g,
/// gb` (case-insensitive), `k`/`m`/`g` are powers of 1000, `kb`/`mb`/`gb`
/// are powers of 1024 — matching the distinction the spec draws between
/// the two suffix families.
fn parse_memory(s: &str) -> Option<u64> {
    let lower = s.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix('k') {
        (n, 1000)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 1_000_000)
    } else if let Some(n) = lower.strip_suffix('g') {
        (n, 1_000_000_000)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1)
    } else {
        (lower.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

/// Minimal glob matcher for `CONFIG GET <pattern>`: `*` matches any run of
/// characters, `?` matches exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_fallbacks() {
        let config = ServerConfig::default();
        assert_eq!(config.databases, 16);
        assert_eq!(config.timeout_secs, 0);
        assert!(!config.vm_enabled);
        assert_eq!(config.hash_max_zipmap_entries, 64);
    }

    #[test]
    fn applies_directives_from_a_string() {
        let mut config = ServerConfig::default();
        config
            .apply_str("port 7777\nmaxmemory 100mb\nappendonly yes\nsave 10 1\nsave 20 2\n")
            .unwrap();
        assert_eq!(config.port, 7777);
        assert_eq!(config.maxmemory, 100 * 1024 * 1024);
        assert!(config.appendonly);
        assert_eq!(config.save_rules.len(), 5); // 3 defaults + 2 appended
    }

    #[test]
    fn empty_save_directive_clears_rules() {
        let mut config = ServerConfig::default();
        config.apply_str("save\n").unwrap();
        assert!(config.save_rules.is_empty());
    }

    #[test]
    fn memory_suffixes_distinguish_1000_from_1024_bases() {
        assert_eq!(parse_memory("1k"), Some(1_000));
        assert_eq!(parse_memory("1kb"), Some(1_024));
        assert_eq!(parse_memory("2gb"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("garbage"), None);
    }

    #[test]
    fn config_get_matches_glob_and_config_set_round_trips() {
        let mut config = ServerConfig::default();
        config.set("maxmemory", "256mb").unwrap();
        let hits = config.get("maxmemor*");
        assert_eq!(hits, vec![("maxmemory".to_string(), (256 * 1024 * 1024).to_string())]);
    }

    #[test]
    fn unknown_directive_is_ignored_not_fatal() {
        let mut config = ServerConfig::default();
        assert!(config.apply_str("totally-made-up-directive yes\n").is_ok());
    }
}
