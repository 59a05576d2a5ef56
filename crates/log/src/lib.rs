//! Process-wide logger shared by every unityd crate.
//!
//! Records go to stderr as text or JSON lines. A default level applies to every
//! target unless a directive names a more specific module prefix, for example
//! `unityd_chainstate::store=debug`. Tests can switch on a bounded capture
//! buffer and inspect what was logged.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Level override for every target under `target` (a module path prefix).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directive {
    pub target: String,
    pub level: Level,
}

/// Parses `target=level` pairs separated by commas.
pub fn parse_directives(raw: &str) -> Result<Vec<Directive>, String> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (target, level) = part
            .split_once('=')
            .ok_or_else(|| format!("invalid log directive '{part}' (expected target=level)"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(format!("invalid log directive '{part}' (empty target)"));
        }
        let level = Level::parse(level)
            .ok_or_else(|| format!("invalid level in log directive '{part}'"))?;
        out.push(Directive {
            target: target.to_string(),
            level,
        });
    }
    Ok(out)
}

/// Level that applies to `target`: the longest matching directive, else `default`.
pub fn level_for(directives: &[Directive], default: Level, target: &str) -> Level {
    let mut best: Option<&Directive> = None;
    for directive in directives {
        if !target_matches(&directive.target, target) {
            continue;
        }
        match best {
            Some(current) if current.target.len() >= directive.target.len() => {}
            _ => best = Some(directive),
        }
    }
    best.map(|directive| directive.level).unwrap_or(default)
}

fn target_matches(prefix: &str, target: &str) -> bool {
    match target.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with("::"),
        None => false,
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    pub directives: Vec<Directive>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
            directives: Vec::new(),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);
static LOG_DIRECTIVES: OnceLock<RwLock<Vec<Directive>>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

/// Ring buffer of recent records, off until `enable_capture` is called.
struct Capture {
    enabled: AtomicBool,
    capacity: AtomicUsize,
    records: OnceLock<Mutex<VecDeque<CapturedLog>>>,
}

impl Capture {
    const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            capacity: AtomicUsize::new(0),
            records: OnceLock::new(),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn push(&self, record: CapturedLog) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let Some(records) = self.records.get() else {
            return;
        };
        let Ok(mut records) = records.lock() else {
            return;
        };
        records.push_back(record);
        while records.len() > capacity {
            records.pop_front();
        }
    }
}

static CAPTURE: Capture = Capture::new();

pub fn init(config: LogConfig) {
    let max = config
        .directives
        .iter()
        .map(|directive| directive.level)
        .fold(config.level, Level::max);
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_MAX_LEVEL.store(max as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
    let directives = LOG_DIRECTIVES.get_or_init(|| RwLock::new(Vec::new()));
    if let Ok(mut guard) = directives.write() {
        *guard = config.directives;
    }
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    CAPTURE.capacity.store(capacity, Ordering::Relaxed);
    CAPTURE
        .records
        .get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
    CAPTURE.enabled.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    CAPTURE.enabled.store(false, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    if let Some(Ok(mut records)) = CAPTURE.records.get().map(Mutex::lock) {
        records.clear();
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// The most recent `limit` captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    match CAPTURE.records.get().map(Mutex::lock) {
        Some(Ok(records)) => {
            let skip = records.len().saturating_sub(limit);
            records.iter().skip(skip).cloned().collect()
        }
        _ => Vec::new(),
    }
}

/// Cheap pre-check against the most verbose level any target may use.
pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_MAX_LEVEL.load(Ordering::Relaxed)
}

pub fn enabled_for(level: Level, target: &str) -> bool {
    if !enabled(level) {
        return false;
    }
    let default = Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed));
    match LOG_DIRECTIVES.get().map(RwLock::read) {
        Some(Ok(directives)) if !directives.is_empty() => {
            level <= level_for(&directives, default, target)
        }
        _ => level <= default,
    }
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled_for(level, target) {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
    let json = LOG_FORMAT.load(Ordering::Relaxed) == Format::Json as u8;

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        let _ = if json {
            let record = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "target": target,
                "file": file,
                "line": line,
                "msg": args.to_string(),
            });
            writeln!(out, "{record}")
        } else if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
            let ts = Timestamp {
                unix_seconds: now.as_secs(),
                millis: now.subsec_millis(),
            };
            writeln!(out, "{ts} {} {target}: {args}", level.as_str())
        } else {
            writeln!(out, "{} {target}: {args}", level.as_str())
        };
    }

    if CAPTURE.is_enabled() {
        CAPTURE.push(CapturedLog {
            ts_ms,
            level,
            target,
            file,
            line,
            msg: args.to_string(),
        });
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled_for($level, module_path!()) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z",
            millis = self.millis
        )
    }
}

fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    // Howard Hinnant's civil_from_days (public domain).
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("nope"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("nope"), None);
    }

    #[test]
    fn parse_directive_list() {
        let directives =
            parse_directives("unityd_chainstate=info, unityd_chainstate::store=debug,")
                .expect("directives");
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[1].target, "unityd_chainstate::store");
        assert_eq!(directives[1].level, Level::Debug);

        assert!(parse_directives("unityd_chainstate").is_err());
        assert!(parse_directives("=info").is_err());
        assert!(parse_directives("store=loud").is_err());
    }

    #[test]
    fn longest_prefix_wins() {
        let directives = parse_directives("unityd_chainstate=warn,unityd_chainstate::store=trace")
            .expect("directives");
        assert_eq!(
            level_for(&directives, Level::Info, "unityd_chainstate::store"),
            Level::Trace
        );
        assert_eq!(
            level_for(&directives, Level::Info, "unityd_chainstate::store::integrity"),
            Level::Trace
        );
        assert_eq!(
            level_for(&directives, Level::Info, "unityd_chainstate::chain"),
            Level::Warn
        );
        assert_eq!(
            level_for(&directives, Level::Info, "unityd_chainstate_extra"),
            Level::Info
        );
        assert_eq!(level_for(&directives, Level::Error, "unityd"), Level::Error);
    }

    #[test]
    fn capture_keeps_the_newest_records() {
        set_stderr_enabled(false);
        enable_capture(2);
        clear_captured_logs();
        log_info!("first");
        log_warn!("second {}", 2);
        log_error!("third");
        let records = capture_snapshot(10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].msg, "second 2");
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[1].msg, "third");
        assert_eq!(capture_snapshot(1)[0].msg, "third");
        clear_captured_logs();
        assert!(capture_snapshot(10).is_empty());
        disable_capture();
    }

    #[test]
    fn timestamp_renders_utc() {
        let ts = Timestamp {
            unix_seconds: 86_400 * 365 + 3_661,
            millis: 7,
        };
        assert_eq!(ts.to_string(), "1971-01-01T01:01:01.007Z");
    }
}
