use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use unityd_chainstate::maintenance::{
    check_integrity, dump_blocks, prune_and_correct, redo_main_chain_import, revert_to,
};
use unityd_chainstate::{
    Blockchain, BlockchainOptions, ChainError, HeaderValidators, IntegrityCheckResult,
    KvWorldState, RevertStatus, TransferExecutor,
};
use unityd_consensus::{chain_params, Network};
use unityd_log::{self as logging, log_error, log_info, log_warn, Format, Level};
use unityd_primitives::hex::short_hex;
use unityd_storage::fjall::{FjallOptions, FjallStore};
use unityd_storage::memory::MemoryStore;
use unityd_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const CONF_FILE_NAME: &str = "unityd.conf";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DB_CACHE_MB: u64 = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Command {
    Status,
    Revert(i64),
    DumpBlocks(u64),
    PruneAndCorrect,
    RedoImport(u64),
    DbIntegrity,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Revert(_) => "revert",
            Command::DumpBlocks(_) => "dump-blocks",
            Command::PruneAndCorrect => "prune-and-correct",
            Command::RedoImport(_) => "redo-import",
            Command::DbIntegrity => "db-integrity",
        }
    }
}

#[derive(Clone, Debug)]
struct Config {
    backend: Backend,
    data_dir: PathBuf,
    network: Network,
    log_level: Level,
    log_format: Format,
    log_timestamps: bool,
    log_filter: Vec<logging::Directive>,
    db_cache_bytes: u64,
    check_integrity: bool,
    command: Command,
}

#[derive(Debug)]
enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub(crate) enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl Store {
    fn disk_space(&self) -> Option<u64> {
        match self {
            Store::Fjall(store) => Some(store.disk_space()),
            Store::Memory(_) => None,
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.flush(),
            Store::Fjall(store) => store.flush(),
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another unityd instance may be running); lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

pub fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("unityd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(Instant::now(), config),
    }
}

fn run_with_config(start_time: Instant, config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
        directives: config.log_filter.clone(),
    });

    log_info!(
        "Startup: {} (backend={:?}, network={}, data_dir={})",
        config.command.name(),
        config.backend,
        config.network.as_str(),
        config.data_dir.display()
    );

    let data_dir = &config.data_dir;
    fs::create_dir_all(data_dir).map_err(|err| err.to_string())?;
    let _data_dir_lock = lock_data_dir(data_dir)?;

    let store = Arc::new(open_store(config.backend, &data_dir.join("db"), &config)?);
    let disk_space = store.disk_space();
    let params = chain_params(config.network);
    let state = KvWorldState::open(Arc::clone(&store)).map_err(|err| err.to_string())?;
    let chain = Blockchain::open(
        store,
        Box::new(state),
        TransferExecutor,
        HeaderValidators::standard(&params),
        params,
        BlockchainOptions {
            check_integrity: config.check_integrity,
        },
    )
    .map_err(describe_chain_error)?;
    log_info!(
        "Chain opened at block {} in {}ms",
        chain.best_block_number(),
        start_time.elapsed().as_millis()
    );

    let outcome = match config.command {
        Command::Status => {
            let best = chain.best_block().map_err(describe_chain_error)?;
            let total = chain.total_difficulty().map_err(describe_chain_error)?;
            println!(
                "best block {}/{} total difficulty {}",
                best.number(),
                short_hex(&best.hash()),
                total
            );
            if let Some(bytes) = disk_space {
                println!("database size {bytes} bytes");
            }
            Ok(())
        }
        Command::Revert(height) => {
            let status = revert_to(&chain, height).map_err(describe_chain_error)?;
            report_revert_status("revert", status)
        }
        Command::DumpBlocks(count) => {
            match dump_blocks(chain.store(), count, data_dir).map_err(describe_chain_error)? {
                Some(path) => println!("{}", path.display()),
                None => println!("Empty database. Nothing to do."),
            }
            Ok(())
        }
        Command::PruneAndCorrect => prune_and_correct(&chain).map_err(describe_chain_error),
        Command::RedoImport(start) => {
            let status = redo_main_chain_import(&chain, start).map_err(describe_chain_error)?;
            report_revert_status("redo-import", status)
        }
        Command::DbIntegrity => {
            let result = check_integrity(chain.store()).map_err(describe_chain_error)?;
            println!("{}", result.as_str());
            match result {
                IntegrityCheckResult::Correct | IntegrityCheckResult::Fixed => Ok(()),
                other => Err(format!("block index integrity check failed: {}", other.as_str())),
            }
        }
    };

    if let Err(err) = chain.store().flush() {
        log_warn!("Final flush failed: {}", err);
    }
    log_info!(
        "{} finished in {}ms",
        config.command.name(),
        start_time.elapsed().as_millis()
    );
    outcome
}

fn report_revert_status(label: &str, status: RevertStatus) -> Result<(), String> {
    println!("{}", status.as_str());
    match status {
        RevertStatus::Success => Ok(()),
        other => Err(format!("{label} finished with {}", other.as_str())),
    }
}

fn describe_chain_error(err: ChainError) -> String {
    if let ChainError::FatalVm(_) = err {
        log_error!("Shutting down after a fatal execution error: {}", err);
    }
    err.to_string()
}

fn open_store(backend: Backend, db_path: &Path, config: &Config) -> Result<Store, String> {
    match backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let options = FjallOptions {
                cache_bytes: Some(config.db_cache_bytes),
                write_buffer_bytes: None,
                journal_bytes: None,
                memtable_bytes: None,
                fsync_ms: None,
                durable_batches: config.command != Command::Status,
            };
            FjallStore::open_with_options(db_path, options)
                .map(Store::Fjall)
                .map_err(|err| format!("failed to open {}: {err}", db_path.display()))
        }
    }
}

fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut log_level = Level::Info;
    let mut log_level_set = false;
    let mut log_format = Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut log_filter: Vec<logging::Directive> = Vec::new();
    let mut log_filter_set = false;
    let mut db_cache_mb = DEFAULT_DB_CACHE_MB;
    let mut db_cache_set = false;
    let mut check_integrity = false;
    let mut check_integrity_set = false;
    let mut command: Option<Command> = None;

    let mut args = args.into_iter().peekable();
    if let Some(first) = args.peek().cloned() {
        match first.as_str() {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            "status" => {
                command = Some(Command::Status);
                let _ = args.next();
            }
            "revert" => {
                let _ = args.next();
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing height for revert\n{}", usage()))?;
                let height = value
                    .parse::<i64>()
                    .map_err(|_| format!("invalid height '{value}'\n{}", usage()))?;
                command = Some(Command::Revert(height));
            }
            "dump-blocks" => {
                let _ = args.next();
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing level count for dump-blocks\n{}", usage()))?;
                let count = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid level count '{value}'\n{}", usage()))?;
                command = Some(Command::DumpBlocks(count));
            }
            "prune-and-correct" => {
                command = Some(Command::PruneAndCorrect);
                let _ = args.next();
            }
            "redo-import" => {
                let _ = args.next();
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing start height for redo-import\n{}", usage()))?;
                let start = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid start height '{value}'\n{}", usage()))?;
                command = Some(Command::RedoImport(start));
            }
            "db-integrity" => {
                command = Some(Command::DbIntegrity);
                let _ = args.next();
            }
            _ => {}
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--log-filter" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-filter\n{}", usage()))?;
                log_filter = logging::parse_directives(&value)
                    .map_err(|err| format!("invalid log filter: {err}\n{}", usage()))?;
                log_filter_set = true;
            }
            "--no-log-timestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--db-cache-mb" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --db-cache-mb\n{}", usage()))?;
                db_cache_mb = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid db cache size '{value}'\n{}", usage()))?;
                db_cache_set = true;
            }
            "--check-integrity" => {
                check_integrity = true;
                check_integrity_set = true;
            }
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    let conf_file = match &conf_path {
        Some(path) => path.clone(),
        None => data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
            .join(CONF_FILE_NAME),
    };
    if let Some(conf) = load_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last()).cloned();
        let invalid = |key: &str, raw: &str| {
            format!("invalid {key} value '{raw}' in {}", conf_file.display())
        };

        if data_dir.is_none() {
            if let Some(value) = last("datadir") {
                data_dir = Some(PathBuf::from(value));
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(&raw).ok_or_else(|| invalid("backend", &raw))?;
            }
        }
        if !network_set {
            if let Some(raw) = last("network") {
                network = Network::parse(&raw).ok_or_else(|| invalid("network", &raw))?;
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log_level = Level::parse(&raw).ok_or_else(|| invalid("loglevel", &raw))?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format = Format::parse(&raw).ok_or_else(|| invalid("logformat", &raw))?;
            }
        }
        if !log_timestamps_set {
            if let Some(raw) = last("logtimestamps") {
                log_timestamps =
                    parse_conf_bool(&raw).ok_or_else(|| invalid("logtimestamps", &raw))?;
            }
        }
        if !log_filter_set {
            if let Some(values) = conf.get("logfilter") {
                for raw in values {
                    let parsed = logging::parse_directives(raw)
                        .map_err(|err| format!("{}: {err}", invalid("logfilter", raw)))?;
                    log_filter.extend(parsed);
                }
            }
        }
        if !db_cache_set {
            if let Some(raw) = last("dbcache") {
                db_cache_mb = raw
                    .parse::<u64>()
                    .map_err(|_| invalid("dbcache", &raw))?;
            }
        }
        if !check_integrity_set {
            if let Some(raw) = last("checkintegrity") {
                check_integrity =
                    parse_conf_bool(&raw).ok_or_else(|| invalid("checkintegrity", &raw))?;
            }
        }
    } else if conf_path.is_some() {
        return Err(format!("config file {} not found", conf_file.display()));
    }

    Ok(CliAction::Run(Config {
        backend,
        data_dir: data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        network,
        log_level,
        log_format,
        log_timestamps,
        log_filter,
        db_cache_bytes: mb_to_bytes(db_cache_mb),
        check_integrity,
        command: command.unwrap_or(Command::Status),
    }))
}

fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.to_string()),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

fn usage() -> String {
    [
        "Usage:",
        "  unityd [command] [options]",
        "",
        "Commands:",
        "  status                    Open the chain and print the best block (default)",
        "  revert <height>           Delete every block above <height>",
        "  dump-blocks <count>       Write the top <count> index levels to <data-dir>/<millis>-blocks-report.json",
        "  prune-and-correct         Drop side chain blocks and rebuild cumulative difficulty",
        "  redo-import <height>      Revert to <height> - 1 and re-import the removed main chain blocks",
        "  db-integrity              Check and repair stored cumulative difficulty",
        "  help                      Print this help and exit",
        "  version                   Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --backend  Storage backend to use: fjall|memory (default: fjall)",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/unityd.conf)",
        "  --network  mainnet|testnet|regtest (default: mainnet)",
        "  --log-level  error|warn|info|debug|trace (default: info)",
        "  --log-format  text|json (default: text)",
        "  --log-filter  Per-target levels, e.g. unityd_chainstate::store=debug",
        "  --no-log-timestamps  Omit timestamps from log lines",
        "  --db-cache-mb  Block cache size for the fjall backend (default: 256)",
        "  --check-integrity  Verify cumulative difficulty while opening the chain",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn run_config(values: &[&str]) -> Config {
        match parse_args_from(args(values)).expect("parse") {
            CliAction::Run(config) => config,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn defaults_to_status_on_fjall() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let config = run_config(&["--data-dir", &data_dir]);
        assert_eq!(config.command, Command::Status);
        assert_eq!(config.backend, Backend::Fjall);
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.db_cache_bytes, mb_to_bytes(DEFAULT_DB_CACHE_MB));
        assert!(!config.check_integrity);
    }

    #[test]
    fn parses_commands_and_their_arguments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        assert_eq!(
            run_config(&["revert", "-3", "--data-dir", &data_dir]).command,
            Command::Revert(-3)
        );
        assert_eq!(
            run_config(&["dump-blocks", "10", "--data-dir", &data_dir]).command,
            Command::DumpBlocks(10)
        );
        assert_eq!(
            run_config(&["redo-import", "42", "--data-dir", &data_dir]).command,
            Command::RedoImport(42)
        );
        assert_eq!(
            run_config(&["prune-and-correct", "--data-dir", &data_dir]).command,
            Command::PruneAndCorrect
        );
        assert_eq!(
            run_config(&["db-integrity", "--data-dir", &data_dir]).command,
            Command::DbIntegrity
        );
        assert!(matches!(
            parse_args_from(args(&["help"])).expect("help"),
            CliAction::PrintHelp
        ));
        assert!(matches!(
            parse_args_from(args(&["--version"])).expect("version"),
            CliAction::PrintVersion
        ));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args_from(args(&["revert"])).is_err());
        assert!(parse_args_from(args(&["revert", "ten"])).is_err());
        assert!(parse_args_from(args(&["--backend", "rocks"])).is_err());
        assert!(parse_args_from(args(&["--network", "moon"])).is_err());
        assert!(parse_args_from(args(&["--frobnicate"])).is_err());
        assert!(parse_args_from(args(&["--conf", "/nonexistent/unityd.conf"])).is_err());
    }

    #[test]
    fn conf_file_values_apply_unless_overridden() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = dir.path().join(CONF_FILE_NAME);
        fs::write(
            &conf,
            "# operator settings\nnetwork=regtest\nbackend = memory ; tests only\nloglevel=debug\ndbcache=64\ncheckintegrity\nlogfilter=unityd_chainstate::store=trace\n",
        )
        .expect("write conf");
        let data_dir = dir.path().to_string_lossy().to_string();

        let config = run_config(&["--data-dir", &data_dir]);
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.log_level, Level::Debug);
        assert_eq!(config.db_cache_bytes, 64 * 1024 * 1024);
        assert!(config.check_integrity);
        assert_eq!(config.log_filter.len(), 1);

        let config = run_config(&[
            "--data-dir",
            &data_dir,
            "--network",
            "testnet",
            "--log-level",
            "warn",
        ]);
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.log_level, Level::Warn);
        assert_eq!(config.backend, Backend::Memory);
    }

    #[test]
    fn conf_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = dir.path().join("custom.conf");
        fs::write(&conf, "checkintegrity=maybe\n").expect("write conf");
        let conf = conf.to_string_lossy().to_string();
        let err = parse_args_from(args(&["--conf", &conf])).expect_err("invalid bool");
        assert!(err.contains("checkintegrity"));
    }

    #[test]
    fn load_conf_strips_comments_and_keeps_repeats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("repeat.conf");
        fs::write(&path, "; header\nLogFilter=a=debug\nlogfilter=b=trace # second\n\n").expect("write");
        let conf = load_conf(&path).expect("load").expect("present");
        assert_eq!(
            conf.get("logfilter"),
            Some(&vec!["a=debug".to_string(), "b=trace".to_string()])
        );
        assert_eq!(load_conf(&dir.path().join("missing.conf")).expect("load"), None);
    }

    #[test]
    fn conf_bool_values() {
        assert_eq!(parse_conf_bool(""), Some(true));
        assert_eq!(parse_conf_bool("YES"), Some(true));
        assert_eq!(parse_conf_bool("0"), Some(false));
        assert_eq!(parse_conf_bool("off"), None);
    }

    #[test]
    fn data_dir_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _lock = lock_data_dir(dir.path()).expect("first lock");
        let err = lock_data_dir(dir.path()).err().expect("second lock fails");
        assert!(err.contains("already locked"));
        assert!(err.contains("pid="));
    }
}
