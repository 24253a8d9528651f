use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use chrono::{Local, NaiveDate};
use fs_err as fs;
use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "essq_";
const LEVEL_ENV: &str = "ESSQ_LOG_LEVEL";

static DEFAULT_LOG_LEVEL: Mutex<Level> = Mutex::new(Level::INFO);

pub fn set_log_level(level: Level) {
    if let Ok(mut default_level) = DEFAULT_LOG_LEVEL.lock() {
        *default_level = level;
    }
}

/// Maps `-v` occurrences onto a level, starting from info.
pub fn level_from_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn set_log_level_from_env() {
    if let Ok(level) = env::var(LEVEL_ENV) {
        if let Ok(parsed) = level.parse::<Level>() {
            set_log_level(parsed);
        }
    }
}

fn default_log_level() -> Level {
    DEFAULT_LOG_LEVEL
        .lock()
        .map(|level| *level)
        .unwrap_or(Level::INFO)
}

fn env_filter() -> EnvFilter {
    let level = default_log_level().to_string().to_lowercase();
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

fn log_file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_prefix(LOG_PREFIX)?.split('_').next()?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn rotate_logs(log_dir: &Path, config: &LoggingConfig) -> Result<(), ConfigError> {
    fs::create_dir_all(log_dir)?;

    let mut entries: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
        })
        .collect();
    entries.sort();

    if config.max_files > 0 && entries.len() > config.max_files {
        let excess = entries.len() - config.max_files;
        for path in entries.drain(..excess) {
            let _ = fs::remove_file(path);
        }
    }

    if config.max_age_days > 0 {
        let max_age = Duration::from_secs(config.max_age_days * 24 * 60 * 60);
        let now = SystemTime::now();
        for path in &entries {
            let Some(stamp) = log_file_date(path)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .and_then(|d| d.and_local_timezone(Local).single())
            else {
                continue;
            };
            if now
                .duration_since(SystemTime::from(stamp))
                .is_ok_and(|age| age > max_age)
            {
                let _ = fs::remove_file(path);
            }
        }
    }

    Ok(())
}

struct EssqFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for EssqFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(writer, "[")?;
        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, "] [{:5}] ", metadata.level())?;
        if let (Some(module), Some(line)) = (metadata.module_path(), metadata.line()) {
            write!(writer, "{}:{} ", module, line)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_file_subscriber(log_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| ConfigError::PathIo {
            path: log_path.to_path_buf(),
            source: e,
        })?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(EssqFormatter);

    let tee = env::var("ESSQ_LOG_TEE").is_ok().then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(EssqFormatter)
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(tee)
        .try_init()
        .map_err(|e| ConfigError::General(format!("Failed to install logger: {}", e)))?;

    tracing::info!("--- essq session started (pid {}) ---", std::process::id());
    Ok(())
}

/// Logs to a per-process file under the XDG cache directory and refreshes
/// the `essq.log` link to it.
pub fn init_session_logger(config: &LoggingConfig) -> Result<(), ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("essq");
    let cache_home = xdg_dirs
        .get_cache_home()
        .ok_or(ConfigError::XdgDirectoryNotFound("cache"))?;
    let logs_dir = cache_home.join("logs");

    rotate_logs(&logs_dir, config)?;

    let filename = format!(
        "{}{}_{}.log",
        LOG_PREFIX,
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        std::process::id()
    );
    init_file_subscriber(&logs_dir.join(&filename))?;

    let link = cache_home.join("essq.log");
    let _ = fs::remove_file(&link);
    #[cfg(unix)]
    {
        let _ = std::os::unix::fs::symlink(Path::new("logs").join(filename), &link);
    }
    Ok(())
}

pub fn init_stderr_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
        .try_init();
}

pub fn format_command_for_display(command: &Command) -> String {
    let program = command.get_program().to_string_lossy();
    let args = command
        .get_args()
        .map(|arg| {
            let s = arg.to_string_lossy();
            if s.is_empty() || s.contains(char::is_whitespace) {
                format!("'{}'", s)
            } else {
                s.into_owned()
            }
        })
        .collect::<Vec<_>>();
    if args.is_empty() {
        program.into_owned()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub fn log_and_print_command(command: &Command) {
    tracing::debug!("[CMD] {}", format_command_for_display(command));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_rotate_logs_keeps_newest_files() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        let names = [
            "essq_2024-03-01_10-00-00_1.log",
            "essq_2024-03-02_10-00-00_1.log",
            "essq_2024-03-03_10-00-00_1.log",
            "essq_2024-03-04_10-00-00_1.log",
        ];
        for name in &names {
            File::create(path.join(name)).unwrap();
        }
        File::create(path.join("notes.txt")).unwrap();

        let config = LoggingConfig {
            max_files: 2,
            max_age_days: 0,
        };
        rotate_logs(path, &config).unwrap();

        assert!(!path.join(names[0]).exists());
        assert!(!path.join(names[1]).exists());
        assert!(path.join(names[2]).exists());
        assert!(path.join(names[3]).exists());
        assert!(path.join("notes.txt").exists());
    }

    #[test]
    fn test_rotate_logs_drops_old_files() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        let today = Local::now();
        let fresh = format!("essq_{}_09-00-00_7.log", today.format("%Y-%m-%d"));
        let stale = format!(
            "essq_{}_09-00-00_7.log",
            (today - ChronoDuration::days(30)).format("%Y-%m-%d")
        );
        File::create(path.join(&fresh)).unwrap();
        File::create(path.join(&stale)).unwrap();

        let config = LoggingConfig {
            max_files: 0,
            max_age_days: 14,
        };
        rotate_logs(path, &config).unwrap();

        assert!(path.join(&fresh).exists());
        assert!(!path.join(&stale).exists());
    }

    #[test]
    fn test_format_command_quotes_whitespace() {
        let mut cmd = Command::new("ssh");
        cmd.arg("host").arg("squeue -h").arg("");
        assert_eq!(format_command_for_display(&cmd), "ssh host 'squeue -h' ''");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_from_verbosity(0), Level::INFO);
        assert_eq!(level_from_verbosity(1), Level::DEBUG);
        assert_eq!(level_from_verbosity(4), Level::TRACE);
    }
}
