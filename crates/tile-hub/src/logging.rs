use crate::model::LogLevelHook;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_FILE_NAME: &str = "tile-hub.log";

/// Optional append-only `tile-hub.log`, shared by every writer the
/// subscriber creates.
#[derive(Clone, Default)]
pub struct HubLogFile {
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl HubLogFile {
    /// An empty directory means stdout only.
    pub fn open(log_dir: &str) -> io::Result<Self> {
        let log_dir = log_dir.trim();
        if log_dir.is_empty() {
            return Ok(Self::default());
        }
        let dir = Path::new(log_dir);
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer<W: Write>(&self, console: W) -> TeeWriter<W> {
        TeeWriter {
            console,
            file: self.file.clone(),
        }
    }
}

/// Copies each record to the console and, when configured, the log file.
/// File errors never fail the console write.
struct TeeWriter<W> {
    console: W,
    file: Option<Arc<Mutex<File>>>,
}

impl<W: Write> TeeWriter<W> {
    fn with_file(&self, op: impl FnOnce(&mut File) -> io::Result<()>) {
        let Some(file) = &self.file else {
            return;
        };
        if let Ok(mut file) = file.lock() {
            let _ = op(&mut file);
        }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.console.write_all(buf);
        self.with_file(|file| file.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.with_file(|file| file.flush());
        Ok(())
    }
}

/// Installed subscriber state; the log file stays open while this lives.
pub struct Logging {
    pub file: HubLogFile,
    /// Name reported by `loglevel` before any change.
    pub level_name: String,
    /// Taken once and handed to the model.
    pub reload: Option<LogLevelHook>,
}

/// Installs the global subscriber. `None` when one is already set.
pub fn init(level: &str, log_dir: &str) -> Option<Logging> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file = match HubLogFile::open(log_dir) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            HubLogFile::default()
        }
    };
    let sink = file.clone();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(BoxMakeWriter::new(move || sink.writer(io::stdout())))
        .with_filter_reloading();
    let handle = builder.reload_handle();
    if tracing::subscriber::set_global_default(builder.finish()).is_err() {
        return None;
    }

    let reload: LogLevelHook = Box::new(move |directive: &str| {
        handle
            .reload(EnvFilter::new(directive))
            .map_err(|err| err.to_string())
    });
    Some(Logging {
        file,
        level_name: level_name(level),
        reload: Some(reload),
    })
}

/// Maps a tracing directive onto the names the `loglevel` command reports.
pub fn level_name(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warn" | "warning" => "warning",
        "error" => "error",
        "debug" | "trace" => "debug",
        _ => "info",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("tile-hub-log-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn records_reach_console_and_file() {
        let dir = temp_dir("tee");
        let log = HubLogFile::open(dir.to_str().expect("utf8")).expect("open");
        let mut console = Vec::new();
        {
            let mut writer = log.writer(&mut console);
            writer.write_all(b"hub_start\n").expect("write");
            writer.flush().expect("flush");
        }
        assert_eq!(console, b"hub_start\n");
        let path = log.path().expect("path");
        assert_eq!(std::fs::read_to_string(path).expect("read"), "hub_start\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_disables_the_file() {
        let log = HubLogFile::open("  ").expect("open");
        assert!(log.path().is_none());
        let mut console = Vec::new();
        log.writer(&mut console).write_all(b"x").expect("write");
        assert_eq!(console, b"x");
    }

    #[test]
    fn level_names_follow_loglevel_vocabulary() {
        assert_eq!(level_name("warn"), "warning");
        assert_eq!(level_name("TRACE"), "debug");
        assert_eq!(level_name("tile_hub=info"), "info");
    }
}
