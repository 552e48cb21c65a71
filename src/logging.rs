use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "ADO_EXPORT_LOG";
pub const LOG_DIR_ENV: &str = "ADO_EXPORT_LOG_DIR";

/// Appends to `<dir>/<prefix>-YYYY-MM-DD.txt` for the local day of each write.
///
/// Nothing is created on disk until the first event arrives, and the file switches when
/// the day changes during a run.
pub struct DailyFile {
    dir: PathBuf,
    prefix: &'static str,
    current: Mutex<Option<(NaiveDate, File)>>,
    failure_reported: AtomicBool,
}

impl DailyFile {
    pub fn new(dir: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            dir: dir.into(),
            prefix,
            current: Mutex::new(None),
            failure_reported: AtomicBool::new(false),
        }
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.txt", self.prefix, day.format("%Y-%m-%d")))
    }

    fn open(&self, day: NaiveDate) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(day))
    }

    fn write_on(&self, day: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((opened, file)) = current.as_mut() {
            if *opened == day {
                return file.write(buf);
            }
        }
        *current = None;
        let mut file = self.open(day).map_err(|e| {
            if !self.failure_reported.swap(true, Ordering::Relaxed) {
                eprintln!("cannot write log file in {}: {e}", self.dir.display());
            }
            e
        })?;
        let written = file.write(buf)?;
        *current = Some((day, file));
        Ok(written)
    }
}

pub struct DailyFileWriter<'a>(&'a DailyFile);

impl Write for DailyFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_on(chrono::Local::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DailyFile {
    type Writer = DailyFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DailyFileWriter(self)
    }
}

/// Console output plus a daily log file and a daily errors-only file.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let dir = env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logs"));

    let console = fmt::layer().compact().with_writer(io::stderr);
    let all = fmt::layer()
        .with_ansi(false)
        .with_writer(DailyFile::new(&dir, "logs"));
    let errors = fmt::layer()
        .with_ansi(false)
        .with_writer(DailyFile::new(&dir, "errors"))
        .with_filter(LevelFilter::ERROR);

    if tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(all)
        .with(errors)
        .try_init()
        .is_err()
    {
        eprintln!("tracing was already initialised");
    }
}

/// Logs an error together with every cause below it.
pub fn log_error_chain(context: &str, err: &anyhow::Error) {
    let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
    error!(error = %err, ?causes, "{context}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[test]
    fn log_files_are_named_by_day() {
        let log = DailyFile::new("logs", "errors");
        assert_eq!(log.path_for(day(29)), Path::new("logs/errors-2024-02-29.txt"));
    }

    #[test]
    fn nothing_is_created_before_the_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let log = DailyFile::new(&nested, "logs");
        let _writer = log.make_writer();
        assert!(!nested.exists());

        log.write_on(day(1), b"first\n").unwrap();
        assert_eq!(fs::read_to_string(log.path_for(day(1))).unwrap(), "first\n");
    }

    #[test]
    fn switches_file_when_the_day_changes() {
        let dir = tempfile::tempdir().unwrap();
        let log = DailyFile::new(dir.path(), "logs");

        log.write_on(day(28), b"before midnight\n").unwrap();
        log.write_on(day(29), b"after midnight\n").unwrap();
        log.write_on(day(29), b"still the 29th\n").unwrap();

        assert_eq!(
            fs::read_to_string(log.path_for(day(28))).unwrap(),
            "before midnight\n"
        );
        assert_eq!(
            fs::read_to_string(log.path_for(day(29))).unwrap(),
            "after midnight\nstill the 29th\n"
        );
    }
}
