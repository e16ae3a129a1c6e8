//! The scan orchestrator: one recorder instance driving its
//! fetch → parse → encode cycle and the record file lifecycle.
//!
//! A single mutex serializes all public entry points (`scan`, `flush`,
//! `close`, `shutdown`); only one scan ever runs at a time, so the fetch
//! blocks under the lock and external callers simply wait for an in-flight
//! scan to complete. Wall clock, HTTP, and the encoder factory are injected
//! so the whole cycle is reproducible under test.

use std::fmt;
use std::fs;
#[cfg(unix)]
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Days, Local};
use flate2::read::ZlibDecoder;
use parking_lot::Mutex;

use crate::codec::{FileEncoder, RECORD_FILE_SUFFIX, RecordFileEncoder, ScanTally};
use crate::core::config::{
    self, CHECKPOINT_INTERVAL_DEFAULT, COMPRESSED_REQUESTS_DEFAULT, FLUSH_INTERVAL_DEFAULT,
    PARSE_ERROR_THRESHOLD_DEFAULT, RECORD_FILES_DIR_DEFAULT, REQUEST_TIMEOUT_DEFAULT,
    ROLLOVER_INTERVAL_DEFAULT, RecorderConfig, SCAN_INTERVAL_DEFAULT, TCP_CONN_TIMEOUT_DEFAULT,
    URL_DEFAULT,
};
use crate::core::errors::{LmcrecError, Result};
use crate::logger::RecorderLogger;
use crate::parser::SnapshotParser;
use crate::recorder::fetch::{
    CompressedRequests, HttpFetcher, HttpFetcherOptions, SnapshotFetcher,
};
use crate::recorder::recordable::Recordable;

/// Advisory lock sentinel inside the records directory.
pub const RECORD_DIR_LOCK: &str = ".lck";
/// Record file name layout under the records directory, local time.
pub const RECORD_FILE_TIME_FORMAT: &str = "%Y-%m-%d/%H:%M:%S%:z";
/// Log consecutive identical transport error messages only so often.
pub const REPEAT_HTTP_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Injected wall clock.
pub trait Clock: Send {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;
}

/// The real clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Arguments the recorder passes to its encoder factory when opening a file.
pub struct EncoderSpec<'a> {
    /// Requested file name (the factory may append `.gz`).
    pub file_name: PathBuf,
    #[allow(missing_docs)]
    pub buf_size: i32,
    #[allow(missing_docs)]
    pub compression_level: i32,
    /// Whether the file carries an `.index` sidecar.
    pub use_checkpoint: bool,
    /// Basename of the previous file in a rollover chain, or empty.
    pub prev_file_name: &'a str,
    /// Recorder version recorded in the info sidecar.
    pub version: &'a str,
}

/// Injected encoder factory.
pub type EncoderFactory = Box<dyn FnMut(&EncoderSpec<'_>) -> Result<Box<dyn FileEncoder>> + Send>;

/// Flush scheduling derived from the `flush_interval` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Negative interval: never flush on a timer.
    Disabled,
    /// Zero interval: flush at the end of every scan.
    EveryScan,
    /// Positive interval: flush once the interval has elapsed.
    Interval(Duration),
}

impl FlushPolicy {
    /// Interpret a signed seconds value.
    #[must_use]
    pub fn from_secs(secs: f64) -> Self {
        if secs < 0.0 {
            Self::Disabled
        } else if secs == 0.0 {
            Self::EveryScan
        } else {
            Self::Interval(Duration::from_secs_f64(secs))
        }
    }
}

/// Scan error classes, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrClass {
    /// Transport and similar hiccups: close the file, keep running.
    NonParse,
    /// Feeds the parse error gauge.
    Parse,
    /// Stops the recorder.
    Fatal,
}

/// Everything needed to assemble a [`Recorder`]; the collaborator fields are
/// the test seam.
pub struct RecorderOptions {
    #[allow(missing_docs)]
    pub inst: String,
    /// Endpoint URL (kept for logging).
    pub url: String,
    #[allow(missing_docs)]
    pub scan_interval: Duration,
    #[allow(missing_docs)]
    pub flush_policy: FlushPolicy,
    /// `None` disables checkpoints.
    pub checkpoint_interval: Option<Duration>,
    /// `None` disables interval rollover (midnight rollover still applies).
    pub rollover_interval: Option<Duration>,
    /// `0` disables the threshold.
    pub parse_error_threshold: u32,
    #[allow(missing_docs)]
    pub record_files_dir: PathBuf,
    #[allow(missing_docs)]
    pub buf_size: i32,
    #[allow(missing_docs)]
    pub compression_level: i32,
    /// Request timeout echo for config logging.
    pub request_timeout: Duration,
    /// Connect timeout echo for config logging.
    pub tcp_conn_timeout: Duration,
    /// Keep-alive echo for config logging.
    pub tcp_keep_alive: Option<Duration>,
    #[allow(missing_docs)]
    pub version: String,
    #[allow(missing_docs)]
    pub logger: RecorderLogger,
    #[allow(missing_docs)]
    pub clock: Box<dyn Clock>,
    #[allow(missing_docs)]
    pub fetcher: Box<dyn SnapshotFetcher>,
    #[allow(missing_docs)]
    pub encoder_factory: EncoderFactory,
}

struct RecorderState {
    clock: Box<dyn Clock>,
    fetcher: Box<dyn SnapshotFetcher>,
    encoder_factory: EncoderFactory,
    recordable: SnapshotParser,
    encoder: Option<Box<dyn FileEncoder>>,
    // Non-empty when the current file is a rollover continuation of the
    // previous one; cleared on any error path.
    record_file_name_suffix: String,
    last_flush_ts: DateTime<Local>,
    last_checkpoint_ts: DateTime<Local>,
    last_rollover_ts: DateTime<Local>,
    midnight_ts: DateTime<Local>,
    parse_error_gauge: u32,
    // If the remote process is down, connection-refused errors would be
    // logged with every scan. Track the last message and its count and log
    // it only so often.
    last_http_err_msg: String,
    http_err_msg_count: u64,
    last_http_err_ts: DateTime<Local>,
    config_logged: bool,
    #[cfg(unix)]
    dir_lock: Option<nix::fcntl::Flock<File>>,
}

/// One recorder instance: one URL, one records directory.
pub struct Recorder {
    /// Instance label, from config or derived from the URL.
    pub inst: String,
    /// How often the task loop should invoke [`Recorder::scan`].
    pub scan_interval: Duration,
    logger: RecorderLogger,
    url: String,
    request_timeout: Duration,
    tcp_conn_timeout: Duration,
    tcp_keep_alive: Option<Duration>,
    flush_policy: FlushPolicy,
    checkpoint_interval: Option<Duration>,
    rollover_interval: Option<Duration>,
    // Hardcoded: record files live under yyyy-mm-dd sub-dirs, so a day's
    // records stay under one dir.
    midnight_rollover: bool,
    parse_error_threshold: u32,
    record_files_dir: PathBuf,
    buf_size: i32,
    compression_level: i32,
    version: String,
    state: Mutex<RecorderState>,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("inst", &self.inst)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn lock_record_dir(dir: &std::path::Path) -> Result<nix::fcntl::Flock<File>> {
    use nix::fcntl::{Flock, FlockArg};

    let lock_path = dir.join(RECORD_DIR_LOCK);
    let file = File::create(&lock_path).map_err(|e| LmcrecError::io(&lock_path, e))?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        LmcrecError::io(&lock_path, std::io::Error::from_raw_os_error(errno as i32))
    })
}

/// Next local midnight after `ts`.
fn next_local_midnight(ts: DateTime<Local>) -> DateTime<Local> {
    (ts.date_naive() + Days::new(1))
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .unwrap_or_else(|| ts + chrono::Duration::hours(24))
}

/// Elapsed wall time, saturating at zero when the clock jumped backwards.
fn elapsed(since: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Match against every instance of a (possibly repeated) header, ignoring
/// any `;charset=...` style parameters.
fn has_header_value(header_values: &[String], value: &str) -> bool {
    header_values.iter().any(|header_value| {
        let bare = header_value.split(';').next().unwrap_or_default();
        bare == value
    })
}

impl Recorder {
    /// Assemble a recorder: creates the records directory and takes the
    /// exclusive advisory lock on its sentinel file.
    pub fn new(opts: RecorderOptions) -> Result<Self> {
        fs::create_dir_all(&opts.record_files_dir)
            .map_err(|e| LmcrecError::io(&opts.record_files_dir, e))?;
        #[cfg(unix)]
        let dir_lock = Some(lock_record_dir(&opts.record_files_dir)?);

        let now = opts.clock.now();
        Ok(Self {
            inst: opts.inst,
            scan_interval: opts.scan_interval,
            logger: opts.logger,
            url: opts.url,
            request_timeout: opts.request_timeout,
            tcp_conn_timeout: opts.tcp_conn_timeout,
            tcp_keep_alive: opts.tcp_keep_alive,
            flush_policy: opts.flush_policy,
            checkpoint_interval: opts.checkpoint_interval,
            rollover_interval: opts.rollover_interval,
            midnight_rollover: true,
            parse_error_threshold: opts.parse_error_threshold,
            record_files_dir: opts.record_files_dir,
            buf_size: opts.buf_size,
            compression_level: opts.compression_level,
            version: opts.version,
            state: Mutex::new(RecorderState {
                clock: opts.clock,
                fetcher: opts.fetcher,
                encoder_factory: opts.encoder_factory,
                recordable: SnapshotParser::new(),
                encoder: None,
                record_file_name_suffix: String::new(),
                last_flush_ts: now,
                last_checkpoint_ts: now,
                last_rollover_ts: now,
                midnight_ts: now,
                parse_error_gauge: 0,
                last_http_err_msg: String::new(),
                http_err_msg_count: 0,
                last_http_err_ts: now,
                config_logged: false,
                #[cfg(unix)]
                dir_lock,
            }),
        })
    }

    /// The production encoder factory over [`RecordFileEncoder`].
    pub fn file_encoder_factory() -> EncoderFactory {
        Box::new(|spec: &EncoderSpec<'_>| {
            let encoder = RecordFileEncoder::open(
                spec.file_name.clone(),
                spec.buf_size,
                spec.compression_level,
                spec.use_checkpoint,
                spec.prev_file_name,
                spec.version,
            )?;
            Ok(Box::new(encoder) as Box<dyn FileEncoder>)
        })
    }

    fn log_config(&self, request_headers: &[(String, String)]) {
        let logger = &self.logger;
        logger.info(format!("url={}", self.url));
        for (name, value) in request_headers {
            let value = if name == "Security-Key" {
                "xxxxx"
            } else {
                value.as_str()
            };
            logger.info(format!("header={name}: {value}"));
        }
        logger.info(format!("request_timeout={:?}", self.request_timeout));
        logger.info(format!("tcp_conn_timeout={:?}", self.tcp_conn_timeout));
        if let Some(keep_alive) = self.tcp_keep_alive {
            logger.info(format!("tcp_keep_alive={keep_alive:?}"));
        }
        logger.info(format!("scan_interval={:?}", self.scan_interval));
        logger.info(format!("flush_policy={:?}", self.flush_policy));
        logger.info(format!("checkpoint_interval={:?}", self.checkpoint_interval));
        logger.info(format!("rollover_interval={:?}", self.rollover_interval));
        logger.info(format!("midnight_rollover={}", self.midnight_rollover));
        logger.info(format!(
            "parse_error_threshold={}",
            self.parse_error_threshold
        ));
        logger.info(format!(
            "record_files_dir={}",
            self.record_files_dir.display()
        ));
        if self.compression_level == crate::codec::NO_COMPRESSION {
            let explanation = match self.buf_size {
                crate::codec::USE_DEFAULT_BUF_SIZE => " (default iobuf)",
                0 => " (no buffering)",
                _ => "",
            };
            logger.info(format!("buf_size={}{explanation}", self.buf_size));
        } else {
            let explanation = if self.compression_level == crate::codec::DEFAULT_COMPRESSION_LEVEL {
                " (default compression)"
            } else {
                ""
            };
            logger.info(format!(
                "compression_level={}{explanation}",
                self.compression_level
            ));
        }
    }

    fn close_encoder(state: &mut RecorderState, logger: &RecorderLogger) -> Result<()> {
        if let Some(encoder) = state.encoder.as_mut() {
            let file_name = encoder.file_name().display().to_string();
            encoder.close()?;
            logger.info(format!("{file_name} closed"));
            state.encoder = None;
        }
        Ok(())
    }

    fn flush_encoder(state: &mut RecorderState) -> Result<()> {
        if let Some(encoder) = state.encoder.as_mut() {
            encoder.flush()?;
        }
        Ok(())
    }

    fn new_encoder(&self, state: &mut RecorderState, ts: DateTime<Local>) -> Result<()> {
        let file_name = self.record_files_dir.join(format!(
            "{}{}",
            ts.format(RECORD_FILE_TIME_FORMAT),
            RECORD_FILE_SUFFIX
        ));
        let spec = EncoderSpec {
            file_name,
            buf_size: self.buf_size,
            compression_level: self.compression_level,
            use_checkpoint: self.checkpoint_interval.is_some(),
            prev_file_name: &state.record_file_name_suffix,
            version: &self.version,
        };
        let encoder = (state.encoder_factory)(&spec)?;

        // Remember the name the encoder settled on (it may have appended a
        // suffix), relative to the records directory.
        let suffix = encoder
            .file_name()
            .strip_prefix(&self.record_files_dir)
            .map_or_else(
                |_| encoder.file_name().display().to_string(),
                |relative| relative.display().to_string(),
            );
        self.logger
            .info(format!("{} opened", encoder.file_name().display()));
        state.record_file_name_suffix = suffix;
        state.encoder = Some(encoder);
        state.last_rollover_ts = ts;
        state.midnight_ts = next_local_midnight(ts);
        state.last_checkpoint_ts = ts;
        state.last_flush_ts = ts;
        Ok(())
    }

    /// Handle a scan error: raise the gauge for parse-class failures,
    /// escalate to fatal at the threshold, close the encoder (forcing a
    /// full dump on the next success), and clear the continuation suffix.
    /// Returns whether the task loop should keep running.
    fn report_error(
        &self,
        state: &mut RecorderState,
        err: Option<String>,
        mut class: ErrClass,
    ) -> bool {
        let mut err = err;
        if class == ErrClass::Parse {
            state.parse_error_gauge += 1;
            if self.parse_error_threshold > 0
                && state.parse_error_gauge >= self.parse_error_threshold
            {
                err = Some(format!(
                    "{}: parse error threshold {} reached",
                    err.unwrap_or_default(),
                    self.parse_error_threshold
                ));
                class = ErrClass::Fatal;
            }
        }
        if let Some(msg) = err {
            self.logger.error(msg);
        }
        if let Err(e) = Self::close_encoder(state, &self.logger) {
            self.logger.error(e.to_string());
            class = ErrClass::Fatal;
        }
        state.record_file_name_suffix.clear();
        class != ErrClass::Fatal
    }

    /// Perform one scan. Returns `true` when the task loop should
    /// reschedule; recorder (encoder/IO) errors are non-recoverable while
    /// parse errors go through the gauge/threshold mechanism.
    #[allow(clippy::too_many_lines)]
    pub fn scan(&self) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Log the effective config on the first invocation:
        if !state.config_logged {
            let request_headers = state.fetcher.request_headers();
            self.log_config(&request_headers);
            state.config_logged = true;
        }

        // The scan duration is measured from before the request is made:
        let start_ts = state.clock.now();

        // Fetch; close the current encoder on any failure so the next
        // success starts a fresh file with a full dump.
        let prev_http_err = !state.last_http_err_msg.is_empty();
        let response = match state.fetcher.fetch() {
            Err(err) => {
                let msg = err.to_string();
                let to_log = if msg == state.last_http_err_msg {
                    state.http_err_msg_count += 1;
                    if elapsed(state.last_http_err_ts, start_ts) >= REPEAT_HTTP_ERROR_LOG_INTERVAL
                    {
                        Some(format!(
                            "{msg} (repeated {} times)",
                            state.http_err_msg_count
                        ))
                    } else {
                        None
                    }
                } else {
                    state.last_http_err_msg = msg.clone();
                    state.http_err_msg_count = 1;
                    Some(msg)
                };
                if to_log.is_some() {
                    state.last_http_err_ts = start_ts;
                }
                return self.report_error(state, to_log, ErrClass::NonParse);
            }
            Ok(response) => response,
        };
        if prev_http_err {
            state.last_http_err_msg.clear();
        }

        if response.status != 200 {
            return self.report_error(
                state,
                Some(format!("GET {}: status {}", self.url, response.status)),
                ErrClass::Parse,
            );
        }
        if prev_http_err {
            // Log success after an error streak:
            self.logger
                .info(format!("GET {}: status {}", self.url, response.status));
        }

        let is_json = has_header_value(&response.content_type, "application/json");
        let is_deflated = has_header_value(&response.content_encoding, "deflate");
        let content_length = match &response.content_length {
            None => 0,
            Some(text) => match text.parse::<u64>() {
                Ok(value) => value,
                Err(e) => {
                    return self.report_error(
                        state,
                        Some(format!("Content-Length: {text}: {e}")),
                        ErrClass::NonParse,
                    );
                }
            },
        };

        if !is_json {
            return self.report_error(
                state,
                Some("non JSON content".to_string()),
                ErrClass::Fatal,
            );
        }

        let mut body: Box<dyn std::io::Read + Send> = if is_deflated {
            Box::new(ZlibDecoder::new(response.body))
        } else {
            response.body
        };

        // Decide the scan mode and the file lifecycle for this tick:
        let mut first_time_flush = false;
        let mut checkpoint = false;
        let mut suppress_events = false;
        if state.encoder.is_some() {
            let midnight_due = self.midnight_rollover && start_ts >= state.midnight_ts;
            let rollover_due = self
                .rollover_interval
                .is_some_and(|interval| elapsed(state.last_rollover_ts, start_ts) >= interval);
            let checkpoint_due = self
                .checkpoint_interval
                .is_some_and(|interval| elapsed(state.last_checkpoint_ts, start_ts) >= interval);
            if midnight_due || rollover_due {
                if let Err(e) = Self::close_encoder(state, &self.logger) {
                    self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
                }
                suppress_events = true;
            } else if checkpoint_due {
                checkpoint = true;
                suppress_events = true;
            }
        } else {
            suppress_events = true;
        }

        // Parse the response:
        let (process_changed, scan_in_inst_count, scan_in_var_count) =
            match state.recordable.parse(&mut body, suppress_events) {
                Ok(result) => result,
                Err(e) => {
                    return self.report_error(
                        state,
                        Some(format!("parse error: {e}")),
                        ErrClass::Parse,
                    );
                }
            };

        if process_changed {
            self.logger.warn("process change detected");
            // Force a rollover:
            if let Err(e) = Self::close_encoder(state, &self.logger) {
                return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
            }
            state.record_file_name_suffix.clear();
            checkpoint = false;
        }

        if state.encoder.is_none() {
            if let Err(e) = self.new_encoder(state, start_ts) {
                return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
            }
            // Force a flush at the end of this scan to materialize the info
            // file:
            first_time_flush = true;
        } else if checkpoint {
            if let Some(encoder) = state.encoder.as_mut()
                && let Err(e) = encoder.checkpoint(start_ts.timestamp_micros())
            {
                return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
            }
            state.last_checkpoint_ts = start_ts;
            state.last_flush_ts = start_ts;
        }

        // The timestamp record for the scan:
        if let Some(encoder) = state.encoder.as_mut()
            && let Err(e) = encoder.timestamp_usec(start_ts.timestamp_micros())
        {
            return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
        }

        // Project the parser state into the file:
        let full = suppress_events || process_changed;
        let scan_out_var_count = {
            let Some(encoder) = state.encoder.as_mut() else {
                return self.report_error(state, None, ErrClass::Fatal);
            };
            match state.recordable.record(encoder.as_mut(), full) {
                Ok(count) => count,
                Err(e) => {
                    return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
                }
            }
        };

        // The tally and the duration:
        let tally = ScanTally {
            in_byte_count: content_length,
            in_inst_count: scan_in_inst_count as u64,
            in_var_count: scan_in_var_count as u64,
            out_var_count: scan_out_var_count as u64,
        };
        if let Some(encoder) = state.encoder.as_mut()
            && let Err(e) = encoder.scan_tally(&tally)
        {
            return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
        }
        let duration_usec = (state.clock.now() - start_ts)
            .num_microseconds()
            .unwrap_or(0);
        if let Some(encoder) = state.encoder.as_mut()
            && let Err(e) = encoder.duration_usec(duration_usec)
        {
            return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
        }

        // A successful scan cancels out one prior parse error:
        if state.parse_error_gauge > 0 {
            state.parse_error_gauge -= 1;
        }

        let flush_due = match self.flush_policy {
            FlushPolicy::Disabled => false,
            FlushPolicy::EveryScan => true,
            FlushPolicy::Interval(interval) => elapsed(state.last_flush_ts, start_ts) >= interval,
        };
        if first_time_flush || flush_due {
            if let Err(e) = Self::flush_encoder(state) {
                return self.report_error(state, Some(e.to_string()), ErrClass::Fatal);
            }
            state.last_flush_ts = start_ts;
        }

        // Flip the variable storage current index:
        state.recordable.flip_curr_index();

        true
    }

    /// On-demand flush (signal driven).
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_encoder(&mut state)
    }

    /// On-demand close, rolling over to a new file at the next scan.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::close_encoder(&mut state, &self.logger)
    }

    /// Final shutdown: close the encoder and release the directory lock.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = Self::close_encoder(&mut state, &self.logger);
        #[cfg(unix)]
        {
            state.dir_lock = None;
        }
        result
    }

    /// Current parse error gauge (observability hook).
    pub fn parse_error_gauge(&self) -> u32 {
        self.state.lock().parse_error_gauge
    }

    /// Assemble a production recorder from a merged config entry:
    /// system clock, reqwest fetcher, file encoder factory.
    pub fn from_config(config: &RecorderConfig, logger: &RecorderLogger) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| URL_DEFAULT.to_string());
        let inst = resolve_inst(config)?;

        let scan_interval_secs = config.scan_interval.unwrap_or(SCAN_INTERVAL_DEFAULT);
        if scan_interval_secs <= 0.0 {
            return Err(LmcrecError::InvalidConfig {
                details: format!("scan_interval: {scan_interval_secs} (must be > 0)"),
            });
        }

        let security_key = match config.security_key.as_deref() {
            Some(spec) => config::resolve_security_key(spec, &inst)?,
            None => None,
        };
        let compressed_requests = CompressedRequests::from_config(
            config
                .compressed_requests
                .as_deref()
                .unwrap_or(COMPRESSED_REQUESTS_DEFAULT),
        )?;
        let request_timeout =
            Duration::from_secs_f64(config.request_timeout.unwrap_or(REQUEST_TIMEOUT_DEFAULT));
        let tcp_conn_timeout =
            Duration::from_secs_f64(config.tcp_conn_timeout.unwrap_or(TCP_CONN_TIMEOUT_DEFAULT));
        let tcp_keep_alive = config
            .tcp_keep_alive
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64);

        let fetcher = HttpFetcher::new(&HttpFetcherOptions {
            url: url.clone(),
            security_key,
            compressed_requests,
            request_timeout,
            tcp_conn_timeout,
            tcp_keep_alive,
            ignore_tls_verify: config.ignore_tls_verify.unwrap_or(false),
        })?;

        let record_files_dir = PathBuf::from(config::expand_inst_env(
            config
                .record_files_dir
                .as_deref()
                .unwrap_or(RECORD_FILES_DIR_DEFAULT),
            &inst,
        ));

        Self::new(RecorderOptions {
            inst: inst.clone(),
            url,
            scan_interval: Duration::from_secs_f64(scan_interval_secs),
            flush_policy: FlushPolicy::from_secs(
                config.flush_interval.unwrap_or(FLUSH_INTERVAL_DEFAULT),
            ),
            checkpoint_interval: interval_option(
                config
                    .checkpoint_interval
                    .unwrap_or(CHECKPOINT_INTERVAL_DEFAULT),
            ),
            rollover_interval: interval_option(
                config.rollover_interval.unwrap_or(ROLLOVER_INTERVAL_DEFAULT),
            ),
            parse_error_threshold: config
                .parse_error_threshold
                .unwrap_or(PARSE_ERROR_THRESHOLD_DEFAULT),
            record_files_dir,
            buf_size: config.buf_size.unwrap_or(crate::codec::USE_DEFAULT_BUF_SIZE),
            compression_level: config
                .compression_level
                .unwrap_or(crate::codec::DEFAULT_COMPRESSION_LEVEL),
            request_timeout,
            tcp_conn_timeout,
            tcp_keep_alive,
            version: env!("CARGO_PKG_VERSION").to_string(),
            logger: logger.with_inst(&inst),
            clock: Box::new(SystemClock),
            fetcher: Box::new(fetcher),
            encoder_factory: Self::file_encoder_factory(),
        })
    }
}

/// `<= 0` disables the interval.
fn interval_option(secs: f64) -> Option<Duration> {
    (secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Recorder instance label: the `inst` option when set, otherwise derived
/// from the URL as `host-port/path`.
pub fn resolve_inst(config: &RecorderConfig) -> Result<String> {
    if let Some(inst) = config.inst.as_deref().filter(|inst| !inst.is_empty()) {
        return Ok(inst.to_string());
    }
    let url = config.url.as_deref().unwrap_or(URL_DEFAULT);
    let parsed = reqwest::Url::parse(url).map_err(|e| LmcrecError::InvalidConfig {
        details: format!("url {url:?}: {e}"),
    })?;
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let host_port = match parsed.port() {
        Some(port) => format!("{host}-{port}"),
        None => host,
    };
    let path = parsed.path().trim_matches('/');
    Ok(if path.is_empty() {
        host_port
    } else {
        format!("{host_port}/{path}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_policy_sign_semantics() {
        assert_eq!(FlushPolicy::from_secs(-1.0), FlushPolicy::Disabled);
        assert_eq!(FlushPolicy::from_secs(0.0), FlushPolicy::EveryScan);
        assert_eq!(
            FlushPolicy::from_secs(2.5),
            FlushPolicy::Interval(Duration::from_millis(2500))
        );
    }

    #[test]
    fn header_value_matching_ignores_parameters_and_scans_all_instances() {
        let values = |items: &[&str]| items.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert!(has_header_value(
            &values(&["application/json; charset=utf-8"]),
            "application/json"
        ));
        assert!(has_header_value(
            &values(&["application/json"]),
            "application/json"
        ));
        // A repeated header matches on any instance, not just the first.
        assert!(has_header_value(
            &values(&["text/plain", "application/json"]),
            "application/json"
        ));
        assert!(!has_header_value(&values(&["text/html"]), "application/json"));
        assert!(!has_header_value(&[], "application/json"));
    }

    #[test]
    fn next_midnight_is_start_of_next_day() {
        let ts = Local::now();
        let midnight = next_local_midnight(ts);
        assert!(midnight > ts);
        assert_eq!(midnight.time(), chrono::NaiveTime::MIN);
        assert_eq!(midnight.date_naive(), ts.date_naive() + Days::new(1));
    }

    #[test]
    fn elapsed_saturates_on_clock_rollback() {
        let now = Local::now();
        let later = now + chrono::Duration::seconds(10);
        assert_eq!(elapsed(later, now), Duration::ZERO);
        assert_eq!(elapsed(now, later), Duration::from_secs(10));
    }

    #[test]
    fn inst_derived_from_url_when_unset() {
        let mut config = RecorderConfig {
            url: Some("http://LMC-Host:8080/sharedmem".to_string()),
            ..RecorderConfig::default()
        };
        assert_eq!(resolve_inst(&config).unwrap(), "lmc-host-8080/sharedmem");

        config.url = Some("https://lmc.example.com/".to_string());
        assert_eq!(resolve_inst(&config).unwrap(), "lmc.example.com");

        config.inst = Some("explicit".to_string());
        assert_eq!(resolve_inst(&config).unwrap(), "explicit");
    }

    #[test]
    fn interval_option_disables_non_positive() {
        assert_eq!(interval_option(0.0), None);
        assert_eq!(interval_option(-5.0), None);
        assert_eq!(interval_option(1.5), Some(Duration::from_millis(1500)));
    }
}
