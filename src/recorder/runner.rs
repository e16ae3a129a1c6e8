//! Process runner: config resolution, logger setup, signal wiring, and the
//! main polling loop around the task loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::core::config::{
    self, LOG_FILE_DEFAULT, LoggerConfig, RUNTIME_DEFAULT, RUNTIME_ENV_VAR,
};
use crate::logger::{DEFAULT_LOG_MAX_SIZE_BYTES, RecorderLogger};
use crate::recorder::scan::{Recorder, resolve_inst};
use crate::recorder::signals::SignalHandler;
use crate::recorder::task_loop::TaskLoop;

/// Budget for draining tasks at shutdown.
pub const SHUTDOWN_MAX_WAIT: Duration = Duration::from_secs(2);

/// Cadence of the signal-flag poll in the main loop.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn build_logger(logger_config: &LoggerConfig, inst: &str) -> RecorderLogger {
    let log_file = config::expand_inst_env(
        logger_config.log_file.as_deref().unwrap_or(LOG_FILE_DEFAULT),
        inst,
    );
    match RecorderLogger::to_file(
        &log_file,
        logger_config
            .max_size_bytes
            .unwrap_or(DEFAULT_LOG_MAX_SIZE_BYTES),
    ) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("lmcrec: {e}; logging to stderr");
            RecorderLogger::stderr()
        }
    }
}

/// Run one recorder to completion. Returns the process exit code: 0 for a
/// signal-driven shutdown, 1 for startup or runtime failure.
pub fn run(config_file: &Path, inst: &str) -> i32 {
    run_with_signals(config_file, inst, &SignalHandler::new())
}

/// [`run`] with an injected signal handler, so tests can drive the loop.
pub fn run_with_signals(config_file: &Path, inst: &str, signals: &SignalHandler) -> i32 {
    if std::env::var(RUNTIME_ENV_VAR).is_err() {
        eprintln!(
            "Warning! Using {}={:?} based on internal default",
            RUNTIME_ENV_VAR,
            config::expand_env(RUNTIME_DEFAULT)
        );
    }

    let (recorder_config, logger_config) = match config::load_config(config_file, inst) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("lmcrec: {e}");
            return 1;
        }
    };
    let inst_label = match resolve_inst(&recorder_config) {
        Ok(label) => label,
        Err(e) => {
            eprintln!("lmcrec: {e}");
            return 1;
        }
    };

    let logger = build_logger(&logger_config, &inst_label);
    let runner_log = logger.component("runner").with_inst(&inst_label);

    let recorder = match Recorder::from_config(&recorder_config, &logger.component("recorder")) {
        Ok(recorder) => Arc::new(recorder),
        Err(e) => {
            runner_log.error(e.to_string());
            eprintln!("lmcrec: {e}");
            return 1;
        }
    };

    let task_loop = TaskLoop::new();
    runner_log.info(format!("start {} recorder", recorder.inst));
    let scan_recorder = Arc::clone(&recorder);
    if let Err(e) = task_loop.start(
        &recorder.inst,
        move || scan_recorder.scan(),
        recorder.scan_interval,
    ) {
        runner_log.error(e.to_string());
        return 1;
    }

    let all_done = task_loop.all_done();
    // All tasks self-terminating (fatal scan errors) is a failure exit;
    // only an external stop request earns a clean one.
    let mut ret_code = 1;
    loop {
        if signals.should_shutdown() {
            runner_log.warn("stop signal received");
            ret_code = 0;
            break;
        }
        if signals.should_flush() {
            runner_log.warn("flush signal received, perform flush");
            if let Err(e) = recorder.flush() {
                runner_log.error(e.to_string());
                break;
            }
        }
        if signals.should_rollover() {
            runner_log.warn("rollover signal received, perform rollover");
            if let Err(e) = recorder.close() {
                runner_log.error(e.to_string());
                break;
            }
        }
        match all_done.recv_timeout(SIGNAL_POLL_INTERVAL) {
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) | Ok(()) => {}
        }
    }

    runner_log.warn(format!("shutdown {}", recorder.inst));
    if let Err(e) = task_loop.shutdown_max_wait(SHUTDOWN_MAX_WAIT) {
        runner_log.error(e.to_string());
        ret_code = 1;
    }
    if let Err(e) = recorder.shutdown() {
        runner_log.error(e.to_string());
        ret_code = 1;
    }

    ret_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_fails_startup() {
        let signals = SignalHandler::unregistered();
        let code = run_with_signals(Path::new("/no/such/lmcrec-config.yaml"), "x", &signals);
        assert_eq!(code, 1);
    }

    #[test]
    fn unmatched_inst_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("lmcrec-config.yaml");
        std::fs::write(
            &config_path,
            "recorders:\n  - inst: other\n    url: http://localhost:1/x\n",
        )
        .unwrap();
        let signals = SignalHandler::unregistered();
        let code = run_with_signals(&config_path, "missing", &signals);
        assert_eq!(code, 1);
    }
}
