//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use lmcrec::prelude::*;
//! ```

// Core
pub use crate::core::config::{LoggerConfig, RecorderConfig, load_config};
pub use crate::core::errors::{LmcrecError, Result};

// Codec
pub use crate::codec::{
    Checkpoint, CheckpointReader, Encoder, FileEncoder, FileRecordDecoder, Record, RecordDecoder,
    RecordFileEncoder, RecordFileInfo, ScanTally, StreamEncoder, VarValue, load_info_file,
};

// Parser
pub use crate::parser::{ParserEvent, SnapshotParser, VarType};

// Recorder
pub use crate::recorder::fetch::{FetchResponse, HttpFetcher, SnapshotFetcher};
pub use crate::recorder::recordable::Recordable;
pub use crate::recorder::scan::{Clock, FlushPolicy, Recorder, RecorderOptions, SystemClock};
pub use crate::recorder::signals::SignalHandler;
pub use crate::recorder::task_loop::TaskLoop;

// Logger
pub use crate::logger::RecorderLogger;
