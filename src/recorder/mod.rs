//! Scan orchestration: the recorder, its collaborator seams, the periodic
//! task loop, signal wiring, and the process runner.

pub mod fetch;
pub mod recordable;
pub mod runner;
pub mod scan;
pub mod signals;
pub mod task_loop;

pub use fetch::{
    CompressedRequests, FetchResponse, HttpFetcher, HttpFetcherOptions, SnapshotFetcher,
};
pub use recordable::Recordable;
pub use scan::{
    Clock, EncoderFactory, EncoderSpec, FlushPolicy, Recorder, RecorderOptions, SystemClock,
    resolve_inst,
};
pub use signals::SignalHandler;
pub use task_loop::TaskLoop;
