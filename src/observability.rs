use biometrics::{Collector, Counter, Moments};

pub(crate) static BACKEND_REQUESTS: Counter = Counter::new("clai.backend.requests");
pub(crate) static BACKEND_REQUEST_ERRORS: Counter = Counter::new("clai.backend.request_errors");
pub(crate) static BACKEND_REQUEST_DURATION: Moments =
    Moments::new("clai.backend.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("clai.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("clai.stream.bytes");
pub(crate) static STREAM_ABORTS: Counter = Counter::new("clai.stream.consumer_aborts");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("clai.stream.errors");
pub(crate) static STREAM_DURATION: Moments = Moments::new("clai.stream.duration_seconds");

pub(crate) static COMMANDS_GENERATED: Counter = Counter::new("clai.generator.commands");
pub(crate) static COMMAND_GENERATION_ERRORS: Counter = Counter::new("clai.generator.errors");

pub(crate) static APPROVAL_EXECUTIONS: Counter = Counter::new("clai.approval.executions");
pub(crate) static APPROVAL_EDITS: Counter = Counter::new("clai.approval.edits");
pub(crate) static APPROVAL_COPIES: Counter = Counter::new("clai.approval.copies");
pub(crate) static APPROVAL_CANCELLATIONS: Counter = Counter::new("clai.approval.cancellations");
pub(crate) static EXECUTION_FAILURES: Counter = Counter::new("clai.executor.failures");

pub(crate) static MESSAGES_PERSISTED: Counter = Counter::new("clai.session.messages_persisted");
pub(crate) static REPLIES_DISCARDED: Counter = Counter::new("clai.session.replies_discarded");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&BACKEND_REQUESTS);
    collector.register_counter(&BACKEND_REQUEST_ERRORS);
    collector.register_moments(&BACKEND_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_ABORTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&COMMANDS_GENERATED);
    collector.register_counter(&COMMAND_GENERATION_ERRORS);

    collector.register_counter(&APPROVAL_EXECUTIONS);
    collector.register_counter(&APPROVAL_EDITS);
    collector.register_counter(&APPROVAL_COPIES);
    collector.register_counter(&APPROVAL_CANCELLATIONS);
    collector.register_counter(&EXECUTION_FAILURES);

    collector.register_counter(&MESSAGES_PERSISTED);
    collector.register_counter(&REPLIES_DISCARDED);
}

/// Installs the stderr log subscriber used by the binaries.
///
/// Verbosity comes from `RUST_LOG` and defaults to `warn`.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
