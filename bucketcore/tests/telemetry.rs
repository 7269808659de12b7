//! Global subscriber installation; kept in its own binary because it owns
//! the process-wide dispatcher.

use bucketcore::telemetry::{init_tracing, LogFormat};

#[test]
fn tracing_installs_once() {
    assert!(init_tracing(LogFormat::Compact));
    assert!(!init_tracing(LogFormat::Full));
}
