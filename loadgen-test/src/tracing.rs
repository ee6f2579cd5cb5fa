use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["loadgen", "loadgen_test"];

/// Initialize the logger for testing.
///
/// Logs go to the output captured by the Rust test runner. Only this workspace's crates log below
/// `ERROR`, so SDK internals stay quiet. Calling this more than once is fine.
///
/// # Example
///
/// ```
/// loadgen_test::tracing::init();
/// ```
pub fn init() {
    let mut env_filter = EnvFilter::new("ERROR");

    for name in CRATE_NAMES {
        env_filter = env_filter.add_directive(format!("{name}=TRACE").parse().unwrap());
    }

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
