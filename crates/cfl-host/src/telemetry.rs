use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber with the given filter directives.
///
/// Records emitted through the `log` facade (the reducer logs that way) are
/// forwarded as well. Calling this again once a subscriber is set is a no-op.
pub fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|err| {
        eprintln!("ignoring log filter '{directives}': {err}");
        EnvFilter::new("info")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .try_init();
}
