/// Installs a JSON formatter routed through the test writer. Later calls are
/// no-ops, so every test may call it.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
