use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a process-wide logger exactly once, so integration tests can call this
/// unconditionally at the top of every test function.
pub fn setup_test_environment() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .is_test(true)
            .try_init();
    });
}
