//! Tracing setup for binaries embedding the library

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install a stderr fmt subscriber filtered by `RUST_LOG`, with
/// `default_directive` (e.g. `"keyroom_core=debug"`) applied on top.
/// Only the first call has any effect.
pub fn init_tracing(default_directive: &str) {
    TRACING_INIT.call_once(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        match default_directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log directive {:?}: {}", default_directive, e),
        }

        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
