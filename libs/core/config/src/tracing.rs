use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Filter used in development when `RUST_LOG` is not set.
const DEV_DIRECTIVES: &str = "info,mail_operator=debug,email=debug,reconcile_worker=debug";

/// Filter used in production when `RUST_LOG` is not set.
const PROD_DIRECTIVES: &str = "info,reqwest=warn,hyper=warn";

/// Install color-eyre for readable error reports from `main`.
///
/// Shows the file and line of each error and hides the environment section.
/// Calling it twice is harmless.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize the global subscriber for the given environment.
///
/// - **Production**: flattened JSON events without module targets.
/// - **Development**: pretty, multi-line events.
///
/// Both variants include `tracing_error::ErrorLayer` so eyre reports carry the
/// active span trace (for a reconcile that is the controller and object key).
/// `RUST_LOG` overrides the default directives.
///
/// Repeated calls are ignored, which keeps tests that share a process happy.
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new(PROD_DIRECTIVES)
        } else {
            EnvFilter::new(DEV_DIRECTIVES)
        }
    });

    let result = if is_production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping"),
    }
}

/// Route events to the test harness writer so `cargo test` captures them.
///
/// Honors `RUST_LOG` and defaults to `debug` for the workspace crates.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEV_DIRECTIVES));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}
