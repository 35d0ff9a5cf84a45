//! Subscriber setup for hosts that want the crate's tracing output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "YATE_LOG";
pub const FORMAT_ENV: &str = "LOG_FORMAT";

const TARGETS: [&str; 2] = ["yate_extmod", "yate_extmod_watch"];

/// `YATE_LOG` level applied to this crate and its binary. Unknown levels mean `info`.
fn filter_directive(level: Option<&str>) -> String {
    let level = match level {
        Some("warning") => "warn",
        Some(l @ ("trace" | "debug" | "warn" | "error")) => l,
        _ => "info",
    };
    TARGETS.map(|target| format!("{target}={level}")).join(",")
}

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` wins over `YATE_LOG` when it parses. Stdout is left alone: it carries
/// the protocol when running over standard streams. `LOG_FORMAT=json` switches to JSON
/// lines. Calling this twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(filter_directive(std::env::var(LOG_ENV).ok().as_deref()))
    });
    let json = std::env::var(FORMAT_ENV).is_ok_and(|format| format == "json");

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(
            filter_directive(None),
            "yate_extmod=info,yate_extmod_watch=info"
        );
        assert_eq!(
            filter_directive(Some("verbose")),
            "yate_extmod=info,yate_extmod_watch=info"
        );
    }

    #[test]
    fn known_levels_pass_through() {
        assert_eq!(
            filter_directive(Some("debug")),
            "yate_extmod=debug,yate_extmod_watch=debug"
        );
    }

    #[test]
    fn warning_is_an_alias() {
        assert_eq!(
            filter_directive(Some("warning")),
            "yate_extmod=warn,yate_extmod_watch=warn"
        );
    }
}
