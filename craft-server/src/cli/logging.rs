use anyhow::Result;
use colored::*;
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Filter directives for a `-v` count; `base_level` applies when no `-v` is given
fn default_directives(verbosity: u8, base_level: &str) -> String {
    let (crate_level, other_level) = match verbosity {
        0 => (base_level, "warn"),
        1 => ("debug", "info"),
        2 => ("trace", "debug"),
        _ => return "trace".to_string(),
    };
    format!(
        "craft={0},craft_server={0},infini_craft={0},{1}",
        crate_level, other_level
    )
}

pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool, base_level: &str) -> Result<()> {
    // RUST_LOG wins over -v, --quiet wins over both.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity, base_level)))
    };

    let is_terminal = io::stdout().is_terminal();

    if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()?;
    } else if is_terminal && !quiet {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_span_events(FmtSpan::CLOSE)
            .event_format(ColoredFormatter)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// Custom formatter for colored terminal output
struct ColoredFormatter;

impl<S, N> fmt::FormatEvent<S, N> for ColoredFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = event.metadata().level();

        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").to_string().dimmed())?;

        let level_str = match *level {
            Level::ERROR => "ERROR".red().bold(),
            Level::WARN => "WARN".yellow().bold(),
            Level::INFO => "INFO".green().bold(),
            Level::DEBUG => "DEBUG".blue().bold(),
            Level::TRACE => "TRACE".purple().bold(),
        };
        write!(writer, "{} ", level_str)?;

        // Innermost span name, e.g. "combine" or "split"
        if let Some(span) = ctx.lookup_current() {
            write!(writer, "{} ", span.name().cyan())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log a success message with green checkmark
pub fn success(message: &str) {
    if io::stdout().is_terminal() {
        println!("{} {}", "✓".green().bold(), message);
    } else {
        println!("SUCCESS: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_crate_level() {
        assert!(default_directives(0, "info").starts_with("craft=info"));
        assert!(default_directives(0, "debug").contains("infini_craft=debug,warn"));
        assert!(default_directives(1, "info").contains("infini_craft=debug"));
        assert_eq!(default_directives(7, "info"), "trace");
    }
}
