use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for alignment
const SERVICE_NAME_WIDTH: usize = 24;
const LOG_LEVEL_WIDTH: usize = 7;

/// `[timestamp] [service-component] [level] message`
pub struct LinebeatLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl LinebeatLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: is_terminal(),
        }
    }

    #[cfg(test)]
    fn without_color(mut self) -> Self {
        self.color_enabled = false;
        self
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };

        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn write_line(
        &self,
        writer: &mut dyn fmt::Write,
        timestamp: &str,
        level: &tracing::Level,
        visitor: &FieldVisitor,
    ) -> fmt::Result {
        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        write!(
            writer,
            "{}[{}]{} [{}] [{}{}{}] ",
            cyan,
            timestamp,
            reset,
            self.format_service_name(visitor.component.as_deref()),
            color,
            self.format_log_level(level),
            reset
        )?;
        writeln!(writer, "{}", visitor.message)
    }
}

impl<S, N> FormatEvent<S, N> for LinebeatLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.write_line(&mut writer, &timestamp, event.metadata().level(), &visitor)
    }
}

/// Install the global subscriber for a binary
pub fn init(service_name: &str, log_level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("linebeat={}", log_level).parse()?)
        .add_directive(format!("linebeat_server={}", log_level).parse()?)
        .add_directive(format!("linebeat_client={}", log_level).parse()?)
        .add_directive(format!("linebeat_session={}", log_level).parse()?)
        .add_directive(format!("linebeat_wire={}", log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(LinebeatLogFormatter::new(service_name))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}

/// Pulls `message` and `component` out of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => {
                let comp = format!("{:?}", value);
                self.component = Some(comp.trim_matches('"').to_string());
            }
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Check if we're outputting to a terminal (for color support)
fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_padding_and_component() {
        let formatter = LinebeatLogFormatter::new("linebeat").without_color();
        assert_eq!(formatter.format_service_name(None).trim_end(), "linebeat");
        assert_eq!(formatter.format_service_name(None).len(), SERVICE_NAME_WIDTH);
        assert_eq!(
            formatter.format_service_name(Some("liveness")).trim_end(),
            "linebeat-liveness"
        );

        let long = LinebeatLogFormatter::new("a-very-long-service-name-indeed").without_color();
        let name = long.format_service_name(Some("reconnect"));
        assert_eq!(name.chars().count(), SERVICE_NAME_WIDTH);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn test_write_line_without_color() {
        let formatter = LinebeatLogFormatter::new("linebeat").without_color();
        let visitor = FieldVisitor {
            message: "Client 1.2.3.4:5 failed to send ping in time. Closing connection.".to_string(),
            component: Some("liveness".to_string()),
        };

        let mut out = String::new();
        formatter
            .write_line(&mut out, "2024-01-01 00:00:00.000", &tracing::Level::WARN, &visitor)
            .unwrap();

        assert!(out.starts_with("[2024-01-01 00:00:00.000] [linebeat-liveness"));
        assert!(out.contains("[⚠ WARN"));
        assert!(out.ends_with("Closing connection.\n"));
        assert!(!out.contains('\x1b'));
    }
}
