use colored::Colorize;
use tracing::level_filters::LevelFilter;

/// Configure console logging. The level comes from `RUST_LOG` and
/// defaults to INFO, since every pass should leave a timestamped line.
pub fn set_console_logging() -> anyhow::Result<()> {
    let level = if let Ok(level) = std::env::var("RUST_LOG") {
        match level.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            _ => LevelFilter::INFO,
        }
    } else {
        LevelFilter::INFO
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .compact()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// How a console line is tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Ok,
    Warn,
    Error,
}

/// One tagged report line, e.g. `OK - load average 0.52 ...`.
pub fn format_line(mark: Mark, line: &str) -> String {
    let tag = match mark {
        Mark::Ok => "OK".bright_green(),
        Mark::Warn => "WARN".bright_yellow(),
        Mark::Error => "ERROR".bright_red(),
    };
    format!("{tag} - {line}")
}

pub fn report(mark: Mark, line: &str) {
    println!("{}", format_line(mark, line));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lines_carry_their_tag() {
        let line = format_line(Mark::Warn, "record is malformed");
        assert!(line.contains("WARN"));
        assert!(line.ends_with(" - record is malformed"));
    }
}
