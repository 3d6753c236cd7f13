//! Command-line argument parsing for the worldclock host

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
}

pub fn parse_args() -> Args {
    parse_args_from(std::env::args().skip(1))
}

/// Parse arguments, program name excluded; unknown flags are ignored
pub fn parse_args_from<I, S>(args: I) -> Args
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = Args::default();
    for arg in args {
        match arg.as_ref() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
    }
    result
}

pub fn print_help() {
    println!("worldclock - dual time zone clock sensor\n");
    println!("USAGE:");
    println!("    worldclock [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once          Run a single update, print the clock and exit");
    println!("    --validate      Validate configuration and exit");
    println!("    --help, -h      Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    TIME_ZONE, SECOND_TIME_ZONE       Required IANA zone identifiers");
    println!("    FIRST_CITY_NAME, SECOND_CITY_NAME Optional labels");
    println!("    TIME_FORMAT                       strftime pattern (default %H:%M)");
    println!("    CUSTOM_TIME or STATE_FILE         Source of the reminder target time");
    println!("    SENDER, RECEIVER, PASSWORD        Reminder email (optional)");
    println!("    SENSOR_PORT                       Serve /state, /health, /metrics");
}
