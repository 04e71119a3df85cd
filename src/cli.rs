//! Command-line conventions of the router process.
//!
//! Options are positional and read from the *end* of the argument list, the
//! way the companion processes invoke the router:
//!
//! * `-ver` as the last argument prints the version and exits,
//! * `-search <freq_khz>` as the last two arguments starts search mode,
//! * `-debug` as the last argument turns on verbose stdout logging.

use crate::{SW_BUILD_NUMBER, SW_VERSION_MAJOR, SW_VERSION_MINOR};

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print [`version_string`] and exit 0.
    PrintVersion,
    /// Run the router.
    Run(StartupOptions),
}

/// Options for a normal run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupOptions {
    /// Search mode at this frequency instead of routing for the paired
    /// vehicle.
    pub search_frequency_khz: Option<u32>,
    /// Log verbosely to stdout.
    pub debug: bool,
}

/// The `MAJOR.MINOR (bBUILD)` version line.
pub fn version_string() -> String {
    format!(
        "{}.{} (b{})",
        SW_VERSION_MAJOR, SW_VERSION_MINOR, SW_BUILD_NUMBER
    )
}

/// Parses the trailing arguments. `args` excludes the program name.
pub fn parse_args(args: &[String]) -> Command {
    if args.last().map(String::as_str) == Some("-ver") {
        return Command::PrintVersion;
    }

    let mut options = StartupOptions::default();
    if args.len() >= 2 && args[args.len() - 2] == "-search" {
        options.search_frequency_khz = args[args.len() - 1].parse().ok();
    }
    if args.last().map(String::as_str) == Some("-debug") {
        options.debug = true;
    }
    Command::Run(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn version_takes_precedence() {
        assert_eq!(parse_args(&args(&["-debug", "-ver"])), Command::PrintVersion);
    }

    #[test]
    fn search_parses_trailing_frequency() {
        let parsed = parse_args(&args(&["-search", "5745000"]));
        assert_eq!(
            parsed,
            Command::Run(StartupOptions {
                search_frequency_khz: Some(5_745_000),
                debug: false,
            })
        );
    }

    #[test]
    fn debug_is_last_argument_only() {
        assert_eq!(
            parse_args(&args(&["-debug"])),
            Command::Run(StartupOptions {
                search_frequency_khz: None,
                debug: true,
            })
        );
        // Not last: ignored, matching how the launcher scripts call us.
        assert_eq!(
            parse_args(&args(&["-debug", "x"])),
            Command::Run(StartupOptions::default())
        );
    }

    #[test]
    fn empty_args_run_normally() {
        assert_eq!(parse_args(&[]), Command::Run(StartupOptions::default()));
    }

    #[test]
    fn version_line_shape() {
        let line = version_string();
        assert!(line.contains('.'));
        assert!(line.contains("(b"));
    }
}
