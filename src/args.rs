use std::path::PathBuf;

use clap::Parser;
use tsgate::config::DEFAULT_CONFIG_PATH;

/// Gets a small string with this program's name and version.
pub fn get_version_string() -> String {
    format!(
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), " ({} {})"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Specifies how the program should run.
#[derive(Debug, PartialEq, Parser)]
#[command(version, about)]
pub struct StartupArguments {
    /// The configuration file to use.
    #[arg(short = 'c', long = "conf", env = "TSGATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Print additional information, down to every PDU.
    #[arg(short, long, conflicts_with = "silent")]
    pub verbose: bool,

    /// Only print warnings and errors.
    #[arg(short, long)]
    pub silent: bool,

    /// Validate the configuration file and exit.
    #[arg(long)]
    pub check: bool,
}

impl StartupArguments {
    /// The log filter used when `RUST_LOG` isn't set.
    pub fn default_log_filter(&self) -> &'static str {
        match (self.verbose, self.silent) {
            (true, _) => "debug",
            (false, true) => "warn",
            (false, false) => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Result<StartupArguments, clap::Error> {
        StartupArguments::try_parse_from(std::iter::once("tsgate").chain(args.iter().copied()))
    }

    #[test]
    fn command_is_well_formed() {
        StartupArguments::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let args = parse(&["-c", "/etc/tsgate.yaml", "--verbose", "--check"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/tsgate.yaml"));
        assert!(args.check);
        assert_eq!(args.default_log_filter(), "debug");

        let args = parse(&["-s"]).unwrap();
        assert_eq!(args.default_log_filter(), "warn");

        assert!(parse(&["-v", "-s"]).is_err());
        assert!(parse(&["--server"]).is_err());
    }
}
