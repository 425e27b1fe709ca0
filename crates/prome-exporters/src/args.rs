// Copyright 2024-Present The prome-exporters Authors. https://github.com/kolekti/prome-exporters
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;
use exporter_agent::config::DEFAULT_CONFIG_FILE;

/// Polls metric sources and pushes batches to a single destination.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "prome-exporters", version, about)]
pub struct Args {
    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Print the registered inputs, outputs and serializers, then exit.
    #[arg(long, default_value_t = false)]
    pub list: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_to_the_local_config_file() {
        let args = Args::try_parse_from(["prome-exporters"]).unwrap();
        assert_eq!(args.config, PathBuf::from("exporters.yaml"));
        assert!(!args.list);
    }

    #[test]
    fn short_and_long_config_flags() {
        let args = Args::try_parse_from(["prome-exporters", "-c", "/etc/exp.yaml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/exp.yaml"));
        let args =
            Args::try_parse_from(["prome-exporters", "--config=other.yaml", "--list"]).unwrap();
        assert_eq!(args.config, PathBuf::from("other.yaml"));
        assert!(args.list);
    }

    #[test]
    fn help_and_bad_flags_are_errors_of_different_kinds() {
        let help = Args::try_parse_from(["prome-exporters", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        assert!(!help.use_stderr());

        let missing = Args::try_parse_from(["prome-exporters", "--config"]).unwrap_err();
        assert!(missing.use_stderr());
        let unknown = Args::try_parse_from(["prome-exporters", "--verbose"]).unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::UnknownArgument);
    }
}
