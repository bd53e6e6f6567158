use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("GATE_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names_map_to_counts() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, level) in levels.iter().enumerate() {
            temp_env::with_vars([("GATE_LOG_LEVEL", Some(level))], || {
                let command = with_args(Command::new("gate"));
                let matches = command.get_matches_from(vec!["gate"]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    Some(u8::try_from(index).expect("fits"))
                );
            });
        }
    }

    #[test]
    fn bogus_log_level_is_rejected() {
        temp_env::with_vars([("GATE_LOG_LEVEL", Some("loud"))], || {
            let command = with_args(Command::new("gate"));
            assert!(command.try_get_matches_from(vec!["gate"]).is_err());
        });
    }
}
