use clap::{Arg, ArgAction, Command, ValueHint};
use std::path::PathBuf;

fn config_arg() -> Arg {
    Arg::new("config")
        .help("Path to a JSON configuration file")
        .required(false)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn save_dir_arg() -> Arg {
    Arg::new("save_dir")
        .short('o')
        .long("save_dir")
        .value_parser(clap::builder::NonEmptyStringValueParser::new())
        .help(
            "Directory holding one sub-directory per trained model. \
             Overrides the directory specified in the configuration file.",
        )
        .value_hint(ValueHint::DirPath)
}

fn device_arg() -> Arg {
    Arg::new("device")
        .long("device")
        .help("Device for the neural models: 'cpu', 'cuda' or 'cuda:N'.")
        .value_parser(clap::builder::NonEmptyStringValueParser::new())
        .value_hint(ValueHint::Other)
}

pub fn build_cli() -> Command {
    Command::new("polarity")
        .version(clap::crate_version!())
        .about("\u{1F4AC} Polarity CLI - Train, compare and explain sentiment classifiers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("train")
                .about("Train and evaluate one or more model families on labeled text")
                .arg(config_arg())
                .arg(
                    Arg::new("datasets")
                        .short('d')
                        .long("dataset")
                        .action(ArgAction::Append)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help(
                            "Labeled CSV/TSV file. Repeat to concatenate several files. \
                             Overrides the datasets specified in the configuration file.",
                        )
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("models")
                        .short('m')
                        .long("model")
                        .action(ArgAction::Append)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Model identifier to train (bert, lstm, rf). Repeat to compare several.")
                        .value_hint(ValueHint::Other),
                )
                .arg(save_dir_arg())
                .arg(device_arg())
                .arg(
                    Arg::new("no_report")
                        .long("no-report")
                        .help("Disable HTML report generation.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("predict")
                .about("Predict the sentiment of a text with a trained model and explain it")
                .arg(config_arg())
                .arg(
                    Arg::new("model")
                        .short('m')
                        .long("model")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Model identifier to predict with.")
                        .value_hint(ValueHint::Other),
                )
                .arg(
                    Arg::new("text")
                        .short('t')
                        .long("text")
                        .help("Text to classify.")
                        .value_hint(ValueHint::Other),
                )
                .arg(
                    Arg::new("method")
                        .long("method")
                        .help("Explanation method.")
                        .value_parser(["perturbation", "lime", "attribution", "shap"]),
                )
                .arg(
                    Arg::new("num_features")
                        .short('k')
                        .long("num_features")
                        .help("Maximum number of words in the explanation.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("num_samples")
                        .long("num_samples")
                        .help("Perturbed samples drawn by the perturbation explainer.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Seed for explanation sampling.")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(save_dir_arg())
                .arg(device_arg()),
        )
        .subcommand(
            Command::new("reset")
                .about("Delete every saved model")
                .arg(save_dir_arg()),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }
}
