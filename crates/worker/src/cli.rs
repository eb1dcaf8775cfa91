//! Command-line flags.

use std::time::Duration;

use clap::Parser;
use lofi_pipeline::{BatchOptions, PromptSource};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lofi-worker",
    version,
    about = "Generate lo-fi music videos and upload them to YouTube"
)]
pub struct Cli {
    /// Number of videos to produce
    #[arg(short = 'n', long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Seconds to wait between runs of a batch
    #[arg(short, long, default_value = "60", value_name = "SECS")]
    pub delay: u64,

    /// Custom music prompt (randomized per run when omitted)
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Abort the batch after this many failures in a row (0 disables)
    #[arg(long, default_value = "3")]
    pub max_consecutive_failures: u32,
}

impl Cli {
    pub fn batch_options(&self) -> BatchOptions {
        let prompt = match self.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => PromptSource::Fixed(p.to_string()),
            _ => PromptSource::Randomized,
        };
        BatchOptions {
            count: self.count,
            delay: Duration::from_secs(self.delay),
            max_consecutive_failures: self.max_consecutive_failures,
            prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_produce_one_randomized_run() {
        let cli = Cli::try_parse_from(["lofi-worker"]).unwrap();
        let options = cli.batch_options();

        assert_eq!(options.count, 1);
        assert_eq!(options.delay, Duration::from_secs(60));
        assert_eq!(options.max_consecutive_failures, 3);
        assert_matches!(options.prompt, PromptSource::Randomized);
    }

    #[test]
    fn batch_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "lofi-worker",
            "--count",
            "5",
            "--delay",
            "0",
            "--prompt",
            "rainy jazz piano",
            "--max-consecutive-failures",
            "0",
        ])
        .unwrap();
        let options = cli.batch_options();

        assert_eq!(options.count, 5);
        assert_eq!(options.delay, Duration::ZERO);
        assert_eq!(options.max_consecutive_failures, 0);
        assert_matches!(options.prompt, PromptSource::Fixed(ref p) if p == "rainy jazz piano");
    }

    #[test]
    fn blank_prompt_falls_back_to_randomized() {
        let cli = Cli::try_parse_from(["lofi-worker", "-p", "  "]).unwrap();
        assert_matches!(cli.batch_options().prompt, PromptSource::Randomized);
    }

    #[test]
    fn zero_count_is_rejected() {
        assert!(Cli::try_parse_from(["lofi-worker", "--count", "0"]).is_err());
    }
}
