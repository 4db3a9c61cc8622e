mod ask;
mod jobs;
mod serve;

use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::jobs::JobKind;
use crate::core::jobs::training::Target;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the local API server")
        .command("ask <message…>", "Run one turn and print the reply")
        .print();

    GuideSection::new("Style models")
        .command("collect <messages|email>", "Build a training dataset from sent history")
        .command("train <messages|email>", "Fine-tune a style adapter")
        .command("register <messages|email>", "Export the adapter and register it with Ollama")
        .print();

    GuideSection::new("Options")
        .command("--api-host <host>", "Bind address for serve (default 127.0.0.1)")
        .command("--api-port <port>", "Port for serve (default 8000)")
        .blank()
        .text("Prefix a message with [texts], [emails] or [files] to pull in that source.")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("courier").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

/// Everything after the command word, joined back into one utterance.
pub(crate) fn parse_utterance(args: &[String], start: usize) -> String {
    args.get(start..)
        .unwrap_or_default()
        .join(" ")
        .trim()
        .to_string()
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => {
            let config = AppConfig::load()?;
            let (api_host, api_port) = parse_api_server_flags(
                &args,
                2,
                config.file.api_host.clone(),
                config.file.api_port,
            );
            serve::run(config, api_host, api_port).await
        }
        "ask" => {
            let utterance = parse_utterance(&args, 2);
            if utterance.is_empty() {
                print_error("Error: a message is required, e.g. courier ask \"[emails] anything from Dana?\"");
                return Ok(());
            }
            let config = AppConfig::load()?;
            ask::run(config, utterance).await
        }
        "collect" | "train" | "register" => {
            let Some(kind) = parse_job(cmd, args.get(2).map(String::as_str)) else {
                print_error(&format!("Error: expected `courier {cmd} <messages|email>`"));
                return Ok(());
            };
            let config = AppConfig::load()?;
            jobs::run(config, kind).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
            Ok(())
        }
    }
}

fn parse_job(cmd: &str, target: Option<&str>) -> Option<JobKind> {
    let target = Target::parse(target?)?;
    match cmd {
        "collect" => Some(target.collect_kind()),
        "train" => Some(target.train_kind()),
        "register" => Some(target.register_kind()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_api_server_flags, parse_job, parse_utterance};
    use crate::core::jobs::JobKind;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = args(&[
            "courier",
            "serve",
            "--api-host",
            "0.0.0.0",
            "--api-port",
            "19000",
        ]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 8000);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn bad_port_keeps_default() {
        let args = args(&["courier", "serve", "--api-port", "eighty"]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 8000);
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8000);
    }

    #[test]
    fn utterance_keeps_tags_and_words() {
        let args = args(&["courier", "ask", "[emails]", "anything", "from", "Dana?"]);
        assert_eq!(parse_utterance(&args, 2), "[emails] anything from Dana?");
        assert_eq!(parse_utterance(&args, 9), "");
    }

    #[test]
    fn job_commands_map_to_kinds() {
        assert_eq!(parse_job("collect", Some("messages")), Some(JobKind::CollectMessages));
        assert_eq!(parse_job("train", Some("email")), Some(JobKind::TrainEmail));
        assert_eq!(parse_job("register", Some("messages")), Some(JobKind::RegisterMessages));
        assert_eq!(parse_job("collect", Some("fax")), None);
        assert_eq!(parse_job("collect", None), None);
    }
}
