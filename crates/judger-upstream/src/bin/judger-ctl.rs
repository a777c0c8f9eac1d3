// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judger Control CLI
//!
//! Operator tool for the contest platform's runner API.
//!
//! Usage:
//!   judger-ctl <command> [options]
//!
//! Commands:
//!   register --name <name> --label <label>... --token <token>
//!   poll                          Poll one submission and print it

use judger_upstream::{RegisterRequest, UpstreamClient, UpstreamConfig};
use std::fs;
use std::process::ExitCode;

const DEFAULT_VERSION: &str = "v0.1.0-alpha";
const DEFAULT_ENV_FILE: &str = "runner.env";

fn print_usage() {
    eprintln!(
        r#"Usage: judger-ctl <command> [options]

Talk to the contest platform as a judge runner.

COMMANDS:
    register                        Register a runner and write its credentials
    poll                            Poll one submission and print it

REGISTER OPTIONS:
    -n, --name <name>               Runner name (required, env RUNNER_NAME)
    -l, --label <label>             Runner label, repeatable (required, env RUNNER_LABELS)
    -V, --version <version>         Runner version (default: v0.1.0-alpha, env RUNNER_VERSION)
    -t, --token <token>             Registration token (required, env RUNNER_TOKEN)
    -w, --write-file <path>         Credentials file (default: runner.env)

ENVIRONMENT:
    JUDGER_ENDPOINT                 Platform URL (default: https://hpcgame.pku.edu.cn)
    RUNNER_ID, RUNNER_KEY           Runner credentials (required for poll)
"#
    );
}

#[derive(Debug)]
enum Command {
    Register {
        name: String,
        labels: Vec<String>,
        version: String,
        token: String,
        write_file: String,
    },
    Poll,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    parse_args_with_env(args, |key| std::env::var(key).ok())
}

fn parse_args_with_env(
    args: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "poll" => match args.get(2) {
            Some(arg) => Err(format!("Unknown argument: {}", arg)),
            None => Ok(Command::Poll),
        },
        "register" => {
            let mut name: Option<String> = None;
            let mut labels: Vec<String> = Vec::new();
            let mut version: Option<String> = None;
            let mut token: Option<String> = None;
            let mut write_file = DEFAULT_ENV_FILE.to_string();

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--name" | "-n" => {
                        i += 1;
                        name = Some(args.get(i).ok_or("--name requires a value")?.clone());
                    }
                    "--label" | "-l" => {
                        i += 1;
                        labels.push(args.get(i).ok_or("--label requires a value")?.clone());
                    }
                    "--version" | "-V" => {
                        i += 1;
                        version = Some(args.get(i).ok_or("--version requires a value")?.clone());
                    }
                    "--token" | "-t" => {
                        i += 1;
                        token = Some(args.get(i).ok_or("--token requires a value")?.clone());
                    }
                    "--write-file" | "-w" => {
                        i += 1;
                        write_file = args.get(i).ok_or("--write-file requires a path")?.clone();
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            if labels.is_empty() {
                labels = env("RUNNER_LABELS")
                    .map(|v| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
            }
            if labels.is_empty() {
                return Err("--label is required".to_string());
            }

            Ok(Command::Register {
                name: name
                    .or_else(|| env("RUNNER_NAME"))
                    .ok_or("--name is required")?,
                labels,
                version: version
                    .or_else(|| env("RUNNER_VERSION"))
                    .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
                token: token
                    .or_else(|| env("RUNNER_TOKEN"))
                    .ok_or("--token is required")?,
                write_file,
            })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

fn runner_env_contents(runner_id: &str, runner_key: &str) -> String {
    format!("RUNNER_ID={}\nRUNNER_KEY={}\n", runner_id, runner_key)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match UpstreamConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match UpstreamClient::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(&client, cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(client: &UpstreamClient, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Register {
            name,
            labels,
            version,
            token,
            write_file,
        } => {
            let request = RegisterRequest {
                name,
                labels,
                version,
                registration_token: token,
            };
            let creds = client
                .register(&request)
                .await
                .map_err(|e| format!("Registration failed: {}", e))?;

            println!("Runner ID:  {}", creds.runner_id);
            println!("Runner Key: {}", creds.runner_key);
            println!("Writing credentials to {}", write_file);
            fs::write(
                &write_file,
                runner_env_contents(&creds.runner_id, &creds.runner_key),
            )
            .map_err(|e| format!("Failed to write {}: {}", write_file, e))?;
        }

        Command::Poll => {
            if client.config().credentials.is_none() {
                return Err("RUNNER_ID and RUNNER_KEY are required for poll".to_string());
            }
            match client.poll().await.map_err(|e| e.to_string())? {
                Some(task) => {
                    let text = serde_json::to_string_pretty(&task).map_err(|e| e.to_string())?;
                    println!("{}", text);
                }
                None => println!("No submission queued"),
            }
        }
    }

    Ok(())
}
