//! Orchestrator-side REPL: spawns the native adapter, owns the policy gate,
//! and drives goals through the control loop.

use desktop_agent::audit::TracingAuditSink;
use desktop_agent::controller::{Budgets, ControlLoop};
use desktop_agent::error::AgentError;
use desktop_agent::ipc::AdapterClient;
use desktop_agent::llm_gateway::LlmGateway;
use desktop_agent::policy::PolicyEngine;
use desktop_agent::schema::AgentAction;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{self, AsyncBufReadExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    println!("Desktop Agent");
    println!("--------------------------------------------------");
    println!("Type 'help' for commands. (Needs Accessibility permissions)");
    println!("--------------------------------------------------");

    let adapter_path =
        std::env::var("ADAPTER_PATH").unwrap_or_else(|_| "target/debug/adapter".to_string());
    let adapter = AdapterClient::spawn(&adapter_path)?;

    let audit = Arc::new(TracingAuditSink);
    let policy = Arc::new(Mutex::new(PolicyEngine::from_env(audit.clone())));
    let planner = Arc::new(LlmGateway::from_env()?);
    let mut control = ControlLoop::new(
        adapter,
        planner,
        policy.clone(),
        audit,
        Budgets::from_env(),
    );

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut buffer = String::new();

    print!("> ");
    std::io::stdout().flush()?;

    while reader.read_line(&mut buffer).await? > 0 {
        let input = buffer.trim().to_string();
        buffer.clear();
        if input.is_empty() {
            print!("> ");
            std::io::stdout().flush()?;
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts[0] {
            "help" => {
                println!("Available commands:");
                println!("  snap               - Capture UI snapshot (Observe)");
                println!("  click <id>         - Click an element by id");
                println!("  type <text>        - Type text (requires focus)");
                println!("  shell <command>    - Run a shell command through the gate");
                println!("  goal <text>        - Run an autonomous goal");
                println!("  unlock / lock      - Toggle the write lock");
                println!("  approve            - Grant one single-use approval");
                println!("  quit               - Exit");
            }
            "quit" | "exit" => break,
            "lock" => policy.lock().expect("policy engine poisoned").lock(),
            "unlock" => policy.lock().expect("policy engine poisoned").unlock(),
            "approve" => policy.lock().expect("policy engine poisoned").grant_approval(),
            "snap" => {
                submit(&mut control, AgentAction::UiSnapshot { scope: None }).await;
            }
            "click" => {
                if parts.len() < 2 {
                    println!("Usage: click <element_id>");
                } else {
                    submit(
                        &mut control,
                        AgentAction::UiClick {
                            element_id: parts[1].to_string(),
                        },
                    )
                    .await;
                }
            }
            "type" => {
                if parts.len() < 2 {
                    println!("Usage: type <text>");
                } else {
                    submit(
                        &mut control,
                        AgentAction::KeyboardType {
                            text: parts[1..].join(" "),
                        },
                    )
                    .await;
                }
            }
            "shell" => {
                if parts.len() < 2 {
                    println!("Usage: shell <command>");
                } else {
                    submit(
                        &mut control,
                        AgentAction::ShellExec {
                            command: parts[1..].join(" "),
                        },
                    )
                    .await;
                }
            }
            "goal" => {
                if parts.len() < 2 {
                    println!("Usage: goal <text>");
                } else {
                    match control.run(&parts[1..].join(" ")).await {
                        Ok(report) => {
                            println!("Run finished after {} steps: {:?}", report.steps, report.outcome);
                            for line in report.history {
                                println!("  {line}");
                            }
                        }
                        Err(e) => println!("Run failed: {e}"),
                    }
                }
            }
            _ => println!("Unknown command. Type 'help'."),
        }

        print!("> ");
        std::io::stdout().flush()?;
    }

    Ok(())
}

async fn submit(control: &mut ControlLoop<AdapterClient>, action: AgentAction) {
    match control.submit(action).await {
        Ok(resp) if resp.is_success() => {
            if let Some(data) = resp.data {
                let pretty = serde_json::to_string_pretty(&data).unwrap_or_default();
                if pretty != "{}" {
                    println!("{pretty}");
                }
            }
            println!("ok");
        }
        Ok(resp) => println!("failed: {}", resp.error.unwrap_or_default()),
        Err(AgentError::PolicyDenied(reason)) => println!("blocked: {reason}"),
        Err(e) => println!("error: {e}"),
    }
}
