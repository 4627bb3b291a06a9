use crate::api_client::ApiClient;
use crate::ws_client::Connection;
use crate::Participant;
use anyhow::Result;
use colored::*;
use hub::{InvalidationInstruction, InvalidationResolver};
use serde_json::json;
use std::time::{Duration, Instant};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a connection that should not be targeted is watched for stray envelopes.
const SILENCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct TestResult {
    pub scenario_name: String,
    pub passed: bool,
    pub message: Option<String>,
    pub duration: Duration,
}

impl TestResult {
    fn finish(scenario_name: &str, start: Instant, outcome: Result<()>) -> Self {
        let duration = start.elapsed();
        match outcome {
            Ok(()) => {
                println!("{} {} ({:?})", "✓".green(), scenario_name, duration);
                Self {
                    scenario_name: scenario_name.to_string(),
                    passed: true,
                    message: None,
                    duration,
                }
            }
            Err(e) => {
                println!("{} {}: {}", "✗".red(), scenario_name, e);
                Self {
                    scenario_name: scenario_name.to_string(),
                    passed: false,
                    message: Some(e.to_string()),
                    duration,
                }
            }
        }
    }
}

/// The partitions a typical frontend would drop for the keys used below.
fn resolver() -> InvalidationResolver {
    InvalidationResolver::new()
        .with_key("settings", ["organization-settings", "user-settings"])
        .with_key("members", ["organization-members"])
}

fn check_resolution(
    connection: &Connection,
    instruction: &InvalidationInstruction,
    expected: &[&str],
) -> Result<()> {
    let resolved = resolver().resolve(instruction);
    if resolved != expected {
        anyhow::bail!(
            "{} resolved {:?} to {:?}, expected {:?}",
            connection.user_label,
            instruction.target_keys,
            resolved,
            expected
        );
    }
    Ok(())
}

pub async fn test_connection(api_client: &ApiClient) -> Result<TestResult> {
    let name = "Connection Test";
    println!("\n{} {}", "→".blue(), name);
    let start = Instant::now();

    let outcome = async {
        let health = api_client.health().await?;
        let clients = health["clients"].as_u64().unwrap_or_default();
        if clients < 2 {
            anyhow::bail!("Expected at least 2 connected clients, hub reports {clients}");
        }
        println!("  {} hub reports {} connected client(s)", "•".dimmed(), clients);
        Ok::<(), anyhow::Error>(())
    }
    .await;

    Ok(TestResult::finish(name, start, outcome))
}

pub async fn test_user_invalidation(
    user1: &Participant,
    api_client: &ApiClient,
    ws1: &mut Connection,
    ws2: &mut Connection,
) -> Result<TestResult> {
    let name = "User Invalidation";
    println!("\n{} {}", "→".blue(), name);
    let start = Instant::now();

    let outcome = async {
        let delivered = api_client
            .publish(
                json!({"type": "user", "subject_id": user1.subject_id}),
                &["settings"],
            )
            .await?;
        if delivered != 1 {
            anyhow::bail!("Expected delivery to 1 client, hub reports {delivered}");
        }

        let instruction = ws1.wait_for_invalidation(DELIVERY_TIMEOUT).await?;
        check_resolution(ws1, &instruction, &["organization-settings", "user-settings"])?;
        ws2.expect_no_invalidation(SILENCE_WINDOW).await
    }
    .await;

    Ok(TestResult::finish(name, start, outcome))
}

pub async fn test_group_invalidation(
    group_id: u64,
    api_client: &ApiClient,
    ws1: &mut Connection,
    ws2: &mut Connection,
) -> Result<TestResult> {
    let name = "Group Invalidation";
    println!("\n{} {}", "→".blue(), name);
    let start = Instant::now();

    let outcome = async {
        let delivered = api_client
            .publish(
                json!({"type": "group", "group_id": group_id}),
                &["members", "brand-new-key"],
            )
            .await?;
        if delivered != 1 {
            anyhow::bail!("Expected delivery to 1 client, hub reports {delivered}");
        }

        let instruction = ws1.wait_for_invalidation(DELIVERY_TIMEOUT).await?;
        // Unknown keys must still be invalidated verbatim.
        check_resolution(ws1, &instruction, &["organization-members", "brand-new-key"])?;
        ws2.expect_no_invalidation(SILENCE_WINDOW).await
    }
    .await;

    Ok(TestResult::finish(name, start, outcome))
}

pub async fn test_broadcast(
    api_client: &ApiClient,
    ws1: &mut Connection,
    ws2: &mut Connection,
) -> Result<TestResult> {
    let name = "Broadcast";
    println!("\n{} {}", "→".blue(), name);
    let start = Instant::now();

    let outcome = async {
        let delivered = api_client
            .publish(json!({"type": "broadcast"}), &["settings"])
            .await?;
        if delivered < 2 {
            anyhow::bail!("Expected delivery to at least 2 clients, hub reports {delivered}");
        }

        for connection in [ws1, ws2] {
            let instruction = connection.wait_for_invalidation(DELIVERY_TIMEOUT).await?;
            check_resolution(
                connection,
                &instruction,
                &["organization-settings", "user-settings"],
            )?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    Ok(TestResult::finish(name, start, outcome))
}
