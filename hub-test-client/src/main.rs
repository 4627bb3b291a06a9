use anyhow::Result;
use clap::Parser;
use colored::*;

mod api_client;
mod output;
mod scenarios;
mod ws_client;

use api_client::ApiClient;
use output::print_test_summary;
use ws_client::Connection;

#[derive(Parser)]
#[command(name = "hub-test-client")]
#[command(about = "Realtime Hub Integration Testing Tool")]
struct Cli {
    /// Base URL of the hub (e.g., http://localhost:4000)
    #[arg(long)]
    base_url: String,

    /// Subject id of user 1, who is a member of the test group
    #[arg(long, default_value_t = 1)]
    user1: u64,

    /// Subject id of user 2, who is not a member of the test group
    #[arg(long, default_value_t = 2)]
    user2: u64,

    /// Group id used by the group invalidation scenario
    #[arg(long, default_value_t = 100)]
    group: u64,

    /// Bearer token for the internal publish endpoint, if the hub requires one
    #[arg(long, env = "PUBLISH_TOKEN")]
    publish_token: Option<String>,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Test that both WebSocket connections are registered
    ConnectionTest,
    /// Test an invalidation addressed to user 1 only
    UserInvalidation,
    /// Test an invalidation addressed to the test group
    GroupInvalidation,
    /// Test an invalidation addressed to every connection
    Broadcast,
    /// Run all tests
    All,
}

pub struct Participant {
    pub subject_id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());

    let user1 = Participant {
        subject_id: cli.user1,
    };
    let user2 = Participant {
        subject_id: cli.user2,
    };
    let api_client = ApiClient::new(
        reqwest::Client::new(),
        cli.base_url.clone(),
        cli.publish_token.clone(),
    );

    // Establish WebSocket connections
    println!("\n{} Establishing WebSocket connections...", "→".blue());
    let mut ws1 = Connection::establish(
        &cli.base_url,
        user1.subject_id,
        &[cli.group],
        format!("User 1 (subject {}, group {})", user1.subject_id, cli.group),
    )
    .await?;

    let mut ws2 = Connection::establish(
        &cli.base_url,
        user2.subject_id,
        &[],
        format!("User 2 (subject {})", user2.subject_id),
    )
    .await?;

    println!("{} {} connected", "✓".green(), ws1.user_label);
    println!("{} {} connected", "✓".green(), ws2.user_label);

    // Run test scenarios
    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    match cli.scenario {
        ScenarioChoice::ConnectionTest => {
            results.push(scenarios::test_connection(&api_client).await?);
        }
        ScenarioChoice::UserInvalidation => {
            results.push(
                scenarios::test_user_invalidation(&user1, &api_client, &mut ws1, &mut ws2).await?,
            );
        }
        ScenarioChoice::GroupInvalidation => {
            results.push(
                scenarios::test_group_invalidation(cli.group, &api_client, &mut ws1, &mut ws2)
                    .await?,
            );
        }
        ScenarioChoice::Broadcast => {
            results.push(scenarios::test_broadcast(&api_client, &mut ws1, &mut ws2).await?);
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&api_client).await?);
            results.push(
                scenarios::test_user_invalidation(&user1, &api_client, &mut ws1, &mut ws2).await?,
            );
            results.push(
                scenarios::test_group_invalidation(cli.group, &api_client, &mut ws1, &mut ws2)
                    .await?,
            );
            results.push(scenarios::test_broadcast(&api_client, &mut ws1, &mut ws2).await?);
        }
    }

    // Print summary
    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
