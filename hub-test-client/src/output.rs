use crate::scenarios::TestResult;
use colored::*;

pub fn print_test_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.passed).count();

    for result in results {
        let status = if result.passed {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!(
            "  [{}] {} ({:?})",
            status, result.scenario_name, result.duration
        );
        if let Some(message) = &result.message {
            println!("         {}", message.dimmed());
        }
    }

    println!(
        "\n{} passed, {} failed, {} total",
        passed.to_string().green(),
        (results.len() - passed).to_string().red(),
        results.len()
    );
}
