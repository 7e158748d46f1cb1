//! Output and reporting for Converge

use colored::Colorize;

use crate::executor::{HostRecap, RunReport};

/// Print a play header
pub fn play_header(name: &str) {
    let header = format!("PLAY [{}]", name);
    let stars = "*".repeat(80_usize.saturating_sub(header.len()));
    println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
}

/// Print one host's result line for a task
pub fn task_line(recap: &HostRecap) {
    for result in &recap.results {
        let status = if result.ignored {
            "ignored".magenta()
        } else {
            match result.status {
                crate::executor::task::TaskStatus::Ok => "ok".green(),
                crate::executor::task::TaskStatus::Changed => "changed".yellow(),
                crate::executor::task::TaskStatus::Failed => "failed".red().bold(),
                crate::executor::task::TaskStatus::Skipped => "skipping".cyan(),
                crate::executor::task::TaskStatus::Unreachable => "unreachable".red().bold(),
            }
        };
        match (&result.item, &result.msg) {
            (Some(item), _) => println!(
                "{}: [{}] => (item={}) {}",
                status,
                recap.host.bright_white().bold(),
                item,
                result.name
            ),
            (None, Some(msg)) if result.is_failure() => println!(
                "{}: [{}] {} => {}",
                status,
                recap.host.bright_white().bold(),
                result.name,
                msg
            ),
            _ => println!(
                "{}: [{}] {}",
                status,
                recap.host.bright_white().bold(),
                result.name
            ),
        }
    }
}

/// Print the final recap
pub fn recap(report: &RunReport) {
    println!(
        "\n{} {}",
        "PLAY RECAP".bright_white().bold(),
        "*".repeat(70).bright_black()
    );

    for (host, recap) in &report.hosts {
        let host_colored = if recap.failed_host || recap.unreachable_host {
            host.red().bold()
        } else if recap.changed > 0 {
            host.yellow()
        } else {
            host.green()
        };

        println!(
            "{:<30} : {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4} {}={:<4}",
            host_colored,
            "ok".green(),
            recap.ok,
            "changed".yellow(),
            recap.changed,
            "failed".red(),
            recap.failed,
            "skipped".cyan(),
            recap.skipped,
            "unreachable".red(),
            recap.unreachable,
            "ignored".magenta(),
            recap.ignored,
        );
        if let Some(ref first) = recap.first_failure {
            println!("{:<30}   first failure: {}", "", first.red());
        }
    }

    if report.aborted {
        println!("{}", "run aborted by operator".red().bold());
    }
}
