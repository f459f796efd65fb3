use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::identity::DeploymentIdentity;
use crate::orchestrator::{RunResult, ServiceOutcome};

pub struct ServiceRow {
    pub name: String,
    pub kind: String,
    pub port: Option<u16>,
    pub status: String,
}

/// Table printed once startup has settled, before the supervisor blocks.
pub fn print_startup_summary(identity: &DeploymentIdentity, services: &[ServiceRow]) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!(
            "  {} {} ({})",
            "convoy".bold(),
            identity.name.cyan(),
            identity.id.dimmed()
        );
    } else {
        println!("  convoy {} ({})", identity.name, identity.id);
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Service").set_alignment(CellAlignment::Left),
        Cell::new("Kind").set_alignment(CellAlignment::Left),
        Cell::new("Port").set_alignment(CellAlignment::Left),
        Cell::new("Status").set_alignment(CellAlignment::Center),
    ]);

    for svc in services {
        let port = svc
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());

        let status_text = if use_color {
            match svc.status.as_str() {
                "ready" => format!("{} {}", "\u{25cf}".green(), "ready".green()),
                "failed" => format!("{} {}", "\u{25cf}".red(), "failed".red()),
                "skipped" => format!("{} {}", "\u{25cf}".yellow(), "skipped".yellow()),
                other => format!("\u{25cf} {}", other),
            }
        } else {
            format!("\u{25cf} {}", svc.status)
        };

        table.add_row(vec![
            Cell::new(&svc.name),
            Cell::new(&svc.kind),
            Cell::new(&port),
            Cell::new(&status_text),
        ]);
    }

    for line in table.to_string().lines() {
        println!("  {}", line);
    }

    println!();
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}

/// Final report printed after teardown, before the process exits.
pub fn print_run_report(result: &RunResult) {
    let use_color = std::io::stderr().is_terminal();

    eprintln!();
    for report in &result.services {
        let line = match &report.outcome {
            ServiceOutcome::Ready => format!("{} ready", report.id),
            ServiceOutcome::Failed { reason } => format!("{} failed: {}", report.id, reason),
            ServiceOutcome::Skipped { reason } => format!("{} skipped: {}", report.id, reason),
        };
        if use_color {
            match &report.outcome {
                ServiceOutcome::Ready => eprintln!("  {}", line.green()),
                ServiceOutcome::Failed { .. } if report.required => {
                    eprintln!("  {}", line.red())
                }
                _ => eprintln!("  {}", line.yellow()),
            }
        } else {
            eprintln!("  {line}");
        }
    }

    if let Some(fatal) = &result.fatal {
        if use_color {
            eprintln!("\n  {}", format!("fatal: {fatal}").red().bold());
        } else {
            eprintln!("\n  fatal: {fatal}");
        }
    }

    for warning in &result.teardown.warnings {
        if use_color {
            eprintln!("  {}", format!("warning: {warning}").yellow());
        } else {
            eprintln!("  warning: {warning}");
        }
    }
    eprintln!();
}
