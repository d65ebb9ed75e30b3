//! Human-readable text output

use crate::coordinator::{RoundError, RoundReport, WorkerReport};
use crate::worker::WorkerOutcome;
use crate::aggregate::ItemMap;

/// Print a completed round to the console
///
/// Displays:
/// - Strategy, generation and elapsed time
/// - Per-partition outcome
/// - Final SKU quantities
pub fn print_round_report(report: &RoundReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    ROUND RESULTS");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    println!("Strategy:    {}", report.strategy);
    println!("Generation:  {}", report.generation);
    println!("Elapsed:     {:.3}s", report.elapsed.as_secs_f64());
    if let Some(leader) = report.leader() {
        println!("Finalized by: {}", leader);
    }
    println!();

    print_workers(&report.workers);
    print_items("Final inventory:", &report.aggregate);
}

/// Print why a round failed
pub fn print_round_error(err: &RoundError) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    ROUND FAILED");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("{}", err);
    println!();

    match err {
        RoundError::Aborted { snapshot, workers, .. } => {
            print_workers(workers);
            print_items("Merged before abort (not persisted):", snapshot);
        }
        RoundError::Persist { snapshot, .. } => {
            print_items("Synchronized inventory (not persisted):", snapshot);
        }
        _ => {}
    }
}

/// One-word label for a worker outcome
pub fn outcome_label(outcome: &WorkerOutcome) -> String {
    match outcome {
        WorkerOutcome::Arrived { leader: true, .. } => "arrived (finalizer)".to_string(),
        WorkerOutcome::Arrived { .. } => "arrived".to_string(),
        WorkerOutcome::Aborted(e) => format!("aborted: {}", e),
        WorkerOutcome::Failed(e) => format!("failed: {}", e),
    }
}

fn print_workers(workers: &[WorkerReport]) {
    println!("Partitions:");
    for worker in workers {
        println!("  {:<40} {}", worker.partition, outcome_label(&worker.outcome));
    }
    println!();
}

fn print_items(title: &str, items: &ItemMap) {
    println!("{}", title);
    if items.is_empty() {
        println!("  (empty)");
    }
    for (sku, quantity) in items {
        println!("  {:<20} {:>12}", sku, format_number(*quantity));
    }
    let total: u128 = items.values().map(|&q| q as u128).sum();
    println!("  {:<20} {:>12}", "TOTAL", format_number(total));
    println!();
}

/// Format number with thousands separators
pub fn format_number<N: Into<u128>>(n: N) -> String {
    let s = n.into().to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
