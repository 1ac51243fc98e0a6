//! Status, report and mode listing output.

use tallychat::cache::CacheStats;
use tallychat::pipeline::{DetailedReport, StatusSnapshot};
use tallychat::session::Mode;

/// List preset modes.
pub(crate) fn cmd_modes() {
    println!(
        "{:<12} {:<8} {:<8} {}",
        "Mode", "Temp", "Tokens", "Description"
    );
    println!("{}", "-".repeat(60));
    for mode in Mode::ALL {
        println!(
            "{:<12} {:<8} {:<8} {}",
            mode.id(),
            format!("{:.1}", mode.temperature()),
            mode.max_tokens(),
            mode.label()
        );
    }
}

pub(crate) fn print_status(status: &StatusSnapshot) {
    let budget = &status.budget;
    println!("Session:  {}", status.session_id);
    println!("Model:    {}", status.model);
    println!("Mode:     {}", status.mode);
    println!(
        "History:  {} messages ({} rounds)",
        status.message_count, status.rounds
    );
    println!(
        "Budget:   ${:.4} of ${:.2} ({:.1}%){}",
        budget.current_cost,
        budget.limit,
        budget.usage_percentage,
        if budget.is_over_budget {
            " OVER BUDGET"
        } else if budget.is_near_limit {
            " near limit"
        } else {
            ""
        }
    );
    print_cache_stats(&status.cache);
}

pub(crate) fn print_cache_stats(stats: &CacheStats) {
    if !stats.enabled {
        println!("Cache:    disabled");
        return;
    }
    println!(
        "Cache:    {}/{} entries, {} hits, {} misses ({:.1}% hit rate), {} evictions",
        stats.entries,
        stats.max_entries,
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0,
        stats.evictions
    );
}

pub(crate) fn print_report(report: &DetailedReport) {
    print_status(&report.status);
    let budget = &report.budget;
    println!();
    println!(
        "Calls: {}  Input tokens: {}  Output tokens: {}",
        budget.total_calls, budget.total_input_tokens, budget.total_output_tokens
    );
    if budget.by_model.is_empty() {
        println!("No billed calls yet.");
        return;
    }

    println!();
    println!(
        "{:<28} {:<8} {:<12} {:<12} {:<10}",
        "Model", "Calls", "Input", "Output", "Cost"
    );
    println!("{}", "-".repeat(72));
    for usage in budget.by_model.values() {
        println!(
            "{:<28} {:<8} {:<12} {:<12} {:<10}",
            usage.display_name,
            usage.calls,
            usage.input_tokens,
            usage.output_tokens,
            format!("${:.4}", usage.cost)
        );
    }

    println!();
    println!("Recent calls:");
    for call in &budget.recent {
        println!(
            "  {}  {:<28} {:>7} in {:>7} out  ${:.4}",
            call.timestamp.format("%H:%M:%S"),
            call.model,
            call.input_tokens,
            call.output_tokens,
            call.cost
        );
    }
}
