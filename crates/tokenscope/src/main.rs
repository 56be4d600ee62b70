mod bootstrap;
mod settings;

use anyhow::Result;
use clap::Parser;
use scope_core::formatting::{format_currency, format_duration, format_number, format_tokens};
use scope_core::time_utils::TimezoneHandler;
use scope_data::history;
use scope_data::metrics::{Metrics, UsageEngine};
use scope_runtime::scheduler::{run_once, start_refresh};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    bootstrap::setup_logging(&settings.log_level)?;

    tracing::info!("tokenscope v{} starting", env!("CARGO_PKG_VERSION"));

    let config = settings.engine_config();
    let tz = TimezoneHandler::new(&settings.timezone);
    let engine = UsageEngine::new(config.clone());

    match settings.view.as_str() {
        "daily" | "monthly" => {
            let now = chrono::Utc::now();
            let (start, end) = config.default_window(now);
            let (_engine, result) = run_once(engine, start, end).await;
            print_history(&result?, &settings.view);
        }
        _ if settings.once => {
            let now = chrono::Utc::now();
            let (start, end) = config.default_window(now);
            let (_engine, result) = run_once(engine, start, end).await;
            print_snapshot(&result?, &tz);
        }
        _ => {
            let (mut rx, handle) = start_refresh(engine);
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(metrics) => print_snapshot(&metrics, &tz),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("ctrl-c received; shutting down");
                        handle.stop();
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Print one live snapshot to stdout.
fn print_snapshot(m: &Metrics, tz: &TimezoneHandler) {
    println!("── snapshot {} ──", tz.format_datetime(m.computed_at));
    println!("  cost:       {}", format_currency(m.cost_usage));
    println!("  tokens:     {}", format_tokens(m.token_usage));
    println!("  messages:   {}", m.messages_usage);
    println!(
        "  resets:     {} (in {})",
        tz.format_time(m.limit_resets_at),
        format_duration(m.time_to_reset)
    );

    match &m.burn_rate {
        Some(rate) => println!(
            "  burn:       {} tok/min, {}/h",
            format_number(rate.tokens_per_minute, 1),
            format_currency(rate.cost_per_hour)
        ),
        None => println!("  burn:       idle"),
    }
    println!("  cost rate:  {}/h", format_currency(m.cost_rate));

    match m.tokens_will_run_out {
        Some(at) => println!("  exhausted:  ~{}", tz.format_time(at)),
        None => println!("  exhausted:  not before reset"),
    }
    println!(
        "  p90 limits: {} tokens, {}, {} messages",
        format_tokens(m.p90_token_limit),
        format_currency(m.p90_cost_limit),
        m.p90_message_limit
    );

    let mut models: Vec<_> = m.model_distribution.iter().collect();
    models.sort_by(|a, b| a.0.cmp(b.0));
    for (model, stats) in models {
        println!(
            "    {:<24} {:>10}  {:>10}  {:>5.1}%",
            model,
            format_tokens(stats.tokens.usage()),
            format_currency(stats.cost_usd),
            stats.cost_share.unwrap_or(0.0)
        );
    }

    if m.load_stats.lines_skipped > 0 || m.load_stats.duplicates_skipped > 0 {
        println!(
            "  (skipped: {} lines, {} duplicates, {} files)",
            m.load_stats.lines_skipped, m.load_stats.duplicates_skipped, m.load_stats.files_skipped
        );
    }
}

/// Print per-day or per-month aggregates to stdout.
fn print_history(m: &Metrics, view: &str) {
    let periods = if view == "monthly" {
        history::aggregate_monthly(&m.records)
    } else {
        history::aggregate_daily(&m.records)
    };

    println!(
        "{:<10}  {:>10}  {:>10}  {:>10}  {:>8}",
        "period", "input", "output", "cost", "entries"
    );
    let mut total_cost = 0.0;
    for p in &periods {
        total_cost += p.cost_usd;
        println!(
            "{:<10}  {:>10}  {:>10}  {:>10}  {:>8}",
            p.period,
            format_tokens(p.tokens.input),
            format_tokens(p.tokens.output),
            format_currency(p.cost_usd),
            p.entries
        );
    }
    println!("{:<10}  {:>34}", "total", format_currency(total_cost));
}
