use budget_guardian::{
    agent::create_default_agent,
    config::{profile_from_env, AgentConfig},
    models::BudgetStatus,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Budget Guardian starting");

    let config = AgentConfig::from_env()?;
    let profile = profile_from_env()?;
    let period = config.window.period_ending(Utc::now().date_naive());
    let agent = create_default_agent(config)?;

    info!(
        profile = %profile.name,
        %period,
        backend = agent.backend_name(),
        "Running analysis"
    );

    match agent
        .run(&profile, period, None, CancellationToken::new())
        .await
    {
        Ok(report) => {
            println!("\n=== BUDGET REPORT ({}) ===", report.period);
            let badge = match report.status {
                BudgetStatus::Good => "✅",
                BudgetStatus::Alert => "⚠️",
            };
            println!("{} {}", badge, report.message);

            println!("\nDeviations:");
            for d in &report.deviations {
                println!(
                    "  {:<14} budget {:>9.2}  actual {:>9.2}  severity {:>6.3}",
                    d.category, d.budgeted_amount, d.actual_amount, d.severity
                );
            }

            if let Some(plan) = &report.plan {
                println!("\nReallocation:");
                for t in &plan.transfers {
                    println!("  {} → {}: {:.2}", t.from_category, t.to_category, t.amount);
                }
                for s in &plan.shortfalls {
                    println!("  {} still short by {:.2}", s.category, s.amount);
                }
            }

            if !report.recommendations.is_empty() {
                println!("\nRecommendations:");
                for r in &report.recommendations {
                    println!("  [{}] {}", r.category, r.text);
                    for source in &r.references {
                        println!("      📡 {}", source.source);
                    }
                }
            }

            if let Some(summary) = &report.backend_summary {
                println!("\nSummary: {}", summary);
            }

            println!("\nReasoning Trace ({} cycles):", report.cycles_used);
            for step in &report.steps {
                println!("  {}: [{}] {}", step.index + 1, step.role, step.content);
            }
            println!("\nFingerprint: {}", report.fingerprint);
            Ok(())
        }
        Err(failure) => {
            eprintln!("Analysis failed: {}", failure.error);
            for step in &failure.steps {
                eprintln!("  {}: [{}] {}", step.index + 1, step.role, step.content);
            }
            Err(Box::new(failure) as Box<dyn std::error::Error>)
        }
    }
}
