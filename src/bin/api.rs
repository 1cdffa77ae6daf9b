use budget_guardian::{
    agent::create_default_agent,
    api::start_server,
    config::{profile_from_env, AgentConfig},
};
use std::sync::Arc;
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

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Budget Guardian - API Server");
    info!("📍 Port: {}", api_port);

    let config = AgentConfig::from_env()?;
    let profile = profile_from_env()?;
    let agent = Arc::new(create_default_agent(config)?);

    info!(backend = agent.backend_name(), profile = %profile.name, "✅ Agent initialized");
    info!("📡 Starting API server...");

    start_server(agent, profile, api_port).await?;

    Ok(())
}
