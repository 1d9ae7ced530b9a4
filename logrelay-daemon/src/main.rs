use anyhow::Result;
use clap::Parser;

use logrelay_core::config::LogRelayConfig;
use logrelay_daemon::cli::DaemonCli;
use logrelay_daemon::logging;
use logrelay_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 파일 -> 환경변수 -> CLI 순으로 덮어쓰기
    let mut config = LogRelayConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", cli.config.display()))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    if cli.validate {
        println!(
            "configuration OK: {} ({} analyzers)",
            cli.config.display(),
            config.analyzers.len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "logrelay-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    orchestrator.run().await?;

    tracing::info!("logrelay-daemon shut down");
    Ok(())
}
