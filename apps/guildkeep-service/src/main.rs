#![forbid(unsafe_code)]

use std::sync::Arc;

use guildkeep_service::{init_tracing, ConfigurationService, ProcessEnv, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env(&ProcessEnv)?;
    let prefix = config.backup_prefix.clone();
    let service = ConfigurationService::open(config, Arc::new(ProcessEnv)).await?;

    let paths = service
        .backup_all(prefix.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("backup run failed: {e}"))?;
    for path in &paths {
        tracing::info!(path = %path.display(), "backup written");
    }
    Ok(())
}
