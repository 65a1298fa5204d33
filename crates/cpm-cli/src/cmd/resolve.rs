use anyhow::Result;
use cpm_core::Session;
use tokio_util::sync::CancellationToken;

/// Print the build list, main module first.
pub async fn resolve(session: &Session, cancel: &CancellationToken) -> Result<()> {
    let list = session.resolve(cancel).await?;
    for module in &list {
        println!("{module}");
    }
    Ok(())
}
