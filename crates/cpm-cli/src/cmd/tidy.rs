use anyhow::Result;
use cpm_core::Session;
use tokio_util::sync::CancellationToken;

pub async fn tidy(session: &Session, cancel: &CancellationToken) -> Result<()> {
    let pins = session.tidy(cancel).await?;
    for module in &pins {
        println!("{module}");
    }
    eprintln!("Wrote {}", session.manifest_path().display());
    Ok(())
}
