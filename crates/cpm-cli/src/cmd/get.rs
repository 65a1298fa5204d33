use anyhow::{Result, anyhow};
use cpm_core::Session;
use cpm_schema::ModuleRef;
use tokio_util::sync::CancellationToken;

/// Pin `spec` (`path` or `path@version`) in the manifest and tidy.
pub async fn get(session: &Session, cancel: &CancellationToken, spec: &str) -> Result<()> {
    let module = ModuleRef::parse_spec(spec).map_err(|e| anyhow!(e))?;
    if module.path == session.main().path {
        anyhow::bail!("{} is the main module", module.path);
    }
    let pinned = session.get(cancel, module).await?;
    println!("{pinned}");
    Ok(())
}
