use anyhow::Result;
use cpm_core::Session;
use tokio_util::sync::CancellationToken;

/// Print modules in build order, each with its direct dependencies.
pub async fn graph(session: &Session, cancel: &CancellationToken) -> Result<()> {
    let graph = session.graph(cancel).await?;
    for id in graph.build_order() {
        let node = graph.node(id);
        let deps: Vec<String> = node
            .deps()
            .iter()
            .map(|&dep| graph.module(dep).to_string())
            .collect();
        if deps.is_empty() {
            println!("{}", node.module);
        } else {
            println!("{}: {}", node.module, deps.join(" "));
        }
    }
    Ok(())
}
