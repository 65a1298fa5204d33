use anyhow::{Context, Result};
use cpm_core::Session;
use cpm_schema::Matrix;
use tokio_util::sync::CancellationToken;

/// Build under the host matrix, overridden by `--arch`, `--os` and `-D`.
pub async fn build(
    session: &Session,
    cancel: &CancellationToken,
    arch: Option<&str>,
    os: Option<&str>,
    defines: &[String],
) -> Result<()> {
    let matrix = matrix(arch, os, defines)?;
    let results = session.build(cancel, matrix).await?;
    for (module, result) in &results {
        println!("{module} {}", result.output_dir.display());
    }
    Ok(())
}

fn matrix(arch: Option<&str>, os: Option<&str>, defines: &[String]) -> Result<Matrix> {
    let host = Matrix::host();
    let mut matrix = Matrix::new(arch.unwrap_or(host.arch()), os.unwrap_or(host.os()))
        .context("Invalid build matrix")?;
    for define in defines {
        matrix = matrix
            .with_define(define)
            .with_context(|| format!("Invalid option -D {define}"))?;
    }
    Ok(matrix)
}
