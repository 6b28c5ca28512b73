use kiln_build::{ContextLimits, ContextPackager};
use kiln_cloud::UploadClient;
use kiln_core::KilnConfig;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct PackageArgs {
    pub project_dir: PathBuf,
    pub dockerfile: Option<String>,
    pub force: bool,
    pub output: PathBuf,
    pub upload_endpoint: Option<String>,
}

/// Package the build context, write it to disk, and optionally upload it.
pub async fn package(args: PackageArgs) -> anyhow::Result<()> {
    let config = KilnConfig::load(&args.project_dir)?;
    let context_dir = args.project_dir.join(&config.build.context);
    let dockerfile = args.dockerfile.or(config.build.dockerfile);

    eprintln!("Packaging {}...", context_dir.display());

    let packager = ContextPackager::new(context_dir)
        .dockerfile(dockerfile.as_deref())
        .limits(ContextLimits::default())
        .force(args.force);

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || packager.package(&cancel)
    })
    .await?;
    watcher.abort();

    let context = match result {
        Ok(context) => context,
        Err(e) if e.is_cancelled() => anyhow::bail!("packaging cancelled"),
        Err(e) => return Err(e.into()),
    };

    tokio::fs::write(&args.output, &context.archive).await?;
    eprintln!(
        "Wrote {} ({} files, {} bytes)",
        args.output.display(),
        context.file_count,
        context.archive.len()
    );

    if let Some(digest) = &context.digest {
        println!("{digest}");
    }

    if let Some(endpoint) = args.upload_endpoint {
        eprintln!("Uploading to {endpoint}...");
        let client = UploadClient::new(endpoint);
        let url = client
            .upload(context.archive, context.digest.as_deref())
            .await?;
        println!("{url}");
    }

    Ok(())
}
