mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Package build contexts and synthesize ECS Fargate stacks"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a build context into a reproducible .tar.gz
    Package {
        /// Project directory containing kiln.toml (default: current directory)
        #[arg(default_value = ".")]
        project_dir: PathBuf,
        /// Dockerfile path relative to the build context
        #[arg(long, short = 'f')]
        dockerfile: Option<String>,
        /// Skip the content digest so the context is always uploaded
        #[arg(long)]
        force: bool,
        /// Where to write the archive
        #[arg(long, short = 'o', default_value = "context.tar.gz")]
        output: PathBuf,
        /// Upload the archive after packaging
        #[arg(long, requires = "endpoint")]
        upload: bool,
        /// Control-plane endpoint issuing upload URLs
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Print the CloudFormation template for a stack
    Template {
        /// Stack name (default: [stack].name in kiln.toml)
        #[arg(long)]
        stack: Option<String>,
        /// Container image reference
        #[arg(long)]
        image: String,
        /// Task memory in MiB
        #[arg(long)]
        memory: Option<f64>,
        /// Task vCPU
        #[arg(long)]
        vcpu: Option<f64>,
        /// Run on Fargate Spot capacity
        #[arg(long)]
        spot: bool,
        /// CPU architecture override (X86_64 or ARM64)
        #[arg(long)]
        arch: Option<String>,
        /// Do not create a VPC; leave the security group unbound
        #[arg(long)]
        no_network: bool,
        /// Project directory containing kiln.toml
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Validate and normalize a port declaration
    Port {
        /// Container port
        target: u32,
        /// Published port or start-end range
        #[arg(long, default_value = "")]
        published: String,
        /// tcp, udp, http, http2 or grpc
        #[arg(long, default_value = "")]
        protocol: String,
        /// host or ingress
        #[arg(long, default_value = "")]
        mode: String,
        /// Host IP to bind (not supported)
        #[arg(long, default_value = "")]
        host_ip: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dotenv_loaded = dotenvy::dotenv().is_ok();
    tracing::debug!(dotenv = dotenv_loaded, "environment loaded");

    let cli = Cli::parse();

    match cli.command {
        Commands::Package {
            project_dir,
            dockerfile,
            force,
            output,
            upload,
            endpoint,
        } => {
            let upload_endpoint = if upload { endpoint } else { None };
            commands::package(commands::PackageArgs {
                project_dir,
                dockerfile,
                force,
                output,
                upload_endpoint,
            })
            .await?
        }
        Commands::Template {
            stack,
            image,
            memory,
            vcpu,
            spot,
            arch,
            no_network,
            project_dir,
        } => commands::template(commands::TemplateArgs {
            project_dir,
            stack,
            image,
            memory,
            vcpu,
            spot,
            arch,
            no_network,
        })?,
        Commands::Port {
            target,
            published,
            protocol,
            mode,
            host_ip,
        } => commands::port(kiln_core::PortConfig {
            target,
            published,
            protocol,
            mode,
            host_ip,
        })?,
    }

    Ok(())
}
