use kiln_cloud::{SynthOptions, synthesize};
use kiln_core::{KilnConfig, RegistryCredentials};
use std::path::PathBuf;

pub struct TemplateArgs {
    pub project_dir: PathBuf,
    pub stack: Option<String>,
    pub image: String,
    pub memory: Option<f64>,
    pub vcpu: Option<f64>,
    pub spot: bool,
    pub arch: Option<String>,
    pub no_network: bool,
}

/// Synthesize the stack template and print it as JSON.
pub fn template(args: TemplateArgs) -> anyhow::Result<()> {
    let mut config = KilnConfig::load(&args.project_dir)?;

    let stack_name = args
        .stack
        .or_else(|| config.stack.name.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("stack name not set; pass --stack or set [stack].name in kiln.toml")
        })?;

    if let Some(memory) = args.memory {
        config.task.memory_mib = memory;
    }
    if let Some(vcpu) = args.vcpu {
        config.task.vcpu = vcpu;
    }
    if args.spot {
        config.task.spot = true;
    }
    if args.arch.is_some() {
        config.task.cpu_architecture = args.arch;
    }
    if args.no_network {
        config.network.create = false;
    }

    let stack = config.stack_config(&stack_name, &args.image)?;
    let options = SynthOptions {
        create_network: config.network.create,
        credentials: RegistryCredentials::from_env(),
    };
    if options.credentials.is_none() {
        tracing::debug!("Docker Hub credentials not set; Docker Hub images are pulled directly");
    }

    let template = synthesize(&stack, &options)?;
    println!("{}", template.to_json_pretty()?);
    Ok(())
}
