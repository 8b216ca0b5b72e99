//! vgpu-allocator binary.
//!
//! Installed as a Proxmox hookscript it is called as `<vmid> <phase>`; run by
//! hand it previews, records or lists vGPU assignments.

use std::process;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, error, info};

use vgpu_allocator::allocation::{assign, AssignOutcome};
use vgpu_allocator::config::{Cli, Config, Invocation};
use vgpu_allocator::hook::{preview_command, run_hook};
use vgpu_allocator::report::build_report;
use vgpu_allocator::{AllocatorError, Session};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!("vgpu-allocator v{}", env!("CARGO_PKG_VERSION"));

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<AllocatorError>() {
            Some(AllocatorError::Usage(usage)) => {
                println!("{usage}");
                1
            }
            Some(alloc_err) => {
                error!("{alloc_err}");
                alloc_err.exit_code()
            }
            None => {
                error!("{err:#}");
                1
            }
        },
    };
    process::exit(code);
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let invocation = cli.invocation()?;
    let config = Arc::new(Config::load(&cli.config)?);
    let migrated_from = config.migrated_from();
    let mut session = Session::new(config);

    match invocation {
        Invocation::Hook { vm_id, phase } => {
            if let Some(node) = &migrated_from {
                info!(vm_id = %vm_id, node = %node, "Reading descriptor from migration source");
            }
            let outcome = run_hook(&session, &vm_id, &phase, migrated_from.as_deref()).await?;
            debug!(vm_id = %vm_id, %phase, ?outcome, "Hook finished");
        }
        Invocation::GetCommand { vm_id, vgpu_type } => {
            let preview =
                preview_command(&mut session, &vm_id, &vgpu_type, migrated_from.as_deref())
                    .await?;
            match preview.outcome {
                AssignOutcome::AlreadyAssigned => {
                    println!("vGPU {} is already assigned to VM {vm_id}", preview.device);
                }
                AssignOutcome::Assigned => {
                    for command in &preview.commands {
                        println!("{command}");
                    }
                }
            }
        }
        Invocation::Assign {
            vm_id,
            node,
            device,
            vgpu_type,
        } => match assign(&mut session, &vm_id, &node, &device, &vgpu_type).await? {
            AssignOutcome::Assigned => {
                println!("Assigned vGPU {device} (type {vgpu_type}) to VM {vm_id} on {node}");
            }
            AssignOutcome::AlreadyAssigned => {
                println!("This GPU is already assigned to VM {vm_id}");
            }
        },
        Invocation::List => {
            let report = build_report(&mut session).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
