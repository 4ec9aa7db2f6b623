use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nfsqa_cluster::GlusterCli;
use nfsqa_remote::{HostExecutor, RemoteExecutor};

use crate::config::HarnessConfig;
use crate::registry::{registry, run_suite, select};
use crate::sim::SimCluster;

#[derive(Parser)]
#[command(name = "nfsqa")]
#[command(about = "NFS-Ganesha functional tests", long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List registered test cases
    List,
    /// Check a harness configuration without touching any node
    Validate {
        #[arg(short, long, env = "NFSQA_CONFIG")]
        config: PathBuf,
    },
    /// Run the applicable test cases
    Run {
        #[arg(short, long, env = "NFSQA_CONFIG")]
        config: PathBuf,
        /// Only cases whose name contains this
        #[arg(long)]
        case: Option<String>,
        /// Write a JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Write a JUnit XML report here
        #[arg(long)]
        junit: Option<PathBuf>,
        /// Run against an in-process simulated cluster
        #[arg(long)]
        simulate: bool,
    },
}

impl Cli {
    /// Executes the command; `Ok(false)` means some case did not pass.
    pub async fn run(self) -> Result<bool> {
        match self.command {
            Command::List => {
                for case in registry() {
                    let types: Vec<&str> = case.volume_types.iter().map(|t| t.as_str()).collect();
                    let protocols: Vec<&str> = case.protocols.iter().map(|p| p.as_str()).collect();
                    println!("{}  [{}] over [{}]", case.name, types.join(", "), protocols.join(", "));
                }
                Ok(true)
            }
            Command::Validate { config } => {
                let config = HarnessConfig::from_file(&config)?;
                println!(
                    "ok: {} servers, {} mounts, volume {} ({})",
                    config.servers.len(),
                    config.mounts.len(),
                    config.volume.name,
                    config.volume.vtype
                );
                Ok(true)
            }
            Command::Run {
                config,
                case,
                report,
                junit,
                simulate,
            } => {
                let config = HarnessConfig::from_file(&config)?;
                let cases = select(case.as_deref());
                if cases.is_empty() {
                    anyhow::bail!("no test case matches {:?}", case.unwrap_or_default());
                }

                let suite = if simulate {
                    tracing::info!("running against simulated cluster");
                    let sim = SimCluster::from_config(&config);
                    run_suite(&config, &sim, &sim, &cases).await
                } else {
                    let exec: Arc<dyn RemoteExecutor> = Arc::new(HostExecutor::new(config.ssh.clone()));
                    let cluster = GlusterCli::new(exec.clone(), config.ganesha.clone())
                        .with_brick_root(&config.volume.brick_root)
                        .with_poll_policy(config.poll);
                    run_suite(&config, exec.as_ref(), &cluster, &cases).await
                };

                println!("{}", suite.summary_line());
                for case in suite.cases.iter().filter(|c| c.message.is_some()) {
                    println!("  {} {:?}: {}", case.name, case.status, case.message.as_deref().unwrap_or_default());
                }
                if let Some(path) = report {
                    write_report(&path, &suite.to_json()?)?;
                }
                if let Some(path) = junit {
                    write_report(&path, &suite.to_junit_xml())?;
                }
                Ok(suite.is_passing())
            }
        }
    }
}

fn write_report(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}
