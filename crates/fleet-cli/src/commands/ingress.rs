//! `ingress`: add or remove a host rule in an environment's ingress

use clap::Args;
use tracing::info;

use fleet_common::template::COMMON_DIR;
use fleet_common::RuleAction;

use crate::config::FleetConfig;
use crate::Result;

const INGRESS_FILE: &str = "ingress.yaml";

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("action").required(true).args(["add", "remove"])))]
pub struct IngressArgs {
    /// Environment whose ingress is edited
    #[arg(short = 'e', long)]
    pub env: String,
    /// Backend service name
    #[arg(short = 'a', long)]
    pub app: String,
    /// Subdomain; `@` routes the root domain itself
    #[arg(short = 's', long)]
    pub subdomain: String,
    /// Add the rule
    #[arg(long)]
    pub add: bool,
    /// Remove the rule
    #[arg(long)]
    pub remove: bool,
}

impl IngressArgs {
    fn action(&self) -> RuleAction {
        if self.add {
            RuleAction::Add
        } else {
            RuleAction::Remove
        }
    }
}

pub fn run(args: IngressArgs, config: &FleetConfig) -> Result<()> {
    let path = config.env_dir(&args.env).join(COMMON_DIR).join(INGRESS_FILE);
    let reconciler = config.reconciler();
    let change = reconciler.update_rule(&path, &args.app, &args.subdomain, args.action())?;
    info!(
        host = %reconciler.host_for(&args.subdomain),
        service = %args.app,
        %change,
        "Ingress successfully updated"
    );
    Ok(())
}
