use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ovn-topology-controller")]
#[command(about = "Build the OVN logical topology for a cluster network")]
#[command(version)]
pub struct Args {
    /// Path to the controller config file (YAML)
    #[arg(required = true)]
    pub config_file: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate config and show settings without touching the database
    #[arg(long)]
    pub dry_run: bool,

    /// Nodes to reconcile during bootstrap, as NAME=CHASSIS pairs
    #[arg(long = "node", value_name = "NAME=CHASSIS")]
    pub nodes: Vec<String>,
}

// ============================================================================
// Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::ControllerConfig;
use crate::nbdb::LogicalRouter;

/// Split a `NAME=CHASSIS` argument
pub fn parse_node_arg(arg: &str) -> Option<(&str, &str)> {
    let (name, chassis) = arg.split_once('=')?;
    if name.is_empty() || chassis.is_empty() {
        return None;
    }
    Some((name, chassis))
}

/// Format a dry-run output showing the effective controller settings.
pub fn format_dry_run(config: &ControllerConfig, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "ovn-topology-controller v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Config: {}\n", args.config_file.display()));
    output.push_str(&format!("Network: {}\n\n", config.network_name));

    output.push_str(&format!(
        "Cluster subnets ({}):\n",
        config.cluster_subnets.len()
    ));
    for subnet in &config.cluster_subnets {
        output.push_str(&format!(
            "  - {} (host subnets /{})\n",
            subnet.cidr, subnet.host_subnet_length
        ));
    }
    output.push('\n');

    let families = match (config.ipv4_mode(), config.ipv6_mode()) {
        (true, true) => "dual-stack",
        (true, false) => "IPv4",
        (false, true) => "IPv6",
        (false, false) => "none",
    };
    output.push_str(&format!("Address families: {}\n", families));
    output.push_str(&format!("Multicast: {}\n", enabled(config.multicast_enabled)));
    output.push_str(&format!(
        "Hybrid overlay: {}\n",
        enabled(config.hybrid_overlay_enabled)
    ));
    output.push_str(&format!(
        "Namespace address set grace: {}s\n",
        config.namespace_address_set_grace_secs
    ));
    if let Some(ref group) = config.load_balancer_group {
        output.push_str(&format!("Load balancer group: {}\n", group));
    }

    if !args.nodes.is_empty() {
        output.push_str(&format!("\nNodes ({}):\n", args.nodes.len()));
        for node in &args.nodes {
            match parse_node_arg(node) {
                Some((name, chassis)) => {
                    output.push_str(&format!("  - {} on chassis {}\n", name, chassis))
                }
                None => output.push_str(&format!("  - {} (invalid, expected NAME=CHASSIS)\n", node)),
            }
        }
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to build topology. Remove --dry-run to execute.\n");

    output
}

/// Format the cluster router after bootstrap
pub fn format_router_summary(router: &LogicalRouter, version: i32) -> String {
    let mut output = String::new();

    output.push_str(&format!("Router {} ({})\n", router.name, router.uuid));
    output.push_str(&format!("  Topology version: {}\n", version));

    output.push_str("  External IDs:\n");
    for (key, value) in &router.external_ids {
        output.push_str(&format!("    {}={}\n", key, value));
    }
    output.push_str("  Options:\n");
    for (key, value) in &router.options {
        output.push_str(&format!("    {}={}\n", key, value));
    }
    output.push_str(&format!("  Ports ({}):\n", router.ports.len()));
    for port in &router.ports {
        output.push_str(&format!("    {}\n", port));
    }

    output
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_args() -> Args {
        Args {
            config_file: PathBuf::from("controller.yaml"),
            verbose: 0,
            dry_run: true,
            nodes: vec!["worker-1=chassis-1".to_string(), "bad".to_string()],
        }
    }

    #[test]
    fn test_format_dry_run_basic() {
        let config = ControllerConfig {
            multicast_enabled: true,
            ..Default::default()
        };
        let output = format_dry_run(&config, &create_test_args());

        assert!(output.contains("Network: default"));
        assert!(output.contains("10.244.0.0/16 (host subnets /24)"));
        assert!(output.contains("Address families: IPv4"));
        assert!(output.contains("Multicast: enabled"));
        assert!(output.contains("worker-1 on chassis chassis-1"));
        assert!(output.contains("bad (invalid"));
        assert!(output.contains("Validation: PASSED"));
    }

    #[test]
    fn test_format_router_summary() {
        let mut router = LogicalRouter {
            name: "ovn_cluster_router".to_string(),
            uuid: "u-1".to_string(),
            ..Default::default()
        };
        router.ports.insert("rtos-worker-1".to_string());

        let output = format_router_summary(&router, 4);
        assert!(output.contains("Router ovn_cluster_router (u-1)"));
        assert!(output.contains("Topology version: 4"));
        assert!(output.contains("rtos-worker-1"));
    }

    #[test]
    fn test_parse_node_arg() {
        assert_eq!(parse_node_arg("n1=c1"), Some(("n1", "c1")));
        assert_eq!(parse_node_arg("n1"), None);
        assert_eq!(parse_node_arg("=c1"), None);
    }

    #[test]
    fn test_clap_parsing() {
        let args = Args::parse_from(["ovn-topology-controller", "controller.yaml"]);
        assert_eq!(args.config_file, PathBuf::from("controller.yaml"));
        assert!(!args.dry_run);
        assert!(args.nodes.is_empty());
    }

    #[test]
    fn test_clap_dry_run() {
        let args = Args::parse_from(["ovn-topology-controller", "--dry-run", "controller.yaml"]);
        assert!(args.dry_run);
    }

    #[test]
    fn test_clap_verbose() {
        let args = Args::parse_from(["ovn-topology-controller", "-vvv", "controller.yaml"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn test_clap_nodes() {
        let args = Args::parse_from([
            "ovn-topology-controller",
            "--node",
            "a=c1",
            "--node",
            "b=c2",
            "controller.yaml",
        ]);
        assert_eq!(args.nodes, vec!["a=c1".to_string(), "b=c2".to_string()]);
    }
}
