// Default bootstrap nodes for the oracle network
//
// Embedded into the binary at build time so a fresh node can join without
// configuration.
//
// Build-time customization:
// - Set ORACLE_BOOTSTRAP_NODES during build
// - Format: comma-separated multiaddrs
// - Example: export ORACLE_BOOTSTRAP_NODES="/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo..."

/// Bootstrap nodes compiled in when no build-time override is given
pub const DEFAULT_BOOTSTRAP_NODES: &[&str] = &[];

/// Split a comma-separated address list, dropping blanks
pub fn parse_bootstrap_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Get default bootstrap nodes, with optional build-time override
pub fn default_bootstrap_nodes() -> Vec<String> {
    match option_env!("ORACLE_BOOTSTRAP_NODES") {
        // Empty/whitespace-only override counts as "not set"
        Some(nodes) if !nodes.trim().is_empty() => parse_bootstrap_list(nodes),
        _ => DEFAULT_BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bootstrap_list() {
        let nodes = parse_bootstrap_list(
            " /ip4/1.2.3.4/tcp/4001/p2p/12D3KooWA ,, /dns4/oracle.example/tcp/4001/p2p/12D3KooWB,",
        );
        assert_eq!(
            nodes,
            vec![
                "/ip4/1.2.3.4/tcp/4001/p2p/12D3KooWA".to_string(),
                "/dns4/oracle.example/tcp/4001/p2p/12D3KooWB".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_bootstrap_list("").is_empty());
        assert!(parse_bootstrap_list(" , ").is_empty());
    }

    #[test]
    fn test_default_nodes_are_multiaddrs() {
        for node in default_bootstrap_nodes() {
            assert!(
                node.parse::<libp2p::Multiaddr>().is_ok(),
                "Bootstrap node should be a multiaddr: {}",
                node
            );
        }
    }
}
