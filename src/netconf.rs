//! OS network configuration
//!
//! Forwarding, NAT and routes around the tunnel interface. Everything here
//! is fire-and-forget: failures are logged and the tunnel keeps going.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{info, warn};

/// Run a command, logging failure. Returns whether it succeeded.
pub(crate) async fn run(program: &str, args: &[&str]) -> bool {
    match tokio::process::Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                "{} {} failed ({}): {}",
                program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            warn!("Failed to run {}: {}", program, e);
            false
        }
    }
}

/// The host's default route before the tunnel came up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    pub gateway: Option<Ipv4Addr>,
    pub device: String,
}

/// Parse `ip route show default` output
pub fn parse_default_route(output: &str) -> Option<DefaultRoute> {
    // "default via X.X.X.X dev ethN ..." or "default dev ethN ..."
    let line = output.lines().find(|l| l.trim_start().starts_with("default"))?;
    let words: Vec<&str> = line.split_whitespace().collect();

    let mut gateway = None;
    let mut device = None;
    for pair in words.windows(2) {
        match pair[0] {
            "via" => gateway = pair[1].parse().ok(),
            "dev" => device = Some(pair[1].to_string()),
            _ => {}
        }
    }

    Some(DefaultRoute {
        gateway,
        device: device?,
    })
}

/// Detect the current default route
pub async fn detect_default_route() -> Option<DefaultRoute> {
    let output = tokio::process::Command::new("ip")
        .args(["-4", "route", "show", "default"])
        .output()
        .await
        .ok()?;
    parse_default_route(&String::from_utf8_lossy(&output.stdout))
}

/// Enable IPv4 forwarding
pub async fn enable_forwarding() {
    match tokio::fs::write("/proc/sys/net/ipv4/ip_forward", "1").await {
        Ok(()) => info!("Enabled IPv4 forwarding"),
        Err(e) => warn!("Failed to enable IPv4 forwarding: {}", e),
    }
}

/// Installed MASQUERADE rule, kept for cleanup
#[derive(Debug, Clone)]
pub struct NatRule {
    subnet: String,
    egress: String,
}

fn nat_args<'a>(op: &'a str, rule: &'a NatRule) -> [&'a str; 10] {
    [
        "-t", "nat", op, "POSTROUTING", "-s", rule.subnet.as_str(), "-o", rule.egress.as_str(), "-j", "MASQUERADE",
    ]
}

/// Masquerade traffic from the tunnel subnet leaving through `egress`
/// (or the default route's device when not given)
pub async fn enable_nat(subnet: &str, egress: Option<&str>) -> Option<NatRule> {
    let egress = match egress {
        Some(dev) => dev.to_string(),
        None => match detect_default_route().await {
            Some(route) => route.device,
            None => {
                warn!("Could not detect the egress interface, NAT not configured");
                return None;
            }
        },
    };

    let rule = NatRule {
        subnet: subnet.to_string(),
        egress,
    };
    if run("iptables", &nat_args("-A", &rule)).await {
        info!("NAT enabled: {} masqueraded via {}", rule.subnet, rule.egress);
        Some(rule)
    } else {
        None
    }
}

/// Remove a rule installed by [`enable_nat`]
pub async fn disable_nat(rule: &NatRule) {
    if run("iptables", &nat_args("-D", rule)).await {
        info!("NAT rule for {} removed", rule.subnet);
    }
}

/// Routes installed by [`install_client_routes`], kept for cleanup
#[derive(Debug, Default, Clone)]
pub struct ClientRoutes {
    routes: Vec<Vec<String>>,
}

impl ClientRoutes {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Client routing plan
#[derive(Debug, Clone)]
pub struct ClientRouting<'a> {
    pub interface: &'a str,
    pub subnet: &'a str,
    /// Server's address inside the tunnel
    pub gateway: &'a str,
    /// Server's public address; pinned to the original default route
    pub server: Option<IpAddr>,
    /// Send all IPv4 traffic through the tunnel
    pub redirect_default: bool,
}

/// `ip` arguments for one route. Installs use `replace` so a route the
/// kernel already derived from the interface address is not an error.
fn route_args<'a>(verb: &'a str, route: &'a [String]) -> Vec<&'a str> {
    let mut args = vec!["route", verb];
    args.extend(route.iter().map(String::as_str));
    args
}

impl ClientRouting<'_> {
    /// The route specifications for this plan
    pub fn plan(&self, original: Option<&DefaultRoute>) -> Vec<Vec<String>> {
        let mut routes = vec![vec![
            self.subnet.to_string(),
            "dev".to_string(),
            self.interface.to_string(),
        ]];

        if !self.redirect_default {
            return routes;
        }

        if let (Some(IpAddr::V4(server)), Some(route)) = (self.server, original) {
            let mut pin = vec![format!("{}/32", server)];
            if let Some(gw) = route.gateway {
                pin.extend(["via".to_string(), gw.to_string()]);
            }
            pin.extend(["dev".to_string(), route.device.clone()]);
            routes.push(pin);
        }

        // Two /1 halves win over the default route without replacing it
        for half in ["0.0.0.0/1", "128.0.0.0/1"] {
            routes.push(vec![
                half.to_string(),
                "via".to_string(),
                self.gateway.to_string(),
                "dev".to_string(),
                self.interface.to_string(),
            ]);
        }
        routes
    }
}

/// Install client routes through the tunnel
pub async fn install_client_routes(routing: &ClientRouting<'_>) -> ClientRoutes {
    let original = if routing.redirect_default {
        detect_default_route().await
    } else {
        None
    };

    let mut installed = ClientRoutes::default();
    for route in routing.plan(original.as_ref()) {
        if run("ip", &route_args("replace", &route)).await {
            installed.routes.push(route);
        }
    }

    info!(
        "Installed {} route(s) via {}{}",
        installed.len(),
        routing.interface,
        if routing.redirect_default { " (all IPv4 traffic)" } else { "" }
    );
    installed
}

/// Remove routes installed by [`install_client_routes`]
pub async fn remove_client_routes(routes: &ClientRoutes) {
    for route in routes.routes.iter().rev() {
        run("ip", &route_args("del", route)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_route() {
        let out = "default via 172.17.0.1 dev eth0 proto dhcp metric 100\n";
        assert_eq!(
            parse_default_route(out),
            Some(DefaultRoute {
                gateway: Some(Ipv4Addr::new(172, 17, 0, 1)),
                device: "eth0".into(),
            })
        );

        let out = "default dev ppp0 scope link\n";
        assert_eq!(
            parse_default_route(out),
            Some(DefaultRoute {
                gateway: None,
                device: "ppp0".into(),
            })
        );

        assert_eq!(parse_default_route(""), None);
    }

    #[test]
    fn test_split_default_plan_pins_server() {
        let routing = ClientRouting {
            interface: "tun0",
            subnet: "10.0.0.0/24",
            gateway: "10.0.0.1",
            server: Some("203.0.113.7".parse().unwrap()),
            redirect_default: true,
        };
        let original = DefaultRoute {
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            device: "eth0".into(),
        };

        let plan: Vec<String> = routing
            .plan(Some(&original))
            .iter()
            .map(|r| r.join(" "))
            .collect();
        assert_eq!(
            plan,
            vec![
                "10.0.0.0/24 dev tun0",
                "203.0.113.7/32 via 192.168.1.1 dev eth0",
                "0.0.0.0/1 via 10.0.0.1 dev tun0",
                "128.0.0.0/1 via 10.0.0.1 dev tun0",
            ]
        );
    }

    #[test]
    fn test_subnet_only_plan() {
        let routing = ClientRouting {
            interface: "tun0",
            subnet: "10.0.0.0/24",
            gateway: "10.0.0.1",
            server: None,
            redirect_default: false,
        };
        assert_eq!(routing.plan(None).len(), 1);
    }

    #[test]
    fn test_connected_route_install_is_idempotent() {
        let routing = ClientRouting {
            interface: "tun0",
            subnet: "10.0.0.0/24",
            gateway: "10.0.0.1",
            server: None,
            redirect_default: false,
        };
        let plan = routing.plan(None);

        // `ip addr add` already created this route, so a plain add would fail
        assert_eq!(
            route_args("replace", &plan[0]),
            vec!["route", "replace", "10.0.0.0/24", "dev", "tun0"]
        );
        assert_eq!(
            route_args("del", &plan[0]),
            vec!["route", "del", "10.0.0.0/24", "dev", "tun0"]
        );
    }
}
