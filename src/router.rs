//! Ordered first-match routing engine.
use std::sync::{Arc, RwLock};

use log::*;

use crate::model::{Label, RouteRule};

/// Outcome of routing one connection. Rule id and name ride along for
/// the logs only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub label: Label,
    pub rule_id: String,
    pub rule_name: String,
}

impl RouteDecision {
    /// synthetic decision when no rule matches
    pub fn fallback() -> Self {
        Self {
            label: Label::cable(),
            rule_id: "default".to_owned(),
            rule_name: "Default".to_owned(),
        }
    }
}

/// Holds the ordered rule list. Read-mostly: `route` clones the inner
/// `Arc` under a read lock, `update_rules` swaps the pointer under the
/// write lock, so a route call sees the old list in full or the new one
/// in full and never a mix.
#[derive(Debug)]
pub struct Router {
    rules: RwLock<Arc<Vec<RouteRule>>>,
}

impl Router {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn route(&self, host: &str, port: u16) -> RouteDecision {
        let rules = self
            .rules
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();

        for rule in rules.iter() {
            if !rule.enabled {
                continue;
            }
            if rule.matcher.matches(host, port) {
                trace!("route: {}:{} matched rule {}", host, port, rule.id);
                return RouteDecision {
                    label: rule.interface.clone(),
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                };
            }
        }

        trace!("route: {}:{} fell through to default", host, port);
        RouteDecision::fallback()
    }

    /// Replace the rule list wholesale. Relays already established keep
    /// the upstream sockets their original decision produced.
    pub fn update_rules(&self, rules: Vec<RouteRule>) {
        info!("routing rules updated: {} rules", rules.len());
        let mut current = self.rules.write().unwrap_or_else(|err| err.into_inner());
        *current = Arc::new(rules);
    }

    /// Snapshot for the management surface.
    pub fn rules(&self) -> Arc<Vec<RouteRule>> {
        self.rules
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{RouteRule, RuleMatch};

    fn rule(id: &str, label: Label, matcher: RuleMatch) -> RouteRule {
        RouteRule {
            id: id.to_owned(),
            name: id.to_owned(),
            enabled: true,
            interface: label,
            matcher,
        }
    }

    fn domains(patterns: &[&str]) -> RuleMatch {
        RuleMatch {
            domains: patterns.iter().map(|s| s.to_string()).collect(),
            ..RuleMatch::default()
        }
    }

    #[test]
    fn first_match_wins() {
        let router = Router::new(vec![
            rule("wifi-example", Label::wifi(), domains(&["*.example.com"])),
            rule("cable-example", Label::cable(), domains(&["*.example.com"])),
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]);
        let decision = router.route("www.example.com", 443);
        assert_eq!(decision.label, Label::wifi());
        assert_eq!(decision.rule_id, "wifi-example");
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut first = rule("off", Label::wifi(), domains(&["*.example.com"]));
        first.enabled = false;
        let router = Router::new(vec![
            first,
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]);
        let decision = router.route("www.example.com", 443);
        assert_eq!(decision.rule_id, "default");
        assert_eq!(decision.label, Label::cable());
    }

    #[test]
    fn port_rule_falls_through_to_default() {
        let ssh = RuleMatch {
            ports: vec![22],
            ..RuleMatch::default()
        };
        let router = Router::new(vec![
            rule("ssh", Label::wifi(), ssh),
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]);
        assert_eq!(router.route("example.com", 443).label, Label::cable());
        assert_eq!(router.route("example.com", 22).label, Label::wifi());
    }

    #[test]
    fn ip_rule_cannot_match_domain_host() {
        let lan = RuleMatch {
            ips: vec!["10.0.0.0/8".parse().unwrap()],
            ..RuleMatch::default()
        };
        let router = Router::new(vec![
            rule("lan", Label::wifi(), lan),
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]);
        assert_eq!(router.route("example.com", 443).label, Label::cable());
        assert_eq!(router.route("10.2.3.4", 443).label, Label::wifi());
    }

    #[test]
    fn empty_rule_list_yields_synthetic_default() {
        let router = Router::new(vec![]);
        let decision = router.route("anything.example", 1);
        assert_eq!(decision, RouteDecision::fallback());
        assert_eq!(decision.label, Label::cable());
    }

    #[test]
    fn update_swaps_the_whole_list() {
        let router = Router::new(vec![RouteRule::catch_all(
            "default",
            "Default",
            Label::cable(),
        )]);
        assert_eq!(router.route("api.netflix.com", 443).label, Label::cable());

        router.update_rules(vec![
            rule("netflix", Label::wifi(), domains(&["*.netflix.com"])),
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]);
        assert_eq!(router.route("api.netflix.com", 443).label, Label::wifi());
        assert_eq!(router.route("example.com", 443).label, Label::cable());
    }

    #[test]
    fn concurrent_route_sees_old_or_new_list_only() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let router = Arc::new(Router::new(vec![
            rule("a", Label::cable(), domains(&["*.example.com"])),
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let router = router.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let decision = router.route("www.example.com", 443);
                        // both generations route this host through a match,
                        // never the synthetic fallback
                        assert_ne!(decision.rule_id, "default");
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            router.update_rules(vec![
                rule("b", Label::wifi(), domains(&["*.example.com"])),
                RouteRule::catch_all("default", "Default", Label::cable()),
            ]);
            router.update_rules(vec![
                rule("a", Label::cable(), domains(&["*.example.com"])),
                RouteRule::catch_all("default", "Default", Label::cable()),
            ]);
        }

        stop.store(true, Ordering::Relaxed);
        for th in readers {
            th.join().unwrap();
        }
    }
}
