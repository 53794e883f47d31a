//! Declarative firewall policy and its installation.
//!
//! Apply installs, in order:
//! 1. our chains (`CENSORBOX_INPUT`, `CENSORBOX_OUTPUT`, `CENSORBOX_NAT`)
//! 2. jumps from the built-in chains into them
//! 3. one rule per drop/reset/hijack entry
//!
//! Waive undoes this in reverse: jumps first, then flush and delete. A chain
//! therefore always exists before it is referenced and is never deleted while
//! referenced. Applying twice fails on chain creation; waive is best effort
//! and safe to call when nothing is installed.

use super::error::FirewallError;
use super::rule::{Chain, Keyword, Match, Protocol, Rule, Step, Table, Target};
use super::runner::{CommandRunner, Iptables};
use crate::telemetry::{AuditEvent, AuditLogger, FirewallAction};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tracing::{debug, info};

/// UID whose traffic is exempt from the HTTP(S) hijack.
const ROOT_UID: u32 = 0;

/// What the firewall should do to outbound traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallPolicy {
    /// Drop all traffic to these addresses.
    pub drop_ips: Vec<Ipv4Addr>,
    /// Reset TCP traffic to these addresses.
    pub reset_ips: Vec<Ipv4Addr>,
    /// Drop traffic containing these literal keywords.
    pub drop_keywords: Vec<String>,
    /// Drop traffic containing these hex keywords.
    pub drop_keywords_hex: Vec<String>,
    /// Reset TCP traffic containing these literal keywords.
    pub reset_keywords: Vec<String>,
    /// Reset TCP traffic containing these hex keywords.
    pub reset_keywords_hex: Vec<String>,
    /// Redirect outbound UDP/53 here.
    pub hijack_dns_to: Option<SocketAddrV4>,
    /// Redirect outbound TCP/443 (except root's) here.
    pub hijack_https_to: Option<SocketAddrV4>,
    /// Redirect outbound TCP/80 (except root's) here.
    pub hijack_http_to: Option<SocketAddrV4>,
}

impl FirewallPolicy {
    /// Rules for this policy in installation order.
    pub fn rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();

        for ip in &self.drop_ips {
            rules.push(output_rule(vec![Match::Destination(*ip)], Target::Drop));
        }
        for ip in &self.reset_ips {
            rules.push(output_rule(
                vec![Match::Protocol(Protocol::Tcp), Match::Destination(*ip)],
                Target::RejectWithTcpReset,
            ));
        }
        for kw in &self.drop_keywords_hex {
            rules.push(output_rule(
                vec![Match::Payload(Keyword::Hex(kw.clone()))],
                Target::Drop,
            ));
        }
        for kw in &self.drop_keywords {
            rules.push(output_rule(
                vec![Match::Payload(Keyword::Literal(kw.clone()))],
                Target::Drop,
            ));
        }
        for kw in &self.reset_keywords_hex {
            rules.push(output_rule(
                vec![
                    Match::Protocol(Protocol::Tcp),
                    Match::Payload(Keyword::Hex(kw.clone())),
                ],
                Target::RejectWithTcpReset,
            ));
        }
        for kw in &self.reset_keywords {
            rules.push(output_rule(
                vec![
                    Match::Protocol(Protocol::Tcp),
                    Match::Payload(Keyword::Literal(kw.clone())),
                ],
                Target::RejectWithTcpReset,
            ));
        }
        if let Some(to) = self.hijack_dns_to {
            rules.push(nat_rule(
                vec![Match::Protocol(Protocol::Udp), Match::DestinationPort(53)],
                to,
            ));
        }
        if let Some(to) = self.hijack_https_to {
            rules.push(nat_rule(
                vec![
                    Match::Protocol(Protocol::Tcp),
                    Match::DestinationPort(443),
                    Match::NotOwnedByUid(ROOT_UID),
                ],
                to,
            ));
        }
        if let Some(to) = self.hijack_http_to {
            rules.push(nat_rule(
                vec![
                    Match::Protocol(Protocol::Tcp),
                    Match::DestinationPort(80),
                    Match::NotOwnedByUid(ROOT_UID),
                ],
                to,
            ));
        }

        rules
    }
}

fn output_rule(matches: Vec<Match>, target: Target) -> Rule {
    Rule {
        table: Table::Filter,
        chain: Chain::CensorOutput,
        matches,
        target,
    }
}

fn nat_rule(matches: Vec<Match>, to: SocketAddrV4) -> Rule {
    Rule {
        table: Table::Nat,
        chain: Chain::CensorNat,
        matches,
        target: Target::Dnat(to),
    }
}

/// Our chains and the built-in chain each one hangs off.
const OWNED_CHAINS: [(Table, Chain, Chain); 3] = [
    (Table::Filter, Chain::Input, Chain::CensorInput),
    (Table::Filter, Chain::Output, Chain::CensorOutput),
    (Table::Nat, Chain::Output, Chain::CensorNat),
];

/// A [`FirewallPolicy`] bound to a way of executing it.
pub struct PacketPolicy {
    policy: FirewallPolicy,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<AuditLogger>,
}

impl PacketPolicy {
    /// Bind `policy` to the system `iptables`.
    ///
    /// Fails with [`FirewallError::Unsupported`] off Linux.
    pub fn new(policy: FirewallPolicy) -> Result<Self, FirewallError> {
        if !cfg!(target_os = "linux") {
            return Err(FirewallError::Unsupported);
        }
        Ok(Self::with_runner(policy, Arc::new(Iptables::new())))
    }

    /// Bind `policy` to an arbitrary runner.
    pub fn with_runner(policy: FirewallPolicy, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            policy,
            runner,
            audit: Arc::new(AuditLogger::new_null()),
        }
    }

    /// Record apply/waive in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// The policy being enforced.
    pub fn policy(&self) -> &FirewallPolicy {
        &self.policy
    }

    /// Steps executed by [`apply`](Self::apply), in order.
    pub fn plan_apply(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = OWNED_CHAINS
            .iter()
            .map(|&(table, _, chain)| Step::CreateChain(table, chain))
            .collect();
        steps.extend(
            OWNED_CHAINS
                .iter()
                .map(|&(table, from, to)| Step::InsertJump { table, from, to }),
        );
        steps.extend(self.policy.rules().into_iter().map(Step::Append));
        steps
    }

    /// Steps executed by [`waive`](Self::waive), in order.
    pub fn plan_waive(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = OWNED_CHAINS
            .iter()
            .map(|&(table, from, to)| Step::DeleteJump { table, from, to })
            .collect();
        for &(table, _, chain) in &OWNED_CHAINS {
            steps.push(Step::FlushChain(table, chain));
            steps.push(Step::DeleteChain(table, chain));
        }
        steps
    }

    /// Command lines [`apply`](Self::apply) would run.
    pub fn render_apply(&self) -> Vec<String> {
        self.plan_apply().iter().map(Step::to_string).collect()
    }

    /// Command lines [`waive`](Self::waive) would run.
    pub fn render_waive(&self) -> Vec<String> {
        self.plan_waive().iter().map(Step::to_string).collect()
    }

    /// Install the policy, stopping at the first failing step.
    ///
    /// Nothing is rolled back on failure; call [`waive`](Self::waive)
    /// whatever the outcome.
    pub fn apply(&self) -> Result<(), FirewallError> {
        let rules = self.policy.rules().len();
        info!("Applying firewall policy ({} rules)", rules);

        for step in self.plan_apply() {
            self.runner.run(&step.args())?;
        }

        self.audit.log(AuditEvent::Firewall {
            action: FirewallAction::Apply,
            rules,
        });
        Ok(())
    }

    /// Remove everything [`apply`](Self::apply) may have installed.
    ///
    /// Every step is attempted; failures (typically "no such chain") are only
    /// logged.
    pub fn waive(&self) {
        debug!("Waiving firewall policy");

        for step in self.plan_waive() {
            if let Err(e) = self.runner.run(&step.args()) {
                debug!("Ignoring waive failure: {}", e);
            }
        }

        self.audit.log(AuditEvent::Firewall {
            action: FirewallAction::Waive,
            rules: self.policy.rules().len(),
        });
    }
}

impl std::fmt::Debug for PacketPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketPolicy")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory model of iptables chain bookkeeping.
    #[derive(Default)]
    struct FakeKernel {
        state: Mutex<KernelState>,
        /// Fail the n-th command (0-based) of the whole run, if set.
        fail_at: Option<usize>,
    }

    #[derive(Default)]
    struct KernelState {
        /// (table, chain) -> rules (as joined arg strings).
        chains: HashMap<(String, String), Vec<String>>,
        log: Vec<String>,
    }

    const BUILTIN: &[(&str, &str)] = &[
        ("filter", "INPUT"),
        ("filter", "OUTPUT"),
        ("filter", "FORWARD"),
        ("nat", "OUTPUT"),
        ("nat", "PREROUTING"),
        ("nat", "POSTROUTING"),
    ];

    impl FakeKernel {
        fn new() -> Arc<Self> {
            Self::failing_at(None)
        }

        fn failing_at(fail_at: Option<usize>) -> Arc<Self> {
            let kernel = Self {
                fail_at,
                ..Default::default()
            };
            {
                let mut state = kernel.state.lock().unwrap();
                for (table, chain) in BUILTIN {
                    state
                        .chains
                        .insert((table.to_string(), chain.to_string()), Vec::new());
                }
            }
            Arc::new(kernel)
        }

        fn owned_chains(&self) -> HashSet<String> {
            self.state
                .lock()
                .unwrap()
                .chains
                .keys()
                .filter(|(_, c)| c.starts_with("CENSORBOX_"))
                .map(|(_, c)| c.clone())
                .collect()
        }

        fn rules_in(&self, table: &str, chain: &str) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .chains
                .get(&(table.to_string(), chain.to_string()))
                .cloned()
                .unwrap_or_default()
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }
    }

    fn err(args: &[String], msg: &str) -> FirewallError {
        FirewallError::CommandError {
            cmd: args.join(" "),
            stderr: msg.to_string(),
        }
    }

    impl CommandRunner for FakeKernel {
        fn run(&self, args: &[String]) -> Result<(), FirewallError> {
            let mut state = self.state.lock().unwrap();
            let index = state.log.len();
            state.log.push(args.join(" "));
            if self.fail_at == Some(index) {
                return Err(err(args, "injected failure"));
            }

            assert_eq!(args[0], "-t", "every step names its table");
            let table = args[1].clone();
            let op = args[2].as_str();
            let chain = args[3].clone();
            let key = (table.clone(), chain.clone());
            let rest = args[4..].join(" ");

            let jump_target = || {
                args.iter()
                    .position(|a| a == "-j")
                    .map(|i| args[i + 1].clone())
                    .unwrap_or_default()
            };
            let is_referenced = |state: &KernelState, name: &str| {
                state
                    .chains
                    .iter()
                    .filter(|((t, _), _)| *t == table)
                    .any(|(_, rules)| rules.iter().any(|r| r.ends_with(&format!("-j {}", name))))
            };

            match op {
                "-N" => {
                    if state.chains.contains_key(&key) {
                        return Err(err(args, "Chain already exists."));
                    }
                    state.chains.insert(key, Vec::new());
                }
                "-I" | "-A" => {
                    let target = jump_target();
                    if target.starts_with("CENSORBOX_")
                        && !state.chains.contains_key(&(table.clone(), target))
                    {
                        return Err(err(args, "Couldn't load target"));
                    }
                    let Some(rules) = state.chains.get_mut(&key) else {
                        return Err(err(args, "No chain/target/match by that name."));
                    };
                    if op == "-I" {
                        rules.insert(0, rest);
                    } else {
                        rules.push(rest);
                    }
                }
                "-D" => {
                    let Some(rules) = state.chains.get_mut(&key) else {
                        return Err(err(args, "No chain/target/match by that name."));
                    };
                    let Some(pos) = rules.iter().position(|r| *r == rest) else {
                        return Err(err(args, "Bad rule (does a matching rule exist?)"));
                    };
                    rules.remove(pos);
                }
                "-F" => {
                    let Some(rules) = state.chains.get_mut(&key) else {
                        return Err(err(args, "No chain/target/match by that name."));
                    };
                    rules.clear();
                }
                "-X" => {
                    let Some(rules) = state.chains.get(&key) else {
                        return Err(err(args, "No chain/target/match by that name."));
                    };
                    if !rules.is_empty() || is_referenced(&*state, &chain) {
                        return Err(err(args, "Directory not empty"));
                    }
                    state.chains.remove(&key);
                }
                other => panic!("unexpected iptables operation {}", other),
            }
            Ok(())
        }
    }

    fn full_policy() -> FirewallPolicy {
        FirewallPolicy {
            drop_ips: vec![Ipv4Addr::new(1, 1, 1, 1)],
            reset_ips: vec![Ipv4Addr::new(8, 8, 8, 8)],
            drop_keywords: vec!["ooni.io".into()],
            drop_keywords_hex: vec!["|6f 6f 6e 69|".into()],
            reset_keywords: vec!["ooni.nu".into()],
            reset_keywords_hex: vec!["|6e 75|".into()],
            hijack_dns_to: Some("127.0.0.1:53".parse().unwrap()),
            hijack_https_to: Some("127.0.0.1:443".parse().unwrap()),
            hijack_http_to: Some("127.0.0.1:80".parse().unwrap()),
        }
    }

    #[test]
    fn test_rule_order() {
        let rules = full_policy().rules();
        let targets: Vec<String> = rules
            .iter()
            .map(|r| Step::Append(r.clone()).args().join(" "))
            .collect();

        assert_eq!(targets.len(), 9);
        assert!(targets[0].contains("-d 1.1.1.1 -j DROP"));
        assert!(targets[1].contains("-d 8.8.8.8 -j REJECT"));
        assert!(targets[2].contains("--hex-string |6f 6f 6e 69| -j DROP"));
        assert!(targets[3].contains("--string ooni.io -j DROP"));
        assert!(targets[4].contains("--hex-string |6e 75| -j REJECT"));
        assert!(targets[5].contains("--string ooni.nu -j REJECT"));
        assert!(targets[6].contains("-p udp --dport 53 -j DNAT"));
        assert!(targets[7].contains("--dport 443 -m owner ! --uid-owner 0"));
        assert!(targets[8].contains("--dport 80 -m owner ! --uid-owner 0"));
    }

    #[test]
    fn test_dns_hijack_has_no_owner_exclusion() {
        let policy = FirewallPolicy {
            hijack_dns_to: Some("127.0.0.1:5353".parse().unwrap()),
            ..Default::default()
        };
        let args = Step::Append(policy.rules()[0].clone()).args();
        assert!(!args.contains(&"owner".to_string()));
        assert!(args.contains(&"127.0.0.1:5353".to_string()));
    }

    #[test]
    fn test_apply_creates_chains_before_references() {
        let kernel = FakeKernel::new();
        let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());

        policy.apply().unwrap();

        let owned = kernel.owned_chains();
        assert_eq!(owned.len(), 3);
        assert_eq!(kernel.rules_in("filter", "CENSORBOX_OUTPUT").len(), 6);
        assert_eq!(kernel.rules_in("nat", "CENSORBOX_NAT").len(), 3);
        assert!(kernel.rules_in("filter", "CENSORBOX_INPUT").is_empty());
        assert_eq!(
            kernel.rules_in("nat", "OUTPUT"),
            vec!["-j CENSORBOX_NAT".to_string()]
        );
    }

    #[test]
    fn test_apply_twice_fails() {
        let kernel = FakeKernel::new();
        let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());

        policy.apply().unwrap();
        let second = policy.apply();
        assert!(matches!(second, Err(FirewallError::CommandError { .. })));

        // The failed second apply must not have duplicated anything.
        assert_eq!(kernel.rules_in("filter", "CENSORBOX_OUTPUT").len(), 6);
        assert_eq!(kernel.rules_in("filter", "OUTPUT").len(), 1);
    }

    #[test]
    fn test_waive_removes_everything() {
        let kernel = FakeKernel::new();
        let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());

        policy.apply().unwrap();
        policy.waive();

        assert!(kernel.owned_chains().is_empty());
        assert!(kernel.rules_in("filter", "INPUT").is_empty());
        assert!(kernel.rules_in("filter", "OUTPUT").is_empty());
        assert!(kernel.rules_in("nat", "OUTPUT").is_empty());
    }

    #[test]
    fn test_waive_after_partial_apply() {
        for fail_at in 0..12 {
            let kernel = FakeKernel::failing_at(Some(fail_at));
            let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());

            assert!(policy.apply().is_err(), "step {} should fail", fail_at);
            policy.waive();

            assert!(
                kernel.owned_chains().is_empty(),
                "residual chains after failing at step {}",
                fail_at
            );
        }
    }

    #[test]
    fn test_waive_twice_is_harmless() {
        let kernel = FakeKernel::new();
        let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());

        policy.waive();
        policy.waive();
        policy.apply().unwrap();
        assert_eq!(kernel.owned_chains().len(), 3);
    }

    #[test]
    fn test_waive_order_is_reverse_of_apply() {
        let policy = PacketPolicy::with_runner(FirewallPolicy::default(), FakeKernel::new());
        let plan = policy.render_waive();

        assert_eq!(plan.len(), 9);
        assert!(plan[..3].iter().all(|c| c.contains(" -D ")));
        assert_eq!(
            plan[3],
            "iptables -t filter -F CENSORBOX_INPUT".to_string()
        );
        assert_eq!(
            plan[4],
            "iptables -t filter -X CENSORBOX_INPUT".to_string()
        );
    }

    #[test]
    fn test_render_apply_empty_policy() {
        let policy = PacketPolicy::with_runner(FirewallPolicy::default(), FakeKernel::new());
        let plan = policy.render_apply();
        assert_eq!(
            plan,
            vec![
                "iptables -t filter -N CENSORBOX_INPUT",
                "iptables -t filter -N CENSORBOX_OUTPUT",
                "iptables -t nat -N CENSORBOX_NAT",
                "iptables -t filter -I INPUT -j CENSORBOX_INPUT",
                "iptables -t filter -I OUTPUT -j CENSORBOX_OUTPUT",
                "iptables -t nat -I OUTPUT -j CENSORBOX_NAT",
            ]
        );
    }

    #[test]
    fn test_render_apply_quotes_keywords() {
        let policy = PacketPolicy::with_runner(
            FirewallPolicy {
                drop_keywords: vec!["two words".into()],
                reset_keywords: vec!["don't".into()],
                ..Default::default()
            },
            FakeKernel::new(),
        );
        let plan = policy.render_apply();

        assert!(plan.iter().any(|line| line.contains("--string 'two words' -j DROP")));
        assert!(plan.iter().any(|line| line.contains(r"--string 'don'\''t'")));
    }

    #[test]
    fn test_apply_logs_commands_in_plan_order() {
        let kernel = FakeKernel::new();
        let policy = PacketPolicy::with_runner(full_policy(), kernel.clone());
        policy.apply().unwrap();

        let expected: Vec<String> = policy
            .plan_apply()
            .iter()
            .map(|s| s.args().join(" "))
            .collect();
        assert_eq!(kernel.log(), expected);
    }
}
