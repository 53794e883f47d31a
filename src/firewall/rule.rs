//! Typed iptables rules and installation steps.
//!
//! Every rule is a value (table, chain, matches, target) and is turned into
//! iptables arguments in exactly one place, [`Step::args`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// An iptables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// The `filter` table.
    Filter,
    /// The `nat` table.
    Nat,
}

impl Table {
    /// Name as given to `-t`.
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

/// A chain, either built in or owned by us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// Built-in `INPUT`.
    Input,
    /// Built-in `OUTPUT`.
    Output,
    /// Our inbound filter chain.
    CensorInput,
    /// Our outbound filter chain; holds the drop and reset rules.
    CensorOutput,
    /// Our NAT chain; holds the hijack rules.
    CensorNat,
}

impl Chain {
    /// Chain name as iptables knows it.
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
            Chain::CensorInput => "CENSORBOX_INPUT",
            Chain::CensorOutput => "CENSORBOX_OUTPUT",
            Chain::CensorNat => "CENSORBOX_NAT",
        }
    }
}

/// Transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Payload pattern for the `string` match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    /// Literal bytes (`--string`).
    Literal(String),
    /// Hex notation such as `|6f 6f 6e 69|` (`--hex-string`).
    Hex(String),
}

/// A single match clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// `-p <proto>`
    Protocol(Protocol),
    /// `-d <ip>`
    Destination(Ipv4Addr),
    /// `--dport <port>`; must follow a protocol match.
    DestinationPort(u16),
    /// `-m owner ! --uid-owner <uid>`
    NotOwnedByUid(u32),
    /// `-m string --algo kmp --string|--hex-string <kw>`
    Payload(Keyword),
}

/// What happens to matching packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Silently drop.
    Drop,
    /// Reject with a TCP RST.
    RejectWithTcpReset,
    /// Rewrite the destination.
    Dnat(SocketAddrV4),
    /// Continue in another chain.
    Jump(Chain),
}

/// One rule appended to one of our chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Table holding the chain.
    pub table: Table,
    /// Chain the rule is appended to.
    pub chain: Chain,
    /// Match clauses, rendered in order.
    pub matches: Vec<Match>,
    /// Target for matching packets.
    pub target: Target,
}

impl Rule {
    /// Arguments following `-A <chain>`.
    fn spec_args(&self, args: &mut Vec<String>) {
        for m in &self.matches {
            match m {
                Match::Protocol(p) => push(args, &["-p", p.as_str()]),
                Match::Destination(ip) => {
                    args.push("-d".into());
                    args.push(ip.to_string());
                }
                Match::DestinationPort(port) => {
                    args.push("--dport".into());
                    args.push(port.to_string());
                }
                Match::NotOwnedByUid(uid) => {
                    push(args, &["-m", "owner", "!", "--uid-owner"]);
                    args.push(uid.to_string());
                }
                Match::Payload(keyword) => {
                    push(args, &["-m", "string", "--algo", "kmp"]);
                    let (flag, value) = match keyword {
                        Keyword::Literal(k) => ("--string", k),
                        Keyword::Hex(k) => ("--hex-string", k),
                    };
                    args.push(flag.into());
                    args.push(value.clone());
                }
            }
        }
        match &self.target {
            Target::Drop => push(args, &["-j", "DROP"]),
            Target::RejectWithTcpReset => {
                push(args, &["-j", "REJECT", "--reject-with", "tcp-reset"])
            }
            Target::Dnat(addr) => {
                push(args, &["-j", "DNAT", "--to-destination"]);
                args.push(addr.to_string());
            }
            Target::Jump(chain) => push(args, &["-j", chain.as_str()]),
        }
    }
}

/// One iptables invocation in an apply or waive sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `-N <chain>`
    CreateChain(Table, Chain),
    /// `-I <from> -j <to>`
    InsertJump {
        /// Table of both chains.
        table: Table,
        /// Built-in chain.
        from: Chain,
        /// Our chain.
        to: Chain,
    },
    /// `-A <chain> ...`
    Append(Rule),
    /// `-D <from> -j <to>`
    DeleteJump {
        /// Table of both chains.
        table: Table,
        /// Built-in chain.
        from: Chain,
        /// Our chain.
        to: Chain,
    },
    /// `-F <chain>`
    FlushChain(Table, Chain),
    /// `-X <chain>`
    DeleteChain(Table, Chain),
}

impl Step {
    /// Arguments for the `iptables` binary.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            Step::CreateChain(table, chain) => {
                push(&mut args, &["-t", table.as_str(), "-N", chain.as_str()])
            }
            Step::InsertJump { table, from, to } => push(
                &mut args,
                &["-t", table.as_str(), "-I", from.as_str(), "-j", to.as_str()],
            ),
            Step::Append(rule) => {
                push(
                    &mut args,
                    &["-t", rule.table.as_str(), "-A", rule.chain.as_str()],
                );
                rule.spec_args(&mut args);
            }
            Step::DeleteJump { table, from, to } => push(
                &mut args,
                &["-t", table.as_str(), "-D", from.as_str(), "-j", to.as_str()],
            ),
            Step::FlushChain(table, chain) => {
                push(&mut args, &["-t", table.as_str(), "-F", chain.as_str()])
            }
            Step::DeleteChain(table, chain) => {
                push(&mut args, &["-t", table.as_str(), "-X", chain.as_str()])
            }
        }
        args
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iptables")?;
        for arg in self.args() {
            write!(f, " {}", shell_quote(&arg))?;
        }
        Ok(())
    }
}

/// Quote `arg` for a POSIX shell unless it is made only of plain characters.
fn shell_quote(arg: &str) -> String {
    let plain = |c: char| c.is_ascii_alphanumeric() || "-_./:,=+@%".contains(c);
    if arg == "!" || (!arg.is_empty() && arg.chars().all(plain)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}
