//! Static port-to-risk table used by the analyzer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub port: u16,
    pub service: &'static str,
    pub severity: Severity,
    pub issue: &'static str,
    pub recommendation: &'static str,
}

const fn rule(
    port: u16,
    service: &'static str,
    severity: Severity,
    issue: &'static str,
    recommendation: &'static str,
) -> Rule {
    Rule { port, service, severity, issue, recommendation }
}

static RULES: &[Rule] = &[
    rule(21, "FTP", Severity::High,
        "FTP transmits credentials and data in cleartext",
        "Replace with SFTP or FTPS and disable anonymous login"),
    rule(23, "Telnet", Severity::Critical,
        "Telnet exposes an unencrypted remote shell",
        "Disable Telnet and use SSH instead"),
    rule(25, "SMTP", Severity::Medium,
        "SMTP relay may allow spoofing or spam relaying",
        "Require authentication and STARTTLS; restrict relaying"),
    rule(53, "DNS", Severity::Low,
        "Open resolvers can be abused for amplification attacks",
        "Restrict recursion to trusted clients"),
    rule(69, "TFTP", Severity::High,
        "TFTP has no authentication",
        "Disable TFTP or restrict it to a management network"),
    rule(80, "HTTP", Severity::Low,
        "Unencrypted web traffic",
        "Redirect to HTTPS and enable HSTS"),
    rule(110, "POP3", Severity::Medium,
        "POP3 transmits credentials in cleartext",
        "Use POP3S (995) or disable the service"),
    rule(111, "RPCbind", Severity::Medium,
        "RPC portmapper discloses registered services",
        "Block RPCbind at the perimeter"),
    rule(135, "MS-RPC", Severity::Medium,
        "Microsoft RPC endpoint mapper exposed",
        "Firewall RPC from untrusted networks"),
    rule(139, "NetBIOS", Severity::High,
        "NetBIOS session service leaks host and share information",
        "Disable NetBIOS over TCP/IP where not required"),
    rule(143, "IMAP", Severity::Medium,
        "IMAP transmits credentials in cleartext",
        "Use IMAPS (993) or enforce STARTTLS"),
    rule(161, "SNMP", Severity::High,
        "SNMP with default communities exposes device configuration",
        "Use SNMPv3 with authentication or disable SNMP"),
    rule(445, "SMB", Severity::High,
        "SMB exposed; frequent target of wormable exploits",
        "Block SMB at the perimeter and disable SMBv1"),
    rule(512, "rexec", Severity::Critical,
        "Legacy r-service allows unauthenticated remote execution",
        "Disable r-services and use SSH"),
    rule(513, "rlogin", Severity::Critical,
        "Legacy r-service trusts host-based authentication",
        "Disable r-services and use SSH"),
    rule(1433, "MSSQL", Severity::High,
        "Database listener reachable from the network",
        "Restrict database access to application hosts"),
    rule(1521, "Oracle", Severity::High,
        "Database listener reachable from the network",
        "Restrict database access to application hosts"),
    rule(2049, "NFS", Severity::High,
        "NFS exports may be mountable by untrusted hosts",
        "Restrict exports and require Kerberos"),
    rule(2375, "Docker", Severity::Critical,
        "Unauthenticated Docker API grants root on the host",
        "Disable the TCP socket or require TLS client certificates"),
    rule(3306, "MySQL", Severity::High,
        "Database listener reachable from the network",
        "Bind to localhost or restrict by firewall"),
    rule(3389, "RDP", Severity::High,
        "Remote Desktop exposed to brute force and exploits",
        "Place RDP behind a VPN and enable NLA"),
    rule(5432, "PostgreSQL", Severity::High,
        "Database listener reachable from the network",
        "Restrict pg_hba.conf and firewall the port"),
    rule(5900, "VNC", Severity::High,
        "VNC often runs with weak or no authentication",
        "Tunnel VNC over SSH or a VPN"),
    rule(6379, "Redis", Severity::Critical,
        "Redis without authentication allows arbitrary writes",
        "Enable AUTH, bind to localhost, and enable protected mode"),
    rule(9200, "Elasticsearch", Severity::High,
        "Elasticsearch API may expose indexed data without authentication",
        "Enable security features and restrict network access"),
    rule(11211, "Memcached", Severity::High,
        "Memcached can be abused for amplification and data leaks",
        "Disable UDP and bind to localhost"),
    rule(27017, "MongoDB", Severity::Critical,
        "MongoDB without authentication exposes all databases",
        "Enable authentication and bind to trusted interfaces"),
];

static BY_PORT: LazyLock<HashMap<u16, &'static Rule>> = LazyLock::new(|| {
    let index: HashMap<u16, &'static Rule> = RULES.iter().map(|r| (r.port, r)).collect();
    log::debug!("[rules] table_loaded: rules={}", index.len());
    index
});

pub fn lookup(port: u16) -> Option<&'static Rule> {
    BY_PORT.get(&port).copied()
}

/// All rules in port order.
pub fn all() -> &'static [Rule] {
    RULES
}
