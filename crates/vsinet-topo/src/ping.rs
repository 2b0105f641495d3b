//! Ping output parsing.

/// Packet counts from one `ping` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    /// The output reported an unreachable destination
    pub unreachable: bool,
}

impl PingStats {
    /// Every packet came back and nothing was reported unreachable.
    pub fn success(&self) -> bool {
        !self.unreachable && self.sent > 0 && self.sent == self.received
    }
}

/// Extract packet counts from `ping` output.
///
/// Understands both iputils (`1 packets transmitted, 1 received`) and
/// busybox (`1 packets transmitted, 1 packets received`) summaries.
pub fn parse_ping(output: &str) -> Option<PingStats> {
    let unreachable = output.contains("Destination Host Unreachable");
    let summary = output.lines().find(|l| l.contains("packets transmitted"))?;

    let mut parts = summary.split(',').map(str::trim);
    let sent = leading_number(parts.next()?)?;
    let received = parts
        .find(|p| p.ends_with("received"))
        .and_then(leading_number)?;

    Some(PingStats {
        sent,
        received,
        unreachable,
    })
}

fn leading_number(s: &str) -> Option<u32> {
    s.split_whitespace().next()?.parse().ok()
}
