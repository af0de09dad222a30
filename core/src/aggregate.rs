//! Blocked-query log page to per-domain summary rows.

use std::collections::HashMap;

use dnsgate_api::LogEntry;
use dnsgate_types::{BlockedDomainSummary, Domain};

/// Collapse a page of blocked queries into one row per domain.
///
/// Names are normalized first and unusable names are skipped. Rows are ordered
/// by hit count, most hits first, then by domain.
#[must_use]
pub fn aggregate_blocked(entries: &[LogEntry]) -> Vec<BlockedDomainSummary> {
    let mut by_domain: HashMap<Domain, BlockedDomainSummary> = HashMap::new();

    for entry in entries {
        let Some(domain) = entry.qname.as_deref().and_then(Domain::normalize) else {
            continue;
        };
        let row = by_domain
            .entry(domain)
            .or_insert_with_key(|d| BlockedDomainSummary {
                domain: d.to_string(),
                count: 0,
                last_seen: None,
            });
        row.count += 1;
        if let Some(ts) = entry.timestamp
            && row.last_seen.is_none_or(|seen| ts > seen)
        {
            row.last_seen = Some(ts);
        }
    }

    let mut rows: Vec<_> = by_domain.into_values().collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
    rows
}
