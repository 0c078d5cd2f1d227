//! Subordinate ID allocation files (`/etc/subuid`, `/etc/subgid`).
//!
//! Each line is `owner:start:count`, where `owner` is a name or a numeric ID.
//! Allocations are turned into mapping ranges ordered by host start, with
//! container IDs assigned contiguously from 0.

use crate::idmap::IdMap;

/// Returns `(host_start, count)` allocations belonging to `name` or `id`.
#[must_use]
pub fn parse_allocations(content: &str, name: &str, id: u32) -> Vec<(u32, u32)> {
    let id = id.to_string();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 3 || (fields[0] != name && fields[0] != id) {
                return None;
            }
            let start = fields[1].parse().ok()?;
            let count: u32 = fields[2].parse().ok()?;
            (count > 0).then_some((start, count))
        })
        .collect()
}

/// Orders allocations by host start and lays them out from container ID 0.
///
/// Ranges that would push the container axis past `u32::MAX` are dropped.
#[must_use]
pub fn to_ranges(mut allocations: Vec<(u32, u32)>) -> Vec<IdMap> {
    allocations.sort_unstable();
    let mut next: u32 = 0;
    let mut ranges = Vec::with_capacity(allocations.len());
    for (host_start, count) in allocations {
        let Some(end) = next.checked_add(count) else {
            tracing::warn!(host_start, count, "subordinate range overflows the ID space, ignoring");
            break;
        };
        ranges.push(IdMap::new(next, host_start, count));
        next = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_owner_by_name_or_numeric_id() {
        let content = "alice:100000:65536\n1000:300000:10\nbob:200000:65536\n";
        let allocs = parse_allocations(content, "alice", 1000);
        assert_eq!(allocs, vec![(100_000, 65_536), (300_000, 10)]);
    }

    #[test]
    fn skips_comments_malformed_and_empty_ranges() {
        let content = "# header\nalice:abc:10\nalice:1:2:3\nalice:500:0\n\nalice:600:5\n";
        assert_eq!(parse_allocations(content, "alice", 1000), vec![(600, 5)]);
    }

    #[test]
    fn ranges_are_sorted_and_contiguous_from_zero() {
        let ranges = to_ranges(vec![(300_000, 10), (100_000, 65_536)]);
        assert_eq!(
            ranges,
            vec![
                IdMap::new(0, 100_000, 65_536),
                IdMap::new(65_536, 300_000, 10),
            ]
        );
    }

    #[test]
    fn ranges_never_overlap_on_container_axis() {
        let ranges = to_ranges(vec![(10, 5), (1000, 7), (20, 3)]);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].container_id + pair[0].size, pair[1].container_id);
        }
    }

    #[test]
    fn no_allocations_yield_no_ranges() {
        assert!(to_ranges(Vec::new()).is_empty());
    }
}
