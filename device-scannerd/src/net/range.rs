use std::net::Ipv4Addr;
use shared::protocol::{FALLBACK_RANGE_FIRST, FALLBACK_RANGE_LAST, FALLBACK_RANGE_PREFIX};

/// Compute the ordered probe targets for a host's subnet.
///
/// Never fails: missing or malformed input, or a mask that does not describe
/// a usable IPv4 subnet, yields the fixed 192.168.1.1-192.168.1.100 range.
/// Subnets larger than /24 are narrowed to the /24 slice holding the local
/// address before the `cap` is applied, so a /16 still scans the host's
/// neighborhood rather than x.x.0.1 onward.
pub fn candidate_addresses(local: Option<&str>, mask: Option<&str>, cap: usize) -> Vec<Ipv4Addr> {
    let local_ip = local.and_then(|s| s.trim().parse::<Ipv4Addr>().ok());
    let mask_bits = mask.and_then(|s| s.trim().parse::<Ipv4Addr>().ok()).map(u32::from);

    match (local_ip, mask_bits) {
        (Some(ip), Some(mask)) if is_usable(ip, mask) => subnet_range(ip, mask, cap),
        _ => {
            tracing::debug!(
                "No usable network info (local={:?}, mask={:?}), using fallback range",
                local,
                mask
            );
            fallback_range(local_ip, cap)
        }
    }
}

/// Contiguous mask with at least two host addresses, on a non-loopback host.
fn is_usable(ip: Ipv4Addr, mask: u32) -> bool {
    let contiguous = mask.leading_ones() + mask.trailing_zeros() == 32;
    contiguous && mask.leading_ones() <= 30 && !ip.is_loopback() && !ip.is_unspecified()
}

fn subnet_range(ip: Ipv4Addr, mask: u32, cap: usize) -> Vec<Ipv4Addr> {
    let ip_bits = u32::from(ip);
    let network = ip_bits & mask;
    let broadcast = network | !mask;

    let slice_mask = mask | 0xFFFF_FF00;
    let slice_network = ip_bits & slice_mask;
    let slice_broadcast = slice_network | !slice_mask;

    let first = slice_network.max(network + 1);
    let last = slice_broadcast.min(broadcast - 1);

    (first..=last)
        .filter(|&candidate| candidate != ip_bits && candidate != slice_network && candidate != slice_broadcast)
        .map(Ipv4Addr::from)
        .take(cap)
        .collect()
}

fn fallback_range(local: Option<Ipv4Addr>, cap: usize) -> Vec<Ipv4Addr> {
    let [a, b, c] = FALLBACK_RANGE_PREFIX;
    (FALLBACK_RANGE_FIRST..=FALLBACK_RANGE_LAST)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .filter(|candidate| Some(*candidate) != local)
        .take(cap)
        .collect()
}
