//! Bully-style leader election.
//!
//! No messages are exchanged: the coordinator compares the port embedded in
//! each member address and the highest wins. Addresses without a port rank
//! below every address with one, and equal ports fall back to comparing the
//! full address, so the result is the same for any iteration order.

use crate::types::NodeAddress;

fn rank(address: &NodeAddress) -> (Option<u16>, &str) {
    (address.port(), address.as_str())
}

/// Leader among `members`, or `None` if there are none.
pub fn elect<'a, I>(members: I) -> Option<NodeAddress>
where
    I: IntoIterator<Item = &'a NodeAddress>,
{
    members
        .into_iter()
        .max_by(|a, b| rank(a).cmp(&rank(b)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<NodeAddress> {
        list.iter().map(|s| NodeAddress::from(*s)).collect()
    }

    #[test]
    fn test_highest_port_wins() {
        let members = addrs(&[":8081", ":8082", ":8083"]);
        assert_eq!(elect(&members), Some(NodeAddress::from(":8083")));
    }

    #[test]
    fn test_removing_leader_elects_next() {
        let members = addrs(&[":8081", ":8082"]);
        assert_eq!(elect(&members), Some(NodeAddress::from(":8082")));
    }

    #[test]
    fn test_empty_membership_has_no_leader() {
        let members: Vec<NodeAddress> = Vec::new();
        assert_eq!(elect(&members), None);
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let members = addrs(&["host:9999", "host:10000"]);
        assert_eq!(elect(&members), Some(NodeAddress::from("host:10000")));
    }

    #[test]
    fn test_portless_ranks_lowest() {
        let members = addrs(&["no-port", "host:1"]);
        assert_eq!(elect(&members), Some(NodeAddress::from("host:1")));

        let only = addrs(&["no-port"]);
        assert_eq!(elect(&only), Some(NodeAddress::from("no-port")));
    }

    #[test]
    fn test_equal_ports_break_on_address() {
        let forward = addrs(&["a:9000", "b:9000"]);
        let reverse = addrs(&["b:9000", "a:9000"]);
        assert_eq!(elect(&forward), elect(&reverse));
        assert_eq!(elect(&forward), Some(NodeAddress::from("b:9000")));
    }
}
