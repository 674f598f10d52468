use manet_lab_abstract::{FiveTuple, FlowKey, FlowMonitor, FlowRecord};
use serde::Serialize;

/// One finalized flow as seen after the engine stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowObservation {
    pub key: FlowKey,
    pub record: FlowRecord,
    /// `None` when the classifier no longer knows the flow.
    pub tuple: Option<FiveTuple>,
}

/// Snapshot every flow record in ascending key order.
pub fn collect_flow_observations<M>(monitor: &M) -> Vec<FlowObservation>
where
    M: FlowMonitor + ?Sized,
{
    monitor
        .flow_records()
        .into_iter()
        .map(|(key, record)| FlowObservation {
            key,
            tuple: monitor.resolve_flow_addresses(key),
            record,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use manet_lab_abstract::PROTOCOL_UDP;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    struct FixedMonitor(BTreeMap<FlowKey, FlowRecord>);

    impl FlowMonitor for FixedMonitor {
        fn flow_records(&self) -> BTreeMap<FlowKey, FlowRecord> {
            self.0.clone()
        }

        fn resolve_flow_addresses(&self, key: FlowKey) -> Option<FiveTuple> {
            (key.0 != 3).then(|| FiveTuple {
                source_address: Ipv4Addr::new(10, 1, 1, key.0 as u8),
                destination_address: Ipv4Addr::new(10, 1, 1, 100),
                protocol: PROTOCOL_UDP,
                source_port: 49153,
                destination_port: 9000,
            })
        }
    }

    #[test]
    fn observations_follow_key_order() {
        let mut records = BTreeMap::new();
        for key in [7, 1, 3] {
            records.insert(
                FlowKey(key),
                FlowRecord {
                    tx_packets: u64::from(key),
                    ..Default::default()
                },
            );
        }
        let observations = collect_flow_observations(&FixedMonitor(records));

        let keys: Vec<u32> = observations.iter().map(|o| o.key.0).collect();
        assert_eq!(keys, vec![1, 3, 7]);
        assert_eq!(observations[2].record.tx_packets, 7);
        assert!(observations[1].tuple.is_none());
        assert_eq!(
            observations[0].tuple.map(|t| t.source_address),
            Some(Ipv4Addr::new(10, 1, 1, 1))
        );
    }

    #[test]
    fn empty_monitor_yields_nothing() {
        assert!(collect_flow_observations(&FixedMonitor(BTreeMap::new())).is_empty());
    }
}
