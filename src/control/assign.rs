//! Balanced role planning
//!
//! Pure: given the live server states and the previous assignment, produce a
//! full shard -> (master, replicas) mapping for the next version, or report
//! the first shard that cannot be placed.
//!
//! Placement is greedy with stickiness. For every shard the candidate order
//! is: its previous master, its previous replicas, servers already reporting
//! the shard locally, then every live server. A candidate takes the shard
//! only while under its quota (floor(N/S) masters and floor(N*R/S) replicas
//! per server, with the integer remainders handed out first-come) and only
//! if it does not already hold the shard in either capacity. When the greedy
//! replica pass corners itself (every under-quota server already holds the
//! shard), a swap moves one unrelated replica between two servers to free a
//! legal slot; the corrective move ignores the remainder budget.
//!
//! All candidate iteration follows `BTreeMap` key order, so a single plan is
//! deterministic in its inputs.

use crate::control::records::{ServerRole, ServerState};
use std::collections::BTreeMap;

/// A complete plan for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Assignment {
    pub roles: BTreeMap<String, ServerRole>,
    pub masters: BTreeMap<u64, String>,
    pub replicas: BTreeMap<u64, Vec<String>>,
}

/// The first placement the greedy passes could not make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanFailure {
    Master { shard: u64 },
    Replica { shard: u64, index: u64 },
}

pub(crate) fn plan_roles(
    num_shards: u64,
    num_replicas: u64,
    version: i64,
    states: &BTreeMap<String, ServerState>,
    old_masters: &BTreeMap<u64, String>,
    old_replicas: &BTreeMap<u64, Vec<String>>,
) -> Result<Assignment, PlanFailure> {
    let servers = states.len() as u64;
    let master_quota = num_shards / servers;
    let mut master_rem = num_shards % servers;
    let replica_quota = (num_shards * num_replicas) / servers;
    let mut replica_rem = (num_shards * num_replicas) % servers;

    let mut roles: BTreeMap<String, ServerRole> = states
        .keys()
        .map(|id| (id.clone(), ServerRole::new(id, version)))
        .collect();
    let mut shard_locations: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for (id, state) in states {
        for &shard in &state.shards {
            shard_locations.entry(shard).or_default().push(id.clone());
        }
    }
    let mut masters: BTreeMap<u64, String> = BTreeMap::new();
    let mut replicas: BTreeMap<u64, Vec<String>> = BTreeMap::new();

    'master: for shard in 0..num_shards {
        for id in candidates(shard, states, old_masters, old_replicas, &shard_locations) {
            if assign_master(&mut roles, &mut masters, id, shard, master_quota, &mut master_rem) {
                continue 'master;
            }
        }
        return Err(PlanFailure::Master { shard });
    }

    for index in 0..num_replicas {
        'replica: for shard in 0..num_shards {
            for id in candidates(shard, states, old_masters, old_replicas, &shard_locations) {
                if assign_replica(&mut roles, &mut replicas, id, shard, replica_quota, &mut replica_rem)
                {
                    continue 'replica;
                }
            }
            for id in states.keys() {
                if swap_replica(&mut roles, &mut replicas, id, shard, replica_quota) {
                    continue 'replica;
                }
            }
            return Err(PlanFailure::Replica { shard, index });
        }
    }

    Ok(Assignment {
        roles,
        masters,
        replicas,
    })
}

/// Candidate servers for `shard`, most-preferred first. May name dead
/// servers; the assign helpers skip ids with no role entry.
fn candidates<'a>(
    shard: u64,
    states: &'a BTreeMap<String, ServerState>,
    old_masters: &'a BTreeMap<u64, String>,
    old_replicas: &'a BTreeMap<u64, Vec<String>>,
    shard_locations: &'a BTreeMap<u64, Vec<String>>,
) -> impl Iterator<Item = &'a str> {
    old_masters
        .get(&shard)
        .into_iter()
        .map(String::as_str)
        .chain(
            old_replicas
                .get(&shard)
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
        .chain(
            shard_locations
                .get(&shard)
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
        .chain(states.keys().map(String::as_str))
}

fn assign_master(
    roles: &mut BTreeMap<String, ServerRole>,
    masters: &mut BTreeMap<u64, String>,
    id: &str,
    shard: u64,
    quota: u64,
    remainder: &mut u64,
) -> bool {
    let Some(role) = roles.get_mut(id) else {
        return false;
    };
    let held = role.masters.len() as u64;
    if held > quota {
        return false;
    }
    if held == quota && *remainder == 0 {
        return false;
    }
    if role.has_shard(shard) {
        return false;
    }
    if held == quota {
        *remainder -= 1;
    }
    role.masters.insert(shard);
    masters.insert(shard, id.to_string());
    true
}

fn assign_replica(
    roles: &mut BTreeMap<String, ServerRole>,
    replicas: &mut BTreeMap<u64, Vec<String>>,
    id: &str,
    shard: u64,
    quota: u64,
    remainder: &mut u64,
) -> bool {
    let Some(role) = roles.get_mut(id) else {
        return false;
    };
    let held = role.replicas.len() as u64;
    if held > quota {
        return false;
    }
    if held == quota && *remainder == 0 {
        return false;
    }
    if role.has_shard(shard) {
        return false;
    }
    if held == quota {
        *remainder -= 1;
    }
    role.replicas.insert(shard);
    replicas.entry(shard).or_default().push(id.to_string());
    true
}

/// Free a replica slot for `shard` on some other server by handing one of
/// its unrelated replicas to `id`, then place `shard` there. Both corrective
/// moves run with the remainder budget disabled: `id` is already known to be
/// under quota, and the donor is only replacing a shard it gave up.
fn swap_replica(
    roles: &mut BTreeMap<String, ServerRole>,
    replicas: &mut BTreeMap<u64, Vec<String>>,
    id: &str,
    shard: u64,
    quota: u64,
) -> bool {
    match roles.get(id) {
        Some(role) if (role.replicas.len() as u64) < quota => {}
        _ => return false,
    }
    let mut swap: Option<(String, u64)> = None;
    'search: for (donor_id, donor_role) in roles.iter() {
        if donor_id == id || donor_role.has_shard(shard) {
            continue;
        }
        for &donor_shard in &donor_role.replicas {
            if roles[id].has_shard(donor_shard) {
                continue;
            }
            swap = Some((donor_id.clone(), donor_shard));
            break 'search;
        }
    }
    let Some((donor_id, donor_shard)) = swap else {
        return false;
    };
    if let Some(donor_role) = roles.get_mut(&donor_id) {
        donor_role.replicas.remove(&donor_shard);
    }
    remove_replica(replicas, donor_shard, &donor_id);
    let mut no_remainder = 0;
    assign_replica(roles, replicas, &donor_id, shard, u64::MAX, &mut no_remainder);
    assign_replica(roles, replicas, id, donor_shard, quota, &mut no_remainder);
    true
}

fn remove_replica(replicas: &mut BTreeMap<u64, Vec<String>>, shard: u64, id: &str) {
    if let Some(ids) = replicas.get_mut(&shard) {
        ids.retain(|existing| existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn state(id: &str, shards: &[u64]) -> (String, ServerState) {
        (
            id.to_string(),
            ServerState {
                id: id.to_string(),
                address: format!("10.0.0.{}:1050", id.len()),
                shards: shards.iter().copied().collect(),
                version: 0,
            },
        )
    }

    fn plan(
        num_shards: u64,
        num_replicas: u64,
        states: &BTreeMap<String, ServerState>,
        old_masters: &BTreeMap<u64, String>,
        old_replicas: &BTreeMap<u64, Vec<String>>,
    ) -> Assignment {
        plan_roles(num_shards, num_replicas, 0, states, old_masters, old_replicas).unwrap()
    }

    /// Every shard has exactly one master, exactly R replicas, no server
    /// holds a shard in both capacities, and load stays within the floor or
    /// ceiling of the even split.
    fn check_invariants(plan: &Assignment, num_shards: u64, num_replicas: u64) {
        let servers = plan.roles.len() as u64;
        for shard in 0..num_shards {
            let masters: Vec<&String> = plan
                .roles
                .iter()
                .filter(|(_, role)| role.masters.contains(&shard))
                .map(|(id, _)| id)
                .collect();
            assert_eq!(masters.len(), 1, "shard {} masters: {:?}", shard, masters);

            let replicas = plan
                .roles
                .values()
                .filter(|role| role.replicas.contains(&shard))
                .count() as u64;
            assert_eq!(replicas, num_replicas, "shard {} replica count", shard);
        }
        for role in plan.roles.values() {
            assert!(
                role.masters.is_disjoint(&role.replicas),
                "server {} holds a shard in both roles",
                role.id
            );
            let masters = role.masters.len() as u64;
            assert!(
                masters >= num_shards / servers && masters <= num_shards / servers + 1,
                "server {} master load {}",
                role.id,
                masters
            );
            let replicas = role.replicas.len() as u64;
            let quota = (num_shards * num_replicas) / servers;
            assert!(
                replicas >= quota && replicas <= quota + 1,
                "server {} replica load {}",
                role.id,
                replicas
            );
        }
    }

    #[test]
    fn test_fresh_cluster_two_servers() {
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();
        let planned = plan(4, 1, &states, &BTreeMap::new(), &BTreeMap::new());
        check_invariants(&planned, 4, 1);

        assert_eq!(planned.roles["a"].masters.len(), 2);
        assert_eq!(planned.roles["b"].masters.len(), 2);
        // With one replica and two servers, every shard's replica sits on
        // the server that does not master it.
        for shard in 0..4 {
            let master = &planned.masters[&shard];
            let replica = &planned.replicas[&shard][0];
            assert_ne!(master, replica);
        }
    }

    #[test]
    fn test_master_stickiness_on_join() {
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();
        let first = plan(4, 1, &states, &BTreeMap::new(), &BTreeMap::new());

        let grown: BTreeMap<_, _> = [state("a", &[]), state("b", &[]), state("c", &[])]
            .into_iter()
            .collect();
        let second = plan(4, 1, &grown, &first.masters, &first.replicas);
        check_invariants(&second, 4, 1);

        // Master counts settle at {2, 1, 1} and the newcomer takes work.
        let mut counts: Vec<usize> = second.roles.values().map(|r| r.masters.len()).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 1, 2]);
        assert!(!second.roles["c"].masters.is_empty());
        assert!(!second.roles["c"].replicas.is_empty());

        // At most one shard moved off its previous master.
        let moved = (0..4)
            .filter(|shard| second.masters[shard] != first.masters[shard])
            .count();
        assert_eq!(moved, 1);
    }

    #[test]
    fn test_master_stays_when_quota_permits() {
        let mut old_masters = BTreeMap::new();
        old_masters.insert(0, "b".to_string());
        old_masters.insert(1, "a".to_string());
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();

        let planned = plan(2, 0, &states, &old_masters, &BTreeMap::new());
        assert_eq!(planned.masters[&0], "b");
        assert_eq!(planned.masters[&1], "a");
    }

    #[test]
    fn test_prior_replica_promoted_when_master_dies() {
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();
        let first = plan(4, 1, &states, &BTreeMap::new(), &BTreeMap::new());

        // Server "a" disappears; every shard it mastered promotes its
        // surviving replica, which reported the shard locally too.
        let survivors: BTreeMap<_, _> = [state("b", &[0, 1, 2, 3])].into_iter().collect();
        let second = plan(4, 0, &survivors, &first.masters, &first.replicas);
        check_invariants(&second, 4, 0);
        for shard in 0..4 {
            assert_eq!(second.masters[&shard], "b");
        }
    }

    #[test]
    fn test_local_shard_preference() {
        // No history: a server already holding the shard's data wins over
        // iteration order.
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[1])].into_iter().collect();
        let planned = plan(2, 0, &states, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(planned.masters[&1], "b");
    }

    #[test]
    fn test_remainder_spread() {
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[]), state("c", &[])]
            .into_iter()
            .collect();
        let planned = plan(7, 2, &states, &BTreeMap::new(), &BTreeMap::new());
        check_invariants(&planned, 7, 2);

        let total_masters: usize = planned.roles.values().map(|r| r.masters.len()).sum();
        let total_replicas: usize = planned.roles.values().map(|r| r.replicas.len()).sum();
        assert_eq!(total_masters, 7);
        assert_eq!(total_replicas, 14);
    }

    #[test]
    fn test_full_saturation() {
        // Every server must end up with every shard in exactly one role.
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[]), state("c", &[])]
            .into_iter()
            .collect();
        let planned = plan(6, 2, &states, &BTreeMap::new(), &BTreeMap::new());
        check_invariants(&planned, 6, 2);
        for role in planned.roles.values() {
            assert_eq!(role.masters.len() + role.replicas.len(), 6);
        }
    }

    #[test]
    fn test_swap_frees_cornered_replica() {
        // Three shards, one replica each, three servers: the greedy pass
        // fills a and b, leaving only the shard-2 master c for shard 2's
        // replica. Success requires the corrective swap.
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[]), state("c", &[])]
            .into_iter()
            .collect();
        let planned = plan(3, 1, &states, &BTreeMap::new(), &BTreeMap::new());
        check_invariants(&planned, 3, 1);
        for role in planned.roles.values() {
            assert_eq!(role.replicas.len(), 1);
        }
    }

    #[test]
    fn test_replicas_unplaceable_on_tiny_cluster() {
        // Two servers cannot host a master plus two distinct replicas.
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();
        let failure =
            plan_roles(3, 2, 0, &states, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(failure, PlanFailure::Replica { .. }));
    }

    #[test]
    fn test_single_server_cannot_replicate() {
        let states: BTreeMap<_, _> = [state("a", &[])].into_iter().collect();
        let failure =
            plan_roles(2, 1, 0, &states, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert_eq!(failure, PlanFailure::Replica { shard: 0, index: 0 });
    }

    #[test]
    fn test_deterministic() {
        let states: BTreeMap<_, _> =
            [state("a", &[0, 1]), state("b", &[2]), state("c", &[])]
                .into_iter()
                .collect();
        let first = plan(8, 1, &states, &BTreeMap::new(), &BTreeMap::new());
        let second = plan(8, 1, &states, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_roles_cover_exact_shard_range() {
        let states: BTreeMap<_, _> = [state("a", &[]), state("b", &[])].into_iter().collect();
        let planned = plan(5, 1, &states, &BTreeMap::new(), &BTreeMap::new());

        let all_masters: BTreeSet<u64> = planned.masters.keys().copied().collect();
        assert_eq!(all_masters, (0..5).collect::<BTreeSet<u64>>());
        let all_replicas: BTreeSet<u64> = planned.replicas.keys().copied().collect();
        assert_eq!(all_replicas, (0..5).collect::<BTreeSet<u64>>());
    }
}
