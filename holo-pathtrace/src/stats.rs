//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::fmt;

use crate::address::Address;
use crate::hop::Hop;
use crate::lcz::Lcz;
use crate::loader::Loader;
use crate::path::Path;
use crate::probe::Probe;

/// Column layout of the report line [`crate::correlator::Correlator`]
/// emits per LCZ / overlap-destination pair, reproduced from the
/// original analysis tool's stdout header.
pub const FORMAT: &str = "\
# tstamp lczid nrm nadd nrmips naddips chlen detctafter end\n\
# travbranch nbefore travjoin nafter rmhopoverlap rmipsoverlap\n\
# nprobes nttls ttlsrmprob ttlsrm rmcov probafter detafter\n\
# intimespan lcz2 samebranch samejoin rmipsJ adipsJ imipsJ glipsJ\n";

fn hop_key(hop: &Hop) -> Vec<Address> {
    hop.ifaces().iter().map(|i| i.address).collect()
}

fn hop_set_key(hops: &[Hop]) -> HashSet<Vec<Address>> {
    hops.iter().map(hop_key).collect()
}

fn jaccard<T: std::hash::Hash + Eq + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(b).count();
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Size of the change itself: how many hops/addresses were added or
/// removed, and whether the change altered the path's length.
pub struct ChangeStats {
    pub removed_hops: usize,
    pub added_hops: usize,
    pub removed_ips: usize,
    pub added_ips: usize,
    pub changes_length: bool,
    pub detect_after_join: bool,
    pub at_end: bool,
}

impl ChangeStats {
    pub fn new(lcz: &Lcz, p1: &Path, p2: &Path) -> ChangeStats {
        let (removed_hops, removed_ips) = lcz.removed(p1, p2);
        let (added_hops, added_ips) = lcz.added(p1, p2);
        ChangeStats {
            removed_hops: removed_hops.len(),
            added_hops: added_hops.len(),
            removed_ips: removed_ips.len(),
            added_ips: added_ips.len(),
            changes_length: lcz.changes_length(),
            detect_after_join: lcz.detectable_after_join(),
            at_end: lcz.at_end(p1, p2),
        }
    }
}

impl fmt::Display for ChangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.removed_hops,
            self.added_hops,
            self.removed_ips,
            self.added_ips,
            self.changes_length as u8,
            self.detect_after_join as u8,
            self.at_end as u8
        )
    }
}

/// How much of a change overlaps a third, unrelated path: whether its
/// branch/join hops appear on `path` at all, and how far the two paths
/// keep tracking each other around those points.
pub struct SharedStats {
    pub branch: bool,
    pub before_branch: u32,
    pub join: bool,
    pub after_join: u32,
    pub rm_hop_overlap: usize,
    pub rm_ip_overlap: usize,
}

impl SharedStats {
    pub fn new(lcz: &Lcz, p1: &Path, p2: &Path, path: &Path) -> SharedStats {
        let branch_hop = lcz.branch_hop(p1);
        let join_hop = lcz.join_hop(p1);

        let branch = branch_hop.map(|h| path.contains_hop(h)).unwrap_or(false);
        let join = join_hop.map(|h| path.contains_hop(h)).unwrap_or(false);

        let mut after_join = 0u32;
        if join {
            let hop = join_hop.unwrap();
            let mut cnt: i64 = 1;
            let pttl = path.hop_ttl(hop, false);
            while lcz.j1 as i64 + cnt < p1.len() as i64
                && pttl + cnt < path.len() as i64
                && Hop::equal(&p1.hops()[lcz.j1 + cnt as usize], &path.hops()[(pttl + cnt) as usize], false)
            {
                cnt += 1;
            }
            after_join = (cnt - 1) as u32;
        }

        let mut before_branch = 0u32;
        if branch {
            let hop = branch_hop.unwrap();
            let mut cnt: i64 = 1;
            let pttl = path.hop_ttl(hop, false);
            let i1 = lcz.i1;
            while i1 - cnt >= 0
                && pttl - cnt >= 0
                && Hop::equal(&p1.hops()[(i1 - cnt) as usize], &path.hops()[(pttl - cnt) as usize], false)
            {
                cnt += 1;
            }
            before_branch = (cnt - 1) as u32;
        }

        let pifaces = path.interfaces();
        let mut ip_overlap = HashSet::new();
        let mut ip_set = HashSet::new();
        let (removed_hops, _) = lcz.removed(p1, p2);
        let mut rm_hop_overlap = 0;
        for hop in &removed_hops {
            if path.contains_hop(hop) {
                rm_hop_overlap += 1;
            }
            for iface in hop.ifaces() {
                ip_set.insert(iface.address);
                if pifaces.contains(iface) {
                    ip_overlap.insert(iface.address);
                }
            }
        }

        SharedStats {
            branch,
            before_branch,
            join,
            after_join,
            rm_hop_overlap,
            rm_ip_overlap: ip_overlap.len(),
        }
    }
}

impl fmt::Display for SharedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.branch as u8, self.before_branch, self.join as u8, self.after_join,
            self.rm_hop_overlap, self.rm_ip_overlap
        )
    }
}

/// How well active probes covered a change: how many TTLs touched by
/// the change were actually probed around the time it happened.
pub struct ProbeStats {
    pub nprobes: usize,
    pub nttls: usize,
    pub ttls_w_impacted: usize,
    pub ttls_w_impacted_probed: usize,
    pub ttls_w_added: usize,
    pub ttls_w_added_probed: usize,
    pub ttls_w_removed: usize,
    pub ttls_w_removed_probed: usize,
    pub probed_after_join: bool,
}

impl ProbeStats {
    pub fn new(
        lcz: &Lcz,
        p1: &Path,
        p2: &Path,
        cpath: &Path,
        tstamp: i64,
        probe_loader: &mut Loader<Address, Probe>,
    ) -> ProbeStats {
        if tstamp > probe_loader.ctime() {
            probe_loader.set_time(tstamp);
        }
        let probes = probe_loader.get_objects(&cpath.dst);
        let probed_ttls: HashSet<u8> = probes.iter().map(|p| p.ttl).collect();
        let (_added_hops, added_ips) = lcz.added(p1, p2);
        let (_removed_hops, removed_ips) = lcz.removed(p1, p2);
        let impacted_ips: HashSet<Address> = added_ips.union(&removed_ips).cloned().collect();

        let mut ttls_w_impacted = 0;
        let mut ttls_w_impacted_probed = 0;
        let mut ttls_w_added = 0;
        let mut ttls_w_added_probed = 0;
        let mut ttls_w_removed = 0;
        let mut ttls_w_removed_probed = 0;

        for hop in cpath.hops() {
            let hop_ips: HashSet<Address> = hop.ifaces().iter().map(|i| i.address).collect();
            let probed = probed_ttls.contains(&hop.ttl);
            if !hop_ips.is_disjoint(&impacted_ips) {
                ttls_w_impacted += 1;
                if probed {
                    ttls_w_impacted_probed += 1;
                }
            }
            if !hop_ips.is_disjoint(&added_ips) {
                ttls_w_added += 1;
                if probed {
                    ttls_w_added_probed += 1;
                }
            }
            if !hop_ips.is_disjoint(&removed_ips) {
                ttls_w_removed += 1;
                if probed {
                    ttls_w_removed_probed += 1;
                }
            }
        }

        let probed_after_join = probed_ttls
            .iter()
            .max()
            .map(|&max_ttl| max_ttl as i64 >= lcz.j1 as i64)
            .unwrap_or(false);

        ProbeStats {
            nprobes: probes.len(),
            nttls: probed_ttls.len(),
            ttls_w_impacted,
            ttls_w_impacted_probed,
            ttls_w_added,
            ttls_w_added_probed,
            ttls_w_removed,
            ttls_w_removed_probed,
            probed_after_join,
        }
    }
}

impl fmt::Display for ProbeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.nprobes,
            self.nttls,
            self.ttls_w_impacted,
            self.ttls_w_impacted_probed,
            self.ttls_w_added,
            self.ttls_w_added_probed,
            self.ttls_w_removed,
            self.ttls_w_removed_probed,
            self.probed_after_join as u8
        )
    }
}

/// Jaccard-index comparison of two changes, used to find the most
/// similar past change to a newly observed one.
pub struct SimilarityStats {
    pub same_branch: bool,
    pub same_join: bool,
    pub rmhops_j: f64,
    pub adhops_j: f64,
    pub rmips_j: f64,
    pub adips_j: f64,
    pub imhops_j: f64,
    pub imips_j: f64,
    pub glhops_j: f64,
    pub glips_j: f64,
}

impl SimilarityStats {
    pub fn new(c1: &Lcz, c1p1: &Path, c1p2: &Path, c2: &Lcz, c2p1: &Path, c2p2: &Path) -> SimilarityStats {
        let same_branch = match (c1.branch_hop(c1p1), c2.branch_hop(c2p1)) {
            (Some(h1), Some(h2)) => Hop::equal(h1, h2, false),
            (None, None) => true,
            _ => false,
        };
        let same_join = (c1.j1 >= c1p1.len() && c2.j1 >= c2p1.len())
            || match (c1.join_hop(c1p1), c2.join_hop(c2p1)) {
                (Some(h1), Some(h2)) => Hop::equal(h1, h2, false),
                _ => false,
            };

        let (rm_hops1, rm_ips1) = c1.removed(c1p1, c1p2);
        let (rm_hops2, rm_ips2) = c2.removed(c2p1, c2p2);
        let (ad_hops1, ad_ips1) = c1.added(c1p1, c1p2);
        let (ad_hops2, ad_ips2) = c2.added(c2p1, c2p2);

        let rm_hops1_k = hop_set_key(&rm_hops1);
        let rm_hops2_k = hop_set_key(&rm_hops2);
        let ad_hops1_k = hop_set_key(&ad_hops1);
        let ad_hops2_k = hop_set_key(&ad_hops2);

        let im_hops1_k: HashSet<Vec<Address>> = rm_hops1_k.union(&ad_hops1_k).cloned().collect();
        let im_hops2_k: HashSet<Vec<Address>> = rm_hops2_k.union(&ad_hops2_k).cloned().collect();
        let im_ips1: HashSet<Address> = rm_ips1.union(&ad_ips1).cloned().collect();
        let im_ips2: HashSet<Address> = rm_ips2.union(&ad_ips2).cloned().collect();

        let rmhops_j = jaccard(&rm_hops1_k, &rm_hops2_k);
        let adhops_j = jaccard(&ad_hops1_k, &ad_hops2_k);
        let rmips_j = jaccard(&rm_ips1, &rm_ips2);
        let adips_j = jaccard(&ad_ips1, &ad_ips2);
        let imhops_j = jaccard(&im_hops1_k, &im_hops2_k);
        let imips_j = jaccard(&im_ips1, &im_ips2);

        let mut gl_hops1_k = im_hops1_k;
        let mut gl_hops2_k = im_hops2_k;
        if let Some(h) = c1.branch_hop(c1p1) { gl_hops1_k.insert(hop_key(h)); }
        if let Some(h) = c1.join_hop(c1p1) { gl_hops1_k.insert(hop_key(h)); }
        if let Some(h) = c2.branch_hop(c2p1) { gl_hops2_k.insert(hop_key(h)); }
        if let Some(h) = c2.join_hop(c2p1) { gl_hops2_k.insert(hop_key(h)); }
        let glhops_j = jaccard(&gl_hops1_k, &gl_hops2_k);

        let mut gl_ips1 = im_ips1;
        let mut gl_ips2 = im_ips2;
        if let Some(h) = c1.branch_hop(c1p1) { gl_ips1.extend(h.ifaces().iter().map(|i| i.address)); }
        if let Some(h) = c1.join_hop(c1p1) { gl_ips1.extend(h.ifaces().iter().map(|i| i.address)); }
        if let Some(h) = c2.branch_hop(c2p1) { gl_ips2.extend(h.ifaces().iter().map(|i| i.address)); }
        if let Some(h) = c2.join_hop(c2p1) { gl_ips2.extend(h.ifaces().iter().map(|i| i.address)); }
        let glips_j = jaccard(&gl_ips1, &gl_ips2);

        SimilarityStats {
            same_branch,
            same_join,
            rmhops_j,
            adhops_j,
            rmips_j,
            adips_j,
            imhops_j,
            imips_j,
            glhops_j,
            glips_j,
        }
    }
}

impl fmt::Display for SimilarityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            self.same_branch as u8, self.same_join as u8,
            self.rmhops_j, self.adhops_j, self.imhops_j, self.glhops_j,
            self.rmips_j, self.adips_j, self.imips_j, self.glips_j
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_of_two_empty_sets_is_one() {
        let a: HashSet<Address> = HashSet::new();
        let b: HashSet<Address> = HashSet::new();
        assert_eq!(jaccard(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        let a: HashSet<Address> = ["1.1.1.1".parse().unwrap()].into_iter().collect();
        let b: HashSet<Address> = ["2.2.2.2".parse().unwrap()].into_iter().collect();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn change_stats_reports_added_and_removed_counts() {
        let p1 = Path::parse("1.1.1.1 9.9.9.9 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|9.9.9.9:0:0.00,0.00,0.00,0.00:").unwrap();
        let mut p1b = p1.clone();
        let p2 = Path::parse("1.1.1.1 9.9.9.9 1 3.3.3.3:0:0.00,0.00,0.00,0.00:|9.9.9.9:0:0.00,0.00,0.00,0.00:").unwrap();
        let mut p2b = p2.clone();
        let changes = crate::diff::diff(&mut p1b, &mut p2b, crate::diff::DiffFlags::empty());
        let stats = ChangeStats::new(&changes[0], &p1b, &p2b);
        assert_eq!(stats.removed_hops, 1);
        assert_eq!(stats.added_hops, 1);
    }
}
