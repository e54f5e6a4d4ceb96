//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, HashSet};

use crate::address::Address;
use crate::debug::Debug;
use crate::diff::{diff, DiffFlags};
use crate::error::invariant;
use crate::lcz::Lcz;
use crate::loader::Loader;
use crate::path::Path;
use crate::probe::Probe;
use crate::stats::{ChangeStats, ProbeStats, SharedStats, SimilarityStats};

/// Default comparison used by the correlator's own path diffs (not
/// [`crate::pathdb::PathDb`]'s alias comparison): star fixing and path
/// extension both enabled, matching the original tool's default.
fn correlator_diff_flags() -> DiffFlags {
    DiffFlags::FIX_STARS | DiffFlags::EXTEND
}

/// Assigns stable small integer ids to LCZs, keyed by the destination,
/// timestamp, and branch index of their *newer* path - the same triple
/// the original tool keys its id table on.
struct LczDb {
    ids: HashMap<(Address, i64, i64), usize>,
}

impl LczDb {
    fn new() -> LczDb {
        LczDb { ids: HashMap::new() }
    }

    fn insert(&mut self, dst2: Address, tstamp2: i64, i2: i64) {
        let next = self.ids.len();
        self.ids.entry((dst2, tstamp2, i2)).or_insert(next);
    }

    fn get(&self, dst2: Address, tstamp2: i64, i2: i64) -> usize {
        self.ids[&(dst2, tstamp2, i2)]
    }
}

/// One emitted report line: a change observed to `dst`, correlated
/// against an overlapping change (if any) on `overlap_dst`.
pub struct ChangeReport {
    pub tstamp: i64,
    pub dst: Address,
    pub overlap_dst: Address,
    pub lcz_id: usize,
    pub change: ChangeStats,
    pub shared: SharedStats,
    pub probes: ProbeStats,
    pub correlated_lcz_id: Option<usize>,
    pub outside_timespan: bool,
    pub similarity: Option<SimilarityStats>,
    pub correlated_detectable_at: bool,
}

impl std::fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} | {} | ",
            self.tstamp, self.lcz_id, self.change, self.shared
        )?;
        let ratio = if self.probes.ttls_w_removed > 0 {
            self.probes.ttls_w_removed_probed as f64 / self.probes.ttls_w_removed as f64
        } else {
            0.0
        };
        write!(
            f,
            "{} {} {} {} {:.6} {} {} | ",
            self.probes.nprobes,
            self.probes.nttls,
            self.probes.ttls_w_removed_probed,
            self.probes.ttls_w_removed,
            ratio,
            self.probes.probed_after_join as u8,
            (self.probes.probed_after_join && self.correlated_detectable_at) as u8
        )?;
        match (&self.similarity, self.correlated_lcz_id) {
            (Some(sim), Some(id)) => write!(
                f,
                "{} {} {} {} {:.6} {:.6} {:.6} {}",
                self.outside_timespan as u8,
                id,
                sim.same_branch as u8,
                sim.same_join as u8,
                sim.rmips_j,
                sim.imips_j,
                sim.glips_j,
                self.correlated_detectable_at as u8
            ),
            _ => write!(f, "0 0 0 0 0.0 0.0 0.0 0"),
        }
    }
}

/// Correlates path changes across destinations that share an
/// interface, feeding the path-diff event stream produced by a path
/// [`Loader`] alongside a parallel probe [`Loader`].
///
/// Grounded on the `main` event loop: for every path-change event it
/// updates which destinations currently route through which
/// interfaces, finds other destinations impacted by the same change,
/// and reports how similar the two changes are.
pub struct Correlator {
    ip2dsts: HashMap<Address, HashSet<Address>>,
    lcz2id: LczDb,
    timespan: i64,
}

impl Correlator {
    /// `path_loader` must already be primed (as returned by
    /// [`Loader::new`]); its current path per destination seeds the
    /// initial interface-to-destination index.
    pub fn new(path_loader: &mut Loader<Address, Path>, timespan: i64) -> Correlator {
        let mut ip2dsts: HashMap<Address, HashSet<Address>> = HashMap::new();
        let keys: Vec<Address> = path_loader.keys().to_vec();
        for dst in keys {
            if let Some(path) = path_loader.get_current(&dst) {
                for iface in path.interfaces() {
                    ip2dsts.entry(iface.address).or_default().insert(dst);
                }
            }
        }
        Correlator {
            ip2dsts,
            lcz2id: LczDb::new(),
            timespan,
        }
    }

    /// Processes one path-change event (as popped from a path
    /// [`Loader`]): `cpath` is the path observed just before `tstamp`,
    /// `npath` the one observed at `tstamp`. Returns one report per LCZ
    /// found between them and per other destination sharing an
    /// impacted interface.
    pub fn process_event(
        &mut self,
        path_loader: &mut Loader<Address, Path>,
        probe_loader: &mut Loader<Address, Probe>,
        tstamp: i64,
        dst: Address,
        cpath: Option<Path>,
        npath: Path,
    ) -> Vec<ChangeReport> {
        let mut reports = Vec::new();
        let Some(mut cpath) = cpath else {
            return reports;
        };
        let mut npath = npath;

        let changes = diff(&mut cpath, &mut npath, correlator_diff_flags());

        for lcz in &changes {
            let (_added_hops, added_ips) = lcz.added(&cpath, &npath);
            let (_removed_hops, removed_ips) = lcz.removed(&cpath, &npath);
            for ip in &removed_ips {
                if let Some(dsts) = self.ip2dsts.get_mut(ip) {
                    dsts.remove(&dst);
                }
            }
            for ip in &added_ips {
                self.ip2dsts.entry(*ip).or_default().insert(dst);
            }

            if lcz.is_broken(&cpath) {
                Debug::LczBroken(dst).log();
                continue;
            }
            Debug::LczFound(dst, lcz).log();
            self.lcz2id.insert(npath.dst, npath.tstamp, lcz.i2);

            let involved_ips: HashSet<Address> = added_ips.union(&removed_ips).cloned().collect();
            let mut overlap_dsts = HashSet::new();
            for ip in &involved_ips {
                if let Some(dsts) = self.ip2dsts.get(ip) {
                    overlap_dsts.extend(dsts.iter().cloned());
                }
            }
            overlap_dsts.remove(&dst);

            for overlap_dst in overlap_dsts {
                Debug::OverlapFound(dst, overlap_dst, involved_ips.len()).log();
                if let Some(report) =
                    self.correlate(path_loader, probe_loader, tstamp, lcz, &cpath, &npath, overlap_dst)
                {
                    reports.push(report);
                }
            }
        }

        reports
    }

    fn correlate(
        &mut self,
        path_loader: &mut Loader<Address, Path>,
        probe_loader: &mut Loader<Address, Probe>,
        tstamp: i64,
        lcz: &Lcz,
        cpath: &Path,
        npath: &Path,
        overlap_dst: Address,
    ) -> Option<ChangeReport> {
        let next = path_loader.get_next(&overlap_dst);
        let current = path_loader.get_current(&overlap_dst);
        invariant!(
            current.is_some(),
            "correlator: overlap destination has no current path"
        );
        let current = current.unwrap();

        let go_backwards = match &next {
            None => true,
            Some(next) => (current.tstamp - tstamp).abs() < (next.tstamp - tstamp).abs(),
        };

        let (mut ocpath, onpath) = if go_backwards {
            match path_loader.get_previous(&overlap_dst) {
                Some(prev) => (prev, current),
                None => return None, // dataset warmup or no prior change.
            }
        } else {
            (current, next.unwrap())
        };
        invariant!(
            (onpath.tstamp - tstamp).abs() <= (ocpath.tstamp - tstamp).abs(),
            "correlator: surrounding paths out of order"
        );

        let mut onpath_m = onpath.clone();
        let ochanges = diff(&mut ocpath, &mut onpath_m, correlator_diff_flags());

        let outside_timespan = (onpath.tstamp - tstamp).abs() > self.timespan;

        let mut best: Option<(Lcz, SimilarityStats)> = None;
        let mut best_score = 0.0f64;
        for ochange in &ochanges {
            if ochange.is_broken(&ocpath) {
                continue;
            }
            let sim = SimilarityStats::new(lcz, cpath, npath, ochange, &ocpath, &onpath_m);
            if sim.glips_j > best_score {
                best_score = sim.glips_j;
                best = Some((*ochange, sim));
            }
        }
        if let Some((best_lcz, _)) = &best {
            self.lcz2id.insert(onpath_m.dst, onpath_m.tstamp, best_lcz.i2);
        }

        let change = ChangeStats::new(lcz, cpath, npath);
        let shared = SharedStats::new(lcz, cpath, npath, &ocpath);
        let probes = ProbeStats::new(lcz, cpath, npath, &ocpath, tstamp, probe_loader);

        let lcz_id = self.lcz2id.get(npath.dst, npath.tstamp, lcz.i2);
        let (correlated_lcz_id, similarity, correlated_detectable_at) = match &best {
            Some((best_lcz, sim)) => (
                Some(self.lcz2id.get(onpath_m.dst, onpath_m.tstamp, best_lcz.i2)),
                Some(SimilarityStats {
                    same_branch: sim.same_branch,
                    same_join: sim.same_join,
                    rmhops_j: sim.rmhops_j,
                    adhops_j: sim.adhops_j,
                    rmips_j: sim.rmips_j,
                    adips_j: sim.adips_j,
                    imhops_j: sim.imhops_j,
                    imips_j: sim.imips_j,
                    glhops_j: sim.glhops_j,
                    glips_j: sim.glips_j,
                }),
                best_lcz.detectable_at((lcz.j1 as i64 - 1).max(0) as usize),
            ),
            None => (None, None, false),
        };

        Some(ChangeReport {
            tstamp,
            dst: npath.dst,
            overlap_dst,
            lcz_id,
            change,
            shared,
            probes,
            correlated_lcz_id,
            outside_timespan,
            similarity,
            correlated_detectable_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    // Two destinations, d1 and d2, both routing through the shared hop
    // 9.9.9.9 at one point. d1's path to 9.9.9.9 changes; d2 should
    // surface as an overlap destination in the resulting report.
    #[test]
    fn overlapping_destinations_produce_a_report() {
        let d1_before = p("1.1.1.1 8.8.8.8 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|9.9.9.9:0:0.00,0.00,0.00,0.00:|8.8.8.8:0:0.00,0.00,0.00,0.00:");
        let d1_after = p("1.1.1.1 8.8.8.8 2 2.2.2.2:0:0.00,0.00,0.00,0.00:|7.7.7.7:0:0.00,0.00,0.00,0.00:|8.8.8.8:0:0.00,0.00,0.00,0.00:");
        let d2_path = p("1.1.1.1 6.6.6.6 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|9.9.9.9:0:0.00,0.00,0.00,0.00:|6.6.6.6:0:0.00,0.00,0.00,0.00:");

        let mut path_loader: Loader<Address, Path> = Loader::new(
            10,
            vec![
                (d1_before.dst, vec![d1_before.clone(), d1_after.clone()].into_iter()),
                (d2_path.dst, vec![d2_path.clone()].into_iter()),
            ],
        );
        let no_probes: Vec<(Address, std::vec::IntoIter<Probe>)> = Vec::new();
        let mut probe_loader: Loader<Address, Probe> = Loader::new(10, no_probes);

        let mut correlator = Correlator::new(&mut path_loader, 10);

        // Drive the path loader's own event stream so cpath/npath come
        // from the same Stream state the correlator's path_loader calls
        // will observe.
        let (tstamp, dst, cpath, npath) = path_loader.pop_event().unwrap();
        assert_eq!(dst, d1_before.dst);
        let reports = correlator.process_event(&mut path_loader, &mut probe_loader, tstamp, dst, cpath, npath);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].overlap_dst, d2_path.dst);
        assert_eq!(reports[0].change.removed_hops, 1);
        assert_eq!(reports[0].change.added_hops, 1);
    }
}
