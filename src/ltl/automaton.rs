//! Translation of LTL formulas into a deterministic acceptance structure
//!
//! Tableau node expansion turns the normal-form formula into a
//! generalized Büchi automaton; a counter construction collapses the
//! acceptance sets, and subset determinization yields the transition
//! table the planner steps through. A subset state is accepting when it
//! contains an accepting state of the underlying automaton, so a single
//! deterministic step tracks every run of the translated formula at
//! once.

use std::collections::{BTreeMap, BTreeSet};

use crate::common::{Automaton, LabelSet, PlannerError, PlannerResult, StateId, SymbolTable};
use crate::ltl::formula::{parse, Formula};

/// Formulas may use at most this many distinct propositions; the
/// transition table enumerates every label combination.
pub const MAX_PROPS: usize = 12;

const MAX_STATES: usize = 4096;

/// Sentinel source id marking initial tableau nodes
const INIT: usize = usize::MAX;

#[derive(Debug)]
struct TableauNode {
    incoming: BTreeSet<usize>,
    old: BTreeSet<Formula>,
    next: BTreeSet<Formula>,
}

#[derive(Debug, Clone)]
struct Branch {
    incoming: BTreeSet<usize>,
    new: BTreeSet<Formula>,
    old: BTreeSet<Formula>,
    next: BTreeSet<Formula>,
}

impl Branch {
    fn obligation(&mut self, formula: &Formula) {
        if !self.old.contains(formula) {
            self.new.insert(formula.clone());
        }
    }
}

fn expand(mut branch: Branch, nodes: &mut Vec<TableauNode>) {
    let formula = match branch.new.iter().next().cloned() {
        Some(f) => f,
        None => {
            // fully expanded: merge with an equivalent node or commit
            if let Some(existing) = nodes
                .iter_mut()
                .find(|n| n.old == branch.old && n.next == branch.next)
            {
                existing.incoming.extend(branch.incoming.iter().cloned());
                return;
            }
            let id = nodes.len();
            let successor_new = branch.next.clone();
            nodes.push(TableauNode {
                incoming: branch.incoming,
                old: branch.old,
                next: branch.next,
            });
            let mut incoming = BTreeSet::new();
            incoming.insert(id);
            expand(
                Branch {
                    incoming,
                    new: successor_new,
                    old: BTreeSet::new(),
                    next: BTreeSet::new(),
                },
                nodes,
            );
            return;
        }
    };
    branch.new.remove(&formula);
    match formula {
        Formula::True => expand(branch, nodes),
        Formula::False => {}
        Formula::Atom(_) | Formula::NotAtom(_) => {
            if branch.old.contains(&formula.negated_literal()) {
                return; // contradictory branch
            }
            branch.old.insert(formula);
            expand(branch, nodes);
        }
        Formula::And(ref lhs, ref rhs) => {
            branch.obligation(lhs);
            branch.obligation(rhs);
            branch.old.insert(formula.clone());
            expand(branch, nodes);
        }
        Formula::Next(ref inner) => {
            branch.next.insert(inner.as_ref().clone());
            branch.old.insert(formula.clone());
            expand(branch, nodes);
        }
        Formula::Or(ref lhs, ref rhs) => {
            let mut left = branch.clone();
            left.obligation(lhs);
            left.old.insert(formula.clone());
            expand(left, nodes);
            let mut right = branch;
            right.obligation(rhs);
            right.old.insert(formula.clone());
            expand(right, nodes);
        }
        Formula::Until(ref lhs, ref rhs) => {
            // a U b == b || (a && X(a U b))
            let mut keep = branch.clone();
            keep.obligation(lhs);
            keep.next.insert(formula.clone());
            keep.old.insert(formula.clone());
            expand(keep, nodes);
            let mut done = branch;
            done.obligation(rhs);
            done.old.insert(formula.clone());
            expand(done, nodes);
        }
        Formula::Release(ref lhs, ref rhs) => {
            // a R b == b && (a || X(a R b))
            let mut keep = branch.clone();
            keep.obligation(rhs);
            keep.next.insert(formula.clone());
            keep.old.insert(formula.clone());
            expand(keep, nodes);
            let mut done = branch;
            done.obligation(lhs);
            done.obligation(rhs);
            done.old.insert(formula.clone());
            expand(done, nodes);
        }
    }
}

/// Büchi automaton after collapsing the generalized acceptance sets
struct Nba {
    succ: Vec<Vec<usize>>,
    pos: Vec<u16>,
    neg: Vec<u16>,
    accepting: Vec<bool>,
    vinit: usize,
}

fn literal_masks(old: &BTreeSet<Formula>) -> (u16, u16) {
    let mut pos = 0u16;
    let mut neg = 0u16;
    for formula in old {
        match formula {
            Formula::Atom(p) => pos |= 1 << p,
            Formula::NotAtom(p) => neg |= 1 << p,
            _ => {}
        }
    }
    (pos, neg)
}

fn build_nba(phi: &Formula) -> Nba {
    let mut nodes = Vec::new();
    let mut new = BTreeSet::new();
    new.insert(phi.clone());
    let mut incoming = BTreeSet::new();
    incoming.insert(INIT);
    expand(
        Branch {
            incoming,
            new,
            old: BTreeSet::new(),
            next: BTreeSet::new(),
        },
        &mut nodes,
    );

    let mut untils = BTreeSet::new();
    phi.collect_untils(&mut untils);
    let untils: Vec<Formula> = untils.into_iter().collect();
    let layers = untils.len().max(1);

    // node q discharges acceptance set i when the until either is not
    // pending in q or its right-hand side holds in q
    let discharges = |q: usize, set: usize| -> bool {
        if untils.is_empty() {
            return true;
        }
        let until = &untils[set];
        if !nodes[q].old.contains(until) {
            return true;
        }
        match until {
            Formula::Until(_, rhs) => nodes[q].old.contains(rhs.as_ref()),
            _ => false,
        }
    };

    let count = nodes.len();
    let vinit = count * layers;
    let mut succ = vec![Vec::new(); count * layers + 1];
    let mut pos = vec![0u16; count * layers + 1];
    let mut neg = vec![0u16; count * layers + 1];
    let mut accepting = vec![false; count * layers + 1];

    for (q, node) in nodes.iter().enumerate() {
        let (pos_mask, neg_mask) = literal_masks(&node.old);
        for layer in 0..layers {
            let id = q * layers + layer;
            pos[id] = pos_mask;
            neg[id] = neg_mask;
            accepting[id] = layer == layers - 1 && discharges(q, layer);
        }
    }
    for (target, node) in nodes.iter().enumerate() {
        for &source in &node.incoming {
            if source == INIT {
                succ[vinit].push(target * layers);
            } else {
                for layer in 0..layers {
                    let next_layer = if discharges(source, layer) {
                        (layer + 1) % layers
                    } else {
                        layer
                    };
                    succ[source * layers + layer].push(target * layers + next_layer);
                }
            }
        }
    }
    for list in &mut succ {
        list.sort_unstable();
        list.dedup();
    }
    Nba {
        succ,
        pos,
        neg,
        accepting,
        vinit,
    }
}

/// Deterministic specification automaton over region-label sets
///
/// `step`/`is_accepting` work on the determinized subset states; the
/// underlying Büchi structure is kept so that `accepts_forever` and
/// `accepts_cycle` can certify infinite acceptance exactly instead of
/// trusting the subset approximation.
#[derive(Debug, Clone)]
pub struct SpecAutomaton {
    symbols: SymbolTable,
    ap_count: usize,
    accepting: Vec<bool>,
    live: Vec<bool>,
    table: Vec<Vec<Option<StateId>>>,
    /// Büchi states making up each subset state
    members: Vec<Vec<usize>>,
    nba_succ: Vec<Vec<usize>>,
    nba_pos: Vec<u16>,
    nba_neg: Vec<u16>,
    nba_accepting: Vec<bool>,
    initial: StateId,
}

impl SpecAutomaton {
    /// Build the automaton from an LTL formula string
    pub fn from_formula(input: &str) -> PlannerResult<Self> {
        let (formula, symbols) = parse(input)?;
        if symbols.len() > MAX_PROPS {
            return Err(PlannerError::Formula {
                message: format!(
                    "formula uses {} propositions, at most {} are supported",
                    symbols.len(),
                    MAX_PROPS
                ),
                position: None,
            });
        }
        let nba = build_nba(&formula);
        let ap_count = symbols.len();
        let alphabet = 1usize << ap_count;

        let mut initial_set = BTreeSet::new();
        initial_set.insert(nba.vinit);
        let mut index: BTreeMap<BTreeSet<usize>, usize> = BTreeMap::new();
        index.insert(initial_set.clone(), 0);
        let mut subsets = vec![initial_set];
        let mut table: Vec<Vec<Option<StateId>>> = Vec::new();

        let mut cursor = 0;
        while cursor < subsets.len() {
            let current = subsets[cursor].clone();
            let mut row = Vec::with_capacity(alphabet);
            for mask in 0..alphabet {
                let mask = mask as u16;
                let mut targets = BTreeSet::new();
                for &q in &current {
                    for &next in &nba.succ[q] {
                        if nba.pos[next] & mask == nba.pos[next] && nba.neg[next] & mask == 0 {
                            targets.insert(next);
                        }
                    }
                }
                if targets.is_empty() {
                    row.push(None);
                } else if let Some(&id) = index.get(&targets) {
                    row.push(Some(StateId(id)));
                } else {
                    let id = subsets.len();
                    if id >= MAX_STATES {
                        return Err(PlannerError::Formula {
                            message: format!(
                                "automaton exceeds {} states; simplify the formula",
                                MAX_STATES
                            ),
                            position: None,
                        });
                    }
                    index.insert(targets.clone(), id);
                    subsets.push(targets);
                    row.push(Some(StateId(id)));
                }
            }
            table.push(row);
            cursor += 1;
        }

        let accepting: Vec<bool> = subsets
            .iter()
            .map(|set| set.iter().any(|&q| nba.accepting[q]))
            .collect();
        let live: Vec<bool> = table
            .iter()
            .map(|row| row.iter().any(|target| target.is_some()))
            .collect();
        if !accepting.iter().any(|&a| a) {
            return Err(PlannerError::Formula {
                message: "formula is unsatisfiable: no accepting state is reachable".to_string(),
                position: None,
            });
        }
        let members: Vec<Vec<usize>> = subsets
            .iter()
            .map(|set| set.iter().copied().collect())
            .collect();
        Ok(Self {
            symbols,
            ap_count,
            accepting,
            live,
            table,
            members,
            nba_succ: nba.succ,
            nba_pos: nba.pos,
            nba_neg: nba.neg,
            nba_accepting: nba.accepting,
            initial: StateId(0),
        })
    }

    fn guard_holds(&self, q: usize, mask: u16) -> bool {
        self.nba_pos[q] & mask == self.nba_pos[q] && self.nba_neg[q] & mask == 0
    }

    /// Nodes reachable in one or more steps from `starts` in the Büchi
    /// graph restricted to transitions reading `mask`
    fn reachable_under(&self, starts: &[usize], mask: u16) -> Vec<bool> {
        let mut seen = vec![false; self.nba_succ.len()];
        let mut stack: Vec<usize> = starts.to_vec();
        while let Some(q) = stack.pop() {
            for &next in &self.nba_succ[q] {
                if self.guard_holds(next, mask) && !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Exact check that parking under constant labels satisfies the
    /// specification: some run from `state` reading `labels` forever
    /// visits an accepting Büchi state infinitely often
    pub fn accepts_forever(&self, state: StateId, labels: LabelSet) -> bool {
        let mask = labels.low_bits(self.ap_count);
        let members = match self.members.get(state.0) {
            Some(m) => m,
            None => return false,
        };
        let reachable = self.reachable_under(members, mask);
        (0..self.nba_succ.len())
            .filter(|&q| reachable[q] && self.nba_accepting[q])
            .any(|q| self.reachable_under(&[q], mask)[q])
    }

    /// Exact check that looping over the label sequence `cycle` from
    /// `state` satisfies the specification. `cycle` lists the labels
    /// read along one pass of the loop, ending back at `state`'s
    /// configuration.
    pub fn accepts_cycle(&self, state: StateId, cycle: &[LabelSet]) -> bool {
        if cycle.is_empty() {
            return false;
        }
        let members = match self.members.get(state.0) {
            Some(m) => m,
            None => return false,
        };
        let period = cycle.len();
        let masks: Vec<u16> = cycle.iter().map(|l| l.low_bits(self.ap_count)).collect();
        let total = self.nba_succ.len() * period;

        // reachability over the unrolled product of Büchi states and
        // cycle positions; position i is about to read cycle[i]
        let explore = |starts: &[usize]| -> Vec<bool> {
            let mut seen = vec![false; total];
            let mut stack: Vec<usize> = starts.to_vec();
            while let Some(node) = stack.pop() {
                let (q, pos) = (node / period, node % period);
                for &next_q in &self.nba_succ[q] {
                    if !self.guard_holds(next_q, masks[pos]) {
                        continue;
                    }
                    let next = next_q * period + (pos + 1) % period;
                    if !seen[next] {
                        seen[next] = true;
                        stack.push(next);
                    }
                }
            }
            seen
        };

        let starts: Vec<usize> = members.iter().map(|&q| q * period).collect();
        let reachable = explore(&starts);
        (0..total)
            .filter(|&node| reachable[node] && self.nba_accepting[node / period])
            .any(|node| explore(&[node])[node])
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn ap_count(&self) -> usize {
        self.ap_count
    }

    /// Number of states of the determinized automaton
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Whether the state has at least one outgoing transition; dead
    /// states cannot make further progress and are skipped by the
    /// nearest-neighbor query.
    pub fn is_live(&self, state: StateId) -> bool {
        self.live.get(state.0).copied().unwrap_or(false)
    }
}

impl Automaton for SpecAutomaton {
    fn initial(&self) -> StateId {
        self.initial
    }

    fn step(&self, state: StateId, labels: LabelSet) -> Option<StateId> {
        let mask = labels.low_bits(self.ap_count) as usize;
        self.table.get(state.0).and_then(|row| row[mask])
    }

    fn is_accepting(&self, state: StateId) -> bool {
        self.accepting.get(state.0).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(automaton: &SpecAutomaton, names: &[&str]) -> LabelSet {
        names
            .iter()
            .map(|n| automaton.symbols().lookup(n).unwrap())
            .collect()
    }

    #[test]
    fn test_eventually_accepts_after_visit() {
        let automaton = SpecAutomaton::from_formula("<> a").unwrap();
        let a = labels(&automaton, &["a"]);
        let none = LabelSet::empty();

        let s0 = automaton.step(automaton.initial(), none).unwrap();
        assert!(!automaton.is_accepting(s0));
        let s1 = automaton.step(s0, a).unwrap();
        assert!(automaton.is_accepting(s1));
        // satisfaction is permanent
        let s2 = automaton.step(s1, none).unwrap();
        assert!(automaton.is_accepting(s2));
        assert_eq!(automaton.step(s2, none), Some(s2));
    }

    #[test]
    fn test_safety_rejects_forbidden_label() {
        let automaton = SpecAutomaton::from_formula("[] !c").unwrap();
        let c = labels(&automaton, &["c"]);
        let none = LabelSet::empty();

        let s0 = automaton.step(automaton.initial(), none).unwrap();
        assert!(automaton.is_accepting(s0));
        assert_eq!(automaton.step(s0, none), Some(s0));
        assert_eq!(automaton.step(s0, c), None);
        assert_eq!(automaton.step(automaton.initial(), c), None);
    }

    #[test]
    fn test_sequencing_requires_order() {
        let automaton = SpecAutomaton::from_formula("<> ( a && <> b )").unwrap();
        let a = labels(&automaton, &["a"]);
        let b = labels(&automaton, &["b"]);
        let none = LabelSet::empty();

        // b before a does not discharge the specification
        let mut state = automaton.step(automaton.initial(), b).unwrap();
        assert!(!automaton.accepts_forever(state, b));
        state = automaton.step(state, a).unwrap();
        // a alone leaves the b obligation pending
        assert!(!automaton.accepts_forever(state, a));
        state = automaton.step(state, none).unwrap();
        state = automaton.step(state, b).unwrap();
        assert!(automaton.accepts_forever(state, b));
    }

    #[test]
    fn test_surveillance_cycles_through_acceptance() {
        let automaton = SpecAutomaton::from_formula("[] <> a").unwrap();
        let a = labels(&automaton, &["a"]);
        let none = LabelSet::empty();

        let visit = automaton.step(automaton.initial(), a).unwrap();
        assert!(automaton.is_accepting(visit));
        let away = automaton.step(visit, none).unwrap();
        assert!(!automaton.is_accepting(away));
        // returning to the region closes the surveillance cycle
        assert_eq!(automaton.step(away, a), Some(visit));
    }

    #[test]
    fn test_until_semantics() {
        let automaton = SpecAutomaton::from_formula("a U b").unwrap();
        let a = labels(&automaton, &["a"]);
        let b = labels(&automaton, &["b"]);
        let none = LabelSet::empty();

        let hold = automaton.step(automaton.initial(), a).unwrap();
        assert!(!automaton.is_accepting(hold));
        // dropping a before b violates the formula
        assert_eq!(automaton.step(hold, none), None);
        let done = automaton.step(hold, b).unwrap();
        assert!(automaton.is_accepting(done));
    }

    #[test]
    fn test_accepts_forever_requires_discharged_obligations() {
        let automaton =
            SpecAutomaton::from_formula("( <> ( a && <> b ) ) && ( [] !c )").unwrap();
        let a = labels(&automaton, &["a"]);
        let b = labels(&automaton, &["b"]);
        let none = LabelSet::empty();

        let at_a = automaton.step(automaton.initial(), a).unwrap();
        // parking inside region a never visits b
        assert!(!automaton.accepts_forever(at_a, a));
        let done = automaton.step(at_a, b).unwrap();
        assert!(automaton.accepts_forever(done, b));
        let after = automaton.step(done, none).unwrap();
        assert!(automaton.accepts_forever(after, none));
    }

    #[test]
    fn test_accepts_cycle_for_surveillance() {
        let automaton = SpecAutomaton::from_formula("[] <> a").unwrap();
        let a = labels(&automaton, &["a"]);
        let none = LabelSet::empty();

        let visit = automaton.step(automaton.initial(), a).unwrap();
        // loop leaving the region and coming back
        assert!(automaton.accepts_cycle(visit, &[none, a]));
        // a loop that never returns to the region fails
        assert!(!automaton.accepts_cycle(visit, &[none, none]));
        // staying put also satisfies the surveillance formula
        assert!(automaton.accepts_forever(visit, a));
        let away = automaton.step(visit, none).unwrap();
        assert!(!automaton.accepts_forever(away, none));
    }

    #[test]
    fn test_unsatisfiable_formula_rejected() {
        assert!(SpecAutomaton::from_formula("false").is_err());
        assert!(SpecAutomaton::from_formula("a && !a").is_err());
    }

    #[test]
    fn test_build_is_deterministic() {
        let spec = "[] ( (<> r1) && (<> r2) && !(o1 || o2) )";
        let first = SpecAutomaton::from_formula(spec).unwrap();
        let second = SpecAutomaton::from_formula(spec).unwrap();
        assert_eq!(first.table, second.table);
        assert_eq!(first.accepting, second.accepting);
    }

    #[test]
    fn test_mission_formula_steps() {
        let automaton =
            SpecAutomaton::from_formula("( <> ( a && <> b ) ) && ( [] !c )").unwrap();
        let a = labels(&automaton, &["a"]);
        let b = labels(&automaton, &["b"]);
        let c = labels(&automaton, &["c"]);
        let none = LabelSet::empty();

        let mut state = automaton.step(automaton.initial(), none).unwrap();
        assert_eq!(automaton.step(state, c), None);
        state = automaton.step(state, a).unwrap();
        assert!(!automaton.accepts_forever(state, a));
        state = automaton.step(state, none).unwrap();
        state = automaton.step(state, b).unwrap();
        assert!(automaton.accepts_forever(state, b));
        assert_eq!(automaton.step(state, c), None);
    }
}
