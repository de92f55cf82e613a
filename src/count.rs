use anyhow::{anyhow, Result};
use rustfst::fst_impls::VectorFst;
use rustfst::prelude::*;
use rustfst::semirings::Semiring;
use rustfst::utils::acceptor;
use std::collections::HashMap;
use std::sync::Arc;

use crate::StdVectorFst;

/// Type for counts (negative log of a possibly fractional count)
pub type Count = LogWeight;
/// ID for an arc being counted
type TrId = StateId;
/// There is no arc here
pub static NO_TR_ID: TrId = NO_STATE_ID;
/// Keep track of transitions out of a given state
type PairTrMap = HashMap<(Label, StateId), TrId>;

/// Convert a count in the log semiring back to a plain value.
pub fn count_value(count: &Count) -> f64 {
    (-(*count.value() as f64)).exp()
}

/// Convert a plain (positive) weight to a count in the log semiring.
pub fn count_from_weight(weight: f64) -> Count {
    if weight <= 0.0 {
        Count::zero()
    } else {
        Count::new(-weight.ln() as f32)
    }
}

/// Metadata for states
#[derive(Debug, Clone)]
struct CountState {
    /// ID of the backoff state for the current state.
    backoff_state: StateId,
    /// N-gram order of the state (of the outgoing arcs).
    order: u8,
    /// Count for n-gram corresponding to superfinal arc.
    final_count: Count,
    /// Total count of everything leaving this state, superfinal included.
    total_count: Count,
    /// Number of distinct continuations seen from this state.
    n_types: u32,
    /// ID of the first outgoing arc at that state.
    first_tr: TrId,
}

impl CountState {
    fn new(backoff_state: StateId, order: u8) -> Self {
        CountState {
            backoff_state,
            order,
            final_count: Count::zero(),
            total_count: Count::zero(),
            n_types: 0,
            first_tr: NO_TR_ID,
        }
    }
}

/// Metadata for transitions
#[derive(Debug, Clone)]
struct CountTr {
    /// ID of the origin state for this arc.
    origin: StateId,
    /// ID of the destination state for this arc.
    destination: StateId,
    /// Label.
    label: Label,
    /// Count of the n-gram corresponding to this arc.
    count: Count,
    /// ID of backoff arc.
    backoff_tr: TrId,
}

/// Count weighted N-Grams over a graph of history states.
///
/// Every state stands for an n-gram history. Counting a sentence walks
/// the graph from the initial (begin-of-sentence) state, adding the
/// sentence weight to each arc and to all its backoff arcs, so that
/// lower-order counts always hold the totals of the higher orders.
#[derive(Debug, Clone)]
pub struct NGramCounter {
    /// Maximum order of N-Grams to count
    pub order: u8,
    /// CountStates for each state
    states: Vec<CountState>,
    /// CountTrs for each transition
    trs: Vec<CountTr>,
    /// ID of start state
    initial: StateId,
    /// ID of unigram/backoff state
    backoff: StateId,
    /// Map (label, state_id) pairs to arc IDs.
    pair_tr_maps: Vec<PairTrMap>,
}

impl NGramCounter {
    pub fn new(order: u8) -> Self {
        let order = order.max(1);
        let mut states = Vec::<_>::new();
        let backoff = states.len() as StateId;
        states.push(CountState::new(NO_STATE_ID, 1));
        let initial = if order == 1 {
            backoff
        } else {
            let unigram = states.len() as StateId;
            states.push(CountState::new(backoff, 2));
            unigram
        };
        let pair_tr_maps = vec![PairTrMap::new(); order as usize];
        Self {
            order,
            states,
            trs: Vec::new(),
            initial,
            backoff,
            pair_tr_maps,
        }
    }

    /// Forget every count, keeping the order.
    pub fn clear(&mut self) {
        *self = NGramCounter::new(self.order);
    }

    /// State standing for the begin-of-sentence history.
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// State standing for the empty history.
    pub fn backoff(&self) -> StateId {
        self.backoff
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Backoff state of `state`, or `None` at the empty history.
    pub fn backoff_of(&self, state: StateId) -> Option<StateId> {
        let bo = self.states[state as usize].backoff_state;
        if bo == NO_STATE_ID {
            None
        } else {
            Some(bo)
        }
    }

    /// Total count leaving `state` (end of sentence included).
    pub fn state_total(&self, state: StateId) -> f64 {
        count_value(&self.states[state as usize].total_count)
    }

    /// Number of distinct continuations seen from `state`.
    pub fn state_types(&self, state: StateId) -> u32 {
        self.states[state as usize].n_types
    }

    /// Count of `label` following the history of `state`.
    pub fn arc_count(&self, state: StateId, label: Label) -> f64 {
        match self.lookup_tr(state, label) {
            Some(tr_id) => count_value(&self.trs[tr_id as usize].count),
            None => 0.0,
        }
    }

    /// Count of the end of sentence following the history of `state`.
    pub fn final_count(&self, state: StateId) -> f64 {
        count_value(&self.states[state as usize].final_count)
    }

    /// History reached after reading `label` from `state`, backing off
    /// to shorter histories when the n-gram was never counted.
    pub fn next_state(&self, mut state: StateId, label: Label) -> StateId {
        loop {
            if let Some(tr_id) = self.lookup_tr(state, label) {
                return self.trs[tr_id as usize].destination;
            }
            match self.backoff_of(state) {
                Some(bo) => state = bo,
                None => return self.backoff,
            }
        }
    }

    /// Sum the counts of non-backoff (i.e. non-epsilon) arcs onto the backoff arc
    fn state_counts(&self, fst: &mut StdVectorFst) -> Result<()> {
        for (s, state) in self.states.iter().enumerate() {
            let s = s as StateId;
            if state.backoff_state == NO_STATE_ID {
                continue;
            }
            let mut trs = fst.tr_iter_mut(s)?;
            let bo_pos = (0..trs.len()).find(|&idx| trs[idx].ilabel == EPS_LABEL);
            match bo_pos {
                None => return Err(anyhow!("backoff arc not found at state {}", s)),
                Some(idx) => trs.set_weight(idx, TropicalWeight::from(*state.total_count.value()))?,
            }
        }
        Ok(())
    }

    fn lookup_tr(&self, state_id: StateId, label: Label) -> Option<TrId> {
        let count_state = &self.states[state_id as usize];
        if count_state.first_tr == NO_TR_ID {
            return None;
        }
        if self.trs[count_state.first_tr as usize].label == label {
            return Some(count_state.first_tr);
        }
        let tr_map = &self.pair_tr_maps[count_state.order as usize - 1];
        tr_map.get(&(label, state_id)).copied()
    }

    fn add_tr(&mut self, state_id: StateId, label: Label) -> TrId {
        let tr_id = self.trs.len() as TrId;
        let CountState {
            first_tr,
            backoff_state,
            order,
            ..
        } = self.states[state_id as usize];
        if first_tr == NO_TR_ID {
            self.states[state_id as usize].first_tr = tr_id;
        } else {
            let backoff_order = order as usize - 1;
            self.pair_tr_maps[backoff_order].insert((label, state_id), tr_id);
        }
        self.states[state_id as usize].n_types += 1;
        self.trs.push(CountTr {
            origin: state_id,
            destination: self.initial,
            label,
            count: Count::zero(),
            backoff_tr: NO_TR_ID,
        });
        if self.order == 1 {
            return tr_id;
        }
        let backoff_tr = if backoff_state == NO_STATE_ID {
            NO_TR_ID
        } else {
            self.find_tr(backoff_state, label)
        };
        // Highest order arcs lead to the history of their backoff arc
        let destination = if order == self.order {
            self.trs[backoff_tr as usize].destination
        } else {
            let nextstate = self.states.len() as StateId;
            let next_backoff = if backoff_tr == NO_TR_ID {
                self.backoff
            } else {
                self.trs[backoff_tr as usize].destination
            };
            self.states.push(CountState::new(next_backoff, order + 1));
            nextstate
        };
        self.trs[tr_id as usize].destination = destination;
        self.trs[tr_id as usize].backoff_tr = backoff_tr;
        tr_id
    }

    fn find_tr(&mut self, state_id: StateId, label: Label) -> TrId {
        match self.lookup_tr(state_id, label) {
            Some(tr_id) => tr_id,
            None => self.add_tr(state_id, label),
        }
    }

    fn update_count(&mut self, state_id: StateId, label: Label, count: &Count) -> Result<StateId> {
        let mut tr_id = self.find_tr(state_id, label);
        let nextstate_id = self.trs[tr_id as usize].destination;
        while tr_id != NO_TR_ID {
            let origin = self.trs[tr_id as usize].origin as usize;
            self.trs[tr_id as usize].count.plus_assign(count)?;
            self.states[origin].total_count.plus_assign(count)?;
            tr_id = self.trs[tr_id as usize].backoff_tr;
        }
        Ok(nextstate_id)
    }

    fn update_final_count(&mut self, mut state_id: StateId, count: &Count) -> Result<()> {
        while state_id != NO_STATE_ID {
            let state = &mut self.states[state_id as usize];
            if state.final_count == Count::zero() {
                state.n_types += 1;
            }
            state.final_count.plus_assign(count)?;
            state.total_count.plus_assign(count)?;
            state_id = state.backoff_state;
        }
        Ok(())
    }

    /// Export the counts as an FST: one state per history, epsilon arcs
    /// to the backoff histories carrying the state totals.
    pub fn to_fst(&self, syms: Option<&SymbolTable>) -> Result<StdVectorFst> {
        let mut fst = StdVectorFst::new();
        for (s, state) in self.states.iter().enumerate() {
            let s = s as StateId;
            fst.add_state();
            if state.final_count != Count::zero() {
                fst.set_final(s, *state.final_count.value())?;
            }
            if state.backoff_state != NO_STATE_ID {
                fst.add_tr(
                    s,
                    Tr::new(
                        EPS_LABEL,
                        EPS_LABEL,
                        TropicalWeight::zero(),
                        state.backoff_state,
                    ),
                )?;
            }
        }
        for tr in self.trs.iter() {
            fst.add_tr(
                tr.origin,
                Tr::new(tr.label, tr.label, *tr.count.value(), tr.destination),
            )?;
        }
        fst.set_start(self.initial)?;
        self.state_counts(&mut fst)?;
        tr_sort(&mut fst, ILabelCompare {});
        if let Some(syms) = syms {
            let syms = Arc::new(syms.clone());
            fst.set_input_symbols(Arc::clone(&syms));
            fst.set_output_symbols(Arc::clone(&syms));
        }
        Ok(fst)
    }

    /// Count a linear (string) FST with the given weight.
    pub fn count_from_string_fst<W: Semiring>(&mut self, fst: &VectorFst<W>, weight: f64) -> Result<()> {
        let mut count_state = self.initial;
        let mut fst_state = fst
            .start()
            .ok_or_else(|| anyhow!("FST has no start state"))?;
        let weight = count_from_weight(weight);
        while !fst.is_final(fst_state)? {
            let trs = fst.get_trs(fst_state)?;
            let trs = trs.trs();
            if trs.len() != 1 {
                return Err(anyhow!("{} arcs leaving state {} of a string FST", trs.len(), fst_state));
            }
            if trs[0].ilabel != NO_LABEL {
                count_state = self.update_count(count_state, trs[0].ilabel, &weight)?;
            }
            fst_state = trs[0].nextstate;
        }
        self.update_final_count(count_state, &weight)?;
        Ok(())
    }

    /// Count one sentence of labels with the given weight.
    pub fn count_sentence(&mut self, labels: &[Label], weight: f64) -> Result<()> {
        if weight <= 0.0 {
            return Ok(());
        }
        let fst: StdVectorFst = acceptor(labels, TropicalWeight::one());
        self.count_from_string_fst(&fst, weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn it_counts_ngrams() {
        let mut ngram = NGramCounter::new(3);
        ngram.count_sentence(&[3, 4, 5], 1.0).unwrap();
        ngram.count_sentence(&[3, 4], 1.0).unwrap();
        let bo = ngram.backoff();
        assert!(approx(ngram.arc_count(bo, 3), 2.0));
        assert!(approx(ngram.arc_count(bo, 4), 2.0));
        assert!(approx(ngram.arc_count(bo, 5), 1.0));
        // three word types plus the end of sentence
        assert_eq!(ngram.state_types(bo), 4);
        assert!(approx(ngram.state_total(bo), 7.0));
        let after_3 = ngram.next_state(ngram.initial(), 3);
        assert!(approx(ngram.arc_count(after_3, 4), 2.0));
    }

    #[test]
    fn it_weights_counts() {
        let mut ngram = NGramCounter::new(2);
        ngram.count_sentence(&[3], 0.25).unwrap();
        ngram.count_sentence(&[3], 0.5).unwrap();
        assert!(approx(ngram.arc_count(ngram.initial(), 3), 0.75));
        assert!(approx(ngram.final_count(ngram.backoff()), 0.75));
    }

    #[test]
    fn it_backs_off_unknown_histories() {
        let mut ngram = NGramCounter::new(3);
        ngram.count_sentence(&[3, 4], 1.0).unwrap();
        let state = ngram.next_state(ngram.initial(), 9);
        assert_eq!(state, ngram.backoff());
        ngram.clear();
        assert_eq!(ngram.num_states(), 2);
        assert_eq!(ngram.arc_count(ngram.backoff(), 3), 0.0);
    }

    #[test]
    fn it_makes_an_fst() {
        let mut syms = SymbolTable::new();
        let a = syms.add_symbol("a");
        let b = syms.add_symbol("b");
        let mut ngram = NGramCounter::new(2);
        ngram.count_sentence(&[a, b], 1.0).unwrap();
        let fst = ngram.to_fst(Some(&syms)).unwrap();
        assert_eq!(fst.start(), Some(ngram.initial()));
        assert_eq!(fst.num_states(), ngram.num_states());
        assert!(fst.input_symbols().is_some());
    }
}
