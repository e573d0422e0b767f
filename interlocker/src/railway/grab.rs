use crate::input::interlocking_table::TrainId;
use log::info;
use std::sync::{Mutex, MutexGuard};

pub type GrabId = usize;

#[derive(Debug, Fail, Clone, PartialEq)]
pub enum GrabError {
    #[fail(display = "train {} is already grabbed", _0)]
    AlreadyGrabbed(TrainId),
    #[fail(display = "all {} grab slots are in use", _0)]
    Full(usize),
    #[fail(display = "empty train id")]
    EmptyTrain,
}

struct Slots {
    trains: Vec<Option<TrainId>>,
    next: GrabId,
}

/// Trains under the control of a client. Slots are handed out round-robin
/// so a released grab id is not immediately reused.
pub struct GrabTable {
    slots: Mutex<Slots>,
}

impl GrabTable {
    pub fn new(capacity: usize) -> GrabTable {
        GrabTable { slots: Mutex::new(Slots { trains: vec![None; capacity], next: 0 }) }
    }

    fn lock(&self) -> MutexGuard<Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().trains.len()
    }

    pub fn grab_train(&self, train: &str) -> Result<GrabId, GrabError> {
        if train.is_empty() {
            return Err(GrabError::EmptyTrain);
        }
        let mut slots = self.lock();
        if slots.trains.iter().any(|t| t.as_ref().map(|t| t == train).unwrap_or(false)) {
            return Err(GrabError::AlreadyGrabbed(train.to_string()));
        }
        let n = slots.trains.len();
        let start = slots.next;
        let id = (0..n).map(|k| (start + k) % n)
            .find(|i| slots.trains[*i].is_none())
            .ok_or(GrabError::Full(n))?;
        slots.trains[id] = Some(train.to_string());
        slots.next = (id + 1) % n;
        info!("Train {} grabbed with id {}", train, id);
        Ok(id)
    }

    /// Returns the train that held the slot, if any.
    pub fn release_train(&self, id: GrabId) -> Option<TrainId> {
        let train = self.lock().trains.get_mut(id).and_then(|t| t.take());
        if let Some(ref t) = train {
            info!("Train {} released (grab id {})", t, id);
        }
        train
    }

    pub fn grab_id_of(&self, train: &str) -> Option<GrabId> {
        self.lock().trains.iter().position(|t| t.as_ref().map(|t| t == train).unwrap_or(false))
    }

    pub fn train_of(&self, id: GrabId) -> Option<TrainId> {
        self.lock().trains.get(id).cloned().and_then(|t| t)
    }

    pub fn is_grabbed(&self, train: &str) -> bool {
        self.grab_id_of(train).is_some()
    }

    pub fn grabbed(&self) -> Vec<(GrabId, TrainId)> {
        self.lock()
            .trains
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.clone().map(|t| (i, t)))
            .collect()
    }
}
