use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{CursorDwellUpdate, CursorTargetDefinition};

#[derive(Debug)]
struct TargetState {
    def: CursorTargetDefinition,
    inside: bool,
    entered_at: Option<Instant>,
    pending: Duration,
    pending_entries: u32,
}

impl TargetState {
    fn fresh(def: CursorTargetDefinition) -> Self {
        Self {
            def,
            inside: false,
            entered_at: None,
            pending: Duration::ZERO,
            pending_entries: 0,
        }
    }

    fn mark_entered(&mut self, at: Instant) {
        self.inside = true;
        self.entered_at = Some(at);
        self.pending_entries += 1;
    }

    fn mark_left(&mut self, at: Instant) {
        if let Some(entered_at) = self.entered_at.take() {
            self.pending += at.saturating_duration_since(entered_at);
        }
        self.inside = false;
    }

    fn to_update(&self, duration_ms: u64) -> CursorDwellUpdate {
        CursorDwellUpdate {
            target_key: self.def.id.clone(),
            duration_ms,
            entry_count: self.pending_entries,
            label: self.def.label.clone(),
            center_x: self.def.x.round() as i64,
            center_y: self.def.y.round() as i64,
            radius: self.def.radius.round() as i64,
            metadata: self.def.metadata.clone(),
        }
    }
}

fn rounded_ms(duration: Duration) -> u64 {
    (duration.as_secs_f64() * 1_000.0).round() as u64
}

fn contains(def: &CursorTargetDefinition, x: f64, y: f64) -> bool {
    let dx = x - def.x;
    let dy = y - def.y;
    // Boundary-inclusive squared-distance containment.
    dx * dx + dy * dy <= def.radius * def.radius
}

/// Tracks pointer dwell over a reconciled union of circular targets.
///
/// Target definitions arrive from independent sources (two-level map,
/// source id -> target id -> definition). Flattening preserves source
/// registration order, so a later source wins an id collision. Dwell that
/// is finalized outside a flush (target removed or redefined, transmission
/// re-queue) accumulates in a pending buffer drained by the next flush.
pub struct CursorDwellTracker {
    sources: Vec<(String, Vec<CursorTargetDefinition>)>,
    states: HashMap<String, TargetState>,
    pending_updates: Vec<CursorDwellUpdate>,
    last_pointer: Option<(f64, f64)>,
    min_batch: Duration,
}

impl CursorDwellTracker {
    pub fn new(min_batch: Duration) -> Self {
        Self {
            sources: Vec::new(),
            states: HashMap::new(),
            pending_updates: Vec::new(),
            last_pointer: None,
            min_batch,
        }
    }

    /// Replace one source's contribution. An empty target list clears the
    /// source's prior regions rather than leaving them active.
    pub fn set_source(&mut self, source_id: &str, targets: Vec<CursorTargetDefinition>) {
        self.set_source_at(source_id, targets, Instant::now());
    }

    pub fn set_source_at(
        &mut self,
        source_id: &str,
        targets: Vec<CursorTargetDefinition>,
        now: Instant,
    ) {
        match self
            .sources
            .iter_mut()
            .find(|(id, _)| id == source_id)
        {
            Some((_, existing)) => *existing = targets,
            None => self.sources.push((source_id.to_string(), targets)),
        }
        self.reconcile(now);
    }

    pub fn clear_source(&mut self, source_id: &str) {
        self.clear_source_at(source_id, Instant::now());
    }

    pub fn clear_source_at(&mut self, source_id: &str, now: Instant) {
        self.sources.retain(|(id, _)| id != source_id);
        self.reconcile(now);
    }

    fn flattened(&self) -> HashMap<String, CursorTargetDefinition> {
        let mut flat = HashMap::new();
        for (_, targets) in &self.sources {
            for def in targets {
                flat.insert(def.id.clone(), def.clone());
            }
        }
        flat
    }

    /// Recompute the effective target set. A target whose id disappeared or
    /// whose geometry/label changed has its unflushed state finalized first;
    /// in-flight dwell never silently merges across a redefinition.
    fn reconcile(&mut self, now: Instant) {
        let mut next_defs = self.flattened();
        let prev_states = std::mem::take(&mut self.states);
        let mut next_states = HashMap::with_capacity(next_defs.len());

        for (id, mut state) in prev_states {
            match next_defs.remove(&id) {
                Some(next_def) => {
                    if !state.def.shape_matches(&next_def) {
                        self.finalize_state(&mut state, now);
                    }
                    state.def = next_def;
                    next_states.insert(id, state);
                }
                None => {
                    let mut removed = state;
                    self.finalize_state(&mut removed, now);
                }
            }
        }

        for (id, def) in next_defs {
            next_states.insert(id, TargetState::fresh(def));
        }

        self.states = next_states;

        if let Some((x, y)) = self.last_pointer {
            for state in self.states.values_mut() {
                let inside = contains(&state.def, x, y);
                if inside && !state.inside {
                    state.mark_entered(now);
                } else if !inside && state.inside {
                    state.mark_left(now);
                }
            }
        }
    }

    fn finalize_state(&mut self, state: &mut TargetState, now: Instant) {
        if state.inside {
            if let Some(entered_at) = state.entered_at {
                state.pending += now.saturating_duration_since(entered_at);
            }
        }
        let duration_ms = rounded_ms(state.pending);
        if duration_ms > 0 || state.pending_entries > 0 {
            self.pending_updates.push(state.to_update(duration_ms));
        }
        state.inside = false;
        state.entered_at = None;
        state.pending = Duration::ZERO;
        state.pending_entries = 0;
    }

    pub fn observe_pointer(&mut self, x: f64, y: f64) {
        self.observe_pointer_at(x, y, Instant::now());
    }

    pub fn observe_pointer_at(&mut self, x: f64, y: f64, now: Instant) {
        self.last_pointer = Some((x, y));
        for state in self.states.values_mut() {
            let inside = contains(&state.def, x, y);
            if inside && !state.inside {
                state.mark_entered(now);
            } else if !inside && state.inside {
                state.mark_left(now);
            }
        }
    }

    /// Pointer left the tracked surface entirely; close every open interval.
    pub fn pointer_left(&mut self) {
        self.pointer_left_at(Instant::now());
    }

    pub fn pointer_left_at(&mut self, now: Instant) {
        for state in self.states.values_mut() {
            if state.inside {
                state.mark_left(now);
            }
        }
    }

    /// Collect the updates due for transmission.
    ///
    /// A non-forced flush emits a target's update only once its accrued
    /// dwell reaches the batch threshold or it has unreported entries; a
    /// forced flush closes open intervals and emits any positive accrual so
    /// nothing is lost at session end.
    pub fn flush(&mut self, force: bool) -> Vec<CursorDwellUpdate> {
        self.flush_at(force, Instant::now())
    }

    pub fn flush_at(&mut self, force: bool, now: Instant) -> Vec<CursorDwellUpdate> {
        let mut updates = std::mem::take(&mut self.pending_updates);

        for state in self.states.values_mut() {
            if state.inside && state.entered_at.is_some() {
                let entered_at = state.entered_at.take().unwrap_or(now);
                state.pending += now.saturating_duration_since(entered_at);
                if force {
                    state.inside = false;
                } else {
                    state.entered_at = Some(now);
                }
            } else if force {
                state.entered_at = None;
                state.inside = false;
            }

            let should_flush =
                force || state.pending >= self.min_batch || state.pending_entries > 0;
            if should_flush {
                let duration_ms = rounded_ms(state.pending);
                if duration_ms > 0 || state.pending_entries > 0 {
                    updates.push(state.to_update(duration_ms));
                }
                state.pending = Duration::ZERO;
                state.pending_entries = 0;
            }
        }

        updates
    }

    /// Put updates back at the front of the pending buffer after a failed
    /// transmission, preserving chronological order for the next attempt.
    pub fn requeue(&mut self, updates: Vec<CursorDwellUpdate>) {
        self.pending_updates.splice(0..0, updates);
    }

    pub fn has_targets(&self) -> bool {
        !self.states.is_empty()
    }
}
