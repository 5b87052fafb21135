// Admission/preemption policy engine (spec.md §4 component 6, "Policy Engine").
//
// Grounded directly on the original prototype's `SchedulerPolicy`: a bounded per-GPU utilization
// history, spike detection between the last two samples, a cooldown window triggered by a spike,
// an adaptive moving-average check, and a static-threshold fallback. Defaults match spec.md §4.6.

use crate::types::{GpuIndex, Timestamp};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    pub static_util_threshold: f64,
    pub static_mem_threshold: f64,
    pub history_window: usize,
    pub spike_delta: f64,
    pub cooldown_seconds: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            static_util_threshold: 60.0,
            static_mem_threshold: 80.0,
            history_window: 5,
            spike_delta: 25.0,
            cooldown_seconds: 5,
        }
    }
}

struct State {
    util_history: HashMap<GpuIndex, VecDeque<f64>>,
    cooldown_until: HashMap<GpuIndex, Timestamp>,
}

pub struct PolicyEngine {
    config: PolicyConfig,
    state: Mutex<State>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> PolicyEngine {
        PolicyEngine {
            config,
            state: Mutex::new(State {
                util_history: HashMap::new(),
                cooldown_until: HashMap::new(),
            }),
        }
    }

    fn update_metrics(state: &mut State, window: usize, gpu: GpuIndex, util_percent: f64) {
        let hist = state.util_history.entry(gpu).or_default();
        hist.push_back(util_percent);
        while hist.len() > window {
            hist.pop_front();
        }
    }

    fn moving_average(hist: &VecDeque<f64>) -> Option<f64> {
        if hist.is_empty() {
            None
        } else {
            Some(hist.iter().sum::<f64>() / hist.len() as f64)
        }
    }

    fn detect_spike(hist: &VecDeque<f64>, spike_delta: f64) -> bool {
        if hist.len() < 2 {
            return false;
        }
        let last = hist[hist.len() - 1];
        let prev = hist[hist.len() - 2];
        (last - prev).abs() > spike_delta
    }

    // Hybrid decision, in order: cooling down -> reject; fresh spike -> trigger cooldown and
    // reject; adaptive moving-average check; static-threshold fallback.
    pub fn can_schedule_on_gpu(
        &self,
        gpu: GpuIndex,
        current_util: f64,
        current_mem_util: Option<f64>,
        now: Timestamp,
    ) -> bool {
        let mut state = self.state.lock();
        Self::update_metrics(&mut state, self.config.history_window, gpu, current_util);

        if let Some(until) = state.cooldown_until.get(&gpu) {
            if now < *until {
                return false;
            }
        }

        let hist = state.util_history.get(&gpu).cloned().unwrap_or_default();
        if Self::detect_spike(&hist, self.config.spike_delta) {
            state.cooldown_until.insert(gpu, now + self.config.cooldown_seconds);
            return false;
        }

        let passes_mem = |mem: Option<f64>| match mem {
            None => true,
            Some(m) => m < self.config.static_mem_threshold,
        };

        if let Some(avg) = Self::moving_average(&hist) {
            if avg < self.config.static_util_threshold && passes_mem(current_mem_util) {
                return true;
            }
        }

        current_util < self.config.static_util_threshold && passes_mem(current_mem_util)
    }

    // Preempt only for a strictly higher-priority (lower `incoming_priority` value) challenger,
    // and never when the device is already heavily utilized (>90%), matching spec.md §4.6's
    // `shouldPreempt` defaults.
    pub fn should_preempt(&self, current_util: f64, victim_priority: i64, challenger_priority: i64) -> bool {
        if challenger_priority >= victim_priority {
            return false;
        }
        if current_util > 90.0 {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_util_permits_scheduling() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(p.can_schedule_on_gpu(0, 10.0, Some(10.0), 0));
    }

    #[test]
    fn static_threshold_blocks_high_util() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(!p.can_schedule_on_gpu(0, 95.0, Some(10.0), 0));
    }

    #[test]
    fn mem_threshold_blocks_even_with_low_util() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(!p.can_schedule_on_gpu(0, 10.0, Some(95.0), 0));
    }

    #[test]
    fn spike_triggers_cooldown_window() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(p.can_schedule_on_gpu(0, 10.0, None, 0));
        // jump from 10 to 50 is a 40-point delta, over the default spike threshold of 25.
        assert!(!p.can_schedule_on_gpu(0, 50.0, None, 1));
        // still inside the 5s cooldown window
        assert!(!p.can_schedule_on_gpu(0, 12.0, None, 3));
        // cooldown has elapsed
        assert!(p.can_schedule_on_gpu(0, 12.0, None, 10));
    }

    #[test]
    fn preemption_requires_strictly_higher_priority_challenger() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(p.should_preempt(10.0, 10, 1));
        assert!(!p.should_preempt(10.0, 10, 10));
        assert!(!p.should_preempt(10.0, 10, 20));
    }

    #[test]
    fn preemption_refused_under_heavy_load() {
        let p = PolicyEngine::new(PolicyConfig::default());
        assert!(!p.should_preempt(95.0, 10, 1));
    }
}
