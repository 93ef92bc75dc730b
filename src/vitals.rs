//! Simulated Physiology
//!
//! Energy, fatigue, mood, and heart rate. Command execution and AI chat
//! consume energy; a fixed metabolism tick regenerates it and lets the heart
//! rate decay back to base. Mood is always derived, never set directly.

use std::sync::Mutex;

pub const BASE_HEART_RATE: f64 = 65.0;
pub const MAX_HEART_RATE: f64 = 180.0;
/// Energy regenerated per metabolism tick.
const METABOLISM_RATE: f64 = 0.05;
/// Heart-rate decay per metabolism tick (1 BPM per 2 s at a 5 s tick).
const HEART_RATE_DECAY: f64 = 2.5;
/// Seconds between metabolism ticks.
pub const METABOLISM_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Critical,
    Tired,
    Optimal,
    Energetic,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Critical => "critical",
            Mood::Tired => "tired",
            Mood::Optimal => "optimal",
            Mood::Energetic => "energetic",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VitalsSnapshot {
    pub energy: f64,
    pub fatigue: f64,
    pub heart_rate: f64,
    pub mood: Mood,
}

#[derive(Debug)]
struct Inner {
    energy: f64,
    fatigue: f64,
    heart_rate: f64,
}

#[derive(Debug)]
pub struct Vitals {
    inner: Mutex<Inner>,
}

impl Default for Vitals {
    fn default() -> Self {
        Self::new()
    }
}

impl Vitals {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                energy: 100.0,
                fatigue: 0.0,
                heart_rate: BASE_HEART_RATE,
            }),
        }
    }

    /// Spend energy on work; fatigue rises at half the spend rate.
    pub fn consume_energy(&self, amount: f64) {
        let mut v = self.inner.lock().unwrap();
        v.energy = (v.energy - amount).max(0.0);
        v.fatigue = (v.fatigue + amount / 2.0).min(100.0);
    }

    /// Spike the heart rate from an emotional impact score in [0,1].
    /// Full impact raises at most 20 BPM, capped at the physiological max.
    pub fn spike_heart_rate(&self, impact: f64) {
        let mut v = self.inner.lock().unwrap();
        v.heart_rate = (v.heart_rate + impact.clamp(0.0, 1.0) * 20.0).min(MAX_HEART_RATE);
    }

    /// One metabolism tick: regenerate energy, shed fatigue, decay the heart
    /// rate toward base.
    pub fn metabolism_step(&self) {
        let mut v = self.inner.lock().unwrap();
        v.energy = (v.energy + METABOLISM_RATE).min(100.0);
        v.fatigue = (v.fatigue - METABOLISM_RATE / 2.0).max(0.0);
        if v.heart_rate > BASE_HEART_RATE {
            v.heart_rate = (v.heart_rate - HEART_RATE_DECAY).max(BASE_HEART_RATE);
        }
    }

    pub fn snapshot(&self) -> VitalsSnapshot {
        let v = self.inner.lock().unwrap();
        let mood = derive_mood(v.energy, v.fatigue);
        VitalsSnapshot {
            energy: v.energy,
            fatigue: v.fatigue,
            heart_rate: v.heart_rate,
            mood,
        }
    }
}

fn derive_mood(energy: f64, fatigue: f64) -> Mood {
    if energy < 20.0 || fatigue > 80.0 {
        Mood::Critical
    } else if energy < 50.0 || fatigue > 50.0 {
        Mood::Tired
    } else if energy > 90.0 && fatigue < 10.0 {
        Mood::Energetic
    } else {
        Mood::Optimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn energy_stays_bounded() {
        let vitals = Vitals::new();
        for _ in 0..1000 {
            vitals.consume_energy(0.5);
        }
        let snap = vitals.snapshot();
        assert_eq!(snap.energy, 0.0);
        assert_eq!(snap.fatigue, 100.0);

        for _ in 0..10_000 {
            vitals.metabolism_step();
        }
        let snap = vitals.snapshot();
        assert!(snap.energy <= 100.0 && snap.energy > 0.0);
        assert!(snap.fatigue >= 0.0);
    }

    #[rstest]
    #[case(100.0, 0.0, Mood::Energetic)]
    #[case(90.0, 0.0, Mood::Optimal)]
    #[case(49.9, 0.0, Mood::Tired)]
    #[case(80.0, 50.1, Mood::Tired)]
    #[case(19.9, 0.0, Mood::Critical)]
    #[case(80.0, 80.1, Mood::Critical)]
    fn mood_boundaries(#[case] energy: f64, #[case] fatigue: f64, #[case] expected: Mood) {
        assert_eq!(derive_mood(energy, fatigue), expected);
    }

    #[test]
    fn heart_rate_spikes_cap_at_max() {
        let vitals = Vitals::new();
        for _ in 0..20 {
            vitals.spike_heart_rate(1.0);
        }
        assert_eq!(vitals.snapshot().heart_rate, MAX_HEART_RATE);
    }

    #[test]
    fn heart_rate_decays_back_to_base() {
        let vitals = Vitals::new();
        vitals.spike_heart_rate(0.5);
        assert!(vitals.snapshot().heart_rate > BASE_HEART_RATE);
        for _ in 0..10 {
            vitals.metabolism_step();
        }
        assert_eq!(vitals.snapshot().heart_rate, BASE_HEART_RATE);
    }
}
