use std::f64::consts::PI;

use super::types::{Jurisdiction, Record};

const MEDIAN_INCOME: f64 = 62_000.0;
const INCOME_SIGMA: f64 = 0.85;
const MAX_INCOME: f64 = 25_000_000.0;
const ZERO_INCOME_SHARE: f64 = 0.04;

const FIRST_NAMES: [&str; 12] = [
    "Avery", "Blake", "Casey", "Devon", "Emerson", "Finley", "Harper", "Jordan", "Kendall",
    "Morgan", "Quinn", "Rowan",
];
const LAST_NAMES: [&str; 10] = [
    "Alvarez", "Brooks", "Chen", "Dubois", "Eriksen", "Fontaine", "Greer", "Haddad", "Ito",
    "Kowalski",
];

/// Deterministic synthetic records: log-normal incomes rounded to cents, a
/// small share of zero earners, and a uniform draw over every jurisdiction.
pub fn generate(count: usize, seed: u64) -> Vec<Record> {
    let mut rng = Rng::new(splitmix64(seed));
    (0..count)
        .map(|idx| {
            let first = FIRST_NAMES[rng.next_index(FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.next_index(LAST_NAMES.len())];
            let jurisdiction = Jurisdiction::ALL[rng.next_index(Jurisdiction::ALL.len())];
            let income = if rng.next_f64() < ZERO_INCOME_SHARE {
                0.0
            } else {
                let raw = MEDIAN_INCOME * (INCOME_SIGMA * rng.standard_normal()).exp();
                (raw.min(MAX_INCOME) * 100.0).round() / 100.0
            };
            Record {
                id: idx as u64 + 1,
                name: format!("{first} {last}"),
                jurisdiction,
                income,
            }
        })
        .collect()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}
