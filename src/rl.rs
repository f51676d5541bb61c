use std::collections::HashMap;

use ordered_float::OrderedFloat;
use rand::prelude::*;

use crate::environment::{Movement, State};

const ZERO_ROW: [f64; 4] = [0.0; 4];

/// Tabular action values, one row of four per visited state.
///
/// Rows are created with all four values at `0.0` the first time a state is
/// read or updated, and are never removed.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    values: HashMap<State, [f64; 4]>,
    learning_rate: f64,
    discount: f64,
}

impl QTable {
    pub fn new(learning_rate: f64, discount: f64) -> Self {
        Self {
            values: HashMap::new(),
            learning_rate,
            discount,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    fn row_mut(&mut self, state: &State) -> &mut [f64; 4] {
        self.values.entry(*state).or_insert(ZERO_ROW)
    }

    pub fn get(&mut self, state: &State, action: Movement) -> f64 {
        self.row_mut(state)[action.index()]
    }

    pub fn best_action(&mut self, state: &State) -> Movement {
        let row = *self.row_mut(state);
        argmax(&row)
    }

    /// Largest of the four values of `state`.
    pub fn max_value(&mut self, state: &State) -> f64 {
        let row = *self.row_mut(state);
        row.iter().copied().map(OrderedFloat).max().map_or(0.0, |v| v.0)
    }

    /// Q(s,a) <- Q(s,a) + alpha * (reward + gamma * max_a' Q(s',a') - Q(s,a))
    ///
    /// Returns the value before and after the update.
    pub fn update(&mut self, state: &State, action: Movement, reward: f64, next_state: &State) -> (f64, f64) {
        let next_best = self.max_value(next_state);
        let (learning_rate, discount) = (self.learning_rate, self.discount);
        let value = &mut self.row_mut(state)[action.index()];
        let old = *value;
        *value += learning_rate * (reward + discount * next_best - old);
        (old, *value)
    }

    /// Best action and its value without creating a row for unseen states.
    pub fn greedy(&self, state: &State) -> (Movement, f64) {
        let row = self.values.get(state).unwrap_or(&ZERO_ROW);
        let action = argmax(row);
        (action, row[action.index()])
    }

    pub fn contains(&self, state: &State) -> bool {
        self.values.contains_key(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> + '_ {
        self.values.keys()
    }

    /// Number of states with a row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// First action in `Movement::ALL` order wins a tie.
fn argmax(row: &[f64; 4]) -> Movement {
    Movement::ALL.iter().copied().fold(Movement::Up, |best, a| {
        if row[a.index()] > row[best.index()] { a } else { best }
    })
}

pub trait ExplorationStrategy {
    fn choose(&mut self, state: &State, q_table: &mut QTable) -> Movement;
}

/// Explores with probability `epsilon`, otherwise follows the table.
pub struct EpsilonGreedy {
    epsilon: f64,
    rng: StdRng,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64, rng: StdRng) -> Self {
        EpsilonGreedy { epsilon, rng }
    }

    pub fn seeded(epsilon: f64, seed: u64) -> Self {
        Self::new(epsilon, StdRng::seed_from_u64(seed))
    }
}

impl ExplorationStrategy for EpsilonGreedy {
    fn choose(&mut self, state: &State, q_table: &mut QTable) -> Movement {
        if self.rng.gen::<f64>() < self.epsilon {
            return self.rng.gen::<Movement>();
        }
        q_table.best_action(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Point;
    use float_eq::*;

    fn state(x: i32, y: i32, moves: u32) -> State {
        State::new(Point::new(x, y), moves)
    }

    #[test]
    fn unseen_values_default_to_zero() {
        let mut q = QTable::new(0.5, 0.9);
        let s = state(2, 3, 1);
        for action in Movement::ALL {
            assert_eq!(q.get(&s, action), 0.0);
        }
        assert!(q.contains(&s));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn ties_go_to_first_action() {
        let mut q = QTable::new(0.5, 0.9);
        assert_eq!(q.best_action(&state(0, 0, 0)), Movement::Up);
    }

    #[test]
    fn ties_between_later_actions_keep_enumeration_order() {
        let mut q = QTable::new(1.0, 0.0);
        let s = state(0, 0, 0);
        let next = state(0, 1, 1);
        q.update(&s, Movement::Right, 2.0, &next);
        q.update(&s, Movement::Left, 2.0, &next);
        assert_eq!(q.best_action(&s), Movement::Right);
        q.update(&s, Movement::Up, -1.0, &next);
        q.update(&s, Movement::Down, -1.0, &next);
        assert_eq!(q.greedy(&s), (Movement::Right, 2.0));
    }

    #[test]
    fn update_follows_bellman() {
        let mut q = QTable::new(0.5, 0.9);
        let s = state(0, 0, 0);
        let next = state(0, 1, 1);
        q.update(&next, Movement::Down, 4.0, &state(5, 5, 0));
        // Q(next, Down) = 0.5 * 4.0
        let (old, new) = q.update(&s, Movement::Right, -1.0, &next);
        assert_eq!(old, 0.0);
        assert_float_eq!(new, 0.5 * (-1.0 + 0.9 * 2.0), abs <= 1e-12);
        assert_float_eq!(q.get(&s, Movement::Right), new, abs <= 1e-12);
    }

    #[test]
    fn update_matches_formula_for_random_parameters() {
        let mut rng = StdRng::seed_from_u64(2718);
        for _ in 0..500 {
            let alpha: f64 = rng.gen_range(0.01..=1.0);
            let gamma: f64 = rng.gen_range(0.01..=1.0);
            let reward: f64 = rng.gen_range(-10.0..10.0);
            let mut q = QTable::new(alpha, gamma);
            let s = state(1, 1, 0);
            let next = state(1, 2, 1);
            let seeded: f64 = rng.gen_range(-5.0..5.0);
            q.update(&next, Movement::Left, seeded, &state(9, 9, 9));
            let prior: f64 = rng.gen_range(-5.0..5.0);
            q.update(&s, Movement::Up, prior, &state(9, 9, 9));

            let old = q.get(&s, Movement::Up);
            let next_best = q.max_value(&next);
            let expected = old + alpha * (reward + gamma * next_best - old);
            let (_, new) = q.update(&s, Movement::Up, reward, &next);
            assert_float_eq!(new, expected, abs <= 1e-9);
            assert_float_eq!(q.get(&s, Movement::Up), expected, abs <= 1e-9);
        }
    }

    #[test]
    fn self_loop_uses_value_before_update() {
        let mut q = QTable::new(0.5, 1.0);
        let s = state(0, 0, 0);
        let (_, first) = q.update(&s, Movement::Up, 2.0, &s);
        assert_float_eq!(first, 1.0, abs <= 1e-12);
        let (_, second) = q.update(&s, Movement::Up, 2.0, &s);
        assert_float_eq!(second, 1.0 + 0.5 * (2.0 + 1.0 - 1.0), abs <= 1e-12);
    }

    #[test]
    fn greedy_does_not_insert_rows() {
        let q = QTable::new(0.5, 0.9);
        assert_eq!(q.greedy(&state(4, 4, 2)), (Movement::Up, 0.0));
        assert!(q.is_empty());
    }

    #[test]
    fn epsilon_zero_always_exploits() {
        let mut q = QTable::new(1.0, 0.0);
        let s = state(0, 0, 0);
        q.update(&s, Movement::Left, 3.0, &state(0, 1, 1));
        let mut strategy = EpsilonGreedy::seeded(0.0, 11);
        for _ in 0..100 {
            assert_eq!(strategy.choose(&s, &mut q), Movement::Left);
        }
    }

    #[test]
    fn epsilon_one_explores_every_action() {
        let mut q = QTable::new(1.0, 0.0);
        let s = state(0, 0, 0);
        let mut strategy = EpsilonGreedy::seeded(1.0, 11);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[strategy.choose(&s, &mut q).index()] = true;
        }
        assert_eq!(seen, [true; 4]);
    }

    #[test]
    fn same_seed_same_choices() {
        let mut q = QTable::new(1.0, 0.0);
        let s = state(0, 0, 0);
        let mut a = EpsilonGreedy::seeded(0.5, 99);
        let mut b = EpsilonGreedy::seeded(0.5, 99);
        let left: Vec<Movement> = (0..50).map(|_| a.choose(&s, &mut q)).collect();
        let right: Vec<Movement> = (0..50).map(|_| b.choose(&s, &mut q)).collect();
        assert_eq!(left, right);
    }
}
