use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::environment::{Grid, Movement, Point, State};
use crate::error::{Error, Result};
use crate::rl::QTable;

/// Greedy action for one (location, moves) state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyEntry {
    pub location: Point,
    /// `max_distance - moves`
    pub remaining: u32,
    pub action: Movement,
    pub value: f64,
}

impl fmt::Display for PolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}), {}, {:.2}",
            self.location.x, self.location.y, self.remaining, self.action, self.value
        )
    }
}

/// Reads the greedy policy for every open cell and every `moves` value from
/// `max_distance` down to 0. Row-major over cells. Unvisited states report
/// `UP` with value 0.
pub fn extract_policy(grid: &Grid, q_table: &QTable) -> Vec<PolicyEntry> {
    let max_distance = grid.max_distance();
    grid.open_cells()
        .flat_map(|location| {
            (0..=max_distance).rev().map(move |moves| {
                let (action, value) = q_table.greedy(&State::new(location, moves));
                PolicyEntry {
                    location,
                    remaining: max_distance - moves,
                    action,
                    value,
                }
            })
        })
        .collect()
}

pub fn write_policy<W: Write>(mut writer: W, policy: &[PolicyEntry]) -> std::io::Result<()> {
    for entry in policy {
        writeln!(writer, "{}", entry)?;
    }
    writer.flush()
}

pub fn save_policy<P: AsRef<Path>>(path: P, policy: &[PolicyEntry]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| Error::io(format!("create policy file {}", path.display()), e))?;
    write_policy(BufWriter::new(file), policy)
        .map_err(|e| Error::io(format!("write policy file {}", path.display()), e))
}
