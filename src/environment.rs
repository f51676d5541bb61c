use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::ops::Add;
use std::path::Path;

use ndarray::Array2;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// Action
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Movement {
    Up,
    Down,
    Right,
    Left,
}

impl Movement {
    /// Every action, in the order used to break ties between equal values.
    pub const ALL: [Movement; 4] = [Movement::Up, Movement::Down, Movement::Right, Movement::Left];

    pub fn into_vector(self) -> Point {
        match self {
            Movement::Up    => Point::new(-1, 0),
            Movement::Down  => Point::new( 1, 0),
            Movement::Right => Point::new( 0, 1),
            Movement::Left  => Point::new( 0,-1),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Movement::Up => 0,
            Movement::Down => 1,
            Movement::Right => 2,
            Movement::Left => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Movement::Up => "UP",
            Movement::Down => "DOWN",
            Movement::Right => "RIGHT",
            Movement::Left => "LEFT",
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Distribution<Movement> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Movement {
        Movement::ALL[rng.gen_range(0..Movement::ALL.len())]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cell {
    Wall,
    Checkpoint,
    Goal,
    Floor(char),
}

impl Cell {
    pub fn from_symbol(symbol: char) -> Self {
        match symbol {
            '*' => Cell::Wall,
            '#' => Cell::Checkpoint,
            '$' => Cell::Goal,
            other => Cell::Floor(other),
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Cell::Wall => '*',
            Cell::Checkpoint => '#',
            Cell::Goal => '$',
            Cell::Floor(symbol) => symbol,
        }
    }

    /// Cells an episode may start on, and the ones that appear in a policy.
    pub fn is_open(self) -> bool {
        !matches!(self, Cell::Wall | Cell::Goal)
    }
}

/// Which coordinates a move may land on.
///
/// `Legacy` accepts the closed range `[-1, dim - 1]` on each axis, with
/// `-1` looking up the cell on the opposite edge. `Strict` accepts
/// `[0, dim - 1]` only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    #[default]
    Legacy,
    Strict,
}

impl BoundaryMode {
    fn accepts(self, coord: i32, dim: usize) -> bool {
        let lower = match self {
            BoundaryMode::Legacy => -1,
            BoundaryMode::Strict => 0,
        };
        coord >= lower && (coord as i64) < dim as i64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    pub location: Point,
    /// Steps taken since the last checkpoint or since the episode started.
    pub moves: u32,
}

impl State {
    pub const fn new(location: Point, moves: u32) -> Self {
        Self { location, moves }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} moves={}", self.location, self.moves)
    }
}

/// The static map together with the distance after which an agent is lost.
#[derive(Debug, Clone)]
pub struct Grid {
    map: Array2<Cell>,
    max_distance: u32,
    boundary: BoundaryMode,
}

impl Grid {
    pub fn new(map: Array2<Cell>, max_distance: u32) -> Result<Self> {
        if map.is_empty() {
            return Err(Error::InvalidGrid {
                message: "grid has no cells".to_string(),
            });
        }
        Ok(Self {
            map,
            max_distance,
            boundary: BoundaryMode::default(),
        })
    }

    pub fn with_boundary(mut self, boundary: BoundaryMode) -> Self {
        self.boundary = boundary;
        self
    }

    /// Parses `height width max_distance` followed by `height` rows of
    /// `width` cell symbols.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines.next().ok_or_else(|| Error::MalformedHeader {
            header: String::new(),
            reason: "grid file is empty".to_string(),
        })?;
        let (height, width, max_distance) = parse_header(header)?;

        let mut rows: Vec<&str> = lines.collect();
        while rows.last().map_or(false, |row| row.is_empty()) {
            rows.pop();
        }
        if rows.len() != height {
            return Err(Error::InvalidGrid {
                message: format!("expected {} rows, found {}", height, rows.len()),
            });
        }

        let mut cells = Vec::with_capacity(height * width);
        for (i, row) in rows.iter().enumerate() {
            let len = row.chars().count();
            if len != width {
                return Err(Error::InvalidGrid {
                    message: format!("row {} has {} cells, expected {}", i, len, width),
                });
            }
            cells.extend(row.chars().map(Cell::from_symbol));
        }

        let map = Array2::from_shape_vec((height, width), cells).map_err(|e| Error::InvalidGrid {
            message: e.to_string(),
        })?;
        Grid::new(map, max_distance)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading grid");
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read grid file {}", path.display()), e))?;
        let grid = Grid::parse(&text)?;
        let (height, width) = grid.size();
        info!(height, width, max_distance = grid.max_distance, "Grid loaded");
        debug!("Grid:\n{}", grid);
        Ok(grid)
    }

    /// (height, width)
    pub fn size(&self) -> (usize, usize) {
        self.map.dim()
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn boundary(&self) -> BoundaryMode {
        self.boundary
    }

    /// Cell kind at `location`. Under `BoundaryMode::Legacy` a coordinate of
    /// `-1` counts from the far edge.
    pub fn cell(&self, location: Point) -> Option<Cell> {
        let (height, width) = self.size();
        let x = resolve_index(location.x, height)?;
        let y = resolve_index(location.y, width)?;
        if self.boundary == BoundaryMode::Strict && (location.x < 0 || location.y < 0) {
            return None;
        }
        Some(self.map[[x, y]])
    }

    /// True when `location` is one of the `height * width` stored cells.
    pub fn contains(&self, location: Point) -> bool {
        let (height, width) = self.size();
        location.x >= 0
            && location.y >= 0
            && (location.x as usize) < height
            && (location.y as usize) < width
    }

    pub fn is_open(&self, location: Point) -> bool {
        self.contains(location) && self.map[[location.x as usize, location.y as usize]].is_open()
    }

    pub fn is_goal(&self, location: Point) -> bool {
        self.cell(location) == Some(Cell::Goal)
    }

    /// Applies `movement` to `state`. Moves out of bounds or into a wall
    /// leave the agent where it was; `moves` resets on a checkpoint and
    /// grows by one everywhere else.
    pub fn step(&self, state: &State, movement: Movement) -> State {
        let (height, width) = self.size();
        let mut location = state.location + movement.into_vector();

        if !self.boundary.accepts(location.x, height) {
            location = state.location;
        }
        if !self.boundary.accepts(location.y, width) {
            location = state.location;
        }
        if self.cell(location) == Some(Cell::Wall) {
            location = state.location;
        }

        let moves = match self.cell(location) {
            Some(Cell::Checkpoint) => 0,
            _ => state.moves + 1,
        };
        State::new(location, moves)
    }

    pub fn iter(&self) -> EnvIter {
        EnvIter::new(self.size())
    }

    pub fn open_cells(&self) -> impl Iterator<Item = Point> + '_ {
        self.iter().filter(move |p| self.is_open(*p))
    }

    fn is_terminal(&self, state: &State) -> bool {
        state.moves > self.max_distance || self.is_goal(state.location)
    }

    /// Open cells an episode can start on: every state reachable from them
    /// can still reach the goal or get lost. A checkpoint walled in on every
    /// side is left out, since `moves` never grows there.
    pub fn start_cells(&self) -> HashSet<Point> {
        let mut predecessors: HashMap<State, Vec<State>> = HashMap::new();
        let mut seen: HashSet<State> = HashSet::new();
        let mut queue: VecDeque<State> = self.open_cells().map(|p| State::new(p, 0)).collect();

        while let Some(state) = queue.pop_front() {
            if !seen.insert(state) || self.is_terminal(&state) {
                continue;
            }
            for movement in Movement::ALL {
                let next = self.step(&state, movement);
                predecessors.entry(next).or_default().push(state);
                if !seen.contains(&next) {
                    queue.push_back(next);
                }
            }
        }

        let can_end = backward_closure(seen.iter().copied().filter(|s| self.is_terminal(s)), &predecessors);
        let doomed = seen.iter().copied().filter(|s| !can_end.contains(s));
        let trapped = backward_closure(doomed, &predecessors);

        self.open_cells()
            .filter(|p| !trapped.contains(&State::new(*p, 0)))
            .collect()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (height, width) = self.size();
        write!(f, "{} {} {}", height, width, self.max_distance)?;
        for row in self.map.rows() {
            writeln!(f)?;
            for cell in row.iter() {
                write!(f, "{}", cell.symbol())?;
            }
        }
        Ok(())
    }
}

// Every state with a path into `seeds`, seeds included.
fn backward_closure(
    seeds: impl Iterator<Item = State>,
    predecessors: &HashMap<State, Vec<State>>,
) -> HashSet<State> {
    let mut reached: HashSet<State> = HashSet::new();
    let mut stack: Vec<State> = seeds.collect();
    while let Some(state) = stack.pop() {
        if !reached.insert(state) {
            continue;
        }
        if let Some(previous) = predecessors.get(&state) {
            stack.extend(previous.iter().copied().filter(|p| !reached.contains(p)));
        }
    }
    reached
}

fn resolve_index(coord: i32, dim: usize) -> Option<usize> {
    let dim = dim as i64;
    let coord = coord as i64;
    let index = if coord < 0 { dim + coord } else { coord };
    if (0..dim).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

fn parse_header(header: &str) -> Result<(usize, usize, u32)> {
    let malformed = |reason: String| Error::MalformedHeader {
        header: header.to_string(),
        reason,
    };
    let tokens: Vec<&str> = header.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(malformed(format!("expected 3 values, found {}", tokens.len())));
    }
    let height = tokens[0]
        .parse::<usize>()
        .map_err(|e| malformed(format!("height '{}': {}", tokens[0], e)))?;
    let width = tokens[1]
        .parse::<usize>()
        .map_err(|e| malformed(format!("width '{}': {}", tokens[1], e)))?;
    let max_distance = tokens[2]
        .parse::<i64>()
        .map_err(|e| malformed(format!("max_distance '{}': {}", tokens[2], e)))?;
    let max_distance = u32::try_from(max_distance).map_err(|_| {
        if max_distance < 0 {
            malformed("max_distance must be non-negative".to_string())
        } else {
            malformed(format!("max_distance {} is too large", max_distance))
        }
    })?;
    if height == 0 || width == 0 {
        return Err(malformed("height and width must be positive".to_string()));
    }
    Ok((height, width, max_distance))
}

/// Row-major walk over every coordinate of a grid.
pub struct EnvIter {
    currx: usize,
    curry: usize,
    size: (usize, usize),
}

impl EnvIter {
    fn new(size: (usize, usize)) -> EnvIter {
        EnvIter {
            currx: 0,
            curry: 0,
            size,
        }
    }
}

impl Iterator for EnvIter {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let (height, width) = self.size;
        if width == 0 || self.currx >= height {
            return None;
        }
        let pos = Point::new(self.currx as i32, self.curry as i32);
        self.curry += 1;
        if self.curry == width {
            self.curry = 0;
            self.currx += 1;
        }
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rstest::rstest;

    const SMALL: &str = "3 3 5\n...\n.#.\n..$\n";

    fn walled() -> Grid {
        Grid::parse("3 4 3\n.*..\n.*#.\n...$\n").unwrap()
    }

    #[test]
    fn parses_header_and_cells() {
        let grid = Grid::parse(SMALL).unwrap();
        assert_eq!(grid.size(), (3, 3));
        assert_eq!(grid.max_distance(), 5);
        assert_eq!(grid.cell(Point::new(1, 1)), Some(Cell::Checkpoint));
        assert_eq!(grid.cell(Point::new(2, 2)), Some(Cell::Goal));
        assert_eq!(grid.cell(Point::new(0, 0)), Some(Cell::Floor('.')));
    }

    #[rstest]
    #[case("3 3\n...\n...\n...\n")]
    #[case("3 3 5 1\n...\n...\n...\n")]
    #[case("3 x 5\n...\n...\n...\n")]
    #[case("")]
    fn rejects_malformed_header(#[case] text: &str) {
        assert!(matches!(Grid::parse(text), Err(Error::MalformedHeader { .. })));
    }

    #[test]
    fn negative_max_distance_has_its_own_reason() {
        match Grid::parse("3 3 -5\n...\n...\n...\n") {
            Err(Error::MalformedHeader { reason, .. }) => {
                assert_eq!(reason, "max_distance must be non-negative")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case("2 3 5\n...\n")]
    #[case("2 3 5\n...\n..\n")]
    #[case("1 3 5\n....\n")]
    fn rejects_mismatched_rows(#[case] text: &str) {
        assert!(matches!(Grid::parse(text), Err(Error::InvalidGrid { .. })));
    }

    #[test]
    fn display_round_trips_the_map() {
        let grid = walled();
        assert_eq!(grid.to_string(), "3 4 3\n.*..\n.*#.\n...$");
    }

    #[test]
    fn wall_blocks_movement() {
        let grid = walled();
        let state = State::new(Point::new(0, 0), 2);
        let next = grid.step(&state, Movement::Right);
        assert_eq!(next.location, state.location);
        assert_eq!(next.moves, 3);
    }

    #[test]
    fn checkpoint_resets_moves() {
        let grid = walled();
        let state = State::new(Point::new(0, 2), 3);
        let next = grid.step(&state, Movement::Down);
        assert_eq!(next, State::new(Point::new(1, 2), 0));
    }

    #[test]
    fn blocked_on_checkpoint_still_resets_moves() {
        let grid = walled();
        let state = State::new(Point::new(1, 2), 2);
        let next = grid.step(&state, Movement::Left);
        assert_eq!(next, State::new(Point::new(1, 2), 0));
    }

    #[test]
    fn legacy_bounds_accept_minus_one() {
        let grid = Grid::parse(SMALL).unwrap();
        let state = State::new(Point::new(0, 0), 0);
        let next = grid.step(&state, Movement::Up);
        assert_eq!(next.location, Point::new(-1, 0));
        // -1 looks up the bottom row
        assert_eq!(grid.cell(next.location), Some(Cell::Floor('.')));

        let further = grid.step(&next, Movement::Up);
        assert_eq!(further.location, next.location);
    }

    #[test]
    fn legacy_minus_one_sees_far_edge_walls() {
        let grid = Grid::parse("2 2 3\n..\n*.\n").unwrap();
        let state = State::new(Point::new(0, 0), 0);
        assert_eq!(grid.step(&state, Movement::Up).location, state.location);
    }

    #[test]
    fn strict_bounds_reject_minus_one() {
        let grid = Grid::parse(SMALL).unwrap().with_boundary(BoundaryMode::Strict);
        let state = State::new(Point::new(0, 0), 0);
        assert_eq!(grid.step(&state, Movement::Up).location, state.location);
        assert_eq!(grid.step(&state, Movement::Left).location, state.location);
        assert_eq!(grid.cell(Point::new(-1, 0)), None);
    }

    #[rstest]
    #[case(BoundaryMode::Legacy, -1)]
    #[case(BoundaryMode::Strict, 0)]
    fn step_never_leaves_permitted_range(#[case] boundary: BoundaryMode, #[case] lower: i32) {
        let grid = Grid::parse("4 5 6\n.*...\n..#..\n*...*\n...$.\n")
            .unwrap()
            .with_boundary(boundary);
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = State::new(Point::new(1, 0), 0);
        for _ in 0..5_000 {
            let movement: Movement = rng.gen();
            let next = grid.step(&state, movement);
            assert!(next.location.x >= lower && next.location.x <= 3);
            assert!(next.location.y >= lower && next.location.y <= 4);
            assert_ne!(grid.cell(next.location), Some(Cell::Wall));
            let candidate = state.location + movement.into_vector();
            if next.location != candidate {
                assert_eq!(next.location, state.location);
            }
            state = next;
        }
    }

    #[test]
    fn iter_is_row_major() {
        let grid = Grid::parse("2 3 1\n...\n...\n").unwrap();
        let points: Vec<Point> = grid.iter().collect();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], Point::new(0, 0));
        assert_eq!(points[2], Point::new(0, 2));
        assert_eq!(points[3], Point::new(1, 0));
    }

    #[test]
    fn open_cells_skip_walls_and_goal() {
        let grid = walled();
        assert_eq!(grid.open_cells().count(), 12 - 2 - 1);
    }

    #[test]
    fn walled_in_checkpoint_is_not_a_start_cell() {
        for boundary in [BoundaryMode::Legacy, BoundaryMode::Strict] {
            let grid = Grid::parse("3 3 2\n.#.\n#*#\n.#$\n").unwrap().with_boundary(boundary);
            let starts = grid.start_cells();
            assert!(!starts.contains(&Point::new(1, 1)));
            assert!(starts.contains(&Point::new(0, 0)));
            assert!(starts.contains(&Point::new(2, 0)));
            assert_eq!(starts.len(), 3);
        }
    }

    #[test]
    fn isolated_checkpoints_are_not_start_cells() {
        let grid = Grid::parse("3 3 1\n*#*\n###\n*#*\n")
            .unwrap()
            .with_boundary(BoundaryMode::Strict);
        assert!(grid.start_cells().is_empty());

        // Bumping into walls still uses up moves, so a walled-in floor cell ends.
        let grid = Grid::parse("3 3 1\n*#*\n#.#\n*#*\n")
            .unwrap()
            .with_boundary(BoundaryMode::Strict);
        assert_eq!(grid.start_cells(), HashSet::from([Point::new(1, 1)]));
    }

    #[test]
    fn every_open_cell_starts_when_nothing_is_trapped() {
        let grid = Grid::parse("3 4 3\n.*..\n.*#.\n...$\n").unwrap();
        let starts = grid.start_cells();
        assert_eq!(starts.len(), grid.open_cells().count());
    }

    #[test]
    fn random_movements_cover_every_action() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = [0usize; 4];
        for _ in 0..4_000 {
            let movement: Movement = rng.gen();
            counts[movement.index()] += 1;
        }
        assert!(counts.iter().all(|&c| c > 800));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Grid::load("/nonexistent/grid.txt").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
